//! Transport errors

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Connection closed by remote")]
    ConnectionClosed,
    
    #[error("Send failed: {0}")]
    Send(String),
}

/// Problems with an inbound client message
///
/// Reported back to the client; the session carries on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Not a JSON object with a string `action`
    #[error("Malformed message: {0}")]
    Malformed(String),
    
    /// Well-formed, but the action is unknown
    #[error("Unrecognized command: {0}")]
    Unrecognized(String),
}
