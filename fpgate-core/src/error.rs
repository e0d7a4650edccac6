//! Error types for fpgate-core

use std::time::Duration;

/// Result type alias for fpgate-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Failures reported by the fingerprint driver
///
/// "Not identified" is not one of them: it is a normal negative read and
/// comes back as the sentinel string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DriverError {
    /// Driver context could not be created
    #[error("Could not create driver context")]
    NoContext,

    /// No capture device attached
    #[error("No fingerprint reader found")]
    NoDevice,

    /// Device cannot run 1:N identification
    #[error("Fingerprint reader does not support identification")]
    IdentifyUnsupported,

    /// Device could not be opened
    #[error("Failed to open fingerprint reader: {0}")]
    Open(String),

    /// Capture or matching failed on the device
    #[error("Capture failed: {0}")]
    Capture(String),

    /// Enrolled templates could not be loaded
    #[error("Enrolled gallery unavailable: {0}")]
    Gallery(String),

    /// Template could not be persisted
    #[error("Template storage failed: {0}")]
    Storage(String),

    /// No template stored for this user
    #[error("No template enrolled for {0}")]
    NotEnrolled(String),
}

/// Core errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Driver call failed
    #[error("Device error: {0}")]
    Driver(#[from] DriverError),

    /// Device call did not return in time
    #[error("Device call timed out after {elapsed:?}")]
    Timeout {
        elapsed: Duration,
    },

    /// Device lock not granted within the admission window
    #[error("Device busy: lock not granted within {waited:?}")]
    Busy {
        waited: Duration,
    },

    /// Blocking worker died before delivering a result
    #[error("Device worker failed: {0}")]
    Worker(String),

    /// Worker pool or lock has been shut down
    #[error("Device pool closed")]
    Closed,

    /// Operation not valid in the current session state
    #[error("Invalid session state: {0}")]
    InvalidSessionState(String),
}
