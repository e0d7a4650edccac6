//! Duplex connection abstraction
//!
//! The session handler only needs to send text frames, receive frames and
//! close with a code. A WebSocket adapter implements this in the server;
//! [`MemoryChannel`] implements it over in-process queues.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::{Error, Result};

/// Inbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Text frame
    Text(String),

    /// Binary frame (never valid in this protocol)
    Binary(Vec<u8>),

    /// Peer closed the connection or it dropped
    Closed,
}

/// Bidirectional connection to one client
#[async_trait]
pub trait Channel: Send {
    /// Send one text frame
    async fn send_text(&mut self, text: String) -> Result<()>;

    /// Wait for the next inbound frame.
    ///
    /// Must be cancel-safe: dropping the future must not lose a frame.
    async fn recv(&mut self) -> Inbound;

    /// Close the connection with a WebSocket-style code
    async fn close(&mut self, code: u16, reason: &str) -> Result<()>;

    /// Peer description for logs
    fn peer(&self) -> String;
}

/// Frame the server sent to a [`MemoryPeer`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close { code: u16, reason: String },
}

/// Server end of an in-process connection
pub struct MemoryChannel {
    name: String,
    inbound: mpsc::UnboundedReceiver<Inbound>,
    outbound: mpsc::UnboundedSender<Outbound>,
}

/// Client end of an in-process connection
///
/// Dropping it disconnects the client.
pub struct MemoryPeer {
    inbound: mpsc::UnboundedSender<Inbound>,
    outbound: mpsc::UnboundedReceiver<Outbound>,
}

impl MemoryChannel {
    /// Create a connected channel / peer pair
    pub fn pair(name: impl Into<String>) -> (MemoryChannel, MemoryPeer) {
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        (
            MemoryChannel {
                name: name.into(),
                inbound: in_rx,
                outbound: out_tx,
            },
            MemoryPeer {
                inbound: in_tx,
                outbound: out_rx,
            },
        )
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn send_text(&mut self, text: String) -> Result<()> {
        trace!(peer = %self.name, "-> {}", text);
        self.outbound
            .send(Outbound::Text(text))
            .map_err(|_| Error::ConnectionClosed)
    }

    async fn recv(&mut self) -> Inbound {
        self.inbound.recv().await.unwrap_or(Inbound::Closed)
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<()> {
        self.outbound
            .send(Outbound::Close {
                code,
                reason: reason.to_string(),
            })
            .map_err(|_| Error::ConnectionClosed)
    }

    fn peer(&self) -> String {
        self.name.clone()
    }
}

impl MemoryPeer {
    /// Send a text frame to the server
    pub fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.inbound
            .send(Inbound::Text(text.into()))
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Send a binary frame to the server
    pub fn send_binary(&self, data: Vec<u8>) -> Result<()> {
        self.inbound
            .send(Inbound::Binary(data))
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Next frame from the server; `None` once the server side is gone
    pub async fn recv(&mut self) -> Option<Outbound> {
        self.outbound.recv().await
    }

    /// Next text frame; `None` on close or hang-up
    pub async fn recv_text(&mut self) -> Option<String> {
        match self.recv().await? {
            Outbound::Text(text) => Some(text),
            Outbound::Close { .. } => None,
        }
    }
}
