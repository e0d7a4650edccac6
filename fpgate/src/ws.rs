//! WebSocket adapter for the session handler

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use tracing::{debug, trace};

use fpgate_transport::{Channel, Inbound};

/// [`Channel`] over an upgraded axum WebSocket
pub struct WsChannel {
    socket: WebSocket,
    peer: String,
}

impl WsChannel {
    pub fn new(socket: WebSocket, peer: impl Into<String>) -> Self {
        Self {
            socket,
            peer: peer.into(),
        }
    }
}

#[async_trait]
impl Channel for WsChannel {
    async fn send_text(&mut self, text: String) -> fpgate_transport::Result<()> {
        trace!(peer = %self.peer, "-> {}", text);
        self.socket
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| fpgate_transport::Error::Send(e.to_string()))
    }

    async fn recv(&mut self) -> Inbound {
        loop {
            match self.socket.recv().await {
                Some(Ok(Message::Text(text))) => {
                    trace!(peer = %self.peer, "<- {}", text.as_str());
                    return Inbound::Text(text.as_str().to_owned());
                }
                Some(Ok(Message::Binary(data))) => return Inbound::Binary(data.to_vec()),
                // Pings are answered by the socket itself
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(Message::Close(frame))) => {
                    debug!(peer = %self.peer, ?frame, "Close frame received");
                    return Inbound::Closed;
                }
                Some(Err(e)) => {
                    debug!(peer = %self.peer, "WebSocket error: {}", e);
                    return Inbound::Closed;
                }
                None => return Inbound::Closed,
            }
        }
    }

    async fn close(&mut self, code: u16, reason: &str) -> fpgate_transport::Result<()> {
        let frame = CloseFrame {
            code,
            reason: reason.to_owned().into(),
        };

        self.socket
            .send(Message::Close(Some(frame)))
            .await
            .map_err(|e| fpgate_transport::Error::Send(e.to_string()))
    }

    fn peer(&self) -> String {
        self.peer.clone()
    }
}
