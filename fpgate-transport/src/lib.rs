//! Duplex session transport for fpgate
//!
//! Adapts one bidirectional connection (a WebSocket in production) to an
//! identification session: decodes client commands, streams progress and
//! results, and guarantees the device is released however the connection ends.

pub mod channel;
pub mod error;
pub mod handler;
pub mod protocol;

pub use channel::{Channel, Inbound, MemoryChannel, MemoryPeer, Outbound};
pub use error::{Error, ProtocolError, Result};
pub use handler::{Pacing, SessionProtocolHandler, SessionSummary};
pub use protocol::{ClientCommand, CloseReason, Notification};
