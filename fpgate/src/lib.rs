//! # fpgate
//!
//! Network gateway in front of a single fingerprint reader.
//!
//! Serves enrollment, verification and identification over HTTP, and an
//! interactive identification stream over WebSocket. All requests share one
//! device: they queue on the device lock and never touch the reader at the
//! same time.
//!
//! ## Quick Start
//!
//! ```no_run
//! use fpgate::{AppConfig, AppState, server};
//! use fpgate_core::Reader;
//!
//! #[tokio::main]
//! async fn main() -> fpgate::Result<()> {
//!     let config = AppConfig::load()?;
//!
//!     let reader = Reader::new(config.simulator(), config.reader_config());
//!     let state = AppState::new(reader, config.identify_options(), config.identify.pacing);
//!
//!     server::run(config.bind_addr()?, state).await
//! }
//! ```

pub mod config;
pub mod error;
pub mod server;
pub mod ws;

// Re-exports
pub use config::{AppConfig, Overrides};
pub use error::{Error, Result};
pub use server::{AppState, router};
pub use ws::WsChannel;
