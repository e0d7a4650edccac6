//! # fpgate-core
//!
//! Session concurrency layer for a single shared fingerprint reader.
//!
//! This crate provides:
//! - The blocking `Scanner` driver capability
//! - `DeviceLock`, the process-wide gate on device access
//! - `Offload`, the bounded worker pool for blocking driver calls
//! - `Reader` and `Lease`, which tie lock, handle and offload together
//! - `IdentifySession`, the bounded-attempt identification state machine
//! - Single-shot enroll / verify / identify operations

pub mod constants;
pub mod device;
pub mod error;
pub mod lock;
pub mod offload;
pub mod operations;
pub mod scanner;
pub mod session;
pub mod sim;

pub use device::{Lease, Reader, ReaderConfig};
pub use error::{DriverError, Error, Result};
pub use lock::{DeviceGuard, DeviceLock};
pub use offload::{Offload, PendingCall};
pub use scanner::Scanner;
pub use session::{AttemptOutcome, IdentifyOptions, IdentifySession, SessionState};
pub use sim::SimulatedScanner;

pub use fpgate_types::{Email, Finger, Identity, LockHolder, SessionId};
pub use tokio_util::sync::CancellationToken;
