//! Type definitions for fpgate

pub mod email;
pub mod error;
pub mod finger;
pub mod identity;

pub use email::Email;
pub use error::{Error, Result};
pub use finger::{Finger, FingerEntry};
pub use identity::{Identity, LockHolder, SessionId};
