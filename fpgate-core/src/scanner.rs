//! Fingerprint driver capability
//!
//! Every method blocks the calling thread until the device answers, so
//! callers must go through [`Offload`](crate::offload::Offload) and never
//! call these from an async context directly.

use fpgate_types::Finger;

use crate::error::DriverError;

/// Result of a single driver call
pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Blocking fingerprint driver
///
/// Implementations must tolerate being called from any blocking worker
/// thread. Mutual exclusion between calls is provided by the caller
/// ([`DeviceLock`](crate::lock::DeviceLock)); the driver may assume at most one
/// handle is live at a time.
#[cfg_attr(test, mockall::automock(type Handle = u32;))]
pub trait Scanner: Send + Sync + 'static {
    /// Open handle to the device
    type Handle: Send + 'static;

    /// Create the driver context and open the first device
    fn init(&self) -> DriverResult<Self::Handle>;

    /// Capture a finger and match it against every enrolled template.
    ///
    /// Returns the matched username, or the "not identified" sentinel when
    /// no template matches.
    fn identify(&self, handle: &mut Self::Handle) -> DriverResult<String>;

    /// Capture and store a template for `username`
    fn enroll(&self, handle: &mut Self::Handle, username: &str, finger: Finger) -> DriverResult<()>;

    /// Capture a finger and compare it with the template stored for `username`
    fn verify(&self, handle: &mut Self::Handle, username: &str) -> DriverResult<bool>;

    /// Close the device and release the driver context
    fn cleanup(&self, handle: Self::Handle);
}
