//! Session constants

/// Identify attempts per session unless configured otherwise
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Value the driver returns when no enrolled template matches.
///
/// Compared case-insensitively: the driver itself reports `<no identificado>`.
pub const NOT_IDENTIFIED: &str = "<NO IDENTIFICADO>";

/// Blocking workers available for device calls
pub const DEFAULT_WORKERS: usize = 2;
