//! Simulated fingerprint reader
//!
//! Plays back a script of identify results, keeps enrolled templates in
//! memory and counts every driver call. Used by the demo binary when no
//! hardware is attached, and by tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use tracing::{debug, trace};

use fpgate_types::Finger;

use crate::constants::NOT_IDENTIFIED;
use crate::error::DriverError;
use crate::scanner::{DriverResult, Scanner};

/// Scripted identify result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimResponse {
    /// Driver returns this string (a username or the sentinel)
    Read(String),

    /// Driver fails
    Fault(DriverError),
}

/// Handle issued by [`SimulatedScanner::init`]
#[derive(Debug)]
pub struct SimHandle {
    id: u64,
}

impl SimHandle {
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Driver call counters
#[derive(Debug, Default)]
pub struct SimStats {
    init: AtomicU32,
    identify: AtomicU32,
    enroll: AtomicU32,
    verify: AtomicU32,
    cleanup: AtomicU32,
    in_flight: AtomicU32,
    peak: AtomicU32,
}

impl SimStats {
    pub fn init_calls(&self) -> u32 {
        self.init.load(Ordering::SeqCst)
    }

    pub fn identify_calls(&self) -> u32 {
        self.identify.load(Ordering::SeqCst)
    }

    pub fn enroll_calls(&self) -> u32 {
        self.enroll.load(Ordering::SeqCst)
    }

    pub fn verify_calls(&self) -> u32 {
        self.verify.load(Ordering::SeqCst)
    }

    pub fn cleanup_calls(&self) -> u32 {
        self.cleanup.load(Ordering::SeqCst)
    }

    /// Highest number of driver calls ever observed running at once
    pub fn peak_concurrent_calls(&self) -> u32 {
        self.peak.load(Ordering::SeqCst)
    }

    fn enter(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        InFlight(self)
    }
}

struct InFlight<'a>(&'a SimStats);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// In-memory stand-in for the fingerprint driver
#[derive(Debug)]
pub struct SimulatedScanner {
    script: parking_lot::Mutex<VecDeque<SimResponse>>,
    fallback: String,
    delay: Duration,
    fail_enroll: bool,
    enrolled: parking_lot::Mutex<HashMap<String, Finger>>,
    next_handle: AtomicU64,
    stats: Arc<SimStats>,
}

impl SimulatedScanner {
    /// Scanner that never identifies anybody
    pub fn new() -> Self {
        Self {
            script: parking_lot::Mutex::new(VecDeque::new()),
            fallback: NOT_IDENTIFIED.to_lowercase(),
            delay: Duration::ZERO,
            fail_enroll: false,
            enrolled: parking_lot::Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            stats: Arc::new(SimStats::default()),
        }
    }

    /// Queue identify results, returned in order
    pub fn with_reads<I, T>(self, reads: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.script
            .lock()
            .extend(reads.into_iter().map(|r| SimResponse::Read(r.into())));
        self
    }

    /// Queue one failing identify call
    pub fn with_fault(self, error: DriverError) -> Self {
        self.script.lock().push_back(SimResponse::Fault(error));
        self
    }

    /// Result once the script is exhausted
    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback = fallback.into();
        self
    }

    /// Time every capture takes
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Make every enroll fail with a capture error
    pub fn with_failing_enroll(mut self, fail: bool) -> Self {
        self.fail_enroll = fail;
        self
    }

    /// Pre-enroll a user
    pub fn with_enrolled(self, username: impl Into<String>, finger: Finger) -> Self {
        self.enrolled.lock().insert(username.into(), finger);
        self
    }

    /// Shared call counters
    pub fn stats(&self) -> Arc<SimStats> {
        Arc::clone(&self.stats)
    }

    /// Users enrolled so far
    pub fn enrolled(&self) -> Vec<(String, Finger)> {
        let mut users: Vec<_> = self
            .enrolled
            .lock()
            .iter()
            .map(|(u, f)| (u.clone(), *f))
            .collect();
        users.sort_by(|a, b| a.0.cmp(&b.0));
        users
    }

    fn capture(&self) {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
    }
}

impl Default for SimulatedScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl Scanner for SimulatedScanner {
    type Handle = SimHandle;

    fn init(&self) -> DriverResult<SimHandle> {
        self.stats.init.fetch_add(1, Ordering::SeqCst);
        let _call = self.stats.enter();

        let id = self.next_handle.fetch_add(1, Ordering::SeqCst);
        debug!(handle = id, "Simulated reader opened");
        Ok(SimHandle { id })
    }

    fn identify(&self, handle: &mut SimHandle) -> DriverResult<String> {
        self.stats.identify.fetch_add(1, Ordering::SeqCst);
        let _call = self.stats.enter();

        self.capture();

        let next = self.script.lock().pop_front();
        trace!(handle = handle.id, ?next, "Simulated identify");

        match next {
            Some(SimResponse::Read(value)) => Ok(value),
            Some(SimResponse::Fault(error)) => Err(error),
            None => Ok(self.fallback.clone()),
        }
    }

    fn enroll(&self, handle: &mut SimHandle, username: &str, finger: Finger) -> DriverResult<()> {
        self.stats.enroll.fetch_add(1, Ordering::SeqCst);
        let _call = self.stats.enter();

        self.capture();

        if self.fail_enroll {
            return Err(DriverError::Capture("enrollment stage failed".into()));
        }

        trace!(handle = handle.id, username, %finger, "Simulated enroll");
        self.enrolled.lock().insert(username.to_string(), finger);
        Ok(())
    }

    fn verify(&self, handle: &mut SimHandle, username: &str) -> DriverResult<bool> {
        self.stats.verify.fetch_add(1, Ordering::SeqCst);
        let _call = self.stats.enter();

        if !self.enrolled.lock().contains_key(username) {
            return Err(DriverError::NotEnrolled(username.to_string()));
        }

        self.capture();

        // Matches when the next scripted read is this user
        let matched = match self.script.lock().pop_front() {
            Some(SimResponse::Read(value)) => value.eq_ignore_ascii_case(username),
            Some(SimResponse::Fault(error)) => return Err(error),
            None => false,
        };

        trace!(handle = handle.id, username, matched, "Simulated verify");
        Ok(matched)
    }

    fn cleanup(&self, handle: SimHandle) {
        self.stats.cleanup.fetch_add(1, Ordering::SeqCst);
        let _call = self.stats.enter();

        debug!(handle = handle.id, "Simulated reader closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_script_then_fallback() {
        let scanner = SimulatedScanner::new().with_reads(["<NO IDENTIFICADO>", "alice@example.com"]);
        let mut handle = scanner.init().unwrap();

        assert_eq!(scanner.identify(&mut handle).unwrap(), "<NO IDENTIFICADO>");
        assert_eq!(scanner.identify(&mut handle).unwrap(), "alice@example.com");
        assert_eq!(scanner.identify(&mut handle).unwrap(), "<no identificado>");

        scanner.cleanup(handle);

        let stats = scanner.stats();
        assert_eq!(stats.init_calls(), 1);
        assert_eq!(stats.identify_calls(), 3);
        assert_eq!(stats.cleanup_calls(), 1);
        assert_eq!(stats.peak_concurrent_calls(), 1);
    }

    #[test]
    fn test_fault() {
        let scanner = SimulatedScanner::new().with_fault(DriverError::Gallery("missing".into()));
        let mut handle = scanner.init().unwrap();

        assert_eq!(
            scanner.identify(&mut handle),
            Err(DriverError::Gallery("missing".into()))
        );
    }

    #[test]
    fn test_enroll_and_verify() {
        let scanner = SimulatedScanner::new().with_reads(["bob@example.com", "eve@example.com"]);
        let mut handle = scanner.init().unwrap();

        assert_eq!(
            scanner.verify(&mut handle, "bob@example.com"),
            Err(DriverError::NotEnrolled("bob@example.com".into()))
        );

        scanner
            .enroll(&mut handle, "bob@example.com", Finger::LeftIndex)
            .unwrap();
        assert_eq!(
            scanner.enrolled(),
            vec![("bob@example.com".to_string(), Finger::LeftIndex)]
        );

        assert!(scanner.verify(&mut handle, "bob@example.com").unwrap());
        assert!(!scanner.verify(&mut handle, "bob@example.com").unwrap());
    }

    #[test]
    fn test_failing_enroll() {
        let scanner = SimulatedScanner::new().with_failing_enroll(true);
        let mut handle = scanner.init().unwrap();

        assert!(matches!(
            scanner.enroll(&mut handle, "bob@example.com", Finger::RightIndex),
            Err(DriverError::Capture(_))
        ));
        assert!(scanner.enrolled().is_empty());
    }
}
