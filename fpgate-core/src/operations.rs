//! Single-shot device operations
//!
//! Each operation takes the device lock, opens the device, does its work and
//! always closes the device and frees the lock before returning.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use fpgate_types::{Email, Finger};

use crate::device::Reader;
use crate::error::Result;
use crate::scanner::Scanner;
use crate::session::{AttemptOutcome, IdentifyOptions, IdentifySession};

impl<S: Scanner> Reader<S> {
    /// Enroll `email` with a template of `finger`.
    ///
    /// Not retried: a failed enrollment is reported once.
    pub async fn enroll(&self, email: &Email, finger: Finger) -> Result<()> {
        let session = self.next_session_id();
        info!(session = %session, user = %email, %finger, "Enrolling");

        let lease = self.open(session).await?;
        let result = lease.enroll(email.as_str(), finger).await;
        lease.release().await;

        match &result {
            Ok(()) => info!(session = %session, user = %email, "Enrolled"),
            Err(e) => warn!(session = %session, user = %email, "Enrollment failed: {}", e),
        }

        result
    }

    /// Check a finger against the template stored for `email`
    pub async fn verify(&self, email: &Email) -> Result<bool> {
        let session = self.next_session_id();

        let lease = self.open(session).await?;
        let result = lease.verify(email.as_str()).await;
        lease.release().await;

        if let Ok(matched) = result {
            info!(session = %session, user = %email, matched, "Verified");
        }

        result
    }

    /// Run a full identification session without client interaction
    pub async fn identify(&self, options: &IdentifyOptions) -> Result<AttemptOutcome> {
        self.identify_until(options, CancellationToken::new()).await
    }

    /// Like [`identify`](Self::identify), stopping early once `cancel` fires
    pub async fn identify_until(
        &self,
        options: &IdentifyOptions,
        cancel: CancellationToken,
    ) -> Result<AttemptOutcome> {
        let id = self.next_session_id();

        let lease = self.open(id).await?;
        let mut session = IdentifySession::new(id, options.clone(), cancel);
        let outcome = session.run(&lease).await;
        lease.release().await;

        outcome
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use crate::device::ReaderConfig;
    use crate::error::{DriverError, Error};
    use crate::sim::SimulatedScanner;

    use super::*;

    fn email(s: &str) -> Email {
        Email::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_enroll_success() {
        let reader = Reader::new(SimulatedScanner::new(), ReaderConfig::default());

        reader
            .enroll(&email("alice@example.com"), Finger::RightIndex)
            .await
            .unwrap();

        assert_eq!(
            reader.scanner().enrolled(),
            vec![("alice@example.com".to_string(), Finger::RightIndex)]
        );
        assert_eq!(reader.scanner().stats().cleanup_calls(), 1);
        assert!(!reader.lock().is_held());
    }

    #[tokio::test]
    async fn test_enroll_failure_reported_once() {
        let scanner = SimulatedScanner::new().with_failing_enroll(true);
        let stats = scanner.stats();
        let reader = Reader::new(scanner, ReaderConfig::default());

        let result = reader.enroll(&email("alice@example.com"), Finger::LeftThumb).await;

        assert!(matches!(result, Err(Error::Driver(DriverError::Capture(_)))));
        assert_eq!(stats.enroll_calls(), 1);
        assert_eq!(stats.cleanup_calls(), 1);
        assert!(!reader.lock().is_held());
    }

    #[tokio::test]
    async fn test_verify() {
        let scanner = SimulatedScanner::new()
            .with_enrolled("bob@example.com", Finger::RightThumb)
            .with_reads(["BOB@example.com"]);
        let reader = Reader::new(scanner, ReaderConfig::default());

        assert!(reader.verify(&email("bob@example.com")).await.unwrap());
        assert!(matches!(
            reader.verify(&email("eve@example.com")).await,
            Err(Error::Driver(DriverError::NotEnrolled(_)))
        ));
    }

    #[tokio::test]
    async fn test_identify_without_interaction() {
        let scanner = SimulatedScanner::new().with_reads(["<no identificado>", "erin@example.com"]);
        let reader = Reader::new(scanner, ReaderConfig::default());

        let outcome = reader.identify(&IdentifyOptions::default()).await.unwrap();

        assert!(matches!(
            outcome,
            AttemptOutcome::Identified { ref identity, attempt: 2 } if identity.as_str() == "erin@example.com"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_when_lock_wait_expires() {
        let config = ReaderConfig {
            lock_wait: Some(Duration::from_millis(100)),
            ..ReaderConfig::default()
        };
        let reader = Reader::new(SimulatedScanner::new(), config);

        let _held = reader.lock().acquire(reader.next_session_id()).await.unwrap();

        let result = reader.identify(&IdentifyOptions::default()).await;
        assert!(matches!(result, Err(Error::Busy { .. })));
        assert_eq!(reader.scanner().stats().init_calls(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_operations_never_overlap() {
        let scanner = SimulatedScanner::new()
            .with_delay(Duration::from_millis(5))
            .with_fallback("<no identificado>");
        let stats = scanner.stats();
        let reader = Reader::new(scanner, ReaderConfig::default());
        let options = Arc::new(IdentifyOptions::new(3));

        let tasks: Vec<_> = (0..6)
            .map(|n| {
                let reader = reader.clone();
                let options = options.clone();
                tokio::spawn(async move {
                    if n % 2 == 0 {
                        reader.identify(&options).await.map(|_| ())
                    } else {
                        reader
                            .enroll(&email(&format!("user{}@example.com", n)), Finger::LeftIndex)
                            .await
                    }
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(stats.peak_concurrent_calls(), 1);
        assert_eq!(stats.identify_calls(), 9);
        assert_eq!(stats.enroll_calls(), 3);
        assert_eq!(stats.init_calls(), stats.cleanup_calls());
        assert!(!reader.lock().is_held());
    }
}
