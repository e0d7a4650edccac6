//! Identification session
//!
//! A session runs at most `max_attempts` identify calls against one open
//! device and stops at the first of:
//! - a match (`Succeeded`)
//! - the last negative read (`Exhausted`)
//! - cancellation (`Cancelled`)
//! - a device fault (`Failed`)
//!
//! "Not identified" is a normal negative read, retried; a driver error is not
//! retried. The session is driven by a single owner, so its counters need no
//! synchronization.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use fpgate_types::{Identity, SessionId};

use crate::constants::{DEFAULT_MAX_ATTEMPTS, NOT_IDENTIFIED};
use crate::device::Lease;
use crate::error::{Error, Result};
use crate::scanner::Scanner;

/// Retry policy of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyOptions {
    /// Identify calls before giving up (at least 1)
    pub max_attempts: u32,

    /// Driver value meaning "no enrolled template matched"
    pub sentinel: String,
}

impl IdentifyOptions {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Check if a driver result is the "not identified" sentinel.
    ///
    /// Case-insensitive, exactly like existing clients expect.
    pub fn is_not_identified(&self, value: &str) -> bool {
        value.to_lowercase() == self.sentinel.to_lowercase()
    }
}

impl Default for IdentifyOptions {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            sentinel: NOT_IDENTIFIED.to_string(),
        }
    }
}

/// Session state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Created, no attempt made yet
    Idle,

    /// Between attempts, waiting to be told to continue
    Awaiting,

    /// Identify call dispatched
    Attempting,

    /// Matched an enrolled user
    Succeeded(Identity),

    /// Every attempt came back negative
    Exhausted,

    /// Cancelled by the client or by disconnection
    Cancelled,

    /// Device fault
    Failed(String),
}

impl SessionState {
    /// Check if no further transitions can happen
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded(_) | Self::Exhausted | Self::Cancelled | Self::Failed(_)
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Awaiting => "awaiting",
            Self::Attempting => "attempting",
            Self::Succeeded(_) => "succeeded",
            Self::Exhausted => "exhausted",
            Self::Cancelled => "cancelled",
            Self::Failed(_) => "failed",
        }
    }
}

/// What one attempt (or a whole run) ended with
#[derive(Debug)]
pub enum AttemptOutcome {
    /// User identified on attempt `attempt`
    Identified {
        identity: Identity,
        attempt: u32,
    },

    /// Negative read; more attempts remain
    NotIdentified {
        attempt: u32,
        remaining: u32,
    },

    /// Negative read on the last attempt
    Exhausted {
        attempts: u32,
    },

    /// Cancellation observed; `attempts` identify calls were dispatched
    Cancelled {
        attempts: u32,
    },

    /// Device fault on attempt `attempt`
    Failed {
        attempt: u32,
        error: Error,
    },
}

impl AttemptOutcome {
    /// Check if the session ended with this outcome
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::NotIdentified { .. })
    }
}

/// Bounded-attempt identification state machine
#[derive(Debug)]
pub struct IdentifySession {
    id: SessionId,
    options: IdentifyOptions,
    attempt: u32,
    state: SessionState,
    cancel: CancellationToken,
}

impl IdentifySession {
    /// Create an idle session observing `cancel`
    pub fn new(id: SessionId, options: IdentifyOptions, cancel: CancellationToken) -> Self {
        let options = IdentifyOptions {
            max_attempts: options.max_attempts.max(1),
            ..options
        };

        Self {
            id,
            options,
            attempt: 0,
            state: SessionState::Idle,
            cancel,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Identify calls dispatched so far
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.options.max_attempts
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Move to `Cancelled` if cancellation was requested.
    ///
    /// Returns `true` when the session is (now) cancelled.
    pub fn check_cancelled(&mut self) -> bool {
        if self.state == SessionState::Cancelled {
            return true;
        }

        if self.cancel.is_cancelled() && !self.state.is_terminal() {
            info!(session = %self.id, attempts = self.attempt, "Session cancelled");
            self.state = SessionState::Cancelled;
            return true;
        }

        false
    }

    /// Run the next identify attempt.
    ///
    /// Cancellation is checked before dispatch and raced against the device
    /// call; a call already dispatched is left to finish on its worker and
    /// its result is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSessionState`] if the session already ended or
    /// `lease` belongs to another session. Device faults are not errors here;
    /// they end the session with [`AttemptOutcome::Failed`].
    pub async fn next_attempt<S: Scanner>(&mut self, lease: &Lease<S>) -> Result<AttemptOutcome> {
        if lease.session() != self.id {
            return Err(Error::InvalidSessionState(format!(
                "lease for {} used by session {}",
                lease.session(),
                self.id
            )));
        }

        if self.check_cancelled() {
            return Ok(AttemptOutcome::Cancelled {
                attempts: self.attempt,
            });
        }

        if self.state.is_terminal() {
            return Err(Error::InvalidSessionState(format!(
                "session {} already {}",
                self.id,
                self.state.name()
            )));
        }

        self.attempt += 1;
        self.state = SessionState::Attempting;

        debug!(
            session = %self.id,
            attempt = self.attempt,
            max = self.options.max_attempts,
            "Identify attempt"
        );

        let result = tokio::select! {
            biased;

            _ = self.cancel.cancelled() => {
                debug!(session = %self.id, attempt = self.attempt, "Discarding in-flight attempt");
                None
            }
            result = lease.identify() => Some(result),
        };

        let Some(result) = result else {
            self.check_cancelled();
            return Ok(AttemptOutcome::Cancelled {
                attempts: self.attempt,
            });
        };

        Ok(self.settle(result))
    }

    /// Run attempts until the session ends
    pub async fn run<S: Scanner>(&mut self, lease: &Lease<S>) -> Result<AttemptOutcome> {
        loop {
            let outcome = self.next_attempt(lease).await?;
            if outcome.is_terminal() {
                return Ok(outcome);
            }
        }
    }

    fn settle(&mut self, result: Result<String>) -> AttemptOutcome {
        let attempt = self.attempt;

        match result {
            Ok(value) if self.options.is_not_identified(&value) => {
                if attempt >= self.options.max_attempts {
                    info!(session = %self.id, attempts = attempt, "Not identified; attempts exhausted");
                    self.state = SessionState::Exhausted;
                    AttemptOutcome::Exhausted { attempts: attempt }
                } else {
                    debug!(session = %self.id, attempt, "Not identified");
                    self.state = SessionState::Awaiting;
                    AttemptOutcome::NotIdentified {
                        attempt,
                        remaining: self.options.max_attempts - attempt,
                    }
                }
            }
            Ok(value) => {
                let identity = Identity::new(value);
                info!(session = %self.id, attempt, user = %identity, "User identified");
                self.state = SessionState::Succeeded(identity.clone());
                AttemptOutcome::Identified { identity, attempt }
            }
            Err(error) => {
                warn!(session = %self.id, attempt, "Identify failed: {}", error);
                self.state = SessionState::Failed(error.to_string());
                AttemptOutcome::Failed { attempt, error }
            }
        }
    }
}
