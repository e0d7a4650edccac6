//! Wire protocol of the identify stream
//!
//! Client → server: `{"action": "identify"}` or `{"action": "cancel_scan"}`.
//! Server → client: plain-text notices, except the match which is sent as
//! `{"user": "<identity>"}`.

use std::fmt;

use serde_json::Value;

use fpgate_core::Error as CoreError;
use fpgate_types::Identity;

use crate::error::ProtocolError;

/// Action that asks for the next attempt
pub const ACTION_IDENTIFY: &str = "identify";

/// Action that cancels the scan
pub const ACTION_CANCEL: &str = "cancel_scan";

/// Client command
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// Proceed with the next attempt
    Identify,

    /// Stop the session
    Cancel,
}

impl ClientCommand {
    /// Decode one inbound text frame
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| ProtocolError::Malformed(format!("invalid JSON: {}", e)))?;

        let object = value
            .as_object()
            .ok_or_else(|| ProtocolError::Malformed("expected a JSON object".into()))?;

        let action = object
            .get("action")
            .and_then(Value::as_str)
            .ok_or_else(|| ProtocolError::Malformed("missing string field 'action'".into()))?;

        match action {
            ACTION_IDENTIFY => Ok(Self::Identify),
            ACTION_CANCEL => Ok(Self::Cancel),
            other => Err(ProtocolError::Unrecognized(other.to_string())),
        }
    }

    /// Get the wire action name
    pub fn action(self) -> &'static str {
        match self {
            Self::Identify => ACTION_IDENTIFY,
            Self::Cancel => ACTION_CANCEL,
        }
    }

    /// Encode as a client would send it
    pub fn encode(self) -> String {
        serde_json::json!({ "action": self.action() }).to_string()
    }
}

/// Server notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Another session holds the device; queued
    Waiting,

    /// About to dispatch attempt `attempt`
    Progress {
        attempt: u32,
        max: u32,
    },

    /// Match found
    Identified {
        identity: Identity,
    },

    /// Negative read, more attempts remain
    NotIdentified {
        attempt: u32,
        remaining: u32,
    },

    /// Every attempt came back negative
    Exhausted {
        attempts: u32,
    },

    /// Scan cancelled
    Cancelled,

    /// Device lock not granted in time
    Busy,

    /// Device fault
    DeviceFailure {
        message: String,
    },

    /// Inbound message could not be parsed
    Malformed {
        reason: String,
    },

    /// Inbound command is unknown
    Unrecognized {
        action: String,
    },
}

impl Notification {
    /// Device fault notice, without repeating the error's own prefix
    pub fn device_failure(error: &CoreError) -> Self {
        let message = match error {
            CoreError::Driver(driver) => driver.to_string(),
            other => other.to_string(),
        };
        Self::DeviceFailure { message }
    }

    /// Encode as a text frame
    pub fn to_text(&self) -> String {
        match self {
            Self::Waiting => "Reader busy, waiting for the device...".to_string(),
            Self::Progress { attempt, max } => format!("Attempt {} of {}...", attempt, max),
            Self::Identified { identity } => {
                serde_json::json!({ "user": identity }).to_string()
            }
            Self::NotIdentified { attempt, remaining } => format!(
                "No fingerprint match on attempt {} ({} left), try again...",
                attempt, remaining
            ),
            Self::Exhausted { attempts } => {
                format!("User not identified after {} attempts.", attempts)
            }
            Self::Cancelled => "Scan cancelled.".to_string(),
            Self::Busy => "Device busy, try again later.".to_string(),
            Self::DeviceFailure { message } => format!("Device error: {}", message),
            Self::Malformed { reason } => format!("Malformed message: {}", reason),
            Self::Unrecognized { action } => format!("Unrecognized command: {}", action),
        }
    }
}

impl From<ProtocolError> for Notification {
    fn from(error: ProtocolError) -> Self {
        match error {
            ProtocolError::Malformed(reason) => Self::Malformed { reason },
            ProtocolError::Unrecognized(action) => Self::Unrecognized { action },
        }
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

/// Why the server ends the connection
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CloseReason {
    Identified,
    Exhausted,
    Cancelled,
    Failed,
    Busy,
}

impl CloseReason {
    /// WebSocket close code
    pub fn code(self) -> u16 {
        match self {
            Self::Identified | Self::Cancelled => 1000,
            Self::Failed => 1011,
            Self::Busy => 1013,
            Self::Exhausted => 4000,
        }
    }

    /// Close frame reason text
    pub fn reason(self) -> &'static str {
        match self {
            Self::Identified => "identified",
            Self::Exhausted => "not identified",
            Self::Cancelled => "cancelled",
            Self::Failed => "device error",
            Self::Busy => "device busy",
        }
    }
}
