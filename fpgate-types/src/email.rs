//! Validated e-mail address used as the enrolled username

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Maximum username length accepted by the driver's template storage
pub const MAX_EMAIL_LEN: usize = 254;

/// E-mail address
///
/// Only the structural checks that matter for a template key are applied:
/// a single `@`, a non-empty local part, a dotted domain and no whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Email(String);

impl Email {
    /// Validate and wrap an address
    pub fn parse(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        let trimmed = value.trim();

        if trimmed.is_empty() {
            return Err(Error::Validation("e-mail address is empty".into()));
        }

        if trimmed.len() > MAX_EMAIL_LEN {
            return Err(Error::Validation(format!(
                "e-mail address longer than {} characters",
                MAX_EMAIL_LEN
            )));
        }

        if trimmed.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(Error::Validation(format!("invalid e-mail address: {}", trimmed)));
        }

        let (local, domain) = trimmed
            .split_once('@')
            .ok_or_else(|| Error::Validation(format!("missing '@' in {}", trimmed)))?;

        if local.is_empty() || domain.contains('@') {
            return Err(Error::Validation(format!("invalid e-mail address: {}", trimmed)));
        }

        let labels: Vec<&str> = domain.split('.').collect();
        if labels.len() < 2 || labels.iter().any(|l| l.is_empty()) {
            return Err(Error::Validation(format!("invalid e-mail domain: {}", domain)));
        }

        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Email {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Email {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<Email> for String {
    fn from(email: Email) -> String {
        email.0
    }
}

impl AsRef<str> for Email {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Email {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_addresses() {
        assert_eq!(Email::parse("alice@example.com").unwrap().as_str(), "alice@example.com");
        assert_eq!(Email::parse("  ejemplo@usm.cl ").unwrap().as_str(), "ejemplo@usm.cl");
        assert!(Email::parse("first.last+tag@mail.example.org").is_ok());
    }

    #[test]
    fn test_invalid_addresses() {
        for bad in [
            "",
            "   ",
            "alice",
            "@example.com",
            "alice@",
            "alice@localhost",
            "alice@example..com",
            "alice@@example.com",
            "a b@example.com",
            "alice@exa\tmple.com",
        ] {
            assert!(Email::parse(bad).is_err(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn test_too_long() {
        let long = format!("{}@example.com", "a".repeat(MAX_EMAIL_LEN));
        assert!(matches!(Email::parse(long), Err(Error::Validation(_))));
    }
}
