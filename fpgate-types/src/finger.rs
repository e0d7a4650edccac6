//! Finger selector used when enrolling a template

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Finger selector
///
/// Wire values are stable and match the driver's finger numbering.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum Finger {
    Unknown = 0,
    LeftThumb = 1,
    LeftIndex = 2,
    LeftMiddle = 3,
    LeftRing = 4,
    LeftPinky = 5,
    RightThumb = 6,
    RightIndex = 7,
    RightMiddle = 8,
    RightRing = 9,
    RightPinky = 10,
}

impl Finger {
    /// Every selector, ordered by wire value
    pub const ALL: [Finger; 11] = [
        Self::Unknown,
        Self::LeftThumb,
        Self::LeftIndex,
        Self::LeftMiddle,
        Self::LeftRing,
        Self::LeftPinky,
        Self::RightThumb,
        Self::RightIndex,
        Self::RightMiddle,
        Self::RightRing,
        Self::RightPinky,
    ];

    /// Wire value
    pub fn value(self) -> u8 {
        self as u8
    }

    /// Get selector name
    pub fn name(self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::LeftThumb => "LeftThumb",
            Self::LeftIndex => "LeftIndex",
            Self::LeftMiddle => "LeftMiddle",
            Self::LeftRing => "LeftRing",
            Self::LeftPinky => "LeftPinky",
            Self::RightThumb => "RightThumb",
            Self::RightIndex => "RightIndex",
            Self::RightMiddle => "RightMiddle",
            Self::RightRing => "RightRing",
            Self::RightPinky => "RightPinky",
        }
    }

    /// `{name, value}` listing of every selector
    pub fn entries() -> Vec<FingerEntry> {
        Self::ALL.iter().map(|f| FingerEntry::from(*f)).collect()
    }
}

impl Default for Finger {
    fn default() -> Self {
        Self::RightIndex
    }
}

impl From<Finger> for u8 {
    fn from(finger: Finger) -> u8 {
        finger as u8
    }
}

impl TryFrom<u8> for Finger {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Self::ALL
            .get(value as usize)
            .copied()
            .ok_or_else(|| Error::Parse(format!("Unknown finger value: {}", value)))
    }
}

impl FromStr for Finger {
    type Err = Error;

    /// Accepts either the wire value (`"7"`) or the selector name,
    /// ignoring case and underscores (`"RightIndex"`, `"right_index"`).
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();

        if let Ok(value) = s.parse::<u8>() {
            return Self::try_from(value);
        }

        let wanted: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .flat_map(char::to_lowercase)
            .collect();

        Self::ALL
            .iter()
            .find(|f| f.name().to_lowercase() == wanted)
            .copied()
            .ok_or_else(|| Error::Parse(format!("Unknown finger: {}", s)))
    }
}

impl fmt::Display for Finger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), *self as u8)
    }
}

/// Listing entry returned to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerEntry {
    pub name: String,
    pub value: u8,
}

impl From<Finger> for FingerEntry {
    fn from(finger: Finger) -> Self {
        Self {
            name: finger.name().to_string(),
            value: finger.value(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_finger_conversion() {
        assert_eq!(u8::from(Finger::RightIndex), 7);
        assert_eq!(Finger::try_from(7).unwrap(), Finger::RightIndex);
        assert_eq!(Finger::try_from(0).unwrap(), Finger::Unknown);
        assert_eq!(Finger::try_from(10).unwrap(), Finger::RightPinky);
    }

    #[test]
    fn test_wire_values_are_ordered() {
        for (i, finger) in Finger::ALL.iter().enumerate() {
            assert_eq!(finger.value() as usize, i);
        }
    }

    #[test]
    fn test_unknown_value() {
        assert!(Finger::try_from(11).is_err());
        assert!(Finger::try_from(255).is_err());
    }

    #[test]
    fn test_parse_value_or_name() {
        assert_eq!("7".parse::<Finger>().unwrap(), Finger::RightIndex);
        assert_eq!("LeftRing".parse::<Finger>().unwrap(), Finger::LeftRing);
        assert_eq!("left_ring".parse::<Finger>().unwrap(), Finger::LeftRing);
        assert_eq!(" RIGHT-THUMB ".parse::<Finger>().unwrap(), Finger::RightThumb);
        assert!("thumb".parse::<Finger>().is_err());
        assert!("42".parse::<Finger>().is_err());
    }

    #[test]
    fn test_entries_listing() {
        let entries = Finger::entries();
        assert_eq!(entries.len(), 11);
        assert_eq!(
            entries[7],
            FingerEntry {
                name: "RightIndex".into(),
                value: 7
            }
        );
    }

    #[test]
    fn test_serde_uses_wire_value() {
        let json = serde_json::to_string(&Finger::LeftPinky).unwrap();
        assert_eq!(json, "5");

        let finger: Finger = serde_json::from_str("9").unwrap();
        assert_eq!(finger, Finger::RightRing);

        assert!(serde_json::from_str::<Finger>("12").is_err());
    }
}
