//! DeviceId: stable identifier of one device taking part in note editing.
//!
//! Generated once per device and persisted by the embedding application; the
//! lease fields of a note store it as plain text.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeviceIdError {
    #[error("Device ID must not be empty")]
    Empty,
    #[error("Device ID must be a single line without surrounding whitespace")]
    InvalidCharacters,
}

/// Identifier of a device holding (or requesting) a note lease.
///
/// # Examples
/// ```
/// use notes_storage_core::DeviceId;
///
/// let id: DeviceId = "ipad-kitchen".parse().unwrap();
/// assert_eq!(id.as_str(), "ipad-kitchen");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceId(String);

impl DeviceId {
    /// Generate a new random device ID (UUID v4).
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for DeviceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DeviceId {
    type Err = DeviceIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(DeviceIdError::Empty);
        }
        // Stored as a header value, so it must survive a line-based round trip
        if s.trim() != s || s.contains(['\n', '\r']) {
            return Err(DeviceIdError::InvalidCharacters);
        }
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for DeviceId {
    type Error = DeviceIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DeviceId> for String {
    fn from(id: DeviceId) -> String {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_is_unique() {
        assert_ne!(DeviceId::generate(), DeviceId::generate());
    }

    #[test]
    fn test_generated_id_parses_back() {
        let id = DeviceId::generate();
        let parsed: DeviceId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_rejects_empty_and_multiline() {
        assert_eq!("".parse::<DeviceId>(), Err(DeviceIdError::Empty));
        assert_eq!(
            "a\nb".parse::<DeviceId>(),
            Err(DeviceIdError::InvalidCharacters)
        );
        assert_eq!(
            " padded ".parse::<DeviceId>(),
            Err(DeviceIdError::InvalidCharacters)
        );
    }

    #[test]
    fn test_serde_roundtrip() {
        let id: DeviceId = "laptop".parse().unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"laptop\"");
        let parsed: DeviceId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);
    }
}
