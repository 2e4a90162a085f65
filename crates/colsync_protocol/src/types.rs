//! Identifier and timestamp types.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;

/// Microseconds since the Unix epoch.
pub type MicrosecondTimestamp = u64;

/// Returns the current wall-clock time in milliseconds.
pub fn now_millis() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as Timestamp
}

const GUID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";
const GUID_LEN: usize = 12;

/// A globally unique record identifier.
///
/// GUIDs are stable across devices and sync cycles; a local row and its
/// remote record share the same GUID.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Guid(String);

impl Guid {
    /// Wraps an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh 12-character URL-safe identifier.
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        let id = (0..GUID_LEN)
            .map(|_| GUID_ALPHABET[rng.gen_range(0..GUID_ALPHABET.len())] as char)
            .collect();
        Self(id)
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the identifier is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Guid {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Guid {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for Guid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_guids_are_url_safe() {
        let guid = Guid::random();
        assert_eq!(guid.as_str().len(), GUID_LEN);
        assert!(guid
            .as_str()
            .bytes()
            .all(|b| GUID_ALPHABET.contains(&b)));
        assert_ne!(Guid::random(), Guid::random());
    }

    #[test]
    fn guid_serializes_as_plain_string() {
        let guid = Guid::new("abcdefghijkl");
        assert_eq!(serde_json::to_string(&guid).unwrap(), "\"abcdefghijkl\"");
    }
}
