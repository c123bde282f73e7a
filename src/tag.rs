//! Opaque bounded source tag: the identity a receiver
//! attaches to every chunk it produces, carried unchanged through timeshift,
//! SIP and SAM so a sink can tell which source a frame came from.

use crate::error::ConfigError;
use crate::formats::TAG_MAX_LEN;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SourceTag(String);

impl SourceTag {
    pub fn new(raw: impl Into<String>) -> Result<Self, ConfigError> {
        let raw = raw.into();
        if raw.as_bytes().len() > TAG_MAX_LEN {
            return Err(ConfigError::TagTooLong(raw));
        }
        Ok(SourceTag(raw))
    }

    /// Builds a tag from a fixed-size wire field, trimming trailing NUL
    /// padding the way the per-process Scream receiver pads its tag bytes.
    pub fn from_padded_bytes(bytes: &[u8]) -> Result<Self, ConfigError> {
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        let raw = String::from_utf8_lossy(&bytes[..end]).into_owned();
        SourceTag::new(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for SourceTag {
    type Error = ConfigError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        SourceTag::new(value)
    }
}

impl From<SourceTag> for String {
    fn from(value: SourceTag) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_overlong_tag() {
        let too_long = "x".repeat(TAG_MAX_LEN + 1);
        assert!(SourceTag::new(too_long).is_err());
    }

    #[test]
    fn accepts_max_length_tag() {
        let exact = "x".repeat(TAG_MAX_LEN);
        assert!(SourceTag::new(exact).is_ok());
    }

    #[test]
    fn trims_nul_padding() {
        let mut bytes = [0u8; TAG_MAX_LEN];
        bytes[..6].copy_from_slice(b"kitch1");
        let tag = SourceTag::from_padded_bytes(&bytes).expect("valid tag");
        assert_eq!(tag.as_str(), "kitch1");
    }
}
