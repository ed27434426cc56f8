//! Content keys identifying cached blobs.

use crate::source::SourceRequest;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// SHA-256 hex digest of a source request; names one cache blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentKey(String);

impl ContentKey {
    pub fn derive(source: &SourceRequest) -> Self {
        let digest = Sha256::digest(source.canonical().as_bytes());
        Self(hex::encode(digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for log lines.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for ContentKey {
    type Err = crate::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit()) {
            Ok(Self(s.to_ascii_lowercase()))
        } else {
            Err(crate::Error::InvalidRequest(format!("Invalid content key: {s}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{AudioFormat, FormatHint, Quality};

    #[test]
    fn test_same_url_same_key() {
        let a = ContentKey::derive(&SourceRequest::new("https://example.com/watch?v=1"));
        let b = ContentKey::derive(&SourceRequest::new("https://example.com/watch?v=1"));
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_hint_changes_key() {
        let plain = SourceRequest::new("https://example.com/watch?v=1");
        let opus = plain
            .clone()
            .with_hint(FormatHint::new(AudioFormat::Opus, Quality::Best));
        assert_ne!(ContentKey::derive(&plain), ContentKey::derive(&opus));
    }

    #[test]
    fn test_parse_roundtrip() {
        let key = ContentKey::derive(&SourceRequest::new("https://example.com/a"));
        let parsed: ContentKey = key.as_str().parse().expect("parse");
        assert_eq!(parsed, key);
        assert!("not-a-key".parse::<ContentKey>().is_err());
    }
}
