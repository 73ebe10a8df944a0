//! Source fingerprints
//!
//! Provides [`Fingerprint`], a 32-byte Blake3 digest of a normalized source
//! reference. The preprocessing cache is keyed by it so the same image
//! referenced through cosmetically different URLs is fetched once.

use serde::{Serialize, Serializer};
use std::fmt::{self, Display, Formatter};
use url::Url;

/// A 32-byte source fingerprint (Blake3)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Create from raw bytes
    #[inline]
    #[must_use]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Underlying bytes
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hash arbitrary data
    #[inline]
    #[must_use]
    pub fn of_bytes(data: &[u8]) -> Self {
        Self::new(*blake3::hash(data).as_bytes())
    }

    /// Fingerprint a source reference.
    ///
    /// Parseable URLs are normalized first (scheme and host lowercased,
    /// default port dropped, fragment removed); anything else is hashed
    /// after trimming.
    #[must_use]
    pub fn of_source(source: &str) -> Self {
        let trimmed = source.trim();
        match Url::parse(trimmed) {
            Ok(mut url) => {
                url.set_fragment(None);
                Self::of_bytes(url.as_str().as_bytes())
            }
            Err(_) => Self::of_bytes(trimmed.as_bytes()),
        }
    }

    /// Short representation (first 16 hex chars)
    #[inline]
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl Display for Fingerprint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}
