use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A stable SHA-256 fingerprint stored as a lowercase hex string.
///
/// Fingerprints identify the full set of inputs of an analysis unit: file
/// contents, the active rule set and the effective configuration. Two runs
/// with the same fingerprint are guaranteed to produce the same outcome.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute the SHA-256 fingerprint of an arbitrary byte slice.
    pub fn from_bytes(bytes: impl AsRef<[u8]>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes.as_ref());
        Self(hex::encode(hasher.finalize()))
    }

    /// Start building a fingerprint from multiple length-delimited parts.
    pub fn builder() -> FingerprintBuilder {
        FingerprintBuilder {
            hasher: Sha256::new(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Incremental [`Fingerprint`] construction.
///
/// Each part is hashed with a length prefix so that part boundaries cannot be
/// shifted without changing the result (`["ab", "c"]` differs from `["a", "bc"]`).
pub struct FingerprintBuilder {
    hasher: Sha256,
}

impl FingerprintBuilder {
    pub fn push(mut self, part: impl AsRef<[u8]>) -> Self {
        let part = part.as_ref();
        self.hasher.update((part.len() as u64).to_le_bytes());
        self.hasher.update(part);
        self
    }

    pub fn finish(self) -> Fingerprint {
        Fingerprint(hex::encode(self.hasher.finalize()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_bytes_is_stable() {
        assert_eq!(
            Fingerprint::from_bytes(b"hello"),
            Fingerprint::from_bytes(b"hello")
        );
        assert_ne!(
            Fingerprint::from_bytes(b"hello"),
            Fingerprint::from_bytes(b"world")
        );
    }

    #[test]
    fn builder_is_sensitive_to_part_boundaries() {
        let ab_c = Fingerprint::builder().push("ab").push("c").finish();
        let a_bc = Fingerprint::builder().push("a").push("bc").finish();
        assert_ne!(ab_c, a_bc);

        let again = Fingerprint::builder().push("ab").push("c").finish();
        assert_eq!(ab_c, again);
    }

    #[test]
    fn fingerprint_is_lowercase_hex() {
        let fingerprint = Fingerprint::from_bytes(b"x");
        assert_eq!(fingerprint.as_str().len(), 64);
        assert!(fingerprint
            .as_str()
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
