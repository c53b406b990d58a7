// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Content fingerprints (32-byte BLAKE3 digests).

use serde::{Deserialize, Serialize};

use crate::canon::canonical_f64_bits;
use crate::object::Point3;

/// A 32-byte BLAKE3 content fingerprint.
///
/// Thin newtype over `[u8; 32]`. The inner bytes are public for zero-cost
/// access; the `Display` impl renders lowercase hex for logging and error
/// messages.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct Fingerprint(pub [u8; 32]);

impl Fingerprint {
    /// View the fingerprint as a byte array.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// First eight hex digits, enough to tell entries apart in logs.
    pub fn short(&self) -> String {
        self.0[..4].iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Incremental fingerprint builder.
///
/// Every write is length- or tag-delimited so that distinct structures can
/// never produce the same byte stream.
pub struct FingerprintHasher {
    inner: blake3::Hasher,
}

impl FingerprintHasher {
    /// Start a hash under the given domain separator.
    pub fn new(domain: &str) -> Self {
        let mut inner = blake3::Hasher::new();
        inner.update(&(domain.len() as u64).to_le_bytes());
        inner.update(domain.as_bytes());
        Self { inner }
    }

    /// Write a one-byte structural tag.
    pub fn tag(&mut self, tag: u8) -> &mut Self {
        self.inner.update(&[tag]);
        self
    }

    /// Write a length prefix.
    pub fn count(&mut self, n: usize) -> &mut Self {
        self.inner.update(&(n as u64).to_le_bytes());
        self
    }

    /// Write an unsigned integer.
    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.inner.update(&v.to_le_bytes());
        self
    }

    /// Write a float by its canonical bit pattern.
    pub fn f64(&mut self, v: f64) -> &mut Self {
        self.inner.update(&canonical_f64_bits(v).to_le_bytes());
        self
    }

    /// Write a point as three canonical floats.
    pub fn point(&mut self, p: &Point3) -> &mut Self {
        self.f64(p[0]).f64(p[1]).f64(p[2])
    }

    /// Write a length-prefixed string.
    pub fn str(&mut self, s: &str) -> &mut Self {
        self.count(s.len());
        self.inner.update(s.as_bytes());
        self
    }

    /// Finalize into a [`Fingerprint`].
    pub fn finish(&self) -> Fingerprint {
        Fingerprint(*self.inner.finalize().as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_lowercase_hex() {
        let fp = Fingerprint([0xAB; 32]);
        let s = fp.to_string();
        assert_eq!(s.len(), 64);
        assert!(s.chars().all(|c| c == 'a' || c == 'b'));
        assert_eq!(fp.short(), "abababab");
    }

    #[test]
    fn domain_separates_hashes() {
        let mut a = FingerprintHasher::new("a");
        let mut b = FingerprintHasher::new("b");
        a.u32(7);
        b.u32(7);
        assert_ne!(a.finish(), b.finish());
    }

    #[test]
    fn length_prefix_prevents_concatenation_collisions() {
        let mut a = FingerprintHasher::new("t");
        a.str("ab").str("c");
        let mut b = FingerprintHasher::new("t");
        b.str("a").str("bc");
        assert_ne!(a.finish(), b.finish());
    }
}
