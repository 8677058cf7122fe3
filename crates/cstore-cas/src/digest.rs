//! SHA-256 digests and publish fingerprints.
//!
//! Two distinct identities flow through the store:
//!
//! - the **content digest**: SHA-256 of raw blob bytes, rendered as
//!   lower-case hex (64 chars), used for addressing and integrity;
//! - the **fingerprint**: a collision-resistant hash of an
//!   `(update key, content digest)` pair, used to refuse redundant
//!   publishes without reading any blob.
//!
//! The fingerprint is deliberately keyed on the publisher's update key and
//! not on content alone: two publishers pushing identical bytes must each
//! succeed once, while a re-push by the same publisher becomes a no-op.

use sha2::{Digest, Sha256};

/// Raw SHA-256 digest (32 bytes).
pub type Sha256Hash = [u8; 32];

/// Domain separator for fingerprint hashing. Changing it invalidates every
/// stored fingerprint, so it is versioned.
const FINGERPRINT_DOMAIN: &[u8] = b"cstore/fingerprint/v1";

/// Compute the SHA-256 digest of `data`.
#[inline]
pub fn sha256(data: &[u8]) -> Sha256Hash {
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&Sha256::digest(data));
    hash
}

/// Compute the SHA-256 digest of `data` as lower-case hex.
#[inline]
pub fn sha256_hex(data: &[u8]) -> String {
    hash_to_hex(&sha256(data))
}

/// Render a digest as lower-case hex.
#[inline]
pub fn hash_to_hex(hash: &Sha256Hash) -> String {
    hex::encode(hash)
}

/// Parse a 64-char hex string back into a digest.
pub fn hex_to_hash(s: &str) -> Option<Sha256Hash> {
    if s.len() != 64 {
        return None;
    }
    let bytes = hex::decode(s).ok()?;
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&bytes);
    Some(hash)
}

/// Derive the publish fingerprint for `(update_key, content_digest)`.
///
/// Inputs are length-prefixed under a versioned domain separator, so the
/// value is stable across restarts and no concatenation of key and digest
/// can collide with a different split of the two.
pub fn fingerprint(update_key: &str, content_digest: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(FINGERPRINT_DOMAIN);
    hasher.update((update_key.len() as u64).to_be_bytes());
    hasher.update(update_key.as_bytes());
    hasher.update((content_digest.len() as u64).to_be_bytes());
    hasher.update(content_digest.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_vector() {
        assert_eq!(
            sha256_hex(b"Hello world!"),
            "c0535e4be2b79ffd93291305436bf889314e4a3faec05ecffcbb7df31ad9e51a"
        );
    }

    #[test]
    fn test_hex_roundtrip() {
        let hash = sha256(b"roundtrip");
        assert_eq!(hex_to_hash(&hash_to_hex(&hash)), Some(hash));
        assert_eq!(hex_to_hash("zz"), None);
        assert_eq!(hex_to_hash(&"0".repeat(63)), None);
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let digest = sha256_hex(b"content");
        assert_eq!(fingerprint("key", &digest), fingerprint("key", &digest));
    }

    #[test]
    fn test_fingerprint_depends_on_both_inputs() {
        let digest_x = sha256_hex(b"x");
        let digest_y = sha256_hex(b"y");
        assert_ne!(fingerprint("key0", &digest_x), fingerprint("key1", &digest_x));
        assert_ne!(fingerprint("key0", &digest_x), fingerprint("key0", &digest_y));
    }

    #[test]
    fn test_fingerprint_framing_resists_splice() {
        // "ab" + "c" and "a" + "bc" must not collide.
        assert_ne!(fingerprint("ab", "c"), fingerprint("a", "bc"));
    }
}
