//! Content deduplication by SHA-256 fingerprint.

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 over the UTF-8 bytes of `content`.
///
/// Identical content always yields the same 64-character digest.
#[must_use]
pub fn content_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    format!("{digest:x}")
}

/// True when `value` looks like a digest produced by [`content_hash`].
#[must_use]
pub fn is_content_hash(value: &str) -> bool {
    value.len() == 64 && value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
