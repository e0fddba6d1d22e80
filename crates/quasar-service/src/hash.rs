//! Content addressing for the response cache.

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use sha2::{Digest, Sha256};

/// Cache key for a raw request: base64url(SHA-256(bytes)).
#[must_use]
pub fn request_hash(bytes: &[u8]) -> String {
    URL_SAFE.encode(Sha256::digest(bytes))
}

/// Bucket name for a subject: dots become underscores.
#[must_use]
pub fn bucket_name(subject: &str) -> String {
    subject.replace('.', "_")
}
