use sha2::{Digest, Sha256};

/// Length in hex characters of a content fingerprint.
pub const FINGERPRINT_LEN: usize = 64;

/// SHA-256 of `content`, hex-encoded. Unsalted, so identical bytes always
/// produce the same fingerprint.
pub fn fingerprint(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}
