use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of a byte string.
pub fn sha256_hex(data: impl AsRef<[u8]>) -> String {
    format!("{:x}", Sha256::digest(data.as_ref()))
}
