//! AL-014: BLAKE3 content hashing for descriptors and staging locations.

/// Hash a string. Returns `"blake3:{hex}"`.
pub fn hash_string(s: &str) -> String {
    format!("blake3:{}", blake3::hash(s.as_bytes()).to_hex())
}

/// Short, filesystem-safe digest of a string (first 16 hex chars).
pub fn short_digest(s: &str) -> String {
    let hex = blake3::hash(s.as_bytes()).to_hex();
    hex[..16].to_string()
}
