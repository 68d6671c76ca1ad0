//! CP-011: BLAKE3 hashing for plans and provisioned resources.

/// Hash a string. Returns `"blake3:{hex}"`.
pub fn hash_string(s: &str) -> String {
    format!("blake3:{}", blake3::hash(s.as_bytes()).to_hex())
}

/// Hash a JSON value by its compact serialization.
/// `serde_json` objects serialize with sorted keys, so key order never affects the hash.
pub fn hash_json(value: &serde_json::Value) -> String {
    hash_string(&value.to_string())
}

/// Compute a composite hash from multiple components.
pub fn composite_hash(components: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    for c in components {
        hasher.update(c.as_bytes());
        hasher.update(b"\0");
    }
    format!("blake3:{}", hasher.finalize().to_hex())
}

/// First `len` hex characters of the BLAKE3 digest of `seed`.
pub fn short_hex(seed: &str, len: usize) -> String {
    let hex = blake3::hash(seed.as_bytes()).to_hex();
    hex[..len.min(hex.len())].to_string()
}
