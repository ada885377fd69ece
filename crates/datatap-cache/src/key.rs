//! Cache key computation.

use sha2::{Digest, Sha256};

/// Compute a cache key from an identity string and a human-readable label.
///
/// The key is the first 8 hex characters of the identity's SHA256, suffixed
/// with a filesystem-safe slug of the label so cached files stay
/// recognizable on disk:
///
/// - identity: `{"uri":"ftp://host/data/a.csv",...}`, label: `a.csv`
/// - key: `a1b2c3d4-a.csv`
pub fn cache_key(identity: &str, label: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(identity.as_bytes());
    let hash_bytes = hasher.finalize();
    let hash = hex::encode(&hash_bytes[..4]); // First 8 hex characters (4 bytes)
    format!("{hash}-{}", slugify(label))
}

/// Replace every character outside `[A-Za-z0-9._-]` with `-`.
pub fn slugify(label: &str) -> String {
    label
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

mod hex {
    const HEX_CHARS: &[u8; 16] = b"0123456789abcdef";

    pub fn encode(bytes: &[u8]) -> String {
        let mut result = String::with_capacity(bytes.len() * 2);
        for &byte in bytes {
            result.push(HEX_CHARS[(byte >> 4) as usize] as char);
            result.push(HEX_CHARS[(byte & 0x0f) as usize] as char);
        }
        result
    }
}
