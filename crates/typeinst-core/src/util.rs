use sha2::{Digest, Sha256};

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    let digest = h.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

/// First 8 hex digits, as printed in provenance lines.
pub(crate) fn short_digest(hex: &str) -> &str {
    hex.get(..8).unwrap_or(hex)
}
