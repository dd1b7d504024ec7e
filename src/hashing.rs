//! Content-addressing helpers.
//!
//! `id`/`crash_hash` need a stable, collision-resistant digest truncated to
//! 16 hex chars (`sha2`, added per `DESIGN.md`); `coverage_hash`/trace
//! digests only need a fast, stable 64-bit fingerprint and reuse the
//! teacher's existing `xxhash-rust` dependency.

use sha2::{Digest, Sha256};

/// `trunc16(sha256(data))`: the first 8 bytes of the digest, hex-encoded.
pub fn sha256_trunc16(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    let mut out = String::with_capacity(16);
    for byte in &digest[..8] {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Stable 64-bit digest of a byte slice, used for `coverage_hash` and the
/// bucketed-trace digest. Not cryptographic; collisions are accepted per
/// the coverage map's design rationale.
pub fn xxh3_64(data: &[u8]) -> u64 {
    xxhash_rust::xxh3::xxh3_64(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trunc16_is_16_hex_chars() {
        let h = sha256_trunc16(b"hello world");
        assert_eq!(h.len(), 16);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn trunc16_is_deterministic() {
        assert_eq!(sha256_trunc16(b"abc"), sha256_trunc16(b"abc"));
        assert_ne!(sha256_trunc16(b"abc"), sha256_trunc16(b"abd"));
    }
}
