use sha2::{Digest, Sha256};

/// Hashes a tuple of integers to a `u64` that is identical on every platform
/// and toolchain: SHA-256 over the little-endian bytes, first 8 digest bytes
/// read little-endian.
pub fn stable_hash_u64s(values: &[u64]) -> u64 {
    let mut hasher = Sha256::new();
    for value in values {
        hasher.update(value.to_le_bytes());
    }
    let digest = hasher.finalize();
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(head)
}
