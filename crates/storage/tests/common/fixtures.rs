use bytes::Bytes;
use sha2::{Digest, Sha256};
use spool_core::UploadConfig;

pub const MIB: usize = 1024 * 1024;

/// Compute SHA-256 hash of data as hex string
pub fn sha256_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    result.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Generate deterministic test data using a seeded pseudo-random generator.
/// Same seed produces same output.
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;

    for chunk in data.chunks_mut(8) {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }

    Bytes::from(data)
}

/// Upload limits expressed in MiB, with the default lock timeout.
#[allow(dead_code)]
pub fn upload_config(capacity_mib: usize, threshold_mib: usize) -> UploadConfig {
    UploadConfig {
        buffer_capacity: capacity_mib * MIB,
        min_send_threshold: threshold_mib * MIB,
        ..UploadConfig::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hash() {
        let hash = sha256_hash(b"hello world");
        assert_eq!(
            hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_seeded_bytes_deterministic() {
        assert_eq!(seeded_bytes(42, 1000), seeded_bytes(42, 1000));
        assert_ne!(seeded_bytes(42, 1000), seeded_bytes(43, 1000));
    }

    #[test]
    fn test_upload_config_is_valid() {
        assert!(upload_config(15, 5).validate().is_ok());
        assert!(upload_config(4, 5).validate().is_err());
    }
}
