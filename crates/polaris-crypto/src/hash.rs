use sha2::{Digest, Sha256};

pub type Hash = [u8; 32];

/// SHA256 hash function
pub fn sha256(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// SHA256 over the concatenation of several byte slices.
///
/// Equivalent to `sha256(a1 ‖ a2 ‖ …)` without building the intermediate
/// buffer. All consensus seeds and preimages go through this.
pub fn sha256_concat(parts: &[&[u8]]) -> Hash {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}
