use sha2::{Digest, Sha256};
use std::path::Path;

/// Short stable fingerprint of a path, for logs that must not carry the
/// path itself.
pub fn hash_path(p: &Path) -> String {
    let mut h = Sha256::new();
    h.update(p.as_os_str().to_string_lossy().as_bytes());
    let digest = format!("{:x}", h.finalize());
    digest[..16].to_string()
}
