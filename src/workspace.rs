//! Workspace identity.
//!
//! A workspace is a root directory identified by its absolute path. All
//! persistent state is partitioned by a short stable id derived from that
//! path, and cross-process serialization uses a 32-bit lock key derived
//! from the id.

use std::path::Path;

use sha2::{Digest, Sha256};

/// Normalize an absolute path for hashing: forward slashes, no trailing
/// separator. Two spellings of the same directory must yield one id.
pub fn normalize_path(path: &Path) -> String {
    let mut s = path.to_string_lossy().replace('\\', "/");
    while s.len() > 1 && s.ends_with('/') {
        s.pop();
    }
    s
}

/// Derive the stable workspace id: SHA-256 of the normalized absolute path,
/// truncated to 16 hex characters.
pub fn workspace_id(root: &Path) -> String {
    let normalized = normalize_path(root);
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}

/// Derive the advisory-lock key for a workspace id.
///
/// The id is itself a hex-encoded digest, so its first 8 hex characters are
/// a uniformly distributed 32-bit value. Reinterpreted as `i32` this is the
/// key handed to the database advisory lock; different workspaces get
/// different keys and therefore lock independently.
pub fn lock_key(workspace_id: &str) -> i32 {
    let prefix = &workspace_id[..8.min(workspace_id.len())];
    u32::from_str_radix(prefix, 16).unwrap_or(0) as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn id_is_stable() {
        let p = PathBuf::from("/home/user/project");
        assert_eq!(workspace_id(&p), workspace_id(&p));
    }

    #[test]
    fn id_is_16_hex_chars() {
        let id = workspace_id(&PathBuf::from("/srv/docs"));
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn trailing_separator_does_not_change_id() {
        assert_eq!(
            workspace_id(&PathBuf::from("/home/user/project")),
            workspace_id(&PathBuf::from("/home/user/project/"))
        );
    }

    #[test]
    fn backslashes_normalize_to_forward_slashes() {
        assert_eq!(
            normalize_path(&PathBuf::from(r"C:\work\docs")),
            "C:/work/docs"
        );
    }

    #[test]
    fn distinct_paths_get_distinct_ids() {
        assert_ne!(
            workspace_id(&PathBuf::from("/home/a")),
            workspace_id(&PathBuf::from("/home/b"))
        );
    }

    #[test]
    fn lock_keys_differ_per_workspace() {
        let a = lock_key(&workspace_id(&PathBuf::from("/home/a")));
        let b = lock_key(&workspace_id(&PathBuf::from("/home/b")));
        assert_ne!(a, b);
    }

    #[test]
    fn lock_key_is_stable() {
        let id = workspace_id(&PathBuf::from("/var/data"));
        assert_eq!(lock_key(&id), lock_key(&id));
    }
}
