//! Dependency-tree hashing.
//!
//! A single digest over the package-manifest lockfiles namespaces the
//! resolver cache directories, so upgrading dependencies invalidates cached
//! resolutions without touching parsed code.

use std::path::Path;

/// Lockfiles that contribute to the dependency-tree hash, in digest order.
const LOCKFILE_NAMES: [&str; 3] = ["npm-shrinkwrap.json", "package-lock.json", "yarn.lock"];

/// Digest the project's lockfiles into a hex string.
///
/// Missing lockfiles contribute nothing; a project with no lockfile at all
/// hashes to the digest of the empty input, which is still a stable
/// namespace.
pub fn dependency_tree_hash(project_root: &Path) -> String {
    let mut hasher = blake3::Hasher::new();
    for name in LOCKFILE_NAMES {
        let path = project_root.join(name);
        match std::fs::read(&path) {
            Ok(bytes) => {
                hasher.update(name.as_bytes());
                hasher.update(&bytes);
            }
            Err(_) => continue,
        }
    }
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn stable_for_identical_lockfiles() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        std::fs::write(a.path().join("package-lock.json"), b"{\"v\":1}").unwrap();
        std::fs::write(b.path().join("package-lock.json"), b"{\"v\":1}").unwrap();

        assert_eq!(
            dependency_tree_hash(a.path()),
            dependency_tree_hash(b.path())
        );
    }

    #[test]
    fn changes_when_a_lockfile_changes() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("yarn.lock"), b"left@1.0.0").unwrap();
        let before = dependency_tree_hash(dir.path());

        std::fs::write(dir.path().join("yarn.lock"), b"left@2.0.0").unwrap();
        let after = dependency_tree_hash(dir.path());

        assert_ne!(before, after);
    }

    #[test]
    fn missing_lockfiles_still_produce_a_namespace() {
        let dir = TempDir::new().unwrap();
        let hash = dependency_tree_hash(dir.path());
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
