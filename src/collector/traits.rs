//! Abstractions for filesystem access to enable testing and mocking.
//!
//! The `FileSystem` trait allows the inspector to work with both the real `/proc`
//! filesystem on Linux and the in-memory `MockFs` used by tests.

use std::io;
use std::path::{Path, PathBuf};

/// Abstraction for the filesystem operations needed to inspect processes.
pub trait FileSystem: Send + Sync {
    /// Reads the entire contents of a file as raw bytes.
    ///
    /// `/proc/[pid]/cmdline` is NUL-separated and not guaranteed to be UTF-8,
    /// so callers decode it themselves.
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Lists entries in a directory.
    ///
    /// # Returns
    /// Full paths of the directory entries, in no particular order.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;

    /// Returns the target of a symbolic link without following it further.
    fn read_link(&self, path: &Path) -> io::Result<PathBuf>;

    /// Checks if a path exists (following symbolic links).
    fn exists(&self, path: &Path) -> bool;

    /// Checks if a path is a directory.
    fn is_dir(&self, path: &Path) -> bool;
}

/// Real filesystem implementation that delegates to `std::fs`.
///
/// Use this in production to read from the actual `/proc` filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFs;

impl RealFs {
    /// Creates a new `RealFs` instance.
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for RealFs {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let entries = std::fs::read_dir(path)?;
        let mut paths = Vec::new();
        for entry in entries {
            paths.push(entry?.path());
        }
        Ok(paths)
    }

    fn read_link(&self, path: &Path) -> io::Result<PathBuf> {
        std::fs::read_link(path)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_real_fs_read() {
        let fs = RealFs::new();
        // Read Cargo.toml which should exist in project root
        let cargo_toml = env::current_dir().unwrap().join("Cargo.toml");
        let content = fs.read(&cargo_toml).unwrap();
        assert!(String::from_utf8_lossy(&content).contains("[package]"));
    }

    #[test]
    fn test_real_fs_exists_and_is_dir() {
        let fs = RealFs::new();
        let root = env::current_dir().unwrap();
        assert!(fs.exists(&root.join("Cargo.toml")));
        assert!(!fs.is_dir(&root.join("Cargo.toml")));
        assert!(fs.is_dir(&root.join("src")));
        assert!(!fs.exists(Path::new("/nonexistent/path/12345")));
    }

    #[test]
    fn test_real_fs_read_link() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target");
        std::fs::write(&target, b"x").unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let fs = RealFs::new();
        assert_eq!(fs.read_link(&link).unwrap(), target);
        assert!(fs.read_link(&target).is_err());
    }
}
