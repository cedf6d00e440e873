//! In-memory mock filesystem for testing the inspector without a real `/proc`.
//!
//! `MockFs` simulates files, directories and symbolic links in memory so that
//! process trees, `$PATH` lookups and `map_files` links can be described in tests.

use crate::collector::traits::FileSystem;
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};

/// In-memory filesystem for testing.
#[derive(Debug, Clone, Default)]
pub struct MockFs {
    /// Map from path to file contents.
    files: HashMap<PathBuf, Vec<u8>>,
    /// Set of directories (for read_dir support).
    directories: HashSet<PathBuf>,
    /// Map from link path to link target.
    links: HashMap<PathBuf, PathBuf>,
}

impl MockFs {
    /// Creates a new empty mock filesystem.
    pub fn new() -> Self {
        Self::default()
    }

    fn add_parents(&mut self, path: &Path) {
        let mut parent = path.parent();
        while let Some(p) = parent {
            if !p.as_os_str().is_empty() {
                self.directories.insert(p.to_path_buf());
            }
            parent = p.parent();
        }
    }

    /// Adds a file with the given content.
    ///
    /// Parent directories are automatically created.
    pub fn add_file(&mut self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) {
        let path = path.as_ref().to_path_buf();
        self.add_parents(&path);
        self.files.insert(path, content.into());
    }

    /// Adds an empty directory.
    pub fn add_dir(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref().to_path_buf();
        self.add_parents(&path);
        self.directories.insert(path);
    }

    /// Adds a symbolic link pointing at `target`. The target does not have to exist.
    pub fn add_link(&mut self, path: impl AsRef<Path>, target: impl AsRef<Path>) {
        let path = path.as_ref().to_path_buf();
        self.add_parents(&path);
        self.links.insert(path, target.as_ref().to_path_buf());
    }

    /// Adds a process with its `/proc/[pid]/cmdline` and `/proc/[pid]/map_files/`.
    ///
    /// # Arguments
    /// * `pid` - Process ID
    /// * `args` - Command line arguments, joined NUL-terminated like the kernel does
    /// * `mapped` - Targets of the `map_files` links, one link per mapping
    pub fn add_process(&mut self, pid: u32, args: &[&str], mapped: &[&str]) {
        let base = PathBuf::from(format!("/proc/{}", pid));
        self.add_dir(&base);

        let mut cmdline = Vec::new();
        for arg in args {
            cmdline.extend_from_slice(arg.as_bytes());
            cmdline.push(0);
        }
        self.add_file(base.join("cmdline"), cmdline);

        let map_dir = base.join("map_files");
        self.add_dir(&map_dir);
        for (i, target) in mapped.iter().enumerate() {
            let start = 0x5000_0000u64 + (i as u64) * 0x1000;
            let name = format!("{:x}-{:x}", start, start + 0x1000);
            self.add_link(map_dir.join(name), target);
        }
    }

    /// Removes a path (file, link or directory entry only, not its children).
    pub fn remove(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        self.files.remove(path);
        self.links.remove(path);
        self.directories.remove(path);
    }
}

impl FileSystem for MockFs {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.files.get(path).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("file not found: {:?}", path),
            )
        })
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        if !self.directories.contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("directory not found: {:?}", path),
            ));
        }

        let mut entries = HashSet::new();

        // Find all files, links and directories that are direct children
        let children = self
            .files
            .keys()
            .chain(self.links.keys())
            .chain(self.directories.iter());
        for child in children {
            if child != path && child.parent().is_some_and(|parent| parent == path) {
                entries.insert(child.clone());
            }
        }

        Ok(entries.into_iter().collect())
    }

    fn read_link(&self, path: &Path) -> io::Result<PathBuf> {
        self.links.get(path).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("not a symbolic link: {:?}", path),
            )
        })
    }

    fn exists(&self, path: &Path) -> bool {
        if let Some(target) = self.links.get(path) {
            return self.files.contains_key(target) || self.directories.contains(target);
        }
        self.files.contains_key(path) || self.directories.contains(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.directories.contains(path)
    }
}
