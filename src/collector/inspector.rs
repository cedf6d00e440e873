//! Process inspector: the set of files a single process currently uses.
//!
//! For `/proc/[pid]` the inspector looks at two sources:
//!
//! - `cmdline`: the program itself, resolved against `$PATH`, and for known
//!   script interpreters every further argument that resolves to a file
//!   (a `#!` script shows up as `python /path/to/script`).
//! - `map_files/`: one symbolic link per file-backed memory mapping.
//!
//! Each source yields a set, so a library mapped five times counts once, but a
//! path that is both the command and a mapping appears in both sets. Paths are
//! kept as raw bytes.

use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::io;
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::collector::filter::{IgnoredPrefixes, clean_path, is_unresolved};
use crate::collector::traits::FileSystem;

/// Base names of programs whose arguments are scripts worth counting.
pub const SCRIPT_INTERPRETERS: &[&str] = &[
    "python", "python2", "python3", "sh", "bash", "zsh", "dash", "ksh", "perl", "awk", "gawk",
    "ruby", "lua",
];

/// Error type for inspection failures.
///
/// Every variant means the process is skipped for this pass.
#[derive(Debug, thiserror::Error)]
pub enum InspectError {
    /// Process disappeared or its `cmdline` is not readable.
    #[error("process {pid}: cannot read {file}: {source}")]
    Unreadable {
        pid: u32,
        file: &'static str,
        #[source]
        source: io::Error,
    },
}

/// Candidate paths referenced by one process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Candidates {
    /// Executable and interpreted scripts from the command line.
    pub command: BTreeSet<Vec<u8>>,
    /// Targets of file-backed memory mappings.
    pub mapped: BTreeSet<Vec<u8>>,
}

impl Candidates {
    pub fn is_empty(&self) -> bool {
        self.command.is_empty() && self.mapped.is_empty()
    }

    /// Iterates over both sources; a path present in both is yielded twice.
    pub fn iter(&self) -> impl Iterator<Item = &Vec<u8>> {
        self.command.iter().chain(self.mapped.iter())
    }
}

/// Reads process state from `/proc/[pid]/` and extracts used file paths.
pub struct ProcessInspector<F: FileSystem> {
    fs: F,
    proc_path: PathBuf,
    search_path: Vec<PathBuf>,
    collect_mapped_files: bool,
}

impl<F: FileSystem> ProcessInspector<F> {
    /// Creates a new inspector.
    ///
    /// # Arguments
    /// * `fs` - Filesystem implementation (real or mock)
    /// * `proc_path` - Base path to proc filesystem (usually "/proc")
    ///
    /// The search path is taken from `$PATH`; use `with_search_path` to override it.
    pub fn new(fs: F, proc_path: impl Into<PathBuf>) -> Self {
        let search_path = std::env::var_os("PATH")
            .map(|p| std::env::split_paths(&p).collect())
            .unwrap_or_default();
        Self {
            fs,
            proc_path: proc_path.into(),
            search_path,
            collect_mapped_files: true,
        }
    }

    /// Replaces the directories searched for relative program names.
    pub fn with_search_path<I, P>(mut self, dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.search_path = dirs.into_iter().map(Into::into).collect();
        self
    }

    /// Enables or disables reading `map_files/`.
    pub fn with_mapped_files(mut self, enabled: bool) -> Self {
        self.collect_mapped_files = enabled;
        self
    }

    pub fn proc_path(&self) -> &Path {
        &self.proc_path
    }

    pub fn fs(&self) -> &F {
        &self.fs
    }

    /// Resolves a program or script argument to an absolute path.
    ///
    /// Absolute arguments are returned unchanged. Relative ones are looked up in
    /// each search directory in order; the first existing file wins. Returns
    /// `None` when nothing matches.
    pub fn resolve_program(&self, arg: &[u8]) -> Option<Vec<u8>> {
        if arg.is_empty() {
            return None;
        }
        if arg.starts_with(b"/") {
            return Some(arg.to_vec());
        }
        self.search_path
            .iter()
            .map(|dir| dir.join(OsStr::from_bytes(arg)))
            .find(|candidate| self.fs.exists(candidate))
            .map(|found| found.into_os_string().into_vec())
    }

    /// Inspects one process.
    ///
    /// Returns an error if any part of the process state cannot be read; the
    /// caller skips the whole process in that case.
    pub fn inspect(&self, pid: u32, filter: &IgnoredPrefixes) -> Result<Candidates, InspectError> {
        let proc_dir = self.proc_path.join(pid.to_string());

        let cmdline = self
            .fs
            .read(&proc_dir.join("cmdline"))
            .map_err(|source| InspectError::Unreadable {
                pid,
                file: "cmdline",
                source,
            })?;

        let mut candidates = Candidates {
            command: self.command_paths(pid, &cmdline, filter),
            mapped: BTreeSet::new(),
        };

        if self.collect_mapped_files {
            candidates.mapped = self.mapped_paths(pid, &proc_dir.join("map_files"), filter)?;
        }

        Ok(candidates)
    }

    fn command_paths(&self, pid: u32, cmdline: &[u8], filter: &IgnoredPrefixes) -> BTreeSet<Vec<u8>> {
        let mut paths = BTreeSet::new();

        let args = split_cmdline(cmdline);
        let Some((program, rest)) = args.split_first() else {
            // Kernel threads and zombies have an empty command line
            return paths;
        };

        self.add_resolved(pid, program, filter, &mut paths);

        if !rest.is_empty() && is_interpreter(program) {
            for arg in rest {
                self.add_resolved(pid, arg, filter, &mut paths);
            }
        }

        paths
    }

    fn add_resolved(
        &self,
        pid: u32,
        arg: &[u8],
        filter: &IgnoredPrefixes,
        paths: &mut BTreeSet<Vec<u8>>,
    ) {
        let Some(resolved) = self.resolve_program(arg) else {
            trace!("pid {}: cannot resolve {:?}", pid, String::from_utf8_lossy(arg));
            return;
        };
        let cleaned = clean_path(&resolved);
        if is_unresolved(&cleaned) {
            return;
        }
        if filter.is_ignored(&cleaned) {
            trace!("pid {}: ignoring {}", pid, String::from_utf8_lossy(&cleaned));
            return;
        }
        paths.insert(cleaned);
    }

    fn mapped_paths(
        &self,
        pid: u32,
        map_dir: &Path,
        filter: &IgnoredPrefixes,
    ) -> Result<BTreeSet<Vec<u8>>, InspectError> {
        let entries = self
            .fs
            .read_dir(map_dir)
            .map_err(|source| InspectError::Unreadable {
                pid,
                file: "map_files",
                source,
            })?;

        let mut paths = BTreeSet::new();
        for entry in entries {
            // A mapping can go away between listing and reading the link
            let target = match self.fs.read_link(&entry) {
                Ok(target) => target,
                Err(e) => {
                    debug!("{}: {}", entry.display(), e);
                    continue;
                }
            };
            let cleaned = clean_path(target.as_os_str().as_bytes());
            if is_unresolved(&cleaned) {
                continue;
            }
            if filter.is_ignored(&cleaned) {
                trace!("pid {}: ignoring {}", pid, String::from_utf8_lossy(&cleaned));
                continue;
            }
            paths.insert(cleaned);
        }
        Ok(paths)
    }
}

/// Splits a NUL-separated `cmdline` into arguments.
///
/// Arguments keep their position: `args[0]` is always the program.
fn split_cmdline(raw: &[u8]) -> Vec<&[u8]> {
    let raw = raw.strip_suffix(b"\0").unwrap_or(raw);
    if raw.is_empty() {
        return Vec::new();
    }
    raw.split(|b| *b == 0).collect()
}

fn is_interpreter(program: &[u8]) -> bool {
    let base = program.rsplit(|b| *b == b'/').next().unwrap_or(program);
    SCRIPT_INTERPRETERS.iter().any(|name| name.as_bytes() == base)
}
