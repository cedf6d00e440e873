//! Persistent store for the frequency map.
//!
//! One directive per path: the quoted path followed by its decimal count.
//! Paths are written as raw bytes inside the quotes.
//!
//! ```text
//! "/usr/bin/bash" 1042
//! "/usr/lib/libc.so.6" 88311
//! ```
//!
//! Decoding is lenient per record: a record with the wrong number of
//! parameters, a child block, or a non-numeric count is skipped with a warning
//! and the rest of the file is still read.

use std::ffi::OsStr;
use std::fs::{self, DirBuilder};
use std::io::{self, Write};
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, warn};

use crate::collector::FrequencyMap;
use crate::storage::scfg::{self, ScfgError};

/// Where the frequency map is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbTarget {
    File(PathBuf),
    /// `-`: write to standard output, never read back.
    Stdout,
}

impl DbTarget {
    /// Parses a configured target; `-` selects standard output.
    pub fn parse(value: impl AsRef<OsStr>) -> Self {
        let value = value.as_ref();
        if value == "-" {
            Self::Stdout
        } else {
            Self::File(PathBuf::from(value))
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::File(path) => Some(path),
            Self::Stdout => None,
        }
    }
}

impl std::fmt::Display for DbTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Stdout => write!(f, "-"),
        }
    }
}

/// Error type for store failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("{path}: {source}")]
    Syntax {
        path: String,
        #[source]
        source: ScfgError,
    },
}

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Writes every entry of `map` as one `"path" count` line, sorted by path.
pub fn encode<W: Write>(map: &FrequencyMap, mut out: W) -> io::Result<()> {
    for (path, count) in map.sorted_entries() {
        out.write_all(&scfg::quote(path))?;
        writeln!(out, " {}", count)?;
    }
    out.flush()
}

/// Decodes a frequency database document.
///
/// Syntax errors reject the whole document; malformed records are skipped.
pub fn decode(text: impl AsRef<[u8]>) -> Result<FrequencyMap, ScfgError> {
    let mut map = FrequencyMap::new();

    for record in scfg::parse(text)? {
        if record.params.len() != 1 {
            warn!(
                "line {}: expected 1 parameter but got {} for {:?}, skipping",
                record.line,
                record.params.len(),
                record.display_name()
            );
            continue;
        }
        if record.children.is_some() {
            warn!(
                "line {}: unexpected block for {:?}, skipping",
                record.line,
                record.display_name()
            );
            continue;
        }
        let count = std::str::from_utf8(&record.params[0])
            .ok()
            .and_then(|value| value.parse::<u64>().ok());
        match count {
            Some(count) => map.insert(record.name, count),
            None => {
                warn!(
                    "line {}: invalid count {:?} for {:?}, skipping",
                    record.line,
                    String::from_utf8_lossy(&record.params[0]),
                    String::from_utf8_lossy(&record.name)
                );
            }
        }
    }

    Ok(map)
}

/// The frequency database at a configured target.
#[derive(Debug, Clone)]
pub struct FrequencyDb {
    target: DbTarget,
}

impl FrequencyDb {
    pub fn new(target: DbTarget) -> Self {
        Self { target }
    }

    pub fn target(&self) -> &DbTarget {
        &self.target
    }

    /// Loads the persisted map.
    ///
    /// An absent file, or the stdout target, yields an empty map.
    pub fn load(&self) -> Result<FrequencyMap, StoreError> {
        let Some(path) = self.target.path() else {
            return Ok(FrequencyMap::new());
        };

        let text = match fs::read(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("{} does not exist, starting empty", path.display());
                return Ok(FrequencyMap::new());
            }
            Err(e) => return Err(StoreError::io(path, e)),
        };

        decode(&text).map_err(|source| StoreError::Syntax {
            path: path.display().to_string(),
            source,
        })
    }

    /// Persists the map.
    ///
    /// Missing parent directories are created with mode 0755. The file is
    /// written atomically via a temporary file in the same directory, so an
    /// interrupted write never leaves a truncated database behind.
    pub fn persist(&self, map: &FrequencyMap) -> Result<(), StoreError> {
        let path = match &self.target {
            DbTarget::Stdout => {
                let stdout = io::stdout();
                return encode(map, stdout.lock())
                    .map_err(|e| StoreError::io(Path::new("<stdout>"), e));
            }
            DbTarget::File(path) => path,
        };

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            DirBuilder::new()
                .recursive(true)
                .mode(0o755)
                .create(parent)
                .map_err(|e| StoreError::io(parent, e))?;
        }

        super::write_atomically(path, |out| encode(map, out)).map_err(|e| StoreError::io(path, e))
    }

    /// Modification time of the backing file, if it exists.
    pub fn modified(&self) -> Option<SystemTime> {
        let path = self.target.path()?;
        fs::metadata(path).and_then(|m| m.modified()).ok()
    }
}
