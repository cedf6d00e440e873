//! On-disk mirror of the last correlation result.
//!
//! ```text
//! <cache_dir>/index              usage\tlast_used\tpackage   (one row per package)
//! <cache_dir>/packages/<name>    usage\tlast_used\tpath      (one row per owned file)
//! ```
//!
//! `last_used` is in epoch seconds. Backslash, tab and newline in names are
//! backslash-escaped so every row has exactly three fields. In per-package file
//! names `%`, `/` and a leading `.` are percent-escaped.
//!
//! The index is written last, so its modification time marks a complete cache.

use std::collections::HashSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, warn};

use super::{FileRecord, PackageRecord};
use crate::storage::write_atomically;

pub const INDEX_FILE: &str = "index";
pub const PACKAGES_DIR: &str = "packages";

/// One cache row: a package in the index, a file in a package listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageRow {
    pub usage: u64,
    pub last_used: i64,
    pub name: String,
}

impl From<&FileRecord> for UsageRow {
    fn from(file: &FileRecord) -> Self {
        Self {
            usage: file.usage,
            last_used: file.last_used,
            name: file.name.clone(),
        }
    }
}

impl From<UsageRow> for FileRecord {
    fn from(row: UsageRow) -> Self {
        Self {
            name: row.name,
            usage: row.usage,
            last_used: row.last_used,
        }
    }
}

/// Error type for cache writes.
#[derive(Debug, thiserror::Error)]
#[error("{path}: {source}")]
pub struct CacheError {
    pub path: String,
    #[source]
    pub source: io::Error,
}

impl CacheError {
    fn new(path: &Path, source: io::Error) -> Self {
        Self {
            path: path.display().to_string(),
            source,
        }
    }
}

/// The correlation cache rooted at one directory.
#[derive(Debug, Clone)]
pub struct PackageCache {
    dir: PathBuf,
}

impl PackageCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    pub fn package_path(&self, name: &str) -> PathBuf {
        self.dir.join(PACKAGES_DIR).join(escape_file_name(name))
    }

    pub fn modified(&self) -> Option<SystemTime> {
        fs::metadata(self.index_path())
            .and_then(|m| m.modified())
            .ok()
    }

    /// Whether the cache may be used instead of querying the inventory.
    ///
    /// The cache is stale when it is absent or unreadable, when the frequency
    /// database has no modification time, or when the index is strictly older
    /// than the database. Equal times count as fresh.
    pub fn is_fresh(&self, db_modified: Option<SystemTime>) -> bool {
        match (self.modified(), db_modified) {
            (Some(cache), Some(db)) => cache >= db,
            _ => false,
        }
    }

    /// Reads the package index.
    pub fn read_index(&self) -> io::Result<Vec<UsageRow>> {
        read_rows(&self.index_path())
    }

    /// Reads the cached file listing of one package.
    pub fn read_package(&self, name: &str) -> io::Result<Vec<UsageRow>> {
        read_rows(&self.package_path(name))
    }

    /// Replaces the cache contents with `packages`.
    ///
    /// Per-package files are written first and listings of packages that are no
    /// longer present are removed; the index goes last.
    pub fn write(&self, packages: &[PackageRecord]) -> Result<(), CacheError> {
        let packages_dir = self.dir.join(PACKAGES_DIR);
        fs::create_dir_all(&packages_dir).map_err(|e| CacheError::new(&packages_dir, e))?;

        let mut written = HashSet::with_capacity(packages.len());
        for package in packages {
            let path = self.package_path(&package.name);
            let rows = package.files.iter().map(UsageRow::from);
            write_atomically(&path, |out| write_rows(out, rows))
                .map_err(|e| CacheError::new(&path, e))?;
            written.insert(path);
        }
        self.remove_leftovers(&packages_dir, &written);

        let index_path = self.index_path();
        let rows = packages.iter().map(|p| UsageRow {
            usage: p.usage,
            last_used: p.last_used,
            name: p.name.clone(),
        });
        write_atomically(&index_path, |out| write_rows(out, rows))
            .map_err(|e| CacheError::new(&index_path, e))?;

        debug!("Wrote {} packages to {}", packages.len(), self.dir.display());
        Ok(())
    }

    fn remove_leftovers(&self, packages_dir: &Path, keep: &HashSet<PathBuf>) {
        let entries = match fs::read_dir(packages_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("{}: {}", packages_dir.display(), e);
                return;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if keep.contains(&path) {
                continue;
            }
            if let Err(e) = fs::remove_file(&path) {
                warn!("Failed to remove {}: {}", path.display(), e);
            }
        }
    }
}

fn write_rows<W: Write>(out: &mut W, rows: impl Iterator<Item = UsageRow>) -> io::Result<()> {
    for row in rows {
        writeln!(out, "{}\t{}\t{}", row.usage, row.last_used, escape_name(&row.name))?;
    }
    Ok(())
}

fn read_rows(path: &Path) -> io::Result<Vec<UsageRow>> {
    let text = fs::read_to_string(path)?;
    let mut rows = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        if line.is_empty() {
            continue;
        }
        match parse_row(line) {
            Some(row) => rows.push(row),
            None => warn!(
                "{}:{}: malformed row {:?}, skipping",
                path.display(),
                idx + 1,
                line
            ),
        }
    }
    Ok(rows)
}

fn parse_row(line: &str) -> Option<UsageRow> {
    let mut fields = line.split('\t');
    let usage = fields.next()?.parse().ok()?;
    let last_used = fields.next()?.parse().ok()?;
    let name = unescape_name(fields.next()?)?;
    if fields.next().is_some() {
        return None;
    }
    Some(UsageRow {
        usage,
        last_used,
        name,
    })
}

fn escape_name(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '\t' => escaped.push_str("\\t"),
            '\n' => escaped.push_str("\\n"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn unescape_name(field: &str) -> Option<String> {
    let mut name = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            name.push(c);
            continue;
        }
        match chars.next()? {
            '\\' => name.push('\\'),
            't' => name.push('\t'),
            'n' => name.push('\n'),
            _ => return None,
        }
    }
    Some(name)
}

fn escape_file_name(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len());
    for (idx, c) in name.chars().enumerate() {
        match c {
            '%' => escaped.push_str("%25"),
            '/' => escaped.push_str("%2F"),
            '.' if idx == 0 => escaped.push_str("%2E"),
            other => escaped.push(other),
        }
    }
    escaped
}
