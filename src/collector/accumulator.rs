//! Frequency accumulator: folds one sampling pass into the usage map.
//!
//! Counts are cumulative over the collector's lifetime. A pass starts from the
//! map loaded from disk and adds one per process per source that references a path.

use std::collections::HashMap;
use std::collections::hash_map;
use std::path::Path;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::collector::filter::IgnoredPrefixes;
use crate::collector::inspector::ProcessInspector;
use crate::collector::traits::FileSystem;

/// Mapping from absolute path to the number of times it was seen in use.
///
/// Keys are raw path bytes, so file names that are not UTF-8 are tracked too.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrequencyMap(HashMap<Vec<u8>, u64>);

impl FrequencyMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one use of `path`.
    pub fn record(&mut self, path: impl AsRef<[u8]>) {
        let path = path.as_ref();
        match self.0.get_mut(path) {
            Some(count) => *count = count.saturating_add(1),
            None => {
                self.0.insert(path.to_vec(), 1);
            }
        }
    }

    /// Sets the count of `path`, replacing any previous value.
    pub fn insert(&mut self, path: impl Into<Vec<u8>>, count: u64) {
        self.0.insert(path.into(), count);
    }

    /// Returns the count for `path`, or 0 if it was never observed.
    pub fn get(&self, path: impl AsRef<[u8]>) -> u64 {
        self.0.get(path.as_ref()).copied().unwrap_or(0)
    }

    pub fn contains(&self, path: impl AsRef<[u8]>) -> bool {
        self.0.contains_key(path.as_ref())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> hash_map::Iter<'_, Vec<u8>, u64> {
        self.0.iter()
    }

    /// Entries sorted by path bytes, for deterministic output.
    pub fn sorted_entries(&self) -> Vec<(&[u8], u64)> {
        let mut entries: Vec<(&[u8], u64)> =
            self.0.iter().map(|(k, v)| (k.as_slice(), *v)).collect();
        entries.sort_unstable_by(|a, b| a.0.cmp(b.0));
        entries
    }
}

impl<K: Into<Vec<u8>>> FromIterator<(K, u64)> for FrequencyMap {
    fn from_iter<T: IntoIterator<Item = (K, u64)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// Error type for a failed sampling pass.
#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    /// The process root itself could not be listed.
    #[error("cannot list {path}: {source}")]
    ProcRoot {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Statistics of one sampling pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassStats {
    /// Processes successfully inspected.
    pub processes: usize,
    /// Processes skipped because their state could not be read.
    pub skipped: usize,
    /// Counter increments applied to the map.
    pub increments: usize,
    /// Paths seen for the first time.
    pub new_paths: usize,
    pub elapsed: Duration,
}

/// Runs sampling passes over every live process.
pub struct Collector<F: FileSystem> {
    inspector: ProcessInspector<F>,
}

impl<F: FileSystem> Collector<F> {
    pub fn new(inspector: ProcessInspector<F>) -> Self {
        Self { inspector }
    }

    pub fn inspector(&self) -> &ProcessInspector<F> {
        &self.inspector
    }

    /// Inspects every numeric entry under the proc root and folds the
    /// candidates into `map`.
    ///
    /// Processes that cannot be read are skipped; only failure to list the
    /// proc root aborts the pass.
    pub fn collect_pass(
        &self,
        map: &mut FrequencyMap,
        filter: &IgnoredPrefixes,
    ) -> Result<PassStats, CollectError> {
        let start = Instant::now();
        let proc_path: &Path = self.inspector.proc_path();
        let entries = self
            .inspector
            .fs()
            .read_dir(proc_path)
            .map_err(|source| CollectError::ProcRoot {
                path: proc_path.display().to_string(),
                source,
            })?;

        let mut stats = PassStats::default();

        for entry in entries {
            // Check if entry is a PID directory (numeric name)
            let Some(pid) = entry
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|name| name.parse::<u32>().ok())
            else {
                continue;
            };
            if !self.inspector.fs().is_dir(&entry) {
                continue;
            }

            match self.inspector.inspect(pid, filter) {
                Ok(candidates) => {
                    stats.processes += 1;
                    for path in candidates.iter() {
                        if !map.contains(path) {
                            stats.new_paths += 1;
                        }
                        map.record(path);
                        stats.increments += 1;
                    }
                }
                Err(e) => {
                    debug!("skipping process: {}", e);
                    stats.skipped += 1;
                }
            }
        }

        stats.elapsed = start.elapsed();
        if stats.processes == 0 && stats.skipped > 0 {
            warn!(
                "no process under {} could be inspected ({} skipped)",
                proc_path.display(),
                stats.skipped
            );
        }
        Ok(stats)
    }
}
