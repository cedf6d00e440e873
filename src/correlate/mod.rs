//! Package correlation: joins the frequency map against the installed
//! package inventory.
//!
//! The inventory is queried through two external programs, which is slow, so
//! the result is mirrored in a [`PackageCache`]. The cache is reused as long
//! as it is not older than the frequency database.
//!
//! Membership tests on the fresh-cache path use binary search over sorted
//! name lists: both the installed package list and the cached names are
//! sorted before probing.

pub mod cache;
pub mod report;

use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use crate::collector::FrequencyMap;
use crate::storage::{FrequencyDb, StoreError};
pub use cache::{CacheError, PackageCache, UsageRow};

/// Usage of one file owned by a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub name: String,
    pub usage: u64,
    /// Epoch seconds, 0 if never used.
    pub last_used: i64,
}

/// Aggregated usage of one installed package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRecord {
    pub name: String,
    /// Sum of the files' usage.
    pub usage: u64,
    /// Latest `last_used` among the files, 0 if none was used.
    pub last_used: i64,
    /// In the order reported by the inventory.
    pub files: Vec<FileRecord>,
}

impl PackageRecord {
    pub fn from_files(name: impl Into<String>, files: Vec<FileRecord>) -> Self {
        let usage = files.iter().fold(0u64, |sum, f| sum.saturating_add(f.usage));
        let last_used = files.iter().map(|f| f.last_used).max().unwrap_or(0).max(0);
        Self {
            name: name.into(),
            usage,
            last_used,
            files,
        }
    }
}

/// Error type for inventory queries.
#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    #[error("no command configured")]
    NoCommand,
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} exited with {status}: {stderr}")]
    Status {
        program: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
}

/// Source of truth for installed packages and the files they own.
pub trait PackageInventory {
    fn list_packages(&self) -> Result<Vec<String>, InventoryError>;
    fn list_files(&self, package: &str) -> Result<Vec<String>, InventoryError>;
}

/// Inventory backed by two external programs printing one entry per line.
#[derive(Debug, Clone)]
pub struct CommandInventory {
    list_packages: Vec<String>,
    list_package_files: Vec<String>,
}

impl CommandInventory {
    /// `list_package_files` receives the package name as an extra last argument.
    pub fn new(list_packages: Vec<String>, list_package_files: Vec<String>) -> Self {
        Self {
            list_packages,
            list_package_files,
        }
    }

    fn run(command: &[String], extra: Option<&str>) -> Result<Vec<String>, InventoryError> {
        let (program, args) = command.split_first().ok_or(InventoryError::NoCommand)?;
        let mut cmd = Command::new(program);
        cmd.args(args);
        if let Some(extra) = extra {
            cmd.arg(extra);
        }

        let output = cmd.output().map_err(|source| InventoryError::Spawn {
            program: program.clone(),
            source,
        })?;
        if !output.status.success() {
            return Err(InventoryError::Status {
                program: program.clone(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect())
    }
}

impl PackageInventory for CommandInventory {
    fn list_packages(&self) -> Result<Vec<String>, InventoryError> {
        Self::run(&self.list_packages, None)
    }

    fn list_files(&self, package: &str) -> Result<Vec<String>, InventoryError> {
        Self::run(&self.list_package_files, Some(package))
    }
}

/// Per-path usage and the time it was last observed.
#[derive(Debug, Clone, Default)]
pub struct UsageIndex {
    map: FrequencyMap,
    last_used: i64,
}

impl UsageIndex {
    /// `last_used` (epoch seconds) is reported for every path with a non-zero count.
    pub fn new(map: FrequencyMap, last_used: i64) -> Self {
        Self { map, last_used }
    }

    /// Loads the frequency database; its modification time is the last-used time.
    pub fn from_store(db: &FrequencyDb) -> Result<Self, StoreError> {
        let map = db.load()?;
        let last_used = db.modified().map(epoch_seconds).unwrap_or(0);
        Ok(Self::new(map, last_used))
    }

    pub fn map(&self) -> &FrequencyMap {
        &self.map
    }

    pub fn file(&self, path: &str) -> FileRecord {
        let usage = self.map.get(path);
        FileRecord {
            name: path.to_string(),
            usage,
            last_used: if usage > 0 { self.last_used } else { 0 },
        }
    }
}

fn epoch_seconds(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Result of one correlation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Correlation {
    /// Sorted by package name.
    pub packages: Vec<PackageRecord>,
    /// Number of packages whose files were queried from the inventory.
    pub requeried: usize,
}

impl Correlation {
    pub fn package(&self, name: &str) -> Option<&PackageRecord> {
        self.packages
            .binary_search_by(|p| p.name.as_str().cmp(name))
            .ok()
            .map(|idx| &self.packages[idx])
    }
}

/// Joins usage data with the package inventory, through the cache.
pub struct Correlator<I: PackageInventory> {
    inventory: I,
    cache: PackageCache,
}

impl<I: PackageInventory> Correlator<I> {
    pub fn new(inventory: I, cache: PackageCache) -> Self {
        Self { inventory, cache }
    }

    pub fn inventory(&self) -> &I {
        &self.inventory
    }

    pub fn cache(&self) -> &PackageCache {
        &self.cache
    }

    /// Correlates `usage` with the installed packages.
    ///
    /// A stale cache (see [`PackageCache::is_fresh`]) is rebuilt by querying every
    /// installed package. A fresh cache is reused for packages still installed;
    /// only packages missing from it or with an unreadable listing are queried.
    /// The cache is rewritten whenever anything was queried.
    ///
    /// Inventory failures are never fatal: a failed package listing yields an
    /// empty result and leaves the cache alone, a failed file query omits that
    /// package.
    pub fn correlate(
        &self,
        usage: &UsageIndex,
        db_modified: Option<SystemTime>,
    ) -> Result<Correlation, CacheError> {
        let mut installed = match self.inventory.list_packages() {
            Ok(installed) => installed,
            Err(e) => {
                warn!("Failed to list installed packages: {}", e);
                return Ok(Correlation::default());
            }
        };
        installed.sort_unstable();
        installed.dedup();

        let cached = if self.cache.is_fresh(db_modified) {
            match self.cache.read_index() {
                Ok(index) => Some(index),
                Err(e) => {
                    warn!("{}: {}", self.cache.index_path().display(), e);
                    None
                }
            }
        } else {
            None
        };

        let correlation = match cached {
            Some(index) => {
                debug!("Cache in {} is fresh", self.cache.dir().display());
                self.from_cache(&installed, index, usage)
            }
            None => {
                info!("Cache is stale, querying {} packages", installed.len());
                self.rebuild(&installed, usage)
            }
        };

        if correlation.requeried > 0 {
            self.cache.write(&correlation.packages)?;
        }
        Ok(correlation)
    }

    fn query(&self, name: &str, usage: &UsageIndex) -> Option<PackageRecord> {
        match self.inventory.list_files(name) {
            Ok(files) => Some(PackageRecord::from_files(
                name,
                files.iter().map(|path| usage.file(path)).collect(),
            )),
            Err(e) => {
                warn!("Skipping package {}: {}", name, e);
                None
            }
        }
    }

    fn rebuild(&self, installed: &[String], usage: &UsageIndex) -> Correlation {
        let packages = installed
            .iter()
            .filter_map(|name| self.query(name, usage))
            .collect();
        Correlation {
            packages,
            requeried: installed.len(),
        }
    }

    fn from_cache(&self, installed: &[String], index: Vec<UsageRow>, usage: &UsageIndex) -> Correlation {
        let mut cached_names: Vec<String> = index.into_iter().map(|row| row.name).collect();
        cached_names.sort_unstable();
        cached_names.dedup();

        let mut packages = Vec::with_capacity(installed.len());
        let mut requeried = 0;

        for name in &cached_names {
            if installed.binary_search(name).is_err() {
                debug!("{} is no longer installed", name);
                continue;
            }
            match self.cache.read_package(name) {
                Ok(rows) => packages.push(PackageRecord::from_files(
                    name.as_str(),
                    rows.into_iter().map(FileRecord::from).collect(),
                )),
                Err(e) => {
                    debug!("Cached listing of {} unreadable ({}), querying", name, e);
                    requeried += 1;
                    packages.extend(self.query(name, usage));
                }
            }
        }

        for name in installed {
            if cached_names.binary_search(name).is_err() {
                debug!("{} is not cached, querying", name);
                requeried += 1;
                packages.extend(self.query(name, usage));
            }
        }

        packages.sort_unstable_by(|a, b| a.name.cmp(&b.name));
        Correlation {
            packages,
            requeried,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::DbTarget;
    use filetime::{FileTime, set_file_mtime};
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::time::Duration;
    use tempfile::{TempDir, tempdir};

    #[derive(Default)]
    struct MockInventory {
        packages: Option<Vec<String>>,
        files: HashMap<String, Vec<String>>,
        queries: RefCell<Vec<String>>,
    }

    impl MockInventory {
        fn with(packages: &[(&str, &[&str])]) -> Self {
            Self {
                packages: Some(packages.iter().map(|(name, _)| name.to_string()).collect()),
                files: packages
                    .iter()
                    .map(|(name, files)| {
                        (name.to_string(), files.iter().map(|f| f.to_string()).collect())
                    })
                    .collect(),
                queries: RefCell::default(),
            }
        }

        fn queries(&self) -> Vec<String> {
            let mut queries = self.queries.borrow().clone();
            queries.sort();
            queries
        }
    }

    impl PackageInventory for MockInventory {
        fn list_packages(&self) -> Result<Vec<String>, InventoryError> {
            self.packages.clone().ok_or(InventoryError::NoCommand)
        }

        fn list_files(&self, package: &str) -> Result<Vec<String>, InventoryError> {
            self.queries.borrow_mut().push(package.to_string());
            self.files.get(package).cloned().ok_or(InventoryError::NoCommand)
        }
    }

    const PKG_A: (&str, &[&str]) = ("pkgA", &["/usr/bin/foo", "/usr/bin/baz"]);
    const PKG_B: (&str, &[&str]) = ("pkgB", &["/usr/bin/bar", "/usr/lib/libbar.so"]);

    fn usage() -> UsageIndex {
        let map: FrequencyMap = [("/usr/bin/foo".to_string(), 5), ("/usr/bin/bar".to_string(), 2)]
            .into_iter()
            .collect();
        UsageIndex::new(map, 1_700_000_000)
    }

    fn db_time() -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(1_700_000_000)
    }

    fn set_cache_time(cache: &PackageCache, time: SystemTime) {
        set_file_mtime(cache.index_path(), FileTime::from_system_time(time)).unwrap();
    }

    fn correlator(inventory: MockInventory) -> (TempDir, Correlator<MockInventory>) {
        let dir = tempdir().unwrap();
        let cache = PackageCache::new(dir.path().join("cache"));
        (dir, Correlator::new(inventory, cache))
    }

    #[test]
    fn test_correlate_aggregates_usage() {
        let (_dir, correlator) = correlator(MockInventory::with(&[PKG_A]));

        let result = correlator.correlate(&usage(), Some(db_time())).unwrap();
        let pkg = result.package("pkgA").unwrap();

        assert_eq!(pkg.usage, 5);
        assert_eq!(pkg.last_used, 1_700_000_000);
        assert_eq!(
            pkg.files,
            vec![
                FileRecord { name: "/usr/bin/foo".into(), usage: 5, last_used: 1_700_000_000 },
                FileRecord { name: "/usr/bin/baz".into(), usage: 0, last_used: 0 },
            ]
        );
    }

    #[test]
    fn test_package_totals_match_files() {
        let (_dir, correlator) = correlator(MockInventory::with(&[PKG_A, PKG_B, ("empty", &[])]));

        let result = correlator.correlate(&usage(), None).unwrap();

        assert_eq!(result.packages.len(), 3);
        for pkg in &result.packages {
            let sum: u64 = pkg.files.iter().map(|f| f.usage).sum();
            let max = pkg.files.iter().map(|f| f.last_used).max().unwrap_or(0);
            assert_eq!(pkg.usage, sum);
            assert_eq!(pkg.last_used, max);
        }
        assert_eq!(result.package("empty").unwrap().last_used, 0);
    }

    #[test]
    fn test_stale_cache_requeries_everything() {
        let (_dir, correlator) = correlator(MockInventory::with(&[PKG_A, PKG_B]));
        correlator.correlate(&usage(), Some(db_time())).unwrap();
        set_cache_time(correlator.cache(), db_time() - Duration::from_secs(60));
        correlator.inventory().queries.borrow_mut().clear();

        let result = correlator.correlate(&usage(), Some(db_time())).unwrap();

        assert_eq!(result.requeried, 2);
        assert_eq!(correlator.inventory().queries(), vec!["pkgA", "pkgB"]);
    }

    #[test]
    fn test_fresh_cache_skips_queries() {
        let (_dir, correlator) = correlator(MockInventory::with(&[PKG_A, PKG_B]));
        let first = correlator.correlate(&usage(), Some(db_time())).unwrap();
        set_cache_time(correlator.cache(), db_time() + Duration::from_secs(60));
        correlator.inventory().queries.borrow_mut().clear();

        let second = correlator.correlate(&usage(), Some(db_time())).unwrap();

        assert_eq!(second.requeried, 0);
        assert!(correlator.inventory().queries().is_empty());
        assert_eq!(second.packages, first.packages);
    }

    #[test]
    fn test_fresh_cache_with_equal_mtime() {
        let (_dir, correlator) = correlator(MockInventory::with(&[PKG_A]));
        correlator.correlate(&usage(), Some(db_time())).unwrap();
        set_cache_time(correlator.cache(), db_time());
        correlator.inventory().queries.borrow_mut().clear();

        let result = correlator.correlate(&usage(), Some(db_time())).unwrap();
        assert_eq!(result.requeried, 0);
    }

    #[test]
    fn test_fresh_cache_drops_uninstalled_and_adds_new() {
        let (_dir, mut correlator) = correlator(MockInventory::with(&[PKG_A, PKG_B]));
        correlator.correlate(&usage(), Some(db_time())).unwrap();

        correlator.inventory = MockInventory::with(&[PKG_A, ("pkgC", &["/usr/bin/foo"])]);
        set_cache_time(correlator.cache(), db_time() + Duration::from_secs(60));

        let result = correlator.correlate(&usage(), Some(db_time())).unwrap();
        let names: Vec<&str> = result.packages.iter().map(|p| p.name.as_str()).collect();

        assert_eq!(names, vec!["pkgA", "pkgC"]);
        assert_eq!(correlator.inventory().queries(), vec!["pkgC"]);
        assert_eq!(result.package("pkgC").unwrap().usage, 5);
        // Rewritten because pkgC was queried
        let index = correlator.cache().read_index().unwrap();
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_unreadable_cached_listing_is_requeried() {
        let (_dir, correlator) = correlator(MockInventory::with(&[PKG_A, PKG_B]));
        correlator.correlate(&usage(), Some(db_time())).unwrap();
        std::fs::remove_file(correlator.cache().package_path("pkgB")).unwrap();
        set_cache_time(correlator.cache(), db_time() + Duration::from_secs(60));
        correlator.inventory().queries.borrow_mut().clear();

        let result = correlator.correlate(&usage(), Some(db_time())).unwrap();

        assert_eq!(result.requeried, 1);
        assert_eq!(correlator.inventory().queries(), vec!["pkgB"]);
        assert_eq!(result.package("pkgB").unwrap().usage, 2);
        assert!(correlator.cache().package_path("pkgB").exists());
    }

    #[test]
    fn test_failed_file_query_omits_package() {
        let mut inventory = MockInventory::with(&[PKG_A, PKG_B]);
        inventory.files.remove("pkgB");
        let (_dir, correlator) = correlator(inventory);

        let result = correlator.correlate(&usage(), None).unwrap();

        assert!(result.package("pkgA").is_some());
        assert!(result.package("pkgB").is_none());
    }

    #[test]
    fn test_failed_package_listing_keeps_cache() {
        let (_dir, mut correlator) = correlator(MockInventory::with(&[PKG_A]));
        correlator.correlate(&usage(), None).unwrap();

        correlator.inventory = MockInventory::default();
        let result = correlator.correlate(&usage(), None).unwrap();

        assert!(result.packages.is_empty());
        assert_eq!(correlator.cache().read_index().unwrap().len(), 1);
    }

    #[test]
    fn test_usage_index_from_store() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db");
        let db = FrequencyDb::new(DbTarget::File(path.clone()));
        let map: FrequencyMap = [("/used".to_string(), 3), ("/zero".to_string(), 0)]
            .into_iter()
            .collect();
        db.persist(&map).unwrap();
        set_file_mtime(&path, FileTime::from_unix_time(1_600_000_000, 0)).unwrap();

        let index = UsageIndex::from_store(&db).unwrap();

        assert_eq!(index.file("/used").last_used, 1_600_000_000);
        assert_eq!(index.file("/zero"), FileRecord { name: "/zero".into(), usage: 0, last_used: 0 });
        assert_eq!(index.file("/absent").usage, 0);
    }

    #[test]
    fn test_command_inventory() {
        let inventory = CommandInventory::new(
            vec!["printf".into(), "b\\na\\n\\n".into()],
            vec!["echo".into(), "owned-by".into()],
        );

        assert_eq!(inventory.list_packages().unwrap(), vec!["b", "a"]);
        assert_eq!(inventory.list_files("pkg").unwrap(), vec!["owned-by pkg"]);
    }

    #[test]
    fn test_command_inventory_failures() {
        let missing = CommandInventory::new(vec!["/nonexistent/spy-list".into()], vec![]);
        assert!(matches!(missing.list_packages(), Err(InventoryError::Spawn { .. })));
        assert!(matches!(missing.list_files("x"), Err(InventoryError::NoCommand)));

        let failing = CommandInventory::new(vec!["false".into()], vec![]);
        assert!(matches!(failing.list_packages(), Err(InventoryError::Status { .. })));
    }
}
