//! Configuration file handling.
//!
//! The configuration uses the same block format as the frequency database:
//!
//! ```text
//! interval 2
//! procDir /proc
//! dbFile /var/lib/spy/db
//! mappedFiles yes
//! cacheDir /var/cache/spy
//! listPackages spy-list_packages
//! listPackageFiles spy-list_package_files
//! ignoredPrefix {
//!     /proc
//!     /dev
//! }
//! ```
//!
//! Unknown directives and malformed values are reported and skipped. A
//! `procDir` that does not exist or is not a directory is fatal. Path values
//! and ignored prefixes are taken as raw bytes.

use std::ffi::OsStr;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tracing::{debug, info, warn};

use crate::collector::IgnoredPrefixes;
use crate::storage::scfg::{self, Directive, ScfgError};
use crate::storage::DbTarget;

/// Name of the program that prints installed package names.
pub const DEFAULT_LIST_PACKAGES: &str = "spy-list_packages";
/// Name of the program that prints the files owned by one package.
pub const DEFAULT_LIST_PACKAGE_FILES: &str = "spy-list_package_files";
/// Seconds between sampling passes.
pub const DEFAULT_INTERVAL: i64 = 2;

/// Error type for fatal configuration problems.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
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
    #[error("procDir {path}: {reason}")]
    ProcDir { path: String, reason: &'static str },
}

/// Runtime configuration. Immutable once built; reloads build a new value.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// File the configuration was read from, if any.
    pub config_file: Option<PathBuf>,
    pub db_file: DbTarget,
    /// Seconds between passes; negative means a single pass.
    pub interval: i64,
    pub proc_dir: PathBuf,
    pub ignored_prefixes: IgnoredPrefixes,
    pub collect_mapped_files: bool,
    /// Directory holding the package correlation cache.
    pub cache_dir: PathBuf,
    pub list_packages_cmd: Vec<String>,
    pub list_package_files_cmd: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("/var/lib"))
            .join("spy");
        let cache_dir = dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("/var/cache"))
            .join("spy");

        Self {
            config_file: None,
            db_file: DbTarget::File(data_dir.join("db")),
            interval: DEFAULT_INTERVAL,
            proc_dir: PathBuf::from("/proc"),
            ignored_prefixes: IgnoredPrefixes::default(),
            collect_mapped_files: true,
            cache_dir,
            list_packages_cmd: vec![DEFAULT_LIST_PACKAGES.to_string()],
            list_package_files_cmd: vec![DEFAULT_LIST_PACKAGE_FILES.to_string()],
        }
    }
}

impl Config {
    /// Default configuration file location: `$XDG_CONFIG_HOME/spy/config`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("spy").join("config"))
    }

    /// One-shot mode: a single pass, then exit.
    pub fn one_shot(&self) -> bool {
        self.interval < 0
    }

    /// Loads the configuration.
    ///
    /// With `explicit` set, the file must exist. Without it, the default path
    /// is tried and a missing file silently yields the defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) => path,
                None => return Ok(Self::default()),
            },
        };

        let text = match std::fs::read(&path) {
            Ok(text) => text,
            Err(e) if explicit.is_none() && e.kind() == io::ErrorKind::NotFound => {
                debug!("{} not found, using defaults", path.display());
                return Ok(Self {
                    config_file: Some(path),
                    ..Self::default()
                });
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.display().to_string(),
                    source,
                });
            }
        };

        let mut config = Self::parse(&text, Self::default()).map_err(|e| match e {
            ConfigError::Syntax { source, .. } => ConfigError::Syntax {
                path: path.display().to_string(),
                source,
            },
            other => other,
        })?;
        config.config_file = Some(path);
        Ok(config)
    }

    /// Applies the directives of `text` on top of `base`.
    pub fn parse(text: impl AsRef<[u8]>, base: Self) -> Result<Self, ConfigError> {
        let directives = scfg::parse(text).map_err(|source| ConfigError::Syntax {
            path: "<config>".to_string(),
            source,
        })?;

        let mut config = base;
        for directive in &directives {
            config.apply(directive)?;
        }
        Ok(config)
    }

    fn apply(&mut self, directive: &Directive) -> Result<(), ConfigError> {
        match directive.name.as_slice() {
            b"interval" => {
                let Some(value) = single_param(directive).and_then(|v| utf8_param(directive, v)) else {
                    return Ok(());
                };
                match value.parse::<i64>() {
                    Ok(interval) => {
                        self.interval = interval;
                        debug!("[CONFIG] Set interval to {}", interval);
                    }
                    Err(e) => warn!("line {}: interval {:?}: {}", directive.line, value, e),
                }
            }
            b"procDir" => {
                let Some(value) = single_param(directive) else {
                    return Ok(());
                };
                let path = PathBuf::from(OsStr::from_bytes(value));
                let metadata = std::fs::metadata(&path).map_err(|_| ConfigError::ProcDir {
                    path: path.display().to_string(),
                    reason: "does not exist",
                })?;
                if !metadata.is_dir() {
                    return Err(ConfigError::ProcDir {
                        path: path.display().to_string(),
                        reason: "is not a directory",
                    });
                }
                debug!("[CONFIG] Set procDir to {}", path.display());
                self.proc_dir = path;
            }
            b"dbFile" => {
                let Some(value) = single_param(directive) else {
                    return Ok(());
                };
                self.db_file = DbTarget::parse(OsStr::from_bytes(value));
                debug!("[CONFIG] Set dbFile to {}", self.db_file);
            }
            b"ignoredPrefix" => {
                let Some(children) = &directive.children else {
                    warn!(
                        "line {}: ignoredPrefix expects a block of prefixes, skipping",
                        directive.line
                    );
                    return Ok(());
                };
                self.ignored_prefixes = IgnoredPrefixes::new(children.iter().map(|c| c.name.clone()));
                debug!(
                    "[CONFIG] Set ignoredPrefix to {:?}",
                    children.iter().map(|c| c.display_name()).collect::<Vec<_>>()
                );
            }
            b"mappedFiles" => {
                let Some(value) = single_param(directive).and_then(|v| utf8_param(directive, v)) else {
                    return Ok(());
                };
                match parse_bool(value) {
                    Some(enabled) => {
                        self.collect_mapped_files = enabled;
                        debug!("[CONFIG] Set mappedFiles to {}", enabled);
                    }
                    None => warn!(
                        "line {}: mappedFiles expects yes or no, got {:?}",
                        directive.line, value
                    ),
                }
            }
            b"cacheDir" => {
                let Some(value) = single_param(directive) else {
                    return Ok(());
                };
                self.cache_dir = PathBuf::from(OsStr::from_bytes(value));
                debug!("[CONFIG] Set cacheDir to {}", self.cache_dir.display());
            }
            b"listPackages" | b"listPackageFiles" => {
                if directive.params.is_empty() {
                    warn!(
                        "line {}: {} expects a program, skipping",
                        directive.line,
                        directive.display_name()
                    );
                    return Ok(());
                }
                let Some(command) = directive
                    .params
                    .iter()
                    .map(|param| utf8_param(directive, param).map(str::to_string))
                    .collect::<Option<Vec<String>>>()
                else {
                    return Ok(());
                };
                debug!("[CONFIG] Set {} to {:?}", directive.display_name(), command);
                if directive.name == b"listPackages" {
                    self.list_packages_cmd = command;
                } else {
                    self.list_package_files_cmd = command;
                }
            }
            _ => {
                warn!(
                    "line {}: ignoring {}, unrecognized directive",
                    directive.line,
                    directive.display_name()
                );
            }
        }
        Ok(())
    }
}

fn single_param(directive: &Directive) -> Option<&[u8]> {
    if directive.params.len() != 1 {
        warn!(
            "line {}: {} expects 1 parameter, got {}",
            directive.line,
            directive.display_name(),
            directive.params.len()
        );
        return None;
    }
    Some(&directive.params[0])
}

fn utf8_param<'a>(directive: &Directive, value: &'a [u8]) -> Option<&'a str> {
    match std::str::from_utf8(value) {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(
                "line {}: {} value {:?} is not valid UTF-8",
                directive.line,
                directive.display_name(),
                String::from_utf8_lossy(value)
            );
            None
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "yes" | "true" | "on" | "1" => Some(true),
        "no" | "false" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// Shared, atomically replaceable configuration.
///
/// Readers take a snapshot and keep using it for the whole pass; a reload
/// swaps in a new value that only later snapshots observe.
#[derive(Debug, Clone)]
pub struct ConfigHandle(Arc<RwLock<Arc<Config>>>);

impl ConfigHandle {
    pub fn new(config: Config) -> Self {
        Self(Arc::new(RwLock::new(Arc::new(config))))
    }

    /// Returns the current configuration.
    pub fn snapshot(&self) -> Arc<Config> {
        match self.0.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Replaces the configuration for future snapshots.
    pub fn replace(&self, config: Config) {
        let config = Arc::new(config);
        match self.0.write() {
            Ok(mut guard) => *guard = config,
            Err(poisoned) => *poisoned.into_inner() = config,
        }
    }

    /// Re-reads the configuration file the current configuration came from.
    ///
    /// On failure the current configuration stays in effect.
    pub fn reload(&self, explicit: Option<&Path>) -> Result<Arc<Config>, ConfigError> {
        let config = Config::load(explicit)?;
        info!(
            "Reloaded config from {}",
            config
                .config_file
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "defaults".to_string())
        );
        self.replace(config);
        Ok(self.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn base() -> Config {
        Config {
            db_file: DbTarget::File(PathBuf::from("/var/lib/spy/db")),
            cache_dir: PathBuf::from("/var/cache/spy"),
            ..Config::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.interval, 2);
        assert_eq!(config.proc_dir, PathBuf::from("/proc"));
        assert_eq!(config.ignored_prefixes, IgnoredPrefixes::default());
        assert!(config.collect_mapped_files);
        assert!(!config.one_shot());
        assert_eq!(config.list_packages_cmd, vec!["spy-list_packages"]);
    }

    #[test]
    fn test_parse_all_directives() {
        let dir = tempdir().unwrap();
        let text = format!(
            "interval -1\nprocDir {}\ndbFile -\nmappedFiles no\ncacheDir /tmp/c\n\
             listPackages pacman -Qq\nlistPackageFiles /usr/bin/pkgfiles --quiet\n\
             ignoredPrefix {{ /a; /b }}\n",
            dir.path().display()
        );
        let config = Config::parse(&text, base()).unwrap();

        assert_eq!(config.interval, -1);
        assert!(config.one_shot());
        assert_eq!(config.proc_dir, dir.path());
        assert_eq!(config.db_file, DbTarget::Stdout);
        assert!(!config.collect_mapped_files);
        assert_eq!(config.cache_dir, PathBuf::from("/tmp/c"));
        assert_eq!(config.list_packages_cmd, vec!["pacman", "-Qq"]);
        assert_eq!(config.list_package_files_cmd, vec!["/usr/bin/pkgfiles", "--quiet"]);
        assert_eq!(
            config.ignored_prefixes,
            IgnoredPrefixes::new(vec!["/a".to_string(), "/b".to_string()])
        );
    }

    #[test]
    fn test_non_utf8_paths_and_prefixes() {
        let text = b"dbFile /srv/spy\xff/db\nignoredPrefix { \"/opt/\xfe\" }\ninterval \xff\n";
        let config = Config::parse(&text[..], base()).unwrap();

        assert_eq!(
            config.db_file,
            DbTarget::File(PathBuf::from(OsStr::from_bytes(b"/srv/spy\xff/db")))
        );
        assert!(config.ignored_prefixes.is_ignored(b"/opt/\xfe/lib.so"));
        assert!(!config.ignored_prefixes.is_ignored(b"/opt/lib.so"));
        assert_eq!(config.interval, DEFAULT_INTERVAL);
    }

    #[test]
    fn test_ignored_prefix_replaces_defaults() {
        let config = Config::parse("ignoredPrefix {}\n", base()).unwrap();
        assert!(config.ignored_prefixes.is_empty());
    }

    #[test]
    fn test_malformed_values_are_skipped() {
        let text = "interval abc\ninterval 1 2\ndbFile\nmappedFiles maybe\nbogus 1\nignoredPrefix /x\n";
        let config = Config::parse(text, base()).unwrap();
        assert_eq!(config, base());
    }

    #[test]
    fn test_proc_dir_missing_is_fatal() {
        let result = Config::parse("procDir /nonexistent/spy/proc\n", base());
        assert!(matches!(
            result,
            Err(ConfigError::ProcDir { reason: "does not exist", .. })
        ));
    }

    #[test]
    fn test_proc_dir_not_a_directory_is_fatal() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("file");
        std::fs::write(&file, "").unwrap();

        let result = Config::parse(&format!("procDir {}\n", file.display()), base());
        assert!(matches!(
            result,
            Err(ConfigError::ProcDir { reason: "is not a directory", .. })
        ));
    }

    #[test]
    fn test_load_explicit_missing_file_is_error() {
        let dir = tempdir().unwrap();
        let result = Config::load(Some(&dir.path().join("missing")));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config");
        std::fs::write(&path, "interval 30\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.interval, 30);
        assert_eq!(config.config_file.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn test_load_syntax_error_names_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config");
        std::fs::write(&path, "ignoredPrefix {\n").unwrap();

        let err = Config::load(Some(&path)).unwrap_err();
        assert!(err.to_string().starts_with(&path.display().to_string()));
    }

    #[test]
    fn test_handle_snapshot_is_stable_across_replace() {
        let handle = ConfigHandle::new(base());
        let before = handle.snapshot();

        handle.replace(Config {
            interval: 60,
            ..base()
        });

        assert_eq!(before.interval, DEFAULT_INTERVAL);
        assert_eq!(handle.snapshot().interval, 60);
    }

    #[test]
    fn test_handle_reload_failure_keeps_previous() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config");
        std::fs::write(&path, "interval 7\n").unwrap();

        let handle = ConfigHandle::new(base());
        assert_eq!(handle.reload(Some(&path)).unwrap().interval, 7);

        std::fs::write(&path, "procDir /nonexistent/spy/proc\n").unwrap();
        assert!(handle.reload(Some(&path)).is_err());
        assert_eq!(handle.snapshot().interval, 7);
    }
}
