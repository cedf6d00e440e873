//! File usage collector for Linux.
//!
//! Samples the `/proc` filesystem to find out which files running processes
//! use, and folds the result into a cumulative frequency map.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Collector                           │
//! │  ┌─────────────────────┐   ┌─────────────────────────────┐  │
//! │  │  ProcessInspector   │   │      IgnoredPrefixes        │  │
//! │  │  - /proc/[pid]/     │──▶│  - byte prefix exclusion    │  │
//! │  │    cmdline          │   └─────────────────────────────┘  │
//! │  │  - /proc/[pid]/     │                                    │
//! │  │    map_files/*      │──▶ FrequencyMap (path -> count)    │
//! │  └──────────┬──────────┘                                    │
//! │             │                                               │
//! │      ┌──────▼──────┐                                        │
//! │      │  FileSystem │ (trait)                                │
//! │      └──────┬──────┘                                        │
//! └─────────────┼───────────────────────────────────────────────┘
//!               │
//!        ┌──────┴──────┐
//!        │             │
//! ┌──────▼──────┐ ┌────▼────────┐
//! │   RealFs    │ │   MockFs    │
//! │  (Linux)    │ │ (Testing)   │
//! └─────────────┘ └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```
//! use spy::collector::{Collector, FrequencyMap, IgnoredPrefixes, MockFs, ProcessInspector};
//!
//! let fs = MockFs::typical_system();
//! let inspector = ProcessInspector::new(fs, "/proc").with_search_path(["/usr/bin"]);
//! let collector = Collector::new(inspector);
//! let mut map = FrequencyMap::new();
//! collector.collect_pass(&mut map, &IgnoredPrefixes::default()).unwrap();
//! assert!(map.get("/usr/bin/python") > 0);
//! ```

mod accumulator;
pub mod filter;
mod inspector;
pub mod mock;
pub mod traits;

pub use accumulator::{CollectError, Collector, FrequencyMap, PassStats};
pub use filter::{DEFAULT_IGNORED_PREFIXES, IgnoredPrefixes};
pub use inspector::{Candidates, InspectError, ProcessInspector, SCRIPT_INTERPRETERS};
pub use mock::MockFs;
pub use traits::{FileSystem, RealFs};
