//! spy - file usage tracker.
//!
//! Samples running processes to count how often files on disk are used, and
//! correlates those counts with the installed packages that own the files.
//!
//! - `collector` - `/proc` sampling into a frequency map
//! - `storage` - the on-disk frequency database
//! - `config` - configuration file and live reload
//! - `scheduler` - periodic sampling and graceful shutdown
//! - `correlate` - per-package usage with a freshness-checked cache

pub mod collector;
pub mod config;
pub mod correlate;
pub mod scheduler;
pub mod storage;
