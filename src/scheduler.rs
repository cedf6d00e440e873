//! Sampling scheduler: periodic passes, persistence and shutdown.
//!
//! ```text
//! Idle ──▶ Sampling ──▶ Persisting ──▶ Sleeping ──┐
//!              ▲                                  │
//!              └──────────────────────────────────┘
//! ```
//!
//! Each pass takes a configuration snapshot and uses it until the pass is
//! done, so a reload only affects later passes. Termination never interrupts
//! a write: `ShutdownCoordinator` tracks whether a persist is in flight and a
//! shutdown request waits for it to finish.

use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use signal_hook::consts::SIGHUP;
use signal_hook::iterator::Signals;
use tracing::{debug, error, info, trace, warn};

use crate::collector::{CollectError, Collector, FileSystem, FrequencyMap, ProcessInspector};
use crate::config::{Config, ConfigHandle};
use crate::storage::{FrequencyDb, StoreError};

/// Scheduler state, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Sampling,
    Persisting,
    Sleeping,
    Stopped,
}

/// How `Scheduler::run` ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Negative interval: one pass was sampled and persisted.
    OneShot,
    /// A shutdown was requested between passes.
    Shutdown,
}

/// Error type for fatal scheduler failures.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Collect(#[from] CollectError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Error type for signal handler installation.
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    #[error("failed to install termination handler: {0}")]
    Termination(#[from] ctrlc::Error),
    #[error("failed to install reload handler: {0}")]
    Reload(#[from] io::Error),
}

#[derive(Debug, Default)]
struct ShutdownState {
    writing: bool,
    shutdown: bool,
}

/// Coordinates the foreground pass loop with the termination listener.
///
/// The write-in-progress flag is the only shared state: it is set right before
/// a persist and cleared right after, and `wait_for_idle` blocks on a condition
/// variable until it is clear.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    state: Mutex<ShutdownState>,
    changed: Condvar,
}

/// Marks a persist as in flight until dropped.
#[derive(Debug)]
pub struct WriteGuard<'a> {
    coordinator: &'a ShutdownCoordinator,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.coordinator.lock().writing = false;
        self.coordinator.changed.notify_all();
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ShutdownState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Marks a persist as started.
    ///
    /// Returns `None` once shutdown has been requested: no new write may begin
    /// after that point.
    pub fn begin_write(&self) -> Option<WriteGuard<'_>> {
        let mut state = self.lock();
        if state.shutdown {
            return None;
        }
        state.writing = true;
        Some(WriteGuard { coordinator: self })
    }

    pub fn is_writing(&self) -> bool {
        self.lock().writing
    }

    pub fn shutdown_requested(&self) -> bool {
        self.lock().shutdown
    }

    /// Requests shutdown and wakes a sleeping pass loop.
    pub fn request_shutdown(&self) {
        self.lock().shutdown = true;
        self.changed.notify_all();
    }

    /// Blocks until no persist is in flight.
    pub fn wait_for_idle(&self) {
        let mut state = self.lock();
        while state.writing {
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// Sleeps for `duration` or until shutdown is requested.
    ///
    /// Returns `true` if shutdown was requested.
    pub fn sleep(&self, duration: Duration) -> bool {
        let state = self.lock();
        let (state, _) = self
            .changed
            .wait_timeout_while(state, duration, |s| !s.shutdown)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        state.shutdown
    }
}

/// Drives sampling passes over the live process table.
pub struct Scheduler<F: FileSystem + Clone> {
    fs: F,
    config: ConfigHandle,
    coordinator: Arc<ShutdownCoordinator>,
    map: FrequencyMap,
    state: SchedulerState,
    passes: u64,
    search_path: Option<Vec<PathBuf>>,
}

impl<F: FileSystem + Clone> Scheduler<F> {
    /// Creates a scheduler starting from `map`, usually the persisted store.
    pub fn new(
        fs: F,
        config: ConfigHandle,
        coordinator: Arc<ShutdownCoordinator>,
        map: FrequencyMap,
    ) -> Self {
        Self {
            fs,
            config,
            coordinator,
            map,
            state: SchedulerState::Idle,
            passes: 0,
            search_path: None,
        }
    }

    /// Overrides `$PATH` for program resolution.
    pub fn with_search_path(mut self, dirs: Vec<PathBuf>) -> Self {
        self.search_path = Some(dirs);
        self
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn map(&self) -> &FrequencyMap {
        &self.map
    }

    pub fn passes(&self) -> u64 {
        self.passes
    }

    fn transition(&mut self, next: SchedulerState) {
        trace!("scheduler: {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn collector(&self, config: &Config) -> Collector<F> {
        let mut inspector = ProcessInspector::new(self.fs.clone(), &config.proc_dir)
            .with_mapped_files(config.collect_mapped_files);
        if let Some(dirs) = &self.search_path {
            inspector = inspector.with_search_path(dirs.iter().cloned());
        }
        Collector::new(inspector)
    }

    /// Runs one Sampling -> Persisting cycle with a fresh configuration snapshot.
    ///
    /// Returns `Ok(false)` if shutdown was requested before the write could start.
    pub fn run_pass(&mut self) -> Result<bool, SchedulerError> {
        let config = self.config.snapshot();

        self.transition(SchedulerState::Sampling);
        let stats = self
            .collector(&config)
            .collect_pass(&mut self.map, &config.ignored_prefixes)?;
        self.passes += 1;
        debug!(
            "Pass #{}: {} processes, {} skipped, {} new paths, {} tracked ({:?})",
            self.passes,
            stats.processes,
            stats.skipped,
            stats.new_paths,
            self.map.len(),
            stats.elapsed
        );

        self.transition(SchedulerState::Persisting);
        let Some(_guard) = self.coordinator.begin_write() else {
            debug!("shutdown requested, not persisting");
            return Ok(false);
        };
        debug!("Writing to {}", config.db_file);
        FrequencyDb::new(config.db_file.clone()).persist(&self.map)?;
        Ok(true)
    }

    /// Runs passes until shutdown, or exactly one pass in one-shot mode.
    pub fn run(&mut self) -> Result<RunOutcome, SchedulerError> {
        let outcome = self.run_loop();
        self.transition(SchedulerState::Stopped);
        outcome
    }

    fn run_loop(&mut self) -> Result<RunOutcome, SchedulerError> {
        loop {
            if self.coordinator.shutdown_requested() {
                return Ok(RunOutcome::Shutdown);
            }

            let persisted = match self.run_pass() {
                Ok(persisted) => persisted,
                Err(SchedulerError::Store(e)) => {
                    // The collected data is useless if it cannot be written
                    error!("Failed to persist: {}", e);
                    return Err(SchedulerError::Store(e));
                }
                Err(e) => return Err(e),
            };
            if !persisted {
                return Ok(RunOutcome::Shutdown);
            }

            let config = self.config.snapshot();
            if config.one_shot() {
                return Ok(RunOutcome::OneShot);
            }

            self.transition(SchedulerState::Sleeping);
            let interval = Duration::from_secs(config.interval.unsigned_abs());
            if self.coordinator.sleep(interval) {
                info!("Shutdown requested, stopping after {} passes", self.passes);
                return Ok(RunOutcome::Shutdown);
            }
        }
    }
}

/// Installs the termination and reload listeners.
///
/// SIGINT/SIGTERM request shutdown, wait for an in-flight persist to finish
/// and exit with status 0. SIGHUP re-reads `config_path` (or the default
/// location) on a background thread; a failed reload keeps the current
/// configuration.
pub fn install_signal_handlers(
    coordinator: Arc<ShutdownCoordinator>,
    config: ConfigHandle,
    config_path: Option<PathBuf>,
) -> Result<(), SignalError> {
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        coordinator.request_shutdown();
        if coordinator.is_writing() {
            debug!("Waiting for the database write to finish");
        }
        coordinator.wait_for_idle();
        std::process::exit(0);
    })?;

    let mut signals = Signals::new([SIGHUP])?;
    thread::Builder::new()
        .name("spy-reload".to_string())
        .spawn(move || {
            for _ in signals.forever() {
                info!("Received reload signal");
                if let Err(e) = config.reload(config_path.as_deref()) {
                    warn!("Reload failed, keeping previous config: {}", e);
                }
            }
        })?;

    Ok(())
}
