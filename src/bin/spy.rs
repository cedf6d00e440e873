//! spy - track which files running processes use.
//!
//! Usage:
//!   spy collect              # sample processes every `interval` seconds
//!   spy update               # correlate usage with installed packages
//!   spy show                 # per-package usage, most used first
//!   spy show bash            # per-file usage of one package
//!   spy show --unused        # packages that were never used
//!   spy -c ./config -d collect

use tikv_jemallocator::Jemalloc;
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::error::ErrorKind;
use clap::{Parser, Subcommand};
use tracing::{Level, debug, error, info};
use tracing_subscriber::EnvFilter;

use spy::collector::RealFs;
use spy::config::{Config, ConfigError, ConfigHandle};
use spy::correlate::{CacheError, CommandInventory, Correlator, PackageCache, UsageIndex, report};
use spy::scheduler::{
    RunOutcome, Scheduler, SchedulerError, ShutdownCoordinator, SignalError,
    install_signal_handlers,
};
use spy::storage::{DbTarget, FrequencyDb, StoreError};

/// Track how often files are used and which packages they belong to.
#[derive(Parser)]
#[command(name = "spy", version)]
struct Args {
    /// Configuration file (default: $XDG_CONFIG_HOME/spy/config).
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(short = 'd', long = "debug")]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sample running processes and update the frequency database.
    Collect,
    /// Correlate the frequency database with installed packages.
    Update,
    /// Print package usage from the last update.
    Show {
        /// Show the files of this package instead of all packages.
        package: Option<String>,

        /// Only list entries that were never used.
        #[arg(long)]
        unused: bool,
    },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    Signal(#[from] SignalError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("{path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to write output: {0}")]
    Output(#[source] io::Error),
    #[error("{0}")]
    Usage(String),
}

/// Builds the log filter: `RUST_LOG` directives plus `spy=<level>` for this crate.
fn log_filter(env: EnvFilter, debug: bool) -> EnvFilter {
    let level = if debug { Level::DEBUG } else { Level::INFO };
    match format!("spy={}", level).parse() {
        Ok(directive) => env.add_directive(directive),
        Err(_) => env,
    }
}

/// Initializes the tracing subscriber. Default level is INFO, `-d` enables DEBUG.
fn init_logging(debug: bool) {
    let filter = log_filter(EnvFilter::from_default_env(), debug);

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn collect(config: Config) -> Result<(), CliError> {
    let db = FrequencyDb::new(config.db_file.clone());
    let map = db.load()?;
    info!(
        "spy {} collecting: interval={}s, proc={}, db={}, {} paths tracked",
        env!("CARGO_PKG_VERSION"),
        config.interval,
        config.proc_dir.display(),
        config.db_file,
        map.len()
    );

    let config_path = config.config_file.clone();
    let handle = ConfigHandle::new(config);
    let coordinator = Arc::new(ShutdownCoordinator::new());
    install_signal_handlers(coordinator.clone(), handle.clone(), config_path)?;

    let mut scheduler = Scheduler::new(RealFs::new(), handle, coordinator, map);
    match scheduler.run()? {
        RunOutcome::OneShot => debug!("One-shot pass done"),
        RunOutcome::Shutdown => info!("Stopped after {} passes", scheduler.passes()),
    }
    Ok(())
}

fn update(config: Config) -> Result<(), CliError> {
    if config.db_file == DbTarget::Stdout {
        return Err(CliError::Usage(
            "update needs a database file, dbFile is set to -".to_string(),
        ));
    }

    let db = FrequencyDb::new(config.db_file.clone());
    let usage = UsageIndex::from_store(&db)?;
    let inventory = CommandInventory::new(
        config.list_packages_cmd.clone(),
        config.list_package_files_cmd.clone(),
    );
    let correlator = Correlator::new(inventory, PackageCache::new(&config.cache_dir));

    let correlation = correlator.correlate(&usage, db.modified())?;
    info!(
        "{} packages correlated ({} queried), cache in {}",
        correlation.packages.len(),
        correlation.requeried,
        config.cache_dir.display()
    );
    Ok(())
}

fn show(config: Config, package: Option<&str>, unused: bool) -> Result<(), CliError> {
    let cache = PackageCache::new(&config.cache_dir);
    let read_error = |path: PathBuf, source: io::Error| {
        if source.kind() == io::ErrorKind::NotFound {
            CliError::Usage(format!(
                "no package data for {}, run `spy update` first",
                path.display()
            ))
        } else {
            CliError::Read {
                path: path.display().to_string(),
                source,
            }
        }
    };

    let stdout = io::stdout();
    let mut out = stdout.lock();
    match package {
        None => {
            let mut rows = cache
                .read_index()
                .map_err(|e| read_error(cache.index_path(), e))?;
            report::sort_by_usage(&mut rows);
            report::write_packages(&mut out, &rows, unused).map_err(CliError::Output)?;
        }
        Some(name) => {
            let mut rows = cache
                .read_package(name)
                .map_err(|e| read_error(cache.package_path(name), e))?;
            report::sort_by_usage(&mut rows);
            report::write_files(&mut out, &rows, unused).map_err(CliError::Output)?;
        }
    }
    out.flush().map_err(CliError::Output)
}

fn run(args: Args) -> Result<(), CliError> {
    let config = Config::load(args.config.as_deref())?;
    debug!("Config: {:?}", config);

    match args.command {
        Command::Collect => collect(config),
        Command::Update => update(config),
        Command::Show { package, unused } => show(config, package.as_deref(), unused),
    }
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            };
        }
    };

    init_logging(args.debug);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
