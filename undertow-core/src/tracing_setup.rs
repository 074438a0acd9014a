//! Log output for the `undertow` binary.
//!
//! Two sinks: the console at the level picked on the command line, and a
//! trace-level file for undertow crates that is replaced on every run.

use std::fs::File;
use std::path::{Path, PathBuf};

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// File name of the per-run trace log inside the logs directory.
pub const RUN_LOG_NAME: &str = "undertow-last-run.log";

/// Directory used when no logs directory is given.
const DEFAULT_LOGS_DIR: &str = "logs";

/// HTTP plumbing is capped at `info` on the console unless `RUST_LOG` says otherwise.
const CONSOLE_QUIET_TARGETS: &[&str] = &["tower_http=info", "hyper=info", "reqwest=info"];

/// Everything from undertow crates, dependencies at `info`.
const RUN_LOG_DIRECTIVES: &str =
    "info,undertow_core=trace,undertow_web=trace,undertow_sim=trace,undertow=trace";

#[derive(Debug, thiserror::Error)]
pub enum TracingError {
    #[error("Cannot prepare run log {path}: {source}")]
    RunLog {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("A global subscriber is already installed: {reason}")]
    AlreadyInstalled { reason: String },
}

/// Installs the console and run-log subscribers.
///
/// Returns the path of the run log. `RUST_LOG`, when set, replaces the console
/// filter entirely.
///
/// # Errors
///
/// - `TracingError::RunLog` - If the logs directory or run log cannot be created
/// - `TracingError::AlreadyInstalled` - If tracing was initialized before
pub fn init_tracing(console_level: Level, logs_dir: Option<&Path>) -> Result<PathBuf, TracingError> {
    let run_log_path = logs_dir
        .unwrap_or_else(|| Path::new(DEFAULT_LOGS_DIR))
        .join(RUN_LOG_NAME);
    let run_log = open_run_log(&run_log_path)?;

    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| console_filter_for(console_level));

    let console_layer = fmt::layer()
        .with_target(console_level >= Level::DEBUG)
        .compact()
        .with_filter(console_filter);

    let run_log_layer = fmt::layer()
        .with_ansi(false)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_writer(run_log)
        .with_filter(EnvFilter::new(RUN_LOG_DIRECTIVES));

    tracing_subscriber::registry()
        .with(console_layer)
        .with(run_log_layer)
        .try_init()
        .map_err(|e| TracingError::AlreadyInstalled {
            reason: e.to_string(),
        })?;

    tracing::debug!("Run log at {}", run_log_path.display());
    Ok(run_log_path)
}

fn open_run_log(path: &Path) -> Result<File, TracingError> {
    let to_error = |source| TracingError::RunLog {
        path: path.to_path_buf(),
        source,
    };

    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(to_error)?;
    }
    File::create(path).map_err(to_error)
}

fn console_filter_for(level: Level) -> EnvFilter {
    let mut directives = vec![level.as_str().to_ascii_lowercase()];
    if level > Level::INFO {
        directives.extend(CONSOLE_QUIET_TARGETS.iter().map(|d| d.to_string()));
    }
    EnvFilter::new(directives.join(","))
}

/// Console verbosity selectable with `--log-level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CliLogLevel {
    Error,
    Warn,
    Info,
    /// Adds cache hits and candidate ordering
    Debug,
    /// Adds every block request and copy
    Trace,
}

impl CliLogLevel {
    pub fn as_tracing_level(self) -> Level {
        match self {
            CliLogLevel::Error => Level::ERROR,
            CliLogLevel::Warn => Level::WARN,
            CliLogLevel::Info => Level::INFO,
            CliLogLevel::Debug => Level::DEBUG,
            CliLogLevel::Trace => Level::TRACE,
        }
    }
}

impl std::fmt::Display for CliLogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_tracing_level().as_str().to_ascii_lowercase())
    }
}
