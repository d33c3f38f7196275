//! Tracing setup for Tidex
//!
//! Console output follows the level the user picked. When a logs directory is
//! given, every event down to TRACE is also written to `tidex-last-run.log`,
//! which is truncated at the start of each run.

use std::fs::{File, create_dir_all};
use std::path::{Path, PathBuf};

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// File name of the per-run debug log.
pub const LOG_FILE_NAME: &str = "tidex-last-run.log";

/// Errors raised while installing the global subscriber.
#[derive(Debug, thiserror::Error)]
pub enum TracingSetupError {
    #[error("Cannot prepare log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Global subscriber already installed: {0}")]
    AlreadyInstalled(#[from] tracing_subscriber::util::TryInitError),
}

/// Installs the global subscriber.
///
/// `RUST_LOG` overrides `console_level` for the console layer. The file layer
/// is only added when `logs_dir` is provided.
///
/// # Errors
///
/// - `TracingSetupError::LogFile` - If the directory or log file cannot be created
/// - `TracingSetupError::AlreadyInstalled` - If a global subscriber is already set
pub fn init_tracing(
    console_level: Level,
    logs_dir: Option<&Path>,
) -> Result<Option<PathBuf>, TracingSetupError> {
    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(console_level.to_string()));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr)
        .with_filter(console_filter);

    let (file_layer, log_file_path) = match logs_dir {
        Some(dir) => {
            let (file, path) = open_log_file(dir)?;
            let layer = fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_ansi(false)
                .with_writer(file)
                .with_filter(EnvFilter::new("trace"));
            (Some(layer), Some(path))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    match &log_file_path {
        Some(path) => tracing::debug!(
            console = %console_level,
            debug_file = %path.display(),
            "Tracing initialized"
        ),
        None => tracing::debug!(console = %console_level, "Tracing initialized"),
    }

    Ok(log_file_path)
}

fn open_log_file(dir: &Path) -> Result<(File, PathBuf), TracingSetupError> {
    let path = dir.join(LOG_FILE_NAME);
    let log_error = |source| TracingSetupError::LogFile {
        path: path.clone(),
        source,
    };

    create_dir_all(dir).map_err(log_error)?;
    let file = File::create(&path).map_err(log_error)?;
    Ok((file, path))
}

/// CLI log levels for user control
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CliLogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl CliLogLevel {
    /// Converts CLI log level to tracing Level enum.
    ///
    /// # Examples
    /// ```
    /// use tidex_core::tracing_setup::CliLogLevel;
    ///
    /// let level = CliLogLevel::Debug.as_tracing_level();
    /// assert_eq!(level, tracing::Level::DEBUG);
    /// ```
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

impl std::str::FromStr for CliLogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "error" => Ok(CliLogLevel::Error),
            "warn" | "warning" => Ok(CliLogLevel::Warn),
            "info" => Ok(CliLogLevel::Info),
            "debug" => Ok(CliLogLevel::Debug),
            "trace" => Ok(CliLogLevel::Trace),
            _ => Err(format!("Invalid log level: {s}")),
        }
    }
}

impl std::fmt::Display for CliLogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CliLogLevel::Error => "error",
            CliLogLevel::Warn => "warn",
            CliLogLevel::Info => "info",
            CliLogLevel::Debug => "debug",
            CliLogLevel::Trace => "trace",
        };
        f.write_str(name)
    }
}
