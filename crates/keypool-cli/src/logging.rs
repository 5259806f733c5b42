//! Logging setup for the keypool binary
//!
//! Console output goes to stderr so reports on stdout stay machine-readable.
//! A daily-rotated JSON log file is written when a log directory is given.

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Directory for JSON log files; no file output when unset
    pub log_dir: Option<PathBuf>,

    /// Whether to write human-readable logs to stderr
    pub enable_console_logs: bool,

    /// Whether to include file/line information in logs
    pub include_location: bool,

    /// Whether to log span open/close (pool loads, refreshes, shutdown)
    pub enable_spans: bool,

    /// Filter used when RUST_LOG is not set
    pub default_filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: None,
            enable_console_logs: true,
            include_location: cfg!(debug_assertions),
            enable_spans: false,
            default_filter: "warn,keypool=info,keypool_pool=info".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Configuration for the given `-v` count
    pub fn for_verbosity(verbose: u8) -> Self {
        let default_filter = match verbose {
            0 => "warn,keypool=info,keypool_pool=info",
            1 => "info,keypool=debug,keypool_pool=debug",
            _ => "debug,keypool=trace,keypool_pool=trace",
        };
        Self {
            enable_spans: verbose > 1,
            default_filter: default_filter.to_string(),
            ..Self::default()
        }
    }

    /// Also write JSON logs to `dir`
    pub fn with_log_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.log_dir = dir;
        self
    }
}

/// Initialize the logging system with the given configuration
///
/// The returned guard flushes the file writer; keep it alive until exit.
pub fn init(config: LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    // RUST_LOG takes precedence over the default filter
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    let span_events = if config.enable_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let mut layers = Vec::new();

    if config.enable_console_logs {
        let console_layer = fmt::layer()
            .with_target(true)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_span_events(span_events.clone())
            .with_writer(std::io::stderr)
            .with_filter(env_filter.clone())
            .boxed();

        layers.push(console_layer);
    }

    let mut guard = None;
    if let Some(log_dir) = &config.log_dir {
        std::fs::create_dir_all(log_dir)?;
        let file_appender = tracing_appender::rolling::daily(log_dir, "keypool.log");
        let (non_blocking, file_guard) = tracing_appender::non_blocking(file_appender);
        guard = Some(file_guard);

        let json_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_span_events(span_events)
            .with_ansi(false)
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_writer(non_blocking)
            .with_filter(env_filter)
            .boxed();

        layers.push(json_layer);
    }

    tracing_subscriber::registry().with(layers).try_init()?;

    tracing::debug!(
        log_dir = ?config.log_dir,
        console_enabled = config.enable_console_logs,
        "logging initialized"
    );

    Ok(guard)
}

/// Default directory for JSON log files
pub fn log_directory() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("keypool")
        .join("logs")
}
