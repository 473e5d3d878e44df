//! CLI logging.
//!
//! Everything goes to `<data dir>/logs/cli.log`. The terminal belongs to
//! `watch` output, so stderr only gets log lines when asked for with `-v`.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

const DEFAULT_FILTER: &str = "info,deskpulse_client=debug,hyper=warn,reqwest=warn";
const LOG_FILE: &str = "cli.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Json,
    Pretty,
}

impl FileFormat {
    fn from_env_value(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.eq_ignore_ascii_case("pretty") => FileFormat::Pretty,
            _ => FileFormat::Json,
        }
    }
}

/// Resolved logging setup, independent of the process environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub filter: String,
    pub format: FileFormat,
    pub truncate: bool,
    /// Terminal mirror of the log; `None` keeps stderr quiet.
    pub stderr: Option<LevelFilter>,
}

impl LogSettings {
    pub fn resolve(verbose: u8, env: impl Fn(&str) -> Option<String>) -> Self {
        let filter = env("DESKPULSE_LOG_FILTER")
            .or_else(|| env("RUST_LOG"))
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_FILTER.to_string());

        Self {
            filter,
            format: FileFormat::from_env_value(env("DESKPULSE_LOG_FORMAT").as_deref()),
            truncate: env("DESKPULSE_TRUNCATE_LOG_ON_START").as_deref() == Some("1"),
            stderr: stderr_level(verbose),
        }
    }
}

/// `-v` warnings, `-vv` info, `-vvv` and up debug.
fn stderr_level(verbose: u8) -> Option<LevelFilter> {
    match verbose {
        0 => None,
        1 => Some(LevelFilter::WARN),
        2 => Some(LevelFilter::INFO),
        _ => Some(LevelFilter::DEBUG),
    }
}

pub struct LoggingHandle {
    pub run_id: String,
    pub log_path: PathBuf,
    pub guard: WorkerGuard,
}

pub fn init_logging(log_dir: &Path, settings: &LogSettings) -> anyhow::Result<LoggingHandle> {
    std::fs::create_dir_all(log_dir)?;
    let log_path = log_dir.join(LOG_FILE);

    if settings.truncate {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&log_path)?;
    }

    let file_filter =
        EnvFilter::try_new(&settings.filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let file_appender = tracing_appender::rolling::never(log_dir, LOG_FILE);
    let (writer, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = match settings.format {
        FileFormat::Pretty => fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .pretty()
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .with_filter(file_filter)
            .boxed(),
        FileFormat::Json => fmt::layer()
            .with_writer(writer)
            .json()
            .flatten_event(true)
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .with_current_span(true)
            .with_filter(file_filter)
            .boxed(),
    };

    let stderr_layer = settings.stderr.map(|level| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(console::colors_enabled_stderr())
            .compact()
            .without_time()
            .with_target(false)
            .with_filter(level)
    });

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .try_init()?;

    let run_id = std::env::var("DESKPULSE_RUN_ID").unwrap_or_else(|_| {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        format!("pid-{}-{}", std::process::id(), now)
    });

    tracing::info!(
        component = "logging",
        event = "logging.initialized",
        run_id = %run_id,
        log_path = %log_path.display(),
        format = ?settings.format,
        filter = %settings.filter,
        stderr = ?settings.stderr,
    );

    Ok(LoggingHandle {
        run_id,
        log_path,
        guard,
    })
}
