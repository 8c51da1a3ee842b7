use std::path::PathBuf;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

pub const LOG_FILTER_ENV: &str = "WAYMARK_LOG";
pub const LOG_FORMAT_ENV: &str = "WAYMARK_LOG_FORMAT";
pub const LOG_DIR_ENV: &str = "WAYMARK_LOG_DIR";
const DEFAULT_FILTER: &str = "info,sqlx=warn";
const LOG_FILE_PREFIX: &str = "waymark.log";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogSettings {
    pub filter: Option<String>,
    pub json: bool,
    pub dir: Option<PathBuf>,
}

impl LogSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            filter: non_empty(LOG_FILTER_ENV),
            json: non_empty(LOG_FORMAT_ENV)
                .map(|v| v.trim().eq_ignore_ascii_case("json"))
                .unwrap_or(false),
            dir: non_empty(LOG_DIR_ENV).map(PathBuf::from),
        }
    }
}

/// Keeps the background file writer alive; drop it last so buffered lines
/// are flushed.
#[must_use]
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

/// Install the global subscriber from `WAYMARK_LOG*` environment variables.
pub fn init_logging() -> anyhow::Result<LoggingGuard> {
    init_logging_with(&LogSettings::from_env())
}

/// Events go to stderr so command output on stdout stays machine readable.
/// A second installation attempt is ignored.
pub fn init_logging_with(settings: &LogSettings) -> anyhow::Result<LoggingGuard> {
    let filter = EnvFilter::try_new(settings.filter.as_deref().unwrap_or(DEFAULT_FILTER))
        .with_context(|| format!("parse {LOG_FILTER_ENV} filter"))?;

    let stderr_layer = if settings.json {
        fmt::layer()
            .json()
            .with_target(true)
            .with_timer(UtcTime::rfc_3339())
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_timer(UtcTime::rfc_3339())
            .with_writer(std::io::stderr)
            .boxed()
    };

    let (file_layer, guard) = match &settings.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_ansi(false)
                .with_target(true)
                .with_timer(UtcTime::rfc_3339())
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let _ = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .with(filter)
        .try_init();

    Ok(LoggingGuard { _file: guard })
}
