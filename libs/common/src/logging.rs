//! Unified logging module for ads-rx tools and embedding applications
//!
//! Console output always; optional daily-rolling file output through a
//! non-blocking `tracing-appender` worker.

use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{
        self,
        format::{FmtSpan, Writer},
        FmtContext, FormatEvent, FormatFields,
    },
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Custom format for log level with brackets: `[INFO]`, `[WARN]`, etc.
fn format_level(level: &Level) -> &'static str {
    match *level {
        Level::TRACE => "[TRACE]",
        Level::DEBUG => "[DEBUG]",
        Level::INFO => "[INFO]",
        Level::WARN => "[WARN]",
        Level::ERROR => "[ERROR]",
    }
}

/// Custom event formatter that outputs: `timestamp [LEVEL] message`
///
/// Example output: `2026-10-18T09:12:44.809000Z [INFO] Controller ready`
struct BracketedLevelFormat;

impl<S, N> FormatEvent<S, N> for BracketedLevelFormat
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let now = chrono::Utc::now();
        write!(writer, "{} ", now.format("%Y-%m-%dT%H:%M:%S%.6fZ"))?;

        let level = *event.metadata().level();
        if writer.has_ansi_escapes() {
            let color = match level {
                Level::TRACE => "\x1b[35m", // magenta
                Level::DEBUG => "\x1b[34m", // blue
                Level::INFO => "\x1b[32m",  // green
                Level::WARN => "\x1b[33m",  // yellow
                Level::ERROR => "\x1b[31m", // red
            };
            write!(writer, "{}{}\x1b[0m ", color, format_level(&level))?;
        } else {
            write!(writer, "{} ", format_level(&level))?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

// Keeps the non-blocking file writer alive for the lifetime of the process
static FILE_GUARD: OnceLock<Mutex<Option<WorkerGuard>>> = OnceLock::new();

/// Logger configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Application name, used as log file prefix and default filter target
    pub service_name: String,
    /// Directory for log files; `None` disables file output
    pub log_dir: Option<PathBuf>,
    /// Default level when `RUST_LOG` is not set
    pub level: Level,
    /// Enable JSON format for the file layer
    pub enable_json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "ads_rx".to_string(),
            log_dir: None,
            level: Level::INFO,
            enable_json: false,
        }
    }
}

/// Build the filter: `RUST_LOG` wins, otherwise `<level>,<service>=debug`
pub fn build_filter(config: &LogConfig) -> EnvFilter {
    match std::env::var("RUST_LOG") {
        Ok(env_str) if !env_str.is_empty() => EnvFilter::new(env_str),
        _ => EnvFilter::new(format!(
            "{},{}=debug",
            config.level.as_str().to_lowercase(),
            config.service_name.replace('-', "_")
        )),
    }
}

/// Initialize logging system with configuration
pub fn init_with_config(config: LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    let console_layer = fmt::layer()
        .with_ansi(true)
        .event_format(BracketedLevelFormat)
        .boxed();

    let file_layer = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, format!("{}.log", config.service_name));
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);

            let slot = FILE_GUARD.get_or_init(|| Mutex::new(None));
            match slot.lock() {
                Ok(mut slot) => *slot = Some(guard),
                Err(poisoned) => {
                    eprintln!("Warning: FILE_GUARD lock was poisoned, recovering...");
                    *poisoned.into_inner() = Some(guard);
                },
            }

            let layer = if config.enable_json {
                fmt::layer()
                    .json()
                    .with_writer(non_blocking)
                    .with_level(true)
                    .with_target(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .boxed()
            } else {
                fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(false)
                    .event_format(BracketedLevelFormat)
                    .boxed()
            };
            Some(layer)
        },
        None => None,
    };

    tracing_subscriber::registry()
        .with(build_filter(&config))
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    tracing::info!(
        "Logging: {} @ {:?}",
        config.service_name,
        config.log_dir.as_deref()
    );
    Ok(())
}

/// Short form: console only at the given level
pub fn init(level: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = LogConfig {
        level: level.parse().unwrap_or(Level::INFO),
        ..Default::default()
    };
    init_with_config(config)
}
