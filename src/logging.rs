//! Tracing setup for both roles
//!
//! Console output is always on (compact text, or JSON lines); a rolling log
//! file is added when `logging.file` is set. `RUST_LOG` may refine other
//! crates, while `fieldmesh` itself follows the configured level and the
//! `-v`/`--quiet` flags.

use std::path::Path;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::config::LoggingSettings;
use crate::error::{Error, Result};

/// Transport crates log every frame at debug
const QUIET_TARGETS: &[&str] = &["tokio_tungstenite=warn", "tungstenite=warn", "mio=warn"];

type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync>;

/// Keeps the file writer alive; dropping it flushes pending lines
pub struct LogGuards {
    _file: Option<WorkerGuard>,
}

pub fn init_logging(settings: &LoggingSettings, verbose: u8, quiet: bool) -> Result<LogGuards> {
    let level = effective_level(settings, verbose, quiet);

    let (file_layer, file_guard) = match settings.file.as_deref() {
        Some(path) => {
            let (layer, guard) = file_layer(Path::new(path), settings)?;
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter(level)?)
        .with(console_layer(settings.json_format))
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::Internal(format!("Failed to initialize logging: {}", e)))?;

    tracing::debug!(%level, file = ?settings.file, json = settings.json_format, "Logging initialized");
    Ok(LogGuards { _file: file_guard })
}

/// `--quiet` beats `-v`; without flags the configured level applies
fn effective_level(settings: &LoggingSettings, verbose: u8, quiet: bool) -> Level {
    match (quiet, verbose) {
        (true, _) => Level::ERROR,
        (false, 0) => settings.level.parse().unwrap_or(Level::INFO),
        (false, 1) => Level::DEBUG,
        _ => Level::TRACE,
    }
}

fn env_filter(level: Level) -> Result<EnvFilter> {
    let level = level.as_str().to_lowercase();
    let own = format!("fieldmesh={}", level);

    let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));
    for text in std::iter::once(own.as_str()).chain(QUIET_TARGETS.iter().copied()) {
        let directive = text
            .parse()
            .map_err(|e| Error::config_field_invalid("logging.level", format!("{}: {}", text, e)))?;
        filter = filter.add_directive(directive);
    }
    Ok(filter)
}

fn console_layer<S>(json: bool) -> BoxedLayer<S>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    if json {
        fmt::layer()
            .json()
            .with_thread_ids(true)
            .with_span_events(FmtSpan::CLOSE)
            .boxed()
    } else {
        fmt::layer().compact().with_target(true).boxed()
    }
}

/// Daily rotation, hourly when the configured size budget is small
fn file_layer<S>(path: &Path, settings: &LoggingSettings) -> Result<(BoxedLayer<S>, WorkerGuard)>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(directory).map_err(|e| Error::IoWrite {
        path: directory.to_path_buf(),
        source: e,
    })?;

    let prefix = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("fieldmesh.log");
    let rotation = match settings.max_file_size_mb {
        1..=9 => Rotation::HOURLY,
        _ => Rotation::DAILY,
    };

    let appender = RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(prefix)
        .filename_suffix("log")
        .max_log_files(settings.max_files.max(1) as usize)
        .build(directory)
        .map_err(|e| Error::Internal(format!("Failed to create log file appender: {}", e)))?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let layer = if settings.json_format {
        fmt::layer().json().with_writer(writer).with_ansi(false).boxed()
    } else {
        fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_thread_ids(true)
            .with_line_number(true)
            .boxed()
    };
    Ok((layer, guard))
}
