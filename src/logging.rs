//! Logging setup: stderr, a daily-rolling file, and the telemetry capture.
//!
//! `RUST_LOG` overrides the configured level.

use crate::telemetry::{CaptureLayer, RemoteLogBuffer};
use std::io;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const LOG_FILE_PREFIX: &str = "print-agent.log";

/// Keep alive for the life of the process; dropping it flushes the file.
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

pub fn default_log_dir() -> PathBuf {
    std::env::temp_dir().join("spool-logs")
}

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info")))
}

/// Full agent logging. Falls back to stderr only if the log directory
/// cannot be created.
pub fn init(level: &str, log_dir: Option<&Path>, capture: RemoteLogBuffer) -> LoggingGuard {
    let dir = log_dir.map(Path::to_path_buf).unwrap_or_else(default_log_dir);
    let file = match std::fs::create_dir_all(&dir) {
        Ok(()) => {
            let appender = tracing_appender::rolling::daily(&dir, LOG_FILE_PREFIX);
            Some(tracing_appender::non_blocking(appender))
        }
        Err(e) => {
            eprintln!("cannot create log directory {}: {}", dir.display(), e);
            None
        }
    };
    let (file_writer, file_guard) = match file {
        Some((writer, guard)) => (Some(writer), Some(guard)),
        None => (None, None),
    };

    let file_layer = file_writer.map(|writer| {
        tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
    });
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(io::stderr);

    tracing_subscriber::registry()
        .with(env_filter(level))
        .with(stderr_layer)
        .with(file_layer)
        .with(CaptureLayer::new(capture))
        .init();

    tracing::debug!(dir = %dir.display(), "Logging initialized");
    LoggingGuard { _file_guard: file_guard }
}

/// Stderr-only logging for the short-lived subcommands.
pub fn init_console(level: &str) {
    tracing_subscriber::registry()
        .with(env_filter(level))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

/// File logging for the update helper, which has no terminal.
pub fn init_helper(log_dir: &Path) -> LoggingGuard {
    if std::fs::create_dir_all(log_dir).is_err() {
        init_console("info");
        return LoggingGuard { _file_guard: None };
    }
    let appender = tracing_appender::rolling::never(log_dir, "update-helper.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::registry()
        .with(env_filter("info"))
        .with(tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false))
        .init();
    LoggingGuard { _file_guard: Some(guard) }
}
