//! Logging initialization (SPEC_FULL.md §B ambient stack).
//!
//! Layers `tracing_subscriber`'s `fmt` over an `EnvFilter`, with a rolling
//! daily file sink via `tracing_appender`, the way the teacher's
//! `utils/logger.rs` does it — pretty output for local development, one
//! JSON layer (stdout + file) for production, selected by `LOG_FORMAT`.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Must be kept alive for the process lifetime, or the background writer
/// thread backing the file layer is torn down and log lines are dropped.
pub struct LoggerGuard {
    _file_guard: WorkerGuard,
}

pub fn init(log_dir: &str) -> Result<LoggerGuard, anyhow::Error> {
    let log_level =
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info,rag_ingestion_core=debug".to_string());
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("rag-ingestion")
        .filename_suffix("log")
        .build(log_dir)?;
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_new(&log_level)?;

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .json()
                        .with_writer(std::io::stdout)
                        .with_target(true)
                        .with_thread_ids(true),
                )
                .with(
                    fmt::layer()
                        .json()
                        .with_writer(non_blocking_file)
                        .with_target(true)
                        .with_thread_ids(true),
                )
                .try_init()?;
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().pretty().with_writer(std::io::stdout))
                .with(fmt::layer().with_writer(non_blocking_file).with_ansi(false))
                .try_init()?;
        }
    }

    Ok(LoggerGuard { _file_guard: file_guard })
}
