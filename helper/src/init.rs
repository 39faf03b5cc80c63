use anyhow::Context;
use std::env::var;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_forest::ForestLayer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Compose the `tracing` layers into the global subscriber: env filter,
/// a plain file writer and the forest layer on stdout.
///
/// The returned guard flushes the file writer when dropped, so it has to be
/// held until the program exits.
pub fn init_subscriber(
    default_filename: &str,
    env_filter: &str,
) -> anyhow::Result<WorkerGuard> {
    // Env variable LOG_CONFIG_PATH points at the path where
    // LOG_CONFIG_FILENAME is located
    let log_config_path =
        var("LOG_CONFIG_PATH").unwrap_or_else(|_| "./".to_string());
    // Env variable LOG_CONFIG_FILENAME names the log file
    let log_config_filename = var("LOG_CONFIG_FILENAME")
        .unwrap_or_else(|_| default_filename.to_string());

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(env_filter));

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(&log_config_filename)
        .build(&log_config_path)
        .with_context(|| {
            format!(
                "Failed to open the log file {log_config_filename} in \
                 {log_config_path}"
            )
        })?;
    let (non_blocking_file, guard) =
        tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::Layer::default()
                .with_ansi(false)
                .with_writer(non_blocking_file),
        )
        .with(ForestLayer::default())
        .try_init()
        .context("Failed to install the tracing subscriber")?;

    Ok(guard)
}
