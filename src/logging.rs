//! Logging configuration with journald support on Linux.
//!
//! Runs are usually started from cron or a systemd timer, so on Linux the
//! journal is preferred. Otherwise logs go to a daily file when a log
//! directory is configured, and to stderr when it is not.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the logging system.
///
/// Log level can be controlled via the `PAGEWATCH_LOG` environment variable
/// (`debug`, `info`, `warn`, `error`); the default is `info`.
pub fn init(log_dir: Option<PathBuf>) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_env("PAGEWATCH_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    #[cfg(target_os = "linux")]
    {
        if let Ok(journald_layer) = tracing_journald::layer() {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(journald_layer)
                .try_init()
                .context("Failed to set tracing subscriber")?;

            tracing::info!("Logging initialized with journald backend");
            return Ok(());
        }
    }

    let Some(log_dir) = log_dir else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init()
            .context("Failed to set tracing subscriber")?;
        return Ok(());
    };

    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "pagewatch.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // Dropping the guard stops the writer thread; keep it for the process lifetime
    static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
        std::sync::OnceLock::new();
    let _ = GUARD.set(guard);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .try_init()
        .context("Failed to set tracing subscriber")?;

    tracing::info!("Logging initialized with file backend at {:?}", log_dir);
    Ok(())
}
