//! File logging
//!
//! Diagnostics go to a per-cluster log file; the terminal stays reserved
//! for the notify channel. Writes are buffered off-thread, so the caller
//! must hold the returned guard for the life of the run or the tail of the
//! log is lost on exit.

use std::fs::OpenOptions;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingOptions;

/// Start file logging. Returns the flush guard, or `None` when logging is
/// disabled. `{cluster_name}` in the configured path is substituted so
/// parallel clusters do not interleave.
pub fn init_logging(config: &LoggingOptions, cluster_name: &str) -> Result<Option<WorkerGuard>> {
    if !config.enabled {
        return Ok(None);
    }

    let level: Level = config.level.parse().map_err(|_| {
        anyhow!(
            "invalid log level {:?} (expected trace, debug, info, warn, or error)",
            config.level
        )
    })?;

    let resolved = config.file.replace("{cluster_name}", cluster_name);
    let path = Path::new(&resolved);
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create log directory {}", dir.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;
    let (writer, guard) = tracing_appender::non_blocking(file);

    // RUST_LOG narrows or widens individual targets on top of the
    // configured level.
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .with_target(false)
        .try_init()
        .map_err(|err| anyhow!("failed to initialize tracing: {}", err))?;

    tracing::info!(
        cluster = %cluster_name,
        file = %path.display(),
        level = %level,
        "file logging started"
    );

    Ok(Some(guard))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_logging_returns_no_guard() {
        let config = LoggingOptions {
            enabled: false,
            ..Default::default()
        };
        assert!(matches!(init_logging(&config, "dev"), Ok(None)));
    }

    #[test]
    fn test_invalid_level_rejected() {
        // The level parses before any file or subscriber is touched.
        let config = LoggingOptions {
            level: "noisy".to_string(),
            ..Default::default()
        };
        let err = init_logging(&config, "dev").expect_err("should fail");
        assert!(err.to_string().contains("noisy"));
    }

    #[test]
    fn test_placeholder_substitution() {
        let config = LoggingOptions::default();
        assert!(config.file.contains("{cluster_name}"));
        let resolved = config.file.replace("{cluster_name}", "dev");
        assert_eq!(resolved, "/tmp/ksail-dev.log");
    }
}
