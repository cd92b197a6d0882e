//! Tracing setup for the financeflow binary
//!
//! Without `RUST_LOG` the filter is built from config:
//!
//! ```text
//! warn,financeflow=<log_level>,financeflow::store=<tx>,financeflow::coordinator=<tx>,sqlx=warn
//! ```
//!
//! where `<tx>` is `tx_log_level`, or `log_level` when unset. The store and
//! coordinator log every begin/commit/rollback at debug, so they get their
//! own knob.

use anyhow::{Context, Result, bail};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::AppConfig;

const CRATE_TARGET: &str = "financeflow";
const TX_TARGETS: [&str; 2] = ["financeflow::store", "financeflow::coordinator"];

/// Map the `rotation` config value onto an appender rotation
pub fn parse_rotation(value: &str) -> Result<Rotation> {
    match value.trim().to_ascii_lowercase().as_str() {
        "minutely" => Ok(Rotation::MINUTELY),
        "hourly" => Ok(Rotation::HOURLY),
        "daily" => Ok(Rotation::DAILY),
        "never" | "" => Ok(Rotation::NEVER),
        other => bail!("Unknown log rotation '{}' (expected minutely|hourly|daily|never)", other),
    }
}

/// Filter directives used when `RUST_LOG` is not set
pub fn default_directives(config: &AppConfig) -> String {
    let level = config.log_level.trim();
    let tx_level = config
        .tx_log_level
        .as_deref()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .unwrap_or(level);

    let mut directives = vec!["warn".to_string(), format!("{CRATE_TARGET}={level}")];
    directives.extend(TX_TARGETS.iter().map(|t| format!("{t}={tx_level}")));
    directives.push("sqlx=warn".to_string());
    directives.join(",")
}

/// Install the global subscriber.
///
/// Writes to a rolling file under `log_dir`, plus colored stdout unless
/// `use_json` is set. The returned guard flushes the file writer on drop and
/// must live as long as the process.
pub fn init_logging(config: &AppConfig) -> Result<WorkerGuard> {
    let file_appender = RollingFileAppender::builder()
        .rotation(parse_rotation(&config.rotation)?)
        .filename_prefix(&config.log_file)
        .build(&config.log_dir)
        .with_context(|| format!("Failed to open log directory {}", config.log_dir))?;
    let (writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directives(config))
            .with_context(|| format!("Invalid log level '{}'", config.log_level))?,
    };
    let registry = tracing_subscriber::registry().with(filter);

    if config.use_json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_target(true)
                    .with_writer(writer),
            )
            .try_init()?;
    } else {
        registry
            .with(fmt::layer().with_ansi(false).with_writer(writer))
            .with(fmt::layer().compact().with_target(false))
            .try_init()?;
    }

    Ok(guard)
}
