//! Shared logging utilities for Shelfscan binaries.

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use shelfscan_model::LogFormat;

const DEFAULT_LOG_FILTER: &str =
    "shelfscan=info,shelfscan_worker=info,shelfscan_store=info,shelfscan_ai=info";

/// Logging configuration shared by Shelfscan binaries.
pub struct LogConfig<'a> {
    pub level: &'a str,
    pub format: LogFormat,
}

impl Default for LogConfig<'_> {
    fn default() -> Self {
        Self {
            level: "info",
            format: LogFormat::Text,
        }
    }
}

/// Initialize tracing with stderr output.
///
/// `RUST_LOG` wins when set; otherwise the configured level applies to the
/// shelfscan crates and everything else stays at the default filter.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if config.level == "info" {
            EnvFilter::new(DEFAULT_LOG_FILTER)
        } else {
            EnvFilter::new(format!(
                "shelfscan={level},shelfscan_worker={level},shelfscan_store={level},shelfscan_ai={level}",
                level = config.level
            ))
        }
    });

    let stderr_layer = match config.format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Text => tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(stderr_layer.with_filter(filter))
        .init();

    Ok(())
}
