//! Process configuration, loaded from `SHELFSCAN_*` environment variables.
//!
//! Every binary builds a [`Settings`] once at startup and passes it down;
//! nothing reads the environment after initialisation.

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Console log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Text,
}

impl FromStr for LogFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "text" => Ok(Self::Text),
            _ => Err(()),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Environment tier: dev, staging, prod.
    pub environment: String,

    /// Blob store root directory and container name.
    pub blob_root: PathBuf,
    pub blob_container: String,

    /// State store URL, e.g. `sqlite:shelfscan.db`.
    pub database_url: String,

    /// AI decoder.
    pub ai_api_key: Option<String>,
    pub ai_model: String,
    pub ai_max_tokens: u32,
    pub ai_temperature: f64,
    pub ai_timeout_secs: u64,

    /// Worker behaviour.
    pub worker_poll_interval_secs: u64,
    pub worker_batch_size: usize,
    pub worker_max_retries: i64,

    /// Preprocessing.
    pub preprocess_max_dimension: u32,
    pub preprocess_denoise_strength: u32,

    /// Logging.
    pub log_level: String,
    pub log_format: LogFormat,

    /// Review surface.
    pub review_host: String,
    pub review_port: u16,

    /// Job retention.
    pub retention_days: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            environment: "dev".to_string(),
            blob_root: PathBuf::from("./blobs"),
            blob_container: "product-images".to_string(),
            database_url: "sqlite:shelfscan.db".to_string(),
            ai_api_key: None,
            ai_model: "gemini-2.5-flash".to_string(),
            ai_max_tokens: 1024,
            ai_temperature: 1.0,
            ai_timeout_secs: 120,
            worker_poll_interval_secs: 5,
            worker_batch_size: 10,
            worker_max_retries: 3,
            preprocess_max_dimension: 2048,
            preprocess_denoise_strength: 10,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            review_host: "0.0.0.0".to_string(),
            review_port: 8000,
            retention_days: 90,
        }
    }
}

impl Settings {
    /// Load settings from the environment, falling back to defaults.
    pub fn from_env() -> Result<Self, SettingsError> {
        let defaults = Self::default();
        Ok(Self {
            environment: var_or("SHELFSCAN_ENVIRONMENT", defaults.environment),
            blob_root: PathBuf::from(var_or(
                "SHELFSCAN_BLOB_ROOT",
                defaults.blob_root.display().to_string(),
            )),
            blob_container: var_or("SHELFSCAN_BLOB_CONTAINER", defaults.blob_container),
            database_url: var_or("SHELFSCAN_DATABASE_URL", defaults.database_url),
            ai_api_key: std::env::var("SHELFSCAN_AI_API_KEY").ok().filter(|v| !v.is_empty()),
            ai_model: var_or("SHELFSCAN_AI_MODEL", defaults.ai_model),
            ai_max_tokens: parse_or("SHELFSCAN_AI_MAX_TOKENS", defaults.ai_max_tokens)?,
            ai_temperature: parse_or("SHELFSCAN_AI_TEMPERATURE", defaults.ai_temperature)?,
            ai_timeout_secs: parse_or("SHELFSCAN_AI_TIMEOUT_SECS", defaults.ai_timeout_secs)?,
            worker_poll_interval_secs: parse_or(
                "SHELFSCAN_WORKER_POLL_INTERVAL",
                defaults.worker_poll_interval_secs,
            )?,
            worker_batch_size: parse_or("SHELFSCAN_WORKER_BATCH_SIZE", defaults.worker_batch_size)?,
            worker_max_retries: parse_or("SHELFSCAN_WORKER_MAX_RETRIES", defaults.worker_max_retries)?,
            preprocess_max_dimension: parse_or(
                "SHELFSCAN_PREPROCESS_MAX_DIMENSION",
                defaults.preprocess_max_dimension,
            )?,
            preprocess_denoise_strength: parse_or(
                "SHELFSCAN_PREPROCESS_DENOISE_STRENGTH",
                defaults.preprocess_denoise_strength,
            )?,
            log_level: var_or("SHELFSCAN_LOG_LEVEL", defaults.log_level),
            log_format: parse_or("SHELFSCAN_LOG_FORMAT", defaults.log_format)?,
            review_host: var_or("SHELFSCAN_REVIEW_HOST", defaults.review_host),
            review_port: parse_or("SHELFSCAN_REVIEW_PORT", defaults.review_port)?,
            retention_days: parse_or("SHELFSCAN_RETENTION_DAYS", defaults.retention_days)?,
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == "prod"
    }
}

fn var_or(name: &str, default: String) -> String {
    match std::env::var(name) {
        Ok(v) if !v.is_empty() => v,
        _ => default,
    }
}

fn parse_or<T: FromStr>(name: &'static str, default: T) -> Result<T, SettingsError> {
    match std::env::var(name) {
        Ok(v) if !v.is_empty() => v.parse::<T>().map_err(|_| SettingsError::Invalid {
            name,
            value: v,
        }),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let s = Settings::default();
        assert_eq!(s.worker_max_retries, 3);
        assert_eq!(s.ai_timeout_secs, 120);
        assert_eq!(s.blob_container, "product-images");
        assert!(!s.is_production());
    }

    #[test]
    fn log_format_parses() {
        assert_eq!("json".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("TEXT".parse::<LogFormat>(), Ok(LogFormat::Text));
        assert!("yaml".parse::<LogFormat>().is_err());
    }
}
