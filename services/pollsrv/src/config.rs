//! Service configuration
//!
//! Loaded with figment: defaults, then the YAML file, then `POLLSRV_*`
//! environment overrides.

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;

/// Verbosity of the poll-queue bookkeeping messages.
///
/// `Polling` emits one line per completed poll; `Debug` adds queue
/// bookkeeping; `Error` silences both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PollQueueLogLevel {
    Error,
    Debug,
    Polling,
}

impl PollQueueLogLevel {
    pub fn debug_enabled(&self) -> bool {
        matches!(self, PollQueueLogLevel::Debug)
    }

    pub fn polling_enabled(&self) -> bool {
        matches!(self, PollQueueLogLevel::Debug | PollQueueLogLevel::Polling)
    }
}

impl Default for PollQueueLogLevel {
    fn default() -> Self {
        PollQueueLogLevel::Error
    }
}

/// HTTP API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_api_host")]
    pub host: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            enabled: true,
            host: default_api_host(),
            port: default_api_port(),
        }
    }
}

/// Top-level service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Master switch for the polling subsystem.
    #[serde(default = "default_true")]
    pub enable_polling: bool,
    /// Process log level, fed into the tracing env-filter.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub poll_queue_log_level: PollQueueLogLevel,
    #[serde(default)]
    pub api: ApiConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            enable_polling: true,
            log_level: default_log_level(),
            poll_queue_log_level: PollQueueLogLevel::default(),
            api: ApiConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration. A missing file is tolerated and yields the
    /// defaults plus any environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Config> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if path.as_ref().exists() {
            figment = figment.merge(Yaml::file(path.as_ref()));
        }
        let config: Config = figment.merge(Env::prefixed("POLLSRV_").split("__")).extract()?;
        Ok(config)
    }
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "ERROR".to_string()
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    1660
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_contract() {
        let config = Config::default();
        assert!(config.enable_polling);
        assert_eq!(config.log_level, "ERROR");
        assert_eq!(config.poll_queue_log_level, PollQueueLogLevel::Error);
        assert!(config.api.enabled);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = Config::load("/definitely/not/here.yaml").unwrap();
        assert!(config.enable_polling);
    }

    #[test]
    fn yaml_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "enable_polling: false\npoll_queue_log_level: POLLING\napi:\n  port: 9000"
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert!(!config.enable_polling);
        assert_eq!(config.poll_queue_log_level, PollQueueLogLevel::Polling);
        assert!(config.poll_queue_log_level.polling_enabled());
        assert!(!config.poll_queue_log_level.debug_enabled());
        assert_eq!(config.api.port, 9000);
    }
}
