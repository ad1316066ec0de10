use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use crate::error::{Result, TftpError};
use crate::{Mode, DEFAULT_BLOCK_SIZE, DEFAULT_PORT, DEFAULT_RETRY_SECS, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE};

/// Shell configuration, loadable from a TOML file. Every field has a default
/// so a missing or partial file behaves sensibly.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ClientConfig {
    pub defaults: TransferDefaults,
    pub timers: TimerConfig,
    pub logging: LoggingConfig,
}

/// Seed values for the per-request flags the user does not type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferDefaults {
    /// Server address used when `-a` is absent
    pub address: IpAddr,
    /// Server port used when `-a` carries no port
    pub port: u16,
    /// Transfer mode used when `-c` is absent (`binary` or `ascii`)
    pub mode: String,
    /// Block size used when `-s` is absent
    pub block_size: usize,
}

impl Default for TransferDefaults {
    fn default() -> Self {
        Self {
            address: IpAddr::from([127, 0, 0, 1]),
            port: DEFAULT_PORT,
            mode: "binary".to_string(),
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

/// Retransmission timing. The hard session deadline is always derived as
/// 3 * retry + 1 seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    /// Single-shot retransmit interval in seconds
    pub retry_secs: u64,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            retry_secs: DEFAULT_RETRY_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Plain text logging for human readability
    Text,
    /// JSON structured logging for log aggregators
    Json,
}

pub fn load_config(path: &std::path::Path) -> Result<ClientConfig> {
    let contents = std::fs::read_to_string(path)?;
    let config: ClientConfig = toml::from_str(&contents)
        .map_err(|e| TftpError::Tftp(format!("Invalid config file {}: {}", path.display(), e)))?;
    validate_config(&config)?;
    Ok(config)
}

pub fn write_default_config(path: &std::path::Path) -> Result<()> {
    let config = ClientConfig::default();
    let contents = toml::to_string_pretty(&config)
        .map_err(|e| TftpError::Tftp(format!("Failed to serialize config: {}", e)))?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, contents)?;
    Ok(())
}

pub fn validate_config(config: &ClientConfig) -> Result<()> {
    Mode::from_str(&config.defaults.mode)?;
    if config.defaults.port == 0 {
        return Err(TftpError::Tftp("defaults.port must be non-zero".to_string()));
    }
    if !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&config.defaults.block_size) {
        return Err(TftpError::Tftp(format!(
            "defaults.block_size must be in {}..={}",
            MIN_BLOCK_SIZE, MAX_BLOCK_SIZE
        )));
    }
    if config.timers.retry_secs == 0 {
        return Err(TftpError::Tftp("timers.retry_secs must be non-zero".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ClientConfig::default();
        validate_config(&config).unwrap();
        assert_eq!(config.defaults.port, 69);
        assert_eq!(config.defaults.block_size, 512);
        assert_eq!(config.timers.retry_secs, 5);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config: ClientConfig = toml::from_str(
            r#"
            [defaults]
            address = "192.168.1.10"

            [timers]
            retry_secs = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.defaults.address, IpAddr::from([192, 168, 1, 10]));
        assert_eq!(config.defaults.port, 69);
        assert_eq!(config.timers.retry_secs, 2);
        validate_config(&config).unwrap();
    }

    #[test]
    fn invalid_mode_rejected() {
        let mut config = ClientConfig::default();
        config.defaults.mode = "mail".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn config_round_trips_through_toml() {
        let config = ClientConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let back: ClientConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.defaults.block_size, config.defaults.block_size);
        assert_eq!(back.logging.format, config.logging.format);
    }
}
