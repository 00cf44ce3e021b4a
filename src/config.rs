//! Configuration file support for the tower scanner.
//!
//! Loads settings from `~/.config/quectel-tower/config.toml` on Linux
//! (or platform-appropriate location on other OSes).

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::scanner::{DEFAULT_MAX_SIGNAL_AGE_SECS, ScannerConfig};
use crate::transport::{DEFAULT_MODEM_ADDRESS, TcpModemConfig};
use crate::worker::WorkerConfig;

/// Application configuration loaded from TOML file.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// `host:port` of the modem's serial bridge.
    pub modem_address: String,

    /// Connection timeout in seconds.
    pub connect_timeout: u64,

    /// Timeout for each QENG command in seconds.
    pub command_timeout: u64,

    /// Worker wake period in milliseconds.
    pub poll_period_ms: u64,

    /// How often a blocking scan checks for results, in milliseconds.
    pub blocking_poll_ms: u64,

    /// Max age of a signal sample in seconds before it is reported stale.
    pub max_signal_age: u64,

    /// Seconds between scans.
    pub scan_interval: u64,

    /// Timeout for a blocking scan in milliseconds (0 = wait forever).
    pub scan_timeout_ms: u64,

    /// Max towers in the location output (0 = all).
    pub tower_limit: usize,

    /// Print statistics every N seconds.
    pub stats_interval: u64,

    /// Enable Prometheus metrics HTTP endpoint.
    pub metrics_enabled: bool,

    /// Port for Prometheus metrics HTTP endpoint.
    pub metrics_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            modem_address: DEFAULT_MODEM_ADDRESS.to_string(),
            connect_timeout: 5,
            command_timeout: 10,
            poll_period_ms: 1000,
            blocking_poll_ms: 10,
            max_signal_age: DEFAULT_MAX_SIGNAL_AGE_SECS,
            scan_interval: 60,
            scan_timeout_ms: 30_000,
            tower_limit: 0,
            stats_interval: 300,
            metrics_enabled: false,
            metrics_port: 9090,
        }
    }
}

impl Config {
    /// Load configuration from the default config file location.
    ///
    /// Returns default config if the file doesn't exist.
    /// Returns an error if the file exists but is malformed.
    pub fn load() -> Result<Self> {
        match Self::config_path() {
            Some(path) if path.exists() => {
                let content = fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read config file: {}", path.display()))?;
                toml::from_str(&content)
                    .with_context(|| format!("Invalid TOML in config file: {}", path.display()))
            }
            _ => Ok(Config::default()),
        }
    }

    /// Returns the path to the config file.
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("quectel-tower/config.toml"))
    }

    /// Validate all configuration settings.
    pub fn validate(&self) -> Result<()> {
        if self.poll_period_ms == 0 {
            anyhow::bail!("poll_period_ms must be greater than zero");
        }
        if self.command_timeout == 0 {
            anyhow::bail!("command_timeout must be greater than zero");
        }
        if self.blocking_poll_ms == 0 {
            anyhow::bail!("blocking_poll_ms must be greater than zero");
        }
        if self.modem_address.trim().is_empty() {
            anyhow::bail!("modem_address must not be empty");
        }
        Ok(())
    }

    pub fn scanner_config(&self) -> ScannerConfig {
        ScannerConfig {
            worker: WorkerConfig {
                poll_period: Duration::from_millis(self.poll_period_ms),
                command_timeout: Duration::from_secs(self.command_timeout),
            },
            blocking_poll: Duration::from_millis(self.blocking_poll_ms),
            max_signal_age_secs: self.max_signal_age,
        }
    }

    pub fn modem_config(&self) -> TcpModemConfig {
        TcpModemConfig {
            address: self.modem_address.clone(),
            connect_timeout: Duration::from_secs(self.connect_timeout),
            ..TcpModemConfig::default()
        }
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.modem_address, DEFAULT_MODEM_ADDRESS);
        assert_eq!(config.command_timeout, 10);
        assert_eq!(config.poll_period_ms, 1000);
        assert!(!config.metrics_enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml = r#"
            modem_address = "192.168.1.20:3001"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.modem_address, "192.168.1.20:3001");
        // Other fields should use defaults
        assert_eq!(config.scan_interval, 60);
        assert_eq!(config.max_signal_age, DEFAULT_MAX_SIGNAL_AGE_SECS);
    }

    #[test]
    fn test_parse_full_toml() {
        let toml = r#"
            modem_address = "modem.local:2000"
            connect_timeout = 3
            command_timeout = 20
            poll_period_ms = 500
            blocking_poll_ms = 25
            max_signal_age = 30
            scan_interval = 120
            scan_timeout_ms = 0
            tower_limit = 5
            stats_interval = 60
            metrics_enabled = true
            metrics_port = 9091
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.modem_address, "modem.local:2000");
        assert_eq!(config.connect_timeout, 3);
        assert_eq!(config.command_timeout, 20);
        assert_eq!(config.poll_period_ms, 500);
        assert_eq!(config.blocking_poll_ms, 25);
        assert_eq!(config.max_signal_age, 30);
        assert_eq!(config.scan_interval, 120);
        assert_eq!(config.scan_timeout(), Duration::ZERO);
        assert_eq!(config.tower_limit, 5);
        assert_eq!(config.stats_interval, 60);
        assert!(config.metrics_enabled);
        assert_eq!(config.metrics_port, 9091);
    }

    #[test]
    fn test_scanner_config() {
        let config = Config {
            poll_period_ms: 250,
            command_timeout: 4,
            blocking_poll_ms: 50,
            max_signal_age: 15,
            ..Default::default()
        };
        let scanner = config.scanner_config();
        assert_eq!(scanner.worker.poll_period, Duration::from_millis(250));
        assert_eq!(scanner.worker.command_timeout, Duration::from_secs(4));
        assert_eq!(scanner.blocking_poll, Duration::from_millis(50));
        assert_eq!(scanner.max_signal_age_secs, 15);

        let modem = config.modem_config();
        assert_eq!(modem.address, DEFAULT_MODEM_ADDRESS);
        assert_eq!(modem.connect_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_validate_rejects_zero_timing() {
        let config = Config {
            poll_period_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            command_timeout: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            modem_address: "  ".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_toml_type() {
        let toml = r#"
            poll_period_ms = "fast"
        "#;
        assert!(toml::from_str::<Config>(toml).is_err());
    }
}
