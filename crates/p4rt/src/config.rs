//! Configuration for the registry core and the p4rtd daemon.
//!
//! [`P4rtConfig`] holds the library defaults. [`P4rtdConfig`] is the
//! daemon's TOML file. Default location: /etc/p4rt/p4rtd.toml

use crate::error::{P4rtError, Result};
use p4rt_common::RateLimitConfig;
use p4rt_types::DEFAULT_DATAPATH_TYPE;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default daemon configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/p4rt/p4rtd.toml";

/// Library configuration for the lifecycle manager.
#[derive(Debug, Clone, PartialEq)]
pub struct P4rtConfig {
    /// Datapath type used when a caller passes an empty type
    pub default_datapath_type: String,
    /// Limits for rate-limited log lines
    pub rate_limit: RateLimitConfig,
}

impl Default for P4rtConfig {
    fn default() -> Self {
        Self {
            default_datapath_type: DEFAULT_DATAPATH_TYPE.to_string(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format
    #[serde(default)]
    pub format: LogFormat,
}

/// Poll loop configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollConfig {
    /// Interval between run/type_run passes in milliseconds
    #[serde(default = "default_poll_interval")]
    pub interval_ms: u64,
}

/// A bridge to create at startup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Device name
    pub name: String,

    /// Datapath type; empty selects the default type
    #[serde(default)]
    pub datapath_type: String,

    /// Network devices to attach
    #[serde(default)]
    pub ports: Vec<String>,

    /// Program file to install ("-" reads standard input)
    #[serde(default)]
    pub program: Option<PathBuf>,
}

/// Complete p4rtd configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct P4rtdConfig {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Rate limit for repetitive log lines
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Poll loop configuration
    #[serde(default)]
    pub poll: PollConfig,

    /// Bridges created at startup
    #[serde(default, rename = "bridge")]
    pub bridges: Vec<BridgeConfig>,
}

// Default functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_poll_interval() -> u64 {
    100
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval(),
        }
    }
}

impl P4rtdConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => {
                let config = toml::from_str(&content).map_err(|e| {
                    P4rtError::Configuration(format!(
                        "Failed to parse config file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(P4rtError::Io(e)),
        }
    }

    /// Load from default location or defaults
    pub fn load() -> Result<Self> {
        Self::load_or_default(DEFAULT_CONFIG_PATH)
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| {
            P4rtError::Configuration(format!("Failed to serialize config: {}", e))
        })?;

        fs::write(path.as_ref(), content)?;

        Ok(())
    }

    /// Get poll interval as Duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll.interval_ms)
    }

    /// Library configuration derived from the file.
    pub fn core_config(&self) -> P4rtConfig {
        P4rtConfig {
            rate_limit: self.rate_limit,
            ..P4rtConfig::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.poll.interval_ms == 0 {
            return Err(P4rtError::Configuration(
                "poll.interval_ms must be > 0".to_string(),
            ));
        }

        if self.rate_limit.burst == 0 {
            return Err(P4rtError::Configuration(
                "rate_limit.burst must be > 0".to_string(),
            ));
        }

        let mut seen = BTreeSet::new();
        for bridge in &self.bridges {
            if bridge.name.trim().is_empty() {
                return Err(P4rtError::Configuration(
                    "bridge name must not be empty".to_string(),
                ));
            }
            if !seen.insert(bridge.name.as_str()) {
                return Err(P4rtError::Configuration(format!(
                    "duplicate bridge name: {}",
                    bridge.name
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let config = P4rtdConfig::default();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert_eq!(config.poll_interval(), Duration::from_millis(100));
        assert_eq!(config.rate_limit, RateLimitConfig::default());
        assert!(config.bridges.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_core_config_defaults() {
        let core = P4rtConfig::default();
        assert_eq!(core.default_datapath_type, "system");
        assert_eq!(core.rate_limit.burst, 5);
    }

    #[test]
    fn test_toml_deserialization() {
        let toml_str = r#"
[logging]
format = "json"

[poll]
interval_ms = 250

[[bridge]]
name = "br0"
ports = ["eth0", "eth1"]

[[bridge]]
name = "br1"
datapath_type = "dummy"
program = "/tmp/prog.bin"
"#;
        let config: P4rtdConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.poll.interval_ms, 250);
        assert_eq!(config.bridges.len(), 2);
        assert_eq!(config.bridges[0].datapath_type, "");
        assert_eq!(config.bridges[0].ports, vec!["eth0", "eth1"]);
        assert_eq!(
            config.bridges[1].program,
            Some(PathBuf::from("/tmp/prog.bin"))
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_interval() {
        let mut config = P4rtdConfig::default();
        config.poll.interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_burst() {
        let mut config = P4rtdConfig::default();
        config.rate_limit.burst = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_bridge_names() {
        let bridge = BridgeConfig {
            name: "br0".to_string(),
            datapath_type: String::new(),
            ports: Vec::new(),
            program: None,
        };

        let mut config = P4rtdConfig::default();
        config.bridges = vec![bridge.clone(), bridge.clone()];
        assert!(config.validate().is_err());

        config.bridges = vec![BridgeConfig {
            name: " ".to_string(),
            ..bridge
        }];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_nonexistent_file_defaults() {
        let config = P4rtdConfig::load_or_default("/nonexistent/p4rtd.toml").unwrap();
        assert_eq!(config, P4rtdConfig::default());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p4rtd.toml");

        let mut config = P4rtdConfig::default();
        config.poll.interval_ms = 50;
        config.bridges.push(BridgeConfig {
            name: "br0".to_string(),
            datapath_type: "system".to_string(),
            ports: vec!["eth0".to_string()],
            program: None,
        });
        config.save(&path).unwrap();

        let reloaded = P4rtdConfig::load_or_default(&path).unwrap();
        assert_eq!(reloaded, config);
    }

    #[test]
    fn test_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[poll]\ninterval_ms = \"fast\"\n").unwrap();
        assert!(matches!(
            P4rtdConfig::load_or_default(&path),
            Err(P4rtError::Configuration(_))
        ));
    }
}
