//! Configuration management
//!
//! Handles loading, validation, and merging of configuration from:
//! - TOML files
//! - CLI arguments

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub mod types;

pub use types::{
    GroupConfig, HelperConfig, LoggingConfig, RpcConfig, SessionsConfig, SystemdConfig,
    LOG_FILE_NAME,
};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Privileged group configuration
    pub group: GroupConfig,
    /// Session accounting configuration
    #[serde(default)]
    pub sessions: SessionsConfig,
    /// Helper process configuration
    #[serde(default)]
    pub helper: HelperConfig,
    /// Service manager configuration
    #[serde(default)]
    pub systemd: SystemdConfig,
    /// Helper RPC configuration
    #[serde(default)]
    pub rpc: RpcConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path))?;

        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    /// Create default configuration
    pub fn default_config() -> Result<Self> {
        Ok(Self::default())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        // Group names end up in an anchored `name:` match
        if self.group.name.is_empty() {
            anyhow::bail!("Group name must not be empty");
        }
        if self.group.name.contains([':', ',']) {
            anyhow::bail!("Invalid group name: {}", self.group.name);
        }

        if !self.group.file.is_absolute() {
            anyhow::bail!("Group file must be an absolute path: {:?}", self.group.file);
        }
        if !self.sessions.utmp_file.is_absolute() {
            anyhow::bail!(
                "Session accounting file must be an absolute path: {:?}",
                self.sessions.utmp_file
            );
        }

        if self.helper.process_name.is_empty() {
            anyhow::bail!("Helper process name must not be empty");
        }
        if self.helper.stop_timeout_secs == 0 {
            anyhow::bail!("stop_timeout_secs must be greater than zero");
        }

        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!("Invalid log level: {}", self.logging.level),
        }

        Ok(())
    }

    /// Override config with CLI arguments and validate the result
    pub fn with_overrides(mut self, group: Option<String>) -> Result<Self> {
        if let Some(name) = group {
            self.group.name = name;
        }

        self.validate()
            .context("Invalid configuration after command-line overrides")?;
        Ok(self)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            group: GroupConfig {
                name: "nordvpn".to_string(),
                file: PathBuf::from("/etc/group"),
            },
            sessions: SessionsConfig::default(),
            helper: HelperConfig::default(),
            systemd: SystemdConfig::default(),
            rpc: RpcConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                log_dir: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default_config().unwrap();
        assert_eq!(config.group.name, "nordvpn");
        assert_eq!(config.group.file, PathBuf::from("/etc/group"));
        assert_eq!(config.sessions.utmp_file, PathBuf::from("/var/run/utmp"));
        assert_eq!(config.helper.fork_arg, "fork");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_invalid_group_name() {
        let mut config = Config::default_config().unwrap();
        config.group.name = "nord:vpn".to_string();
        assert!(config.validate().is_err());

        config.group.name = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_relative_paths() {
        let mut config = Config::default_config().unwrap();
        config.group.file = PathBuf::from("etc/group");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_zero_stop_timeout() {
        let mut config = Config::default_config().unwrap();
        config.helper.stop_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_file_uses_section_defaults() {
        let toml = r#"
            [group]
            name = "vpnusers"
            file = "/etc/group"

            [logging]
            level = "debug"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.group.name, "vpnusers");
        assert_eq!(config.helper.process_name, "norduserd");
        assert_eq!(config.rpc.ping_timeout_secs, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_with_overrides() {
        let config = Config::default_config()
            .unwrap()
            .with_overrides(Some("staff".to_string()))
            .unwrap();
        assert_eq!(config.group.name, "staff");
    }

    #[test]
    fn test_invalid_group_override_rejected() {
        let result = Config::default_config()
            .unwrap()
            .with_overrides(Some("nord:vpn".to_string()));
        assert!(result.is_err());

        let result = Config::default_config()
            .unwrap()
            .with_overrides(Some(String::new()));
        assert!(result.is_err());
    }

    #[test]
    fn test_log_filter_follows_configured_level() {
        let logging = LoggingConfig {
            level: "warn".to_string(),
            log_dir: None,
        };
        assert_eq!(logging.filter_directive(0), "norduser_monitor=warn,warn");
        assert_eq!(logging.filter_directive(1), "norduser_monitor=debug,warn");
        assert_eq!(logging.filter_directive(3), "norduser_monitor=trace,warn");
    }

    #[test]
    fn test_log_file_inside_log_dir() {
        let mut logging = Config::default().logging;
        assert_eq!(logging.log_file(), None);

        logging.log_dir = Some(PathBuf::from("/var/log/nordvpn"));
        assert_eq!(
            logging.log_file(),
            Some(PathBuf::from("/var/log/nordvpn").join(LOG_FILE_NAME))
        );
    }
}
