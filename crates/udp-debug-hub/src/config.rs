// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Hub configuration.
//!
//! Loaded from TOML or assembled from command-line flags.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Which transport the debug client and server use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Real UDP sockets.
    #[default]
    Udp,
    /// In-process network, no sockets.
    Intra,
}

impl std::fmt::Display for TransportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Udp => f.write_str("udp"),
            Self::Intra => f.write_str("intra"),
        }
    }
}

/// Hub configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubConfig {
    /// Address the HTTP listener binds to (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// HTTP port (default: 8080)
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Port of the debug UDP server (default: 9090)
    #[serde(default = "default_udp_port")]
    pub udp_port: u16,

    /// Host the debug clients dial (default: 127.0.0.1)
    #[serde(default = "default_udp_host")]
    pub udp_host: String,

    /// Transport implementation
    #[serde(default)]
    pub transport: TransportMode,

    /// Bound on the whole shutdown sequence (seconds)
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// How often server relays look for a server (milliseconds)
    #[serde(default = "default_poll_interval")]
    pub server_poll_interval_ms: u64,

    /// Per-viewer write timeout (milliseconds)
    #[serde(default = "default_viewer_write_timeout")]
    pub viewer_write_timeout_ms: u64,

    /// Directory with the dashboard build, served at `/`
    #[serde(default)]
    pub static_dir: Option<PathBuf>,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Name candidates tried per client start
    #[serde(default = "default_name_attempts")]
    pub name_attempts: usize,
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_http_port() -> u16 {
    8080
}

fn default_udp_port() -> u16 {
    9090
}

fn default_udp_host() -> String {
    "127.0.0.1".to_string()
}

fn default_shutdown_timeout() -> u64 {
    10
}

fn default_poll_interval() -> u64 {
    100
}

fn default_viewer_write_timeout() -> u64 {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_name_attempts() -> usize {
    8
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            http_port: default_http_port(),
            udp_port: default_udp_port(),
            udp_host: default_udp_host(),
            transport: TransportMode::default(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            server_poll_interval_ms: default_poll_interval(),
            viewer_write_timeout_ms: default_viewer_write_timeout(),
            static_dir: None,
            log_level: default_log_level(),
            name_attempts: default_name_attempts(),
        }
    }
}

impl HubConfig {
    /// Load and validate configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn http_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.http_port)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn server_poll_interval(&self) -> Duration {
        Duration::from_millis(self.server_poll_interval_ms)
    }

    pub fn viewer_write_timeout(&self) -> Duration {
        Duration::from_millis(self.viewer_write_timeout_ms)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.http_port == 0 {
            return Err(ConfigError::Invalid("http_port cannot be 0".into()));
        }
        if self.udp_port == 0 {
            return Err(ConfigError::Invalid("udp_port cannot be 0".into()));
        }
        if self.udp_host.trim().is_empty() {
            return Err(ConfigError::Invalid("udp_host cannot be empty".into()));
        }
        if self.shutdown_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "shutdown_timeout_secs cannot be 0".into(),
            ));
        }
        if self.server_poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "server_poll_interval_ms cannot be 0".into(),
            ));
        }
        if self.viewer_write_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "viewer_write_timeout_ms cannot be 0".into(),
            ));
        }
        if self.name_attempts == 0 {
            return Err(ConfigError::Invalid("name_attempts cannot be 0".into()));
        }
        if let Some(dir) = &self.static_dir {
            if !dir.is_dir() {
                return Err(ConfigError::Invalid(format!(
                    "static_dir {} is not a directory",
                    dir.display()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HubConfig::default();
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.udp_port, 9090);
        assert_eq!(config.transport, TransportMode::Udp);
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: HubConfig = toml::from_str(
            r#"
            http_port = 3000
            transport = "intra"
            "#,
        )
        .unwrap();
        assert_eq!(config.http_port, 3000);
        assert_eq!(config.transport, TransportMode::Intra);
        assert_eq!(config.udp_port, 9090);
        assert_eq!(config.server_poll_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_validation_rejects_zeroes() {
        for config in [
            HubConfig {
                http_port: 0,
                ..Default::default()
            },
            HubConfig {
                shutdown_timeout_secs: 0,
                ..Default::default()
            },
            HubConfig {
                name_attempts: 0,
                ..Default::default()
            },
            HubConfig {
                viewer_write_timeout_ms: 0,
                ..Default::default()
            },
        ] {
            assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        }
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hub.toml");

        let config = HubConfig {
            http_port: 8181,
            transport: TransportMode::Intra,
            ..Default::default()
        };
        config.to_file(&path).unwrap();

        let loaded = HubConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_file_log_level_overrides_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hub.toml");
        std::fs::write(&path, "log_level = \"udp_debug_hub=debug\"\n").unwrap();

        let loaded = HubConfig::from_file(&path).unwrap();
        assert_eq!(loaded.log_level, "udp_debug_hub=debug");
        assert_eq!(HubConfig::default().log_level, "info");
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hub.toml");
        std::fs::write(&path, "udp_port = 0\n").unwrap();
        assert!(matches!(
            HubConfig::from_file(&path),
            Err(ConfigError::Invalid(_))
        ));

        std::fs::write(&path, "udp_port = \"x\"\n").unwrap();
        assert!(matches!(HubConfig::from_file(&path), Err(ConfigError::Toml(_))));
    }
}
