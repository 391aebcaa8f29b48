use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use vigil_net::TransportConfig;

const CONFIG_FILE_NAME: &str = "config.toml";

/// Largest usable send window; the sequence ring has 255 slots.
const MAX_FLOW_WINDOW: usize = 254;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Configuration validation failed: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    pub network: NetworkConfig,
    pub transport: TransportTuning,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NetworkConfig {
    /// UDP port of the server's datagram endpoint.
    pub datagram_port: u16,
    /// TCP port of the server's alert stream endpoint.
    pub stream_port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TransportTuning {
    pub retransmission_timeout_secs: u64,
    pub max_retries: u32,
    pub flow_window: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            datagram_port: 8080,
            stream_port: 9090,
        }
    }
}

impl Default for TransportTuning {
    fn default() -> Self {
        Self {
            retransmission_timeout_secs: 2,
            max_retries: 3,
            flow_window: 20,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            transport: TransportTuning::default(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.network.datagram_port == 0 || self.network.stream_port == 0 {
            return Err(ConfigError::Validation(
                "Ports must be non-zero.".to_string(),
            ));
        }

        if self.network.datagram_port == self.network.stream_port {
            return Err(ConfigError::Validation(
                "Datagram and stream ports must differ.".to_string(),
            ));
        }

        if self.transport.max_retries == 0 {
            return Err(ConfigError::Validation(
                "At least one transmit attempt is required.".to_string(),
            ));
        }

        if self.transport.flow_window == 0 || self.transport.flow_window > MAX_FLOW_WINDOW {
            return Err(ConfigError::Validation(format!(
                "Flow window must be between 1 and {}.",
                MAX_FLOW_WINDOW
            )));
        }

        Ok(())
    }

    pub fn transport_config(&self) -> TransportConfig {
        let retransmission_timeout = Duration::from_secs(self.transport.retransmission_timeout_secs);
        TransportConfig {
            retransmission_timeout,
            max_retries: self.transport.max_retries,
            flow_window: self.transport.flow_window,
            reorder_timeout: retransmission_timeout,
        }
    }
}

/// Loads `config.toml` from the working directory, writing the defaults
/// there first when the file does not exist.
pub fn handle() -> Result<Config> {
    let config_path = PathBuf::from(CONFIG_FILE_NAME);
    if config_path.exists() {
        let config_content = fs::read_to_string(&config_path)?;
        let config: Config = toml::from_str(&config_content)?;
        config.validate()?;
        Ok(config)
    } else {
        let config = Config::default();
        save(&config, &config_path)?;
        Ok(config)
    }
}

fn save(config: &Config, path: &Path) -> Result<()> {
    let config_content = toml::to_string_pretty(config)?;
    let mut file = fs::File::create(path)?;
    file.write_all(config_content.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn zero_retries_is_rejected() {
        let mut config = Config::default();
        config.transport.max_retries = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn oversized_flow_window_is_rejected() {
        let mut config = Config::default();
        config.transport.flow_window = 255;
        assert!(config.validate().is_err());
    }

    #[test]
    fn transport_config_carries_the_tuning() {
        let config = Config::default();
        let transport = config.transport_config();
        assert_eq!(transport.retransmission_timeout, Duration::from_secs(2));
        assert_eq!(transport.max_retries, 3);
        assert_eq!(transport.flow_window, 20);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config: Config = toml::from_str("[network]\ndatagram_port = 9000\nstream_port = 9001\n").unwrap();
        assert_eq!(config.network.datagram_port, 9000);
        assert_eq!(config.transport.max_retries, 3);
    }
}
