use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use ulid::Ulid;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub queue: QueueSettings,
    pub sweep: SweepSettings,
    pub dispatch: DispatchSettings,
    pub destinations: Vec<DestinationConfig>,
    pub mock_source: Option<MockSourceConfig>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Status/metrics HTTP listener.
    pub http_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: SocketAddr::from(([127, 0, 0, 1], 8328)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Default per-destination distinct-device capacity.
    pub max_devices: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self { max_devices: 4096 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepSettings {
    pub interval_secs: u64,
    /// A device with no accepted admission for this long is eligible for
    /// state eviction (advisory, monitoring only).
    pub stale_after_secs: u64,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            stale_after_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    pub poll_interval_ms: u64,
    pub batch_size: usize,
    pub max_attempts: u32,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 250,
            batch_size: 32,
            max_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationConfig {
    /// Fixed id, or generated at startup when absent.
    pub id: Option<Ulid>,
    pub name: String,
    /// TAK server endpoint.
    pub addr: SocketAddr,
    /// Overrides `queue.max_devices` for this destination.
    pub max_devices: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MockSourceConfig {
    pub device_count: usize,
    pub poll_interval_secs: u64,
    pub history_depth: usize,
}

impl Default for MockSourceConfig {
    fn default() -> Self {
        Self {
            device_count: 50,
            poll_interval_secs: 5,
            history_depth: 6,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Config;

    #[test]
    fn defaults_apply_to_empty_config() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.queue.max_devices, 4096);
        assert!(config.destinations.is_empty());
        assert!(config.mock_source.is_none());
    }

    #[test]
    fn parses_full_config() {
        let config: Config = toml::from_str(
            r#"
            [server]
            http_addr = "0.0.0.0:9000"

            [queue]
            max_devices = 128

            [sweep]
            interval_secs = 30
            stale_after_secs = 600

            [[destinations]]
            name = "tak-primary"
            addr = "10.0.0.5:8087"
            max_devices = 256

            [[destinations]]
            name = "tak-backup"
            addr = "10.0.0.6:8087"

            [mock_source]
            device_count = 10
            "#,
        )
        .unwrap();

        assert_eq!(config.server.http_addr.port(), 9000);
        assert_eq!(config.destinations.len(), 2);
        assert_eq!(config.destinations[0].max_devices, Some(256));
        assert_eq!(config.destinations[1].max_devices, None);
        let mock = config.mock_source.unwrap();
        assert_eq!(mock.device_count, 10);
        assert_eq!(mock.history_depth, 6);
    }
}
