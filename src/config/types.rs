//! Configuration Types

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub profile: ProfileConfig,
    pub relay: RelayConfig,
    pub monitoring: MonitoringConfig,
}

/// Connection profile: which server to tunnel through and how to encrypt.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProfileConfig {
    /// Remote proxy server hostname or address
    pub server: String,
    /// Remote proxy server port
    pub server_port: u16,
    /// Local SOCKS5 listen port
    pub local_port: u16,
    /// Cipher name, e.g. "aes-256-cfb" or "chacha20"
    pub method: String,
    /// Shared password the key is derived from
    pub password: String,
    /// Idle window after which sessions and UDP mappings are reclaimed
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Enable per-chunk one-time-auth framing on the uplink
    pub one_time_auth: bool,
}

/// Relay tuning knobs.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RelayConfig {
    pub buffer_size: usize,
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

/// Monitoring configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            profile: ProfileConfig {
                server: "127.0.0.1".to_string(),
                server_port: 8388,
                local_port: 1080,
                method: "aes-256-cfb".to_string(),
                password: String::new(),
                timeout: Duration::from_secs(300),
                one_time_auth: false,
            },
            relay: RelayConfig {
                buffer_size: 8192,
                sweep_interval: Duration::from_secs(30),
            },
            monitoring: MonitoringConfig {
                log_level: "info".to_string(),
            },
        }
    }
}
