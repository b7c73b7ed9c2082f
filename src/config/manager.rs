//! Configuration Manager

use super::Config;
use crate::crypto::lookup_cipher;
use crate::Result;
use anyhow::{bail, Context};
use std::path::Path;

/// Manages configuration loading and validation
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from file
    pub fn load_from_file(path: &Path) -> Result<Config> {
        if path.exists() {
            tracing::info!("Loading configuration from: {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;

            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

            tracing::info!("Configuration loaded successfully");
            Ok(config)
        } else {
            tracing::warn!(
                "Configuration file not found at {}, using defaults",
                path.display()
            );
            Ok(Config::default())
        }
    }

    /// Load configuration from environment variables
    pub fn load_from_env() -> Result<Config> {
        let mut config = Config::default();

        // Override with environment variables if present
        if let Ok(server) = std::env::var("SSRELAY_SERVER") {
            config.profile.server = server;
        }

        if let Ok(server_port) = std::env::var("SSRELAY_SERVER_PORT") {
            config.profile.server_port = server_port
                .parse::<u16>()
                .with_context(|| format!("Invalid SSRELAY_SERVER_PORT: {}", server_port))?;
        }

        if let Ok(local_port) = std::env::var("SSRELAY_LOCAL_PORT") {
            config.profile.local_port = local_port
                .parse::<u16>()
                .with_context(|| format!("Invalid SSRELAY_LOCAL_PORT: {}", local_port))?;
        }

        if let Ok(method) = std::env::var("SSRELAY_METHOD") {
            config.profile.method = method;
        }

        if let Ok(password) = std::env::var("SSRELAY_PASSWORD") {
            config.profile.password = password;
        }

        if let Ok(timeout) = std::env::var("SSRELAY_TIMEOUT") {
            config.profile.timeout = humantime::parse_duration(&timeout)
                .with_context(|| format!("Invalid SSRELAY_TIMEOUT: {}", timeout))?;
        }

        if let Ok(ota) = std::env::var("SSRELAY_ONE_TIME_AUTH") {
            config.profile.one_time_auth = ota
                .parse::<bool>()
                .with_context(|| format!("Invalid SSRELAY_ONE_TIME_AUTH: {}", ota))?;
        }

        if let Ok(buffer_size) = std::env::var("SSRELAY_BUFFER_SIZE") {
            config.relay.buffer_size = buffer_size
                .parse::<usize>()
                .with_context(|| format!("Invalid SSRELAY_BUFFER_SIZE: {}", buffer_size))?;
        }

        if let Ok(log_level) = std::env::var("SSRELAY_LOG_LEVEL") {
            config.monitoring.log_level = log_level;
        }

        Ok(config)
    }
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_profile_config()
            .with_context(|| "Profile configuration validation failed")?;

        self.validate_relay_config()
            .with_context(|| "Relay configuration validation failed")?;

        self.validate_monitoring_config()
            .with_context(|| "Monitoring configuration validation failed")?;

        Ok(())
    }

    /// Validate profile configuration
    fn validate_profile_config(&self) -> Result<()> {
        if self.profile.server.is_empty() {
            bail!("profile.server must not be empty");
        }

        if self.profile.server_port == 0 {
            bail!("profile.server_port must be greater than 0");
        }

        if self.profile.local_port == 0 {
            bail!("profile.local_port must be greater than 0");
        }

        if lookup_cipher(&self.profile.method).is_none() {
            bail!(
                "Unsupported cipher method '{}', supported: {}",
                self.profile.method,
                crate::crypto::supported_ciphers().collect::<Vec<_>>().join(", ")
            );
        }

        if self.profile.password.is_empty() {
            bail!("profile.password must not be empty");
        }

        if self.profile.timeout.as_secs() == 0 {
            bail!("profile.timeout must be greater than 0");
        }

        if self.profile.timeout.as_secs() > 3600 {
            bail!("profile.timeout cannot exceed 1 hour");
        }

        Ok(())
    }

    /// Validate relay configuration
    fn validate_relay_config(&self) -> Result<()> {
        if self.relay.buffer_size < 1024 {
            bail!("buffer_size must be at least 1024 bytes");
        }

        if self.relay.buffer_size > 1048576 {
            bail!("buffer_size cannot exceed 1MB");
        }

        if self.relay.sweep_interval.as_millis() == 0 {
            bail!("sweep_interval must be greater than 0");
        }

        Ok(())
    }

    /// Validate monitoring configuration
    fn validate_monitoring_config(&self) -> Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.monitoring.log_level.as_str()) {
            bail!(
                "monitoring.log_level must be one of: {}",
                valid_log_levels.join(", ")
            );
        }

        Ok(())
    }

    /// Merge with CLI arguments
    #[allow(clippy::too_many_arguments)]
    pub fn merge_with_cli_args(
        &mut self,
        server: Option<&str>,
        server_port: Option<u16>,
        local_port: Option<u16>,
        method: Option<&str>,
        password: Option<&str>,
        one_time_auth: bool,
        timeout: Option<u64>,
    ) {
        if let Some(server) = server {
            self.profile.server = server.to_string();
            tracing::info!("CLI override: server set to {}", server);
        }

        if let Some(port) = server_port {
            self.profile.server_port = port;
            tracing::info!("CLI override: server port set to {}", port);
        }

        if let Some(port) = local_port {
            self.profile.local_port = port;
            tracing::info!("CLI override: local port set to {}", port);
        }

        if let Some(method) = method {
            self.profile.method = method.to_string();
            tracing::info!("CLI override: cipher method set to {}", method);
        }

        if let Some(password) = password {
            self.profile.password = password.to_string();
            tracing::info!("CLI override: password updated");
        }

        if one_time_auth {
            self.profile.one_time_auth = true;
            tracing::info!("CLI override: one-time-auth enabled");
        }

        if let Some(timeout_secs) = timeout {
            self.profile.timeout = std::time::Duration::from_secs(timeout_secs);
            tracing::info!("CLI override: idle timeout set to {}s", timeout_secs);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.profile.password = "barfoo!".to_string();
        config
    }

    #[test]
    fn test_default_config_needs_password() {
        assert!(Config::default().validate().is_err());
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_unknown_cipher_rejected() {
        let mut config = valid_config();
        config.profile.method = "aes-512-gcm".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = valid_config();
        config.profile.timeout = std::time::Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = valid_config();
        config.merge_with_cli_args(
            Some("proxy.example.org"),
            Some(8389),
            Some(1081),
            Some("rc4-md5"),
            None,
            true,
            Some(60),
        );
        assert_eq!(config.profile.server, "proxy.example.org");
        assert_eq!(config.profile.server_port, 8389);
        assert_eq!(config.profile.local_port, 1081);
        assert_eq!(config.profile.method, "rc4-md5");
        assert_eq!(config.profile.password, "barfoo!");
        assert!(config.profile.one_time_auth);
        assert_eq!(config.profile.timeout.as_secs(), 60);
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = valid_config();
        let rendered = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.profile.method, config.profile.method);
        assert_eq!(parsed.profile.timeout, config.profile.timeout);
        assert_eq!(parsed.relay.buffer_size, config.relay.buffer_size);
    }
}
