//! Configuration management module.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use humlink_core::constants::{DEFAULT_POLL_INTERVAL_MS, DEFAULT_RESPONSE_TIMEOUT_MS, DEFAULT_WRITE_TIMEOUT_MS};
use humlink_license::client::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_PORT, DEFAULT_RESPONSE_TIMEOUT};
use humlink_license::{ActivationKey, AuthorityConfig};
use humlink_transport::buffer::DEFAULT_CAPACITY;
use humlink_transport::{SerialConfig, SerialParams, TrustAnchor};

/// Smallest receive buffer that holds the largest response frame
const MIN_BUFFER_CAPACITY: usize = 128;

/// Configuration load result.
#[derive(Debug)]
pub enum ConfigLoadResult {
    /// Config loaded successfully.
    Loaded(AppConfig),
    /// Config file missing (first run).
    Missing,
    /// Config file exists but invalid.
    Invalid(ConfigError),
}

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Cannot load license authority certificate {}: {source}", .path.display())]
    Certificate {
        path: PathBuf,
        #[source]
        source: humlink_transport::Error,
    },
}

/// Main application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub serial: SerialSection,
    #[serde(default)]
    pub license: LicenseSection,
}

/// Controller serial link settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialSection {
    #[serde(default = "default_serial_port")]
    pub port: String,
    /// "baud,dataBits,parity,stopBits" (default: 115200,8,n,1).
    #[serde(default = "default_serial_params")]
    pub params: String,
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
}

/// License authority settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseSection {
    #[serde(default = "default_license_host")]
    pub host: String,
    /// TLS port (default: 5678).
    #[serde(default = "default_license_port")]
    pub port: u16,
    /// PEM trust anchor; relative paths resolve against the config file directory.
    #[serde(default = "default_certificate")]
    pub certificate: PathBuf,
    /// 64 hex characters, required only for first registration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activation_key: Option<ActivationKey>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_license_response_timeout_secs")]
    pub response_timeout_secs: u64,
}

fn default_serial_port() -> String {
    let port = if cfg!(windows) { "COM1" } else { "/dev/ttyUSB0" };
    port.to_string()
}

fn default_serial_params() -> String {
    SerialParams::default().to_string()
}

fn default_response_timeout_ms() -> u64 {
    DEFAULT_RESPONSE_TIMEOUT_MS
}

fn default_write_timeout_ms() -> u64 {
    DEFAULT_WRITE_TIMEOUT_MS
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_buffer_capacity() -> usize {
    DEFAULT_CAPACITY
}

fn default_license_host() -> String {
    "license.humlink.local".to_string()
}

fn default_license_port() -> u16 {
    DEFAULT_PORT
}

fn default_certificate() -> PathBuf {
    PathBuf::from("license_authority.pem")
}

fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT.as_secs()
}

fn default_license_response_timeout_secs() -> u64 {
    DEFAULT_RESPONSE_TIMEOUT.as_secs()
}

impl AppConfig {
    /// Get config file path (per-user config directory).
    pub fn default_path() -> PathBuf {
        ProjectDirs::from("", "NUR", "humlink")
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("config.toml"))
    }

    /// Attempt to load config with detailed result.
    pub fn try_load(path: &Path) -> ConfigLoadResult {
        if !path.exists() {
            return ConfigLoadResult::Missing;
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str::<AppConfig>(&content) {
                Ok(config) => match config.validate() {
                    Ok(()) => ConfigLoadResult::Loaded(config),
                    Err(e) => ConfigLoadResult::Invalid(e),
                },
                Err(e) => ConfigLoadResult::Invalid(ConfigError::Parse(e)),
            },
            Err(e) => ConfigLoadResult::Invalid(ConfigError::Read(e)),
        }
    }

    /// Load config, falling back to defaults when the file is missing.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match Self::try_load(path) {
            ConfigLoadResult::Loaded(config) => {
                debug!(path = %path.display(), "Configuration loaded");
                Ok(config)
            }
            ConfigLoadResult::Missing => {
                warn!(path = %path.display(), "Config file missing, using defaults");
                Ok(Self::default())
            }
            ConfigLoadResult::Invalid(e) => Err(e),
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.serial.port.trim().is_empty() {
            return Err(ConfigError::Validation("Serial port cannot be empty".to_string()));
        }
        if self.serial.response_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "Response timeout must be greater than 0".to_string(),
            ));
        }
        if self.serial.write_timeout_ms == 0 {
            return Err(ConfigError::Validation("Write timeout must be greater than 0".to_string()));
        }
        if self.serial.poll_interval_ms == 0 || self.serial.poll_interval_ms > 1000 {
            return Err(ConfigError::Validation(
                "Poll interval must be between 1 and 1000 ms".to_string(),
            ));
        }
        if self.serial.buffer_capacity < MIN_BUFFER_CAPACITY {
            return Err(ConfigError::Validation(format!(
                "Buffer capacity must be at least {} bytes",
                MIN_BUFFER_CAPACITY
            )));
        }
        if self.license.host.trim().is_empty() {
            return Err(ConfigError::Validation("License host cannot be empty".to_string()));
        }
        if self.license.port == 0 {
            return Err(ConfigError::Validation(
                "License port must be greater than 0".to_string(),
            ));
        }
        if self.license.response_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "License response timeout must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Save configuration to file.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Keep `key` for later renewals, saving to `path` if it changed.
    ///
    /// Returns whether the file was written.
    pub fn remember_activation_key(&mut self, key: &ActivationKey, path: &Path) -> Result<bool, ConfigError> {
        if self.license.activation_key.as_ref() == Some(key) {
            return Ok(false);
        }

        self.license.activation_key = Some(*key);
        self.save(path)?;
        debug!(path = %path.display(), "Activation key saved");
        Ok(true)
    }
}

impl SerialSection {
    /// Channel settings; malformed line settings fall back to 115200,8,n,1.
    pub fn channel_config(&self) -> SerialConfig {
        SerialConfig {
            port: self.port.clone(),
            params: SerialParams::parse_or_default(&self.params),
            write_timeout: Duration::from_millis(self.write_timeout_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            buffer_capacity: self.buffer_capacity,
        }
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

impl LicenseSection {
    /// Trust anchor path, resolved against `base_dir` when relative.
    pub fn certificate_path(&self, base_dir: &Path) -> PathBuf {
        if self.certificate.is_absolute() {
            self.certificate.clone()
        } else {
            base_dir.join(&self.certificate)
        }
    }

    /// Authority settings with the trust anchor loaded from disk.
    pub fn authority_config(&self, base_dir: &Path) -> Result<AuthorityConfig, ConfigError> {
        let path = self.certificate_path(base_dir);
        let anchor = TrustAnchor::from_pem_file(&path)
            .map_err(|source| ConfigError::Certificate { path, source })?;

        Ok(AuthorityConfig {
            host: self.host.clone(),
            port: self.port,
            anchor,
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            response_timeout: Duration::from_secs(self.response_timeout_secs),
        })
    }
}

impl Default for SerialSection {
    fn default() -> Self {
        Self {
            port: default_serial_port(),
            params: default_serial_params(),
            response_timeout_ms: default_response_timeout_ms(),
            write_timeout_ms: default_write_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            buffer_capacity: default_buffer_capacity(),
        }
    }
}

impl Default for LicenseSection {
    fn default() -> Self {
        Self {
            host: default_license_host(),
            port: default_license_port(),
            certificate: default_certificate(),
            activation_key: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            response_timeout_secs: default_license_response_timeout_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const KEY: &str = "00112233445566778899AABBCCDDEEFF00112233445566778899AABBCCDDEEFF";

    #[test]
    fn test_default_config_validates() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.serial.params, "115200,8,n,1");
        assert_eq!(config.license.port, 5678);
        assert_eq!(config.license.response_timeout_secs, 30);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [serial]
            port = "/dev/ttyACM0"

            [license]
            activation_key = "00112233445566778899AABBCCDDEEFF00112233445566778899AABBCCDDEEFF"
            "#,
        )
        .unwrap();

        assert_eq!(config.serial.port, "/dev/ttyACM0");
        assert_eq!(config.serial.buffer_capacity, 1024);
        assert_eq!(config.license.host, "license.humlink.local");
        assert_eq!(config.license.activation_key.unwrap().to_hex(), KEY);
    }

    #[test]
    fn test_invalid_activation_key_rejected() {
        let result = toml::from_str::<AppConfig>(
            r#"
            [license]
            activation_key = "XYZ"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_validation() {
        let mut config = AppConfig::default();
        config.serial.port = " ".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.serial.buffer_capacity = 64;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.license.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.serial.poll_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_try_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        assert!(matches!(AppConfig::try_load(&path), ConfigLoadResult::Missing));

        std::fs::write(&path, "[serial\nport = 1").unwrap();
        assert!(matches!(
            AppConfig::try_load(&path),
            ConfigLoadResult::Invalid(ConfigError::Parse(_))
        ));

        std::fs::write(&path, "[license]\nport = 0\n").unwrap();
        assert!(matches!(
            AppConfig::try_load(&path),
            ConfigLoadResult::Invalid(ConfigError::Validation(_))
        ));
        assert!(AppConfig::load(&path).is_err());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = AppConfig::default();
        config.serial.port = "/dev/ttyS3".to_string();
        config.license.activation_key = Some(ActivationKey::parse(KEY).unwrap());
        config.save(&path).unwrap();

        match AppConfig::try_load(&path) {
            ConfigLoadResult::Loaded(loaded) => assert_eq!(loaded, config),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_remember_activation_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let key = ActivationKey::parse(KEY).unwrap();

        let mut config = AppConfig::default();
        assert!(config.remember_activation_key(&key, &path).unwrap());
        assert!(!config.remember_activation_key(&key, &path).unwrap());

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.license.activation_key, Some(key));
    }

    #[test]
    fn test_channel_config() {
        let mut section = SerialSection::default();
        section.params = "9600,7,e,2".to_string();
        section.write_timeout_ms = 250;

        let channel = section.channel_config();
        assert_eq!(channel.params.to_string(), "9600,7,e,2");
        assert_eq!(channel.write_timeout, Duration::from_millis(250));

        section.params = "fast".to_string();
        assert_eq!(section.channel_config().params, SerialParams::default());
    }

    #[test]
    fn test_certificate_path() {
        let section = LicenseSection::default();
        assert_eq!(
            section.certificate_path(Path::new("/etc/humlink")),
            PathBuf::from("/etc/humlink/license_authority.pem")
        );
    }

    #[test]
    fn test_missing_certificate() {
        let dir = tempfile::tempdir().unwrap();
        let err = LicenseSection::default().authority_config(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Certificate { .. }));
    }
}
