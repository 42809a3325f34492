//! Application configuration for the z2m-homekit bridge.
//!
//! Layered with figment: built-in defaults, then an optional TOML file,
//! then `Z2M_HOMEKIT_*` environment variables. The validated result is
//! translated into `z2m_homekit_core::BridgeConfig` so the core never
//! sees files or environment details.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use z2m_homekit_core::BridgeConfig;

/// Prefix for environment overrides, e.g. `Z2M_HOMEKIT_WEB_PORT`.
pub const ENV_PREFIX: &str = "Z2M_HOMEKIT_";

const LOG_LEVELS: [&str; 4] = ["debug", "info", "warn", "error"];
const LOG_FORMATS: [&str; 2] = ["json", "console"];

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

impl ConfigError {
    fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

// ── AppConfig ───────────────────────────────────────────────────────

/// Flat application configuration. Every key can be overridden by an
/// environment variable named after it.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// HomeKit setup code, eight digits.
    pub hap_pin: String,
    pub hap_storage_path: PathBuf,
    pub hap_bind_address: String,
    pub hap_port: u16,

    pub web_bind_address: String,
    pub web_port: u16,

    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_client_id: String,
    pub mqtt_username: Option<String>,
    #[serde(skip_serializing, deserialize_with = "secret_opt", default)]
    pub mqtt_password: Option<SecretString>,

    pub bridge_name: String,
    pub log_level: String,
    pub log_format: String,
    /// Path to the device registry document.
    pub devices_config: PathBuf,
    pub command_queue: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        let bridge = BridgeConfig::default();
        Self {
            hap_pin: "00102003".into(),
            hap_storage_path: PathBuf::from("./data/hap"),
            hap_bind_address: "0.0.0.0".into(),
            hap_port: 51826,
            web_bind_address: "0.0.0.0".into(),
            web_port: 8081,
            mqtt_host: "127.0.0.1".into(),
            mqtt_port: 1883,
            mqtt_client_id: "z2m-homekit".into(),
            mqtt_username: None,
            mqtt_password: None,
            bridge_name: bridge.bridge_name,
            log_level: "info".into(),
            log_format: "json".into(),
            devices_config: PathBuf::from("./devices.hujson"),
            command_queue: bridge.command_queue,
        }
    }
}

fn secret_opt<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.filter(|s| !s.is_empty()).map(SecretString::from))
}

// ── Loading ─────────────────────────────────────────────────────────

/// Default config file location, `<config dir>/z2m-homekit/config.toml`.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("", "", "z2m-homekit").map_or_else(
        || PathBuf::from("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// The provider stack. A missing file contributes nothing.
pub fn figment(path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(AppConfig::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX))
}

impl AppConfig {
    /// Load from `path` (or the default location) and validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.map_or_else(config_path, Path::to_path_buf);
        Self::from_figment(&figment(&path))
    }

    pub fn from_figment(figment: &Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hap_pin.len() != 8 || !self.hap_pin.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ConfigError::invalid(
                "hap_pin",
                format!("expected 8 digits, got '{}'", self.hap_pin),
            ));
        }
        if self.hap_storage_path.as_os_str().is_empty() {
            return Err(ConfigError::invalid("hap_storage_path", "must not be empty"));
        }
        socket_addr("hap", &self.hap_bind_address, self.hap_port)?;
        socket_addr("web", &self.web_bind_address, self.web_port)?;

        if self.mqtt_host.trim().is_empty() {
            return Err(ConfigError::invalid("mqtt_host", "must not be empty"));
        }
        nonzero_port("mqtt_port", self.mqtt_port)?;
        if self.mqtt_client_id.trim().is_empty() {
            return Err(ConfigError::invalid("mqtt_client_id", "must not be empty"));
        }
        if self.bridge_name.trim().is_empty() {
            return Err(ConfigError::invalid("bridge_name", "must not be empty"));
        }
        if !LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::invalid(
                "log_level",
                format!(
                    "expected one of {}, got '{}'",
                    LOG_LEVELS.join(", "),
                    self.log_level
                ),
            ));
        }
        if !LOG_FORMATS.contains(&self.log_format.as_str()) {
            return Err(ConfigError::invalid(
                "log_format",
                format!("expected 'json' or 'console', got '{}'", self.log_format),
            ));
        }
        if self.devices_config.as_os_str().is_empty() {
            return Err(ConfigError::invalid("devices_config", "must not be empty"));
        }
        if self.command_queue == 0 {
            return Err(ConfigError::invalid("command_queue", "must be at least 1"));
        }
        Ok(())
    }

    pub fn hap_addr(&self) -> Result<SocketAddr, ConfigError> {
        socket_addr("hap", &self.hap_bind_address, self.hap_port)
    }

    pub fn web_addr(&self) -> Result<SocketAddr, ConfigError> {
        socket_addr("web", &self.web_bind_address, self.web_port)
    }

    /// The subset the core needs.
    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            bridge_name: self.bridge_name.clone(),
            command_queue: self.command_queue,
        }
    }
}

fn nonzero_port(field: &str, port: u16) -> Result<(), ConfigError> {
    if port == 0 {
        return Err(ConfigError::invalid(field, "port must be between 1 and 65535"));
    }
    Ok(())
}

fn socket_addr(prefix: &str, host: &str, port: u16) -> Result<SocketAddr, ConfigError> {
    nonzero_port(&format!("{prefix}_port"), port)?;
    format!("{host}:{port}").parse().map_err(|_| {
        ConfigError::invalid(
            &format!("{prefix}_bind_address"),
            format!("'{host}' is not a valid IP address"),
        )
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn field_of(err: ConfigError) -> String {
        match err {
            ConfigError::Validation { field, .. } => field,
            ConfigError::Figment(e) => panic!("unexpected figment error: {e}"),
        }
    }

    #[test]
    fn defaults_validate() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.web_addr().unwrap(), "0.0.0.0:8081".parse().unwrap());
        assert_eq!(config.hap_addr().unwrap().port(), 51826);
    }

    #[test]
    fn pin_must_be_eight_digits() {
        for pin in ["1234567", "123456789", "0010200a"] {
            let config = AppConfig {
                hap_pin: pin.into(),
                ..AppConfig::default()
            };
            assert_eq!(field_of(config.validate().unwrap_err()), "hap_pin");
        }
    }

    #[test]
    fn zero_port_rejected() {
        let config = AppConfig {
            web_port: 0,
            ..AppConfig::default()
        };
        assert_eq!(field_of(config.validate().unwrap_err()), "web_port");
    }

    #[test]
    fn bad_bind_address_rejected() {
        let config = AppConfig {
            hap_bind_address: "not-an-ip".into(),
            ..AppConfig::default()
        };
        assert_eq!(field_of(config.validate().unwrap_err()), "hap_bind_address");
    }

    #[test]
    fn log_settings_checked() {
        let level = AppConfig {
            log_level: "trace".into(),
            ..AppConfig::default()
        };
        assert_eq!(field_of(level.validate().unwrap_err()), "log_level");

        let format = AppConfig {
            log_format: "yaml".into(),
            ..AppConfig::default()
        };
        assert_eq!(field_of(format.validate().unwrap_err()), "log_format");
    }

    #[test]
    fn empty_queue_rejected() {
        let config = AppConfig {
            command_queue: 0,
            ..AppConfig::default()
        };
        assert_eq!(field_of(config.validate().unwrap_err()), "command_queue");
    }

    #[test]
    fn bridge_config_carries_name_and_queue() {
        let config = AppConfig {
            bridge_name: "Attic".into(),
            command_queue: 32,
            ..AppConfig::default()
        };
        let bridge = config.bridge_config();
        assert_eq!(bridge.bridge_name, "Attic");
        assert_eq!(bridge.command_queue, 32);
    }
}
