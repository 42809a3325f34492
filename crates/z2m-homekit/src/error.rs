//! CLI error types with miette diagnostics.
//!
//! Maps config and core failures into user-facing errors with actionable
//! help text and a process exit code.

use std::net::SocketAddr;
use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use z2m_homekit_config::ConfigError;
use z2m_homekit_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Configuration ────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(
        code(z2m_homekit::validation),
        help("Fix the value in your config file or the matching Z2M_HOMEKIT_* variable.")
    )]
    Validation { field: String, reason: String },

    #[error("Configuration could not be loaded")]
    #[diagnostic(
        code(z2m_homekit::config),
        help("Check the TOML syntax and value types.\nExpected at: {path}")
    )]
    Config {
        path: String,
        #[source]
        source: Box<figment::Error>,
    },

    #[error("Device registry {path} is invalid")]
    #[diagnostic(
        code(z2m_homekit::devices),
        help("Every device needs an id, name, topic and a supported type, and ids must be unique.")
    )]
    Registry {
        path: PathBuf,
        #[source]
        source: CoreError,
    },

    #[error("No device is exposed to HomeKit")]
    #[diagnostic(
        code(z2m_homekit::no_accessories),
        help("Set \"homekit\": true on at least one device in the registry.")
    )]
    NoAccessories,

    // ── Runtime ──────────────────────────────────────────────────────
    #[error("Could not listen on {addr}")]
    #[diagnostic(
        code(z2m_homekit::bind),
        help("Another process may hold the port. Change web_port or web_bind_address.")
    )]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Metrics registry error: {0}")]
    #[diagnostic(code(z2m_homekit::metrics))]
    Metrics(#[from] prometheus::Error),

    #[error(transparent)]
    #[diagnostic(code(z2m_homekit::core))]
    Core(CoreError),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to encode JSON output: {0}")]
    #[diagnostic(code(z2m_homekit::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Validation { .. } | Self::Registry { .. } | Self::NoAccessories => {
                exit_code::USAGE
            }
            Self::Bind { .. } => exit_code::CONNECTION,
            _ => exit_code::GENERAL,
        }
    }

    pub fn from_config(err: ConfigError, path: &std::path::Path) -> Self {
        match err {
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            ConfigError::Figment(source) => Self::Config {
                path: path.display().to_string(),
                source,
            },
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NoAccessories => Self::NoAccessories,
            other => Self::Core(other),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn configuration_problems_are_usage_errors() {
        let err = CliError::from_config(
            ConfigError::Validation {
                field: "hap_pin".into(),
                reason: "expected 8 digits".into(),
            },
            std::path::Path::new("config.toml"),
        );
        assert_eq!(err.exit_code(), exit_code::USAGE);

        let err = CliError::Registry {
            path: "devices.hujson".into(),
            source: CoreError::DuplicateDevice { id: "x".into() },
        };
        assert_eq!(err.exit_code(), exit_code::USAGE);
        assert_eq!(CliError::from(CoreError::NoAccessories).exit_code(), exit_code::USAGE);
    }

    #[test]
    fn bind_failure_is_a_connection_error() {
        let err = CliError::Bind {
            addr: "127.0.0.1:8081".parse().unwrap(),
            source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
        };
        assert_eq!(err.exit_code(), exit_code::CONNECTION);
    }
}
