// ── Core error types ──
//
// Grouped by how the bridge reacts: configuration errors are fatal at
// startup, everything attributable to one device or one message is
// contained at that granularity. The `From<TransportError>` impl lifts
// bus failures into the domain error.

use std::path::PathBuf;

use thiserror::Error;

use crate::transport::TransportError;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("no devices configured")]
    NoDevices,

    #[error("device {index} has no ID")]
    MissingId { index: usize },

    #[error("device {id} has no {field}")]
    MissingField { id: String, field: &'static str },

    #[error("device {id} has invalid type: {device_type}")]
    InvalidDeviceType { id: String, device_type: String },

    #[error("duplicate device id: {id}")]
    DuplicateDevice { id: String },

    #[error("Failed to parse device registry: {message}")]
    RegistryParse { message: String },

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Device errors ────────────────────────────────────────────────
    #[error("Device not found: {id}")]
    UnknownDevice { id: String },

    #[error("Device {id} is not exposed to the web UI")]
    NotVisible { id: String },

    // ── Command path errors ──────────────────────────────────────────
    #[error("Command queue full, dropped command for {device_id}")]
    CommandQueueFull { device_id: String },

    #[error("Command channel closed")]
    CommandChannelClosed,

    // ── Transport errors (wrapped) ───────────────────────────────────
    #[error("Bus transport error: {0}")]
    Transport(#[from] TransportError),

    // ── Startup errors ───────────────────────────────────────────────
    #[error("No devices are exposed to HomeKit")]
    NoAccessories,
}

impl CoreError {
    /// Whether this error belongs to the fatal configuration class.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::Config { .. }
                | Self::NoDevices
                | Self::MissingId { .. }
                | Self::MissingField { .. }
                | Self::InvalidDeviceType { .. }
                | Self::DuplicateDevice { .. }
                | Self::RegistryParse { .. }
                | Self::Io { .. }
        )
    }
}
