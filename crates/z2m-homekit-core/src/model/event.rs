// ── Fabric event types ──
//
// Everything that crosses a component boundary travels as one of these.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter};

use super::state::{DeviceState, StateField};

/// Tolerance for float fields when comparing state updates.
const FLOAT_EPSILON: f64 = 0.001;

/// Seen within this window: connected.
const CONNECTED_WITHIN: Duration = Duration::from_secs(30);
/// Seen within this window: stale. Beyond it: disconnected.
const STALE_WITHIN: Duration = Duration::from_secs(60);

// ── StateChanged ─────────────────────────────────────────────────

/// A parsed bus message: candidate state plus the fields it actually carried.
#[derive(Debug, Clone, PartialEq)]
pub struct StateChanged {
    pub device_id: String,
    pub state: DeviceState,
    pub fields: Vec<StateField>,
}

// ── StateUpdate ──────────────────────────────────────────────────

/// Why a state update was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum UpdateSource {
    /// Seeded at startup.
    Initial,
    /// Merged from a bus message.
    Eventbus,
}

/// Derived liveness of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Connectivity {
    Connected,
    Stale,
    Disconnected,
}

impl Connectivity {
    /// Classify a last-seen timestamp relative to `now`, with a
    /// human-readable note.
    pub fn classify(last_seen: Option<DateTime<Utc>>, now: DateTime<Utc>) -> (Self, String) {
        let Some(last_seen) = last_seen else {
            return (Self::Disconnected, "Never seen".into());
        };

        let since = (now - last_seen).to_std().unwrap_or_default();
        let note = format!(
            "Last seen: {} ago",
            humantime::format_duration(Duration::from_secs(since.as_secs()))
        );

        let class = if since < CONNECTED_WITHIN {
            Self::Connected
        } else if since < STALE_WITHIN {
            Self::Stale
        } else {
            Self::Disconnected
        };
        (class, note)
    }
}

/// Post-merge view of one device, broadcast to the accessory adapter and
/// the UI. Brightness is on the percent scale here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateUpdate {
    pub timestamp: DateTime<Utc>,
    pub source: UpdateSource,
    pub device_id: String,
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occupancy: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub illuminance: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pressure: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub water_leak: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smoke: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tamper: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brightness: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hue: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saturation: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color_temp: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fan_speed: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_quality: Option<i32>,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    pub connection_state: Connectivity,
    pub connection_note: String,
}

impl StateUpdate {
    /// Value equality ignoring `timestamp` and `source`. Floats compare
    /// within [`FLOAT_EPSILON`].
    pub fn same_state(&self, other: &Self) -> bool {
        self.device_id == other.device_id
            && self.name == other.name
            && float_eq(self.temperature, other.temperature)
            && float_eq(self.humidity, other.humidity)
            && self.battery == other.battery
            && self.occupancy == other.occupancy
            && self.illuminance == other.illuminance
            && float_eq(self.pressure, other.pressure)
            && self.contact == other.contact
            && self.water_leak == other.water_leak
            && self.smoke == other.smoke
            && self.tamper == other.tamper
            && self.on == other.on
            && self.brightness == other.brightness
            && float_eq(self.hue, other.hue)
            && float_eq(self.saturation, other.saturation)
            && self.color_temp == other.color_temp
            && self.fan_speed == other.fan_speed
            && self.link_quality == other.link_quality
            && self.last_seen == other.last_seen
            && self.last_updated == other.last_updated
            && self.connection_state == other.connection_state
            && self.connection_note == other.connection_note
    }
}

fn float_eq(a: Option<f64>, b: Option<f64>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => (a - b).abs() < FLOAT_EPSILON,
        _ => false,
    }
}

// ── Commands ─────────────────────────────────────────────────────

/// Who asked for a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CommandSource {
    Homekit,
    Web,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CommandType {
    SetPower,
    SetBrightness,
    SetColor,
    SetColorTemp,
}

/// Observability record of a requested control action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEvent {
    pub timestamp: DateTime<Utc>,
    pub source: CommandSource,
    pub device_id: String,
    pub command_type: CommandType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on: Option<bool>,
    /// Percent scale.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brightness: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hue: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saturation: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color_temp: Option<i32>,
}

// ── Component lifecycle ──────────────────────────────────────────

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr, EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatusEvent {
    pub timestamp: DateTime<Utc>,
    pub component: String,
    pub status: ConnectionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub reconnects: u32,
}

impl ConnectionStatusEvent {
    pub fn new(component: impl Into<String>, status: ConnectionStatus) -> Self {
        Self {
            timestamp: Utc::now(),
            component: component.into(),
            status,
            error: None,
            reconnects: 0,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_reconnects(mut self, reconnects: u32) -> Self {
        self.reconnects = reconnects;
        self
    }
}

// ── Errors ───────────────────────────────────────────────────────

/// A per-device failure surfaced for observability only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub timestamp: DateTime<Utc>,
    pub device_id: String,
    pub error: String,
}
