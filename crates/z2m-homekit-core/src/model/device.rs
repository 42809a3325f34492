// ── Device domain types ──

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Closed set of supported device kinds. Wire names are snake_case.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeviceType {
    ClimateSensor,
    OccupancySensor,
    ContactSensor,
    LeakSensor,
    SmokeSensor,
    Lightbulb,
    Outlet,
    Switch,
    Fan,
}

impl DeviceType {
    pub fn is_sensor(self) -> bool {
        matches!(
            self,
            Self::ClimateSensor
                | Self::OccupancySensor
                | Self::ContactSensor
                | Self::LeakSensor
                | Self::SmokeSensor
        )
    }

    /// Whether the device accepts power commands.
    pub fn is_switchable(self) -> bool {
        matches!(self, Self::Lightbulb | Self::Outlet | Self::Switch | Self::Fan)
    }
}

/// Optional sub-capabilities declared per device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[allow(clippy::struct_excessive_bools)]
pub struct Features {
    // Sensors
    pub temperature: bool,
    pub humidity: bool,
    pub battery: bool,
    pub occupancy: bool,
    pub illuminance: bool,
    pub pressure: bool,
    pub contact: bool,
    pub water_leak: bool,
    pub smoke: bool,
    pub tamper: bool,

    // Lights
    pub brightness: bool,
    pub color: bool,
    pub color_temperature: bool,

    // Fans
    pub speed: bool,
    pub direction: bool,
    pub swing: bool,
}

/// A configured device. Immutable once the registry is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub name: String,
    /// Topic suffix under the zigbee2mqtt namespace.
    pub topic: String,
    #[serde(rename = "type")]
    pub device_type: DeviceType,
    #[serde(default)]
    pub features: Features,
    /// Exposed as a HomeKit accessory.
    pub homekit: bool,
    /// Exposed to the web UI and push channel.
    pub web: bool,
}
