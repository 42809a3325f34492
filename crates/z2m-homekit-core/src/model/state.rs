// ── Runtime device state ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Sparse per-device state. A field is `Some` only once a bus message
/// has supplied it; partial updates never reset a field to `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    // Sensors
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub battery: Option<i32>,
    pub occupancy: Option<bool>,
    pub illuminance: Option<i32>,
    pub pressure: Option<f64>,
    /// `true` = closed, `false` = open (bus convention).
    pub contact: Option<bool>,
    pub water_leak: Option<bool>,
    pub smoke: Option<bool>,
    pub tamper: Option<bool>,

    // Lights
    pub on: Option<bool>,
    /// Bus scale, 0–254.
    pub brightness: Option<i32>,
    pub hue: Option<f64>,
    pub saturation: Option<f64>,
    /// Mireds.
    pub color_temp: Option<i32>,

    // Fans
    /// Percent, 0–100.
    pub fan_speed: Option<i32>,

    // Connectivity
    pub link_quality: Option<i32>,
    pub last_seen: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Names a single [`DeviceState`] field for selective merges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
pub enum StateField {
    Temperature,
    Humidity,
    Battery,
    Occupancy,
    Illuminance,
    Pressure,
    Contact,
    WaterLeak,
    Smoke,
    Tamper,
    On,
    Brightness,
    Hue,
    Saturation,
    ColorTemp,
    FanSpeed,
    LinkQuality,
    LastSeen,
    LastUpdated,
}

impl DeviceState {
    /// Overwrite exactly one field with the value carried by `source`.
    pub fn merge_field(&mut self, source: &DeviceState, field: StateField) {
        match field {
            StateField::Temperature => self.temperature = source.temperature,
            StateField::Humidity => self.humidity = source.humidity,
            StateField::Battery => self.battery = source.battery,
            StateField::Occupancy => self.occupancy = source.occupancy,
            StateField::Illuminance => self.illuminance = source.illuminance,
            StateField::Pressure => self.pressure = source.pressure,
            StateField::Contact => self.contact = source.contact,
            StateField::WaterLeak => self.water_leak = source.water_leak,
            StateField::Smoke => self.smoke = source.smoke,
            StateField::Tamper => self.tamper = source.tamper,
            StateField::On => self.on = source.on,
            StateField::Brightness => self.brightness = source.brightness,
            StateField::Hue => self.hue = source.hue,
            StateField::Saturation => self.saturation = source.saturation,
            StateField::ColorTemp => self.color_temp = source.color_temp,
            StateField::FanSpeed => self.fan_speed = source.fan_speed,
            StateField::LinkQuality => self.link_quality = source.link_quality,
            StateField::LastSeen => self.last_seen = source.last_seen,
            StateField::LastUpdated => self.last_updated = source.last_updated,
        }
    }

    /// Apply every named field from `source`, in order.
    pub fn merge_fields(&mut self, source: &DeviceState, fields: &[StateField]) {
        for field in fields {
            self.merge_field(source, *field);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn merge_touches_only_named_fields() {
        let mut stored = DeviceState {
            temperature: Some(20.0),
            ..DeviceState::default()
        };
        let candidate = DeviceState {
            temperature: Some(99.0),
            humidity: Some(55.0),
            ..DeviceState::default()
        };

        stored.merge_fields(&candidate, &[StateField::Humidity]);

        assert_eq!(stored.temperature, Some(20.0));
        assert_eq!(stored.humidity, Some(55.0));
    }

    #[test]
    fn merge_can_clear_a_field_when_named() {
        let mut stored = DeviceState {
            on: Some(true),
            ..DeviceState::default()
        };
        stored.merge_field(&DeviceState::default(), StateField::On);
        assert_eq!(stored.on, None);
    }

    #[test]
    fn field_names_parse() {
        assert_eq!(StateField::from_str("WaterLeak").unwrap(), StateField::WaterLeak);
        assert_eq!(StateField::ColorTemp.to_string(), "ColorTemp");
    }
}
