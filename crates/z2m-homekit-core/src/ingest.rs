// ── Bus ingestion ──
//
// Turns inbound zigbee2mqtt publishes into `StateChanged` events. Parsing
// is permissive: a key with an unexpected type counts as absent, and only
// a payload that is not a JSON object is dropped whole.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::codec::power_word_to_bool;
use crate::fabric::FabricHandle;
use crate::model::{DeviceState, StateChanged, StateField};
use crate::registry::Registry;

/// Device namespace on the bus.
pub const TOPIC_PREFIX: &str = "zigbee2mqtt/";
/// Bridge-internal namespace, never device telemetry.
pub const BRIDGE_PREFIX: &str = "zigbee2mqtt/bridge/";

/// Wildcard covering every device topic.
pub const SUBSCRIBE_FILTER: &str = "zigbee2mqtt/#";

/// Routing key for a device-telemetry topic, or `None` when the topic
/// is outside the namespace, bridge-internal, or a command echo.
pub fn device_topic(topic: &str) -> Option<&str> {
    if topic.starts_with(BRIDGE_PREFIX) {
        return None;
    }
    if topic.ends_with("/set") || topic.ends_with("/get") {
        return None;
    }
    topic.strip_prefix(TOPIC_PREFIX)
}

/// Command topic for a routing key.
pub fn command_topic(routing_key: &str) -> String {
    format!("{TOPIC_PREFIX}{routing_key}/set")
}

/// Speed percentage for a `fan_mode` word. Unrecognized modes map to the
/// midpoint.
pub fn fan_mode_to_speed(mode: &str) -> i32 {
    match mode {
        "off" => 0,
        "low" => 33,
        "medium" => 66,
        "high" => 100,
        _ => 50,
    }
}

/// Decode a telemetry payload into a candidate state and the fields it
/// carried. `LastSeen` and `LastUpdated` are always included and stamped
/// with `now`.
pub fn parse_payload(
    payload: &[u8],
    now: DateTime<Utc>,
) -> Result<(DeviceState, Vec<StateField>), serde_json::Error> {
    let msg: Map<String, Value> = serde_json::from_slice(payload)?;
    let mut state = DeviceState {
        last_seen: Some(now),
        last_updated: Some(now),
        ..DeviceState::default()
    };
    let mut fields = Vec::new();

    let float = |key: &str| msg.get(key).and_then(Value::as_f64);
    #[allow(clippy::cast_possible_truncation)]
    let int = |key: &str| float(key).map(|v| v as i32);
    let flag = |key: &str| msg.get(key).and_then(Value::as_bool);
    let word = |key: &str| msg.get(key).and_then(Value::as_str);

    let mut set = |field: StateField, present: bool| {
        if present {
            fields.push(field);
        }
    };

    // Sensors
    state.link_quality = int("linkquality");
    set(StateField::LinkQuality, state.link_quality.is_some());
    state.temperature = float("temperature");
    set(StateField::Temperature, state.temperature.is_some());
    state.humidity = float("humidity");
    set(StateField::Humidity, state.humidity.is_some());
    state.battery = int("battery");
    set(StateField::Battery, state.battery.is_some());
    state.occupancy = flag("occupancy");
    set(StateField::Occupancy, state.occupancy.is_some());

    // `illuminance_lux` wins when both are present.
    if let Some(lux) = int("illuminance") {
        state.illuminance = Some(lux);
        set(StateField::Illuminance, true);
    }
    if let Some(lux) = int("illuminance_lux") {
        state.illuminance = Some(lux);
        set(StateField::Illuminance, true);
    }

    state.pressure = float("pressure");
    set(StateField::Pressure, state.pressure.is_some());
    state.contact = flag("contact");
    set(StateField::Contact, state.contact.is_some());
    state.water_leak = flag("water_leak");
    set(StateField::WaterLeak, state.water_leak.is_some());
    state.smoke = flag("smoke");
    set(StateField::Smoke, state.smoke.is_some());
    state.tamper = flag("tamper");
    set(StateField::Tamper, state.tamper.is_some());

    // Lights
    if let Some(power) = word("state") {
        state.on = Some(power_word_to_bool(power));
        set(StateField::On, true);
    }
    state.brightness = int("brightness");
    set(StateField::Brightness, state.brightness.is_some());
    state.color_temp = int("color_temp");
    set(StateField::ColorTemp, state.color_temp.is_some());
    if let Some(color) = msg.get("color").and_then(Value::as_object) {
        state.hue = color.get("hue").and_then(Value::as_f64);
        set(StateField::Hue, state.hue.is_some());
        state.saturation = color.get("saturation").and_then(Value::as_f64);
        set(StateField::Saturation, state.saturation.is_some());
    }

    // Fans
    if let Some(power) = word("fan_state") {
        state.on = Some(power_word_to_bool(power));
        set(StateField::On, true);
    }
    if let Some(speed) = int("fan_speed") {
        state.fan_speed = Some(speed);
        set(StateField::FanSpeed, true);
    }
    if let Some(mode) = word("fan_mode") {
        state.fan_speed = Some(fan_mode_to_speed(mode));
        set(StateField::FanSpeed, true);
    }

    set(StateField::LastSeen, true);
    set(StateField::LastUpdated, true);

    Ok((state, fields))
}

/// Inbound hook for the bus transport.
#[derive(Clone)]
pub struct BusIngestion {
    registry: Registry,
    fabric: FabricHandle,
}

impl BusIngestion {
    pub fn new(registry: Registry, fabric: FabricHandle) -> Self {
        Self { registry, fabric }
    }

    /// Handle one inbound publish. Never blocks and never fails; rejected
    /// messages are logged at debug. Returns whether an event was emitted.
    pub fn handle(&self, topic: &str, payload: &[u8]) -> bool {
        let Some(routing_key) = device_topic(topic) else {
            return false;
        };

        let Some(device) = self.registry.by_topic(routing_key) else {
            debug!(topic = routing_key, "message for unknown device");
            return false;
        };

        let (state, fields) = match parse_payload(payload, Utc::now()) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!(topic, error = %e, "failed to parse bus payload");
                return false;
            }
        };

        if let Some(on) = state.on {
            info!(device_id = %device.id, on, "device power state reported");
        }
        debug!(device_id = %device.id, ?fields, "publishing state change");

        self.fabric.publish_state_changed(&StateChanged {
            device_id: device.id.clone(),
            state,
            fields,
        });
        true
    }
}
