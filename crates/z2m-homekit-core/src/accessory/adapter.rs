// ── Accessory adapter ──
//
// Builds one accessory per HomeKit-visible device, turns controller
// writes into queued commands, and applies state updates to the live
// characteristic values. Hooks only enqueue; bus I/O happens in the
// state manager.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{
    Accessory, AccessoryDescription, AccessoryInfo, Category, Characteristic,
    CharacteristicType, Service, ServiceType, Value, accessory_id,
};
use crate::codec::clamp_color_temperature;
use crate::command::{Command, CommandSender};
use crate::error::CoreError;
use crate::fabric::{EventFabric, FabricHandle, Role, Subscription};
use crate::model::{CommandEvent, CommandSource, CommandType, Device, DeviceType, StateUpdate};
use crate::registry::Registry;

const BRIDGE_MANUFACTURER: &str = "z2m-homekit";
const BRIDGE_MODEL: &str = "Bridge";
const BRIDGE_SERIAL: &str = "Z2MB001";
const DEVICE_MANUFACTURER: &str = "Zigbee2MQTT";

/// Below this battery percentage the low-battery flag is raised.
const LOW_BATTERY_THRESHOLD: i32 = 20;

// ── Counters ─────────────────────────────────────────────────────

#[derive(Default)]
struct Counters {
    incoming: AtomicU64,
    outgoing: AtomicU64,
    /// Unix seconds, 0 = never.
    last_activity: AtomicI64,
}

impl Counters {
    fn touch(&self) {
        self.last_activity
            .store(Utc::now().timestamp(), Ordering::Relaxed);
    }
}

/// Adapter activity counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessoryStats {
    pub incoming_commands: u64,
    pub outgoing_updates: u64,
    pub last_activity: Option<DateTime<Utc>>,
    pub dropped_commands: u64,
}

// ── Remote-update hooks ──────────────────────────────────────────

/// Everything a characteristic hook needs. Holds no reference back to
/// the adapter.
#[derive(Clone)]
struct HookContext {
    device_id: Arc<str>,
    commands: CommandSender,
    fabric: FabricHandle,
    counters: Arc<Counters>,
}

impl HookContext {
    fn dispatch(&self, command: Command, command_type: CommandType) {
        self.counters.incoming.fetch_add(1, Ordering::Relaxed);
        self.counters.touch();

        let event = CommandEvent {
            timestamp: Utc::now(),
            source: CommandSource::Homekit,
            device_id: command.device_id.clone(),
            command_type,
            on: command.on,
            brightness: command.brightness,
            hue: command.hue,
            saturation: command.saturation,
            color_temp: command.color_temp,
        };

        // A full queue is already logged and counted by the sender.
        if self.commands.try_enqueue(command).is_ok() {
            self.fabric.publish_command(&event);
        }
    }

    fn command(&self) -> Command {
        Command {
            device_id: self.device_id.to_string(),
            ..Command::default()
        }
    }
}

fn hook_power(ctx: &HookContext, characteristic: &Characteristic) {
    let ctx = ctx.clone();
    characteristic.on_remote_update(move |value| {
        let Some(on) = value.as_bool() else { return };
        info!(device_id = %ctx.device_id, on, "HomeKit power command received");
        ctx.dispatch(
            Command {
                on: Some(on),
                ..ctx.command()
            },
            CommandType::SetPower,
        );
    });
}

fn hook_brightness(ctx: &HookContext, characteristic: &Characteristic) {
    let ctx = ctx.clone();
    characteristic.on_remote_update(move |value| {
        let Some(brightness) = value.as_int() else { return };
        info!(device_id = %ctx.device_id, brightness, "HomeKit brightness command received");
        ctx.dispatch(
            Command {
                brightness: Some(brightness),
                ..ctx.command()
            },
            CommandType::SetBrightness,
        );
    });
}

/// Hue and saturation travel together; each hook pairs its new value
/// with the other characteristic's current one.
fn hook_color(ctx: &HookContext, hue: &Characteristic, saturation: &Characteristic) {
    let send = |ctx: &HookContext, hue: f64, saturation: f64| {
        ctx.dispatch(
            Command {
                hue: Some(hue),
                saturation: Some(saturation),
                ..ctx.command()
            },
            CommandType::SetColor,
        );
    };

    {
        let ctx = ctx.clone();
        let other = saturation.clone();
        hue.on_remote_update(move |value| {
            let Some(h) = value.as_float() else { return };
            let s = other.value().as_float().unwrap_or_default();
            info!(device_id = %ctx.device_id, hue = h, "HomeKit hue command received");
            send(&ctx, h, s);
        });
    }
    {
        let ctx = ctx.clone();
        let other = hue.clone();
        saturation.on_remote_update(move |value| {
            let Some(s) = value.as_float() else { return };
            let h = other.value().as_float().unwrap_or_default();
            info!(device_id = %ctx.device_id, saturation = s, "HomeKit saturation command received");
            send(&ctx, h, s);
        });
    }
}

fn hook_color_temp(ctx: &HookContext, characteristic: &Characteristic) {
    let ctx = ctx.clone();
    characteristic.on_remote_update(move |value| {
        let Some(mireds) = value.as_int() else { return };
        info!(device_id = %ctx.device_id, color_temp = mireds, "HomeKit color temp command received");
        ctx.dispatch(
            Command {
                color_temp: Some(mireds),
                ..ctx.command()
            },
            CommandType::SetColorTemp,
        );
    });
}

/// Fan speed rides on the brightness field of the command.
fn hook_rotation_speed(ctx: &HookContext, characteristic: &Characteristic) {
    let ctx = ctx.clone();
    characteristic.on_remote_update(move |value| {
        let Some(speed) = value.as_int() else { return };
        info!(device_id = %ctx.device_id, speed, "HomeKit fan speed command received");
        ctx.dispatch(
            Command {
                brightness: Some(speed),
                ..ctx.command()
            },
            CommandType::SetBrightness,
        );
    });
}

// ── Accessory construction ───────────────────────────────────────

fn battery_service() -> Service {
    Service::new(
        ServiceType::Battery,
        &[
            CharacteristicType::BatteryLevel,
            CharacteristicType::StatusLowBattery,
        ],
    )
}

/// Shape an accessory from the device type and feature flags, wiring
/// remote-update hooks for every writable characteristic.
fn build_accessory(device: &Device, ctx: &HookContext) -> Accessory {
    let info = AccessoryInfo {
        name: device.name.clone(),
        manufacturer: DEVICE_MANUFACTURER.into(),
        model: device.device_type.to_string(),
        serial_number: device.id.clone(),
    };
    let features = &device.features;
    let id = accessory_id(&device.id);

    // Sensors get their main services first, then battery if flagged.
    let sensor = |main: Vec<Service>| {
        let mut accessory = Accessory::new(id, Category::Sensor, info.clone());
        accessory.services = main;
        if features.battery {
            accessory.services.push(battery_service());
        }
        accessory
    };

    match device.device_type {
        DeviceType::ClimateSensor => {
            let mut main = Vec::new();
            if features.temperature {
                main.push(Service::new(
                    ServiceType::TemperatureSensor,
                    &[CharacteristicType::CurrentTemperature],
                ));
            }
            if features.humidity {
                main.push(Service::new(
                    ServiceType::HumiditySensor,
                    &[CharacteristicType::CurrentRelativeHumidity],
                ));
            }
            sensor(main)
        }
        DeviceType::OccupancySensor => sensor(vec![Service::new(
            ServiceType::OccupancySensor,
            &[CharacteristicType::OccupancyDetected],
        )]),
        DeviceType::ContactSensor => sensor(vec![Service::new(
            ServiceType::ContactSensor,
            &[CharacteristicType::ContactSensorState],
        )]),
        DeviceType::LeakSensor => sensor(vec![Service::new(
            ServiceType::LeakSensor,
            &[CharacteristicType::LeakDetected],
        )]),
        DeviceType::SmokeSensor => sensor(vec![Service::new(
            ServiceType::SmokeSensor,
            &[CharacteristicType::SmokeDetected],
        )]),
        DeviceType::Lightbulb => {
            let mut service = Service::new(ServiceType::Lightbulb, &[]);
            hook_power(ctx, &service.add(CharacteristicType::On));
            if features.brightness {
                hook_brightness(ctx, &service.add(CharacteristicType::Brightness));
            }
            if features.color {
                let hue = service.add(CharacteristicType::Hue);
                let saturation = service.add(CharacteristicType::Saturation);
                hook_color(ctx, &hue, &saturation);
            }
            if features.color_temperature {
                hook_color_temp(ctx, &service.add(CharacteristicType::ColorTemperature));
            }
            let mut accessory = Accessory::new(id, Category::Lightbulb, info);
            accessory.services.push(service);
            accessory
        }
        DeviceType::Outlet | DeviceType::Switch => {
            let mut service = Service::new(ServiceType::Outlet, &[]);
            hook_power(ctx, &service.add(CharacteristicType::On));
            let mut accessory = Accessory::new(id, Category::Outlet, info);
            accessory.services.push(service);
            accessory
        }
        DeviceType::Fan => {
            let mut service = Service::new(ServiceType::Fan, &[]);
            hook_power(ctx, &service.add(CharacteristicType::On));
            if features.speed {
                hook_rotation_speed(ctx, &service.add(CharacteristicType::RotationSpeed));
            }
            let mut accessory = Accessory::new(id, Category::Fan, info);
            accessory.services.push(service);
            accessory
        }
    }
}

/// Protocol value for one characteristic from a state update, or `None`
/// when the update does not carry the field.
fn protocol_value(kind: CharacteristicType, update: &StateUpdate) -> Option<Value> {
    let flag = |b: bool| Value::Int(i32::from(b));
    match kind {
        CharacteristicType::CurrentTemperature => update.temperature.map(Value::Float),
        CharacteristicType::CurrentRelativeHumidity => update.humidity.map(Value::Float),
        CharacteristicType::OccupancyDetected => update.occupancy.map(flag),
        CharacteristicType::BatteryLevel => update.battery.map(Value::Int),
        CharacteristicType::StatusLowBattery => {
            update.battery.map(|b| flag(b < LOW_BATTERY_THRESHOLD))
        }
        // Bus `true` means closed, which the protocol reports as 0.
        CharacteristicType::ContactSensorState => update.contact.map(|closed| flag(!closed)),
        CharacteristicType::LeakDetected => update.water_leak.map(flag),
        CharacteristicType::SmokeDetected => update.smoke.map(flag),
        CharacteristicType::On => update.on.map(Value::Bool),
        CharacteristicType::Brightness => update.brightness.map(Value::Int),
        CharacteristicType::Hue => update.hue.map(Value::Float),
        CharacteristicType::Saturation => update.saturation.map(Value::Float),
        CharacteristicType::ColorTemperature => update
            .color_temp
            .map(|ct| Value::Int(clamp_color_temperature(ct))),
        CharacteristicType::RotationSpeed => {
            update.fan_speed.map(|speed| Value::Float(f64::from(speed)))
        }
    }
}

// ── AccessoryAdapter ─────────────────────────────────────────────

/// Cheaply cloneable via `Arc<AdapterInner>`.
#[derive(Clone)]
pub struct AccessoryAdapter {
    inner: Arc<AdapterInner>,
}

struct AdapterInner {
    bridge: Accessory,
    accessories: IndexMap<String, Accessory>,
    commands: CommandSender,
    fabric: FabricHandle,
    counters: Arc<Counters>,
    state_updates: Mutex<Option<Subscription<StateUpdate>>>,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

/// Everything `/debug/hap` reports.
#[derive(Debug, Clone, Serialize)]
pub struct AdapterDebugInfo {
    pub stats: AccessoryStats,
    pub bridge: AccessoryDescription,
    pub accessories: Vec<AccessoryDescription>,
}

impl AccessoryAdapter {
    /// Create the bridge accessory and one accessory per HomeKit-visible
    /// device. Subscribes to state updates immediately so nothing
    /// published before [`start`](Self::start) is missed.
    pub fn new(
        registry: &Registry,
        bridge_name: &str,
        commands: CommandSender,
        fabric: &EventFabric,
    ) -> Self {
        let fabric = fabric.handle(Role::Accessory);
        let counters = Arc::new(Counters::default());

        let bridge = Accessory::new(
            1,
            Category::Bridge,
            AccessoryInfo {
                name: bridge_name.to_owned(),
                manufacturer: BRIDGE_MANUFACTURER.into(),
                model: BRIDGE_MODEL.into(),
                serial_number: BRIDGE_SERIAL.into(),
            },
        );

        let mut accessories = IndexMap::new();
        for device in registry.iter() {
            if !device.homekit {
                info!(device_id = %device.id, name = %device.name, "skipping device for HomeKit");
                continue;
            }
            let ctx = HookContext {
                device_id: Arc::from(device.id.as_str()),
                commands: commands.clone(),
                fabric: fabric.clone(),
                counters: Arc::clone(&counters),
            };
            let accessory = build_accessory(device, &ctx);
            info!(
                device_id = %device.id,
                name = %device.name,
                device_type = %device.device_type,
                id = accessory.id,
                "created HomeKit accessory"
            );
            accessories.insert(device.id.clone(), accessory);
        }

        let state_updates = fabric.subscribe_state_updates();

        Self {
            inner: Arc::new(AdapterInner {
                bridge,
                accessories,
                commands,
                fabric,
                counters,
                state_updates: Mutex::new(Some(state_updates)),
                cancel: CancellationToken::new(),
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Fail when no device is exposed to HomeKit.
    pub fn require_accessories(&self) -> Result<(), CoreError> {
        if self.inner.accessories.is_empty() {
            return Err(CoreError::NoAccessories);
        }
        Ok(())
    }

    pub fn bridge(&self) -> &Accessory {
        &self.inner.bridge
    }

    pub fn accessory(&self, device_id: &str) -> Option<&Accessory> {
        self.inner.accessories.get(device_id)
    }

    /// Bridge first, then devices in configuration order.
    pub fn accessories(&self) -> impl Iterator<Item = &Accessory> {
        std::iter::once(&self.inner.bridge).chain(self.inner.accessories.values())
    }

    /// Device accessories only.
    pub fn len(&self) -> usize {
        self.inner.accessories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.accessories.is_empty()
    }

    /// Write every carried field onto the device's characteristics.
    /// Returns `false` when the device has no accessory.
    pub fn apply_state_update(&self, update: &StateUpdate) -> bool {
        let Some(accessory) = self.inner.accessories.get(&update.device_id) else {
            debug!(device_id = %update.device_id, "no accessory for device");
            return false;
        };

        for characteristic in accessory.characteristics() {
            if let Some(value) = protocol_value(characteristic.kind(), update) {
                characteristic.set_value(value);
            }
        }

        self.inner.counters.outgoing.fetch_add(1, Ordering::Relaxed);
        self.inner.counters.touch();
        debug!(device_id = %update.device_id, "updated HomeKit state");
        true
    }

    pub fn stats(&self) -> AccessoryStats {
        let counters = &self.inner.counters;
        let last = counters.last_activity.load(Ordering::Relaxed);
        AccessoryStats {
            incoming_commands: counters.incoming.load(Ordering::Relaxed),
            outgoing_updates: counters.outgoing.load(Ordering::Relaxed),
            last_activity: (last > 0)
                .then(|| DateTime::from_timestamp(last, 0))
                .flatten(),
            dropped_commands: self.inner.commands.dropped(),
        }
    }

    pub fn debug_info(&self) -> AdapterDebugInfo {
        AdapterDebugInfo {
            stats: self.stats(),
            bridge: AccessoryDescription::of(&self.inner.bridge, None),
            accessories: self
                .inner
                .accessories
                .iter()
                .map(|(id, a)| AccessoryDescription::of(a, Some(id)))
                .collect(),
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Spawn the state-update worker. Calling it twice is a no-op.
    pub async fn start(&self) {
        if let Some(sub) = self.inner.state_updates.lock().await.take() {
            let task = tokio::spawn(state_update_task(self.clone(), sub));
            self.inner.task_handles.lock().await.push(task);
        }
    }

    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        self.inner.fabric.close();
        debug!("accessory adapter stopped");
    }
}

async fn state_update_task(adapter: AccessoryAdapter, mut sub: Subscription<StateUpdate>) {
    let cancel = adapter.inner.cancel.clone();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            update = sub.recv() => {
                let Some(update) = update else { break };
                adapter.apply_state_update(&update);
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::command::{self, CommandReceiver};
    use crate::manager::state_update;
    use crate::model::{DeviceState, UpdateSource};

    const DOC: &str = r#"{"devices": [
        {"id": "office", "name": "Office", "topic": "office", "type": "climate_sensor",
         "features": {"temperature": true, "humidity": true, "battery": true}},
        {"id": "door", "name": "Door", "topic": "door", "type": "contact_sensor"},
        {"id": "lamp", "name": "Lamp", "topic": "lamp", "type": "lightbulb",
         "features": {"brightness": true, "color": true, "color_temperature": true}},
        {"id": "plug", "name": "Plug", "topic": "plug", "type": "switch"},
        {"id": "fan", "name": "Fan", "topic": "fan", "type": "fan", "features": {"speed": true}},
        {"id": "hidden", "name": "Hidden", "topic": "hidden", "type": "outlet", "homekit": false},
    ]}"#;

    fn adapter() -> (AccessoryAdapter, CommandReceiver, EventFabric) {
        let fabric = EventFabric::new();
        let (tx, rx) = command::channel(10);
        let registry = Registry::load(DOC).unwrap();
        (AccessoryAdapter::new(&registry, "Test Bridge", tx, &fabric), rx, fabric)
    }

    fn update(device_id: &str, state: &DeviceState) -> StateUpdate {
        let registry = Registry::load(DOC).unwrap();
        state_update(
            registry.get(device_id).unwrap(),
            state,
            UpdateSource::Eventbus,
            Utc::now(),
        )
    }

    #[test]
    fn shapes_follow_type_and_features() {
        let (adapter, _rx, _fabric) = adapter();
        assert_eq!(adapter.len(), 5);
        assert!(adapter.accessory("hidden").is_none());
        assert!(adapter.require_accessories().is_ok());

        let office = adapter.accessory("office").unwrap();
        let kinds: Vec<_> = office.services.iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ServiceType::TemperatureSensor,
                ServiceType::HumiditySensor,
                ServiceType::Battery
            ]
        );
        assert_eq!(office.info.manufacturer, "Zigbee2MQTT");
        assert_eq!(office.info.model, "climate_sensor");
        assert_eq!(office.info.serial_number, "office");
        assert_eq!(office.id, accessory_id("office"));

        let door = adapter.accessory("door").unwrap();
        assert!(door.service(ServiceType::Battery).is_none());

        let lamp = adapter.accessory("lamp").unwrap();
        assert_eq!(lamp.characteristics().count(), 5);

        let plug = adapter.accessory("plug").unwrap();
        assert_eq!(plug.services[0].kind, ServiceType::Outlet);

        let fan = adapter.accessory("fan").unwrap();
        assert!(fan.characteristic(CharacteristicType::RotationSpeed).is_some());

        let bridge = adapter.bridge();
        assert_eq!(bridge.info.name, "Test Bridge");
        assert_eq!(bridge.info.serial_number, "Z2MB001");
        assert_eq!(adapter.accessories().count(), 6);
    }

    #[test]
    fn no_visible_devices_is_an_error() {
        let fabric = EventFabric::new();
        let (tx, _rx) = command::channel(1);
        let registry = Registry::load(
            r#"{"devices": [{"id": "x", "name": "X", "topic": "x", "type": "outlet", "homekit": false}]}"#,
        )
        .unwrap();
        let adapter = AccessoryAdapter::new(&registry, "Bridge", tx, &fabric);
        assert!(matches!(
            adapter.require_accessories(),
            Err(CoreError::NoAccessories)
        ));
    }

    #[test]
    fn applies_sensor_values_and_battery_flag() {
        let (adapter, _rx, _fabric) = adapter();
        assert!(adapter.apply_state_update(&update(
            "office",
            &DeviceState {
                temperature: Some(22.5),
                humidity: Some(58.4),
                battery: Some(15),
                ..DeviceState::default()
            }
        )));

        let office = adapter.accessory("office").unwrap();
        let value = |k| office.characteristic(k).unwrap().value();
        assert_eq!(value(CharacteristicType::CurrentTemperature), Value::Float(22.5));
        assert_eq!(value(CharacteristicType::CurrentRelativeHumidity), Value::Float(58.4));
        assert_eq!(value(CharacteristicType::BatteryLevel), Value::Int(15));
        assert_eq!(value(CharacteristicType::StatusLowBattery), Value::Int(1));
        assert_eq!(adapter.stats().outgoing_updates, 1);
        assert!(adapter.stats().last_activity.is_some());
    }

    #[test]
    fn contact_closed_reports_zero() {
        let (adapter, _rx, _fabric) = adapter();
        let door = adapter.accessory("door").unwrap();
        let state = door.characteristic(CharacteristicType::ContactSensorState).unwrap();

        adapter.apply_state_update(&update(
            "door",
            &DeviceState {
                contact: Some(true),
                ..DeviceState::default()
            },
        ));
        assert_eq!(state.value(), Value::Int(0));

        adapter.apply_state_update(&update(
            "door",
            &DeviceState {
                contact: Some(false),
                ..DeviceState::default()
            },
        ));
        assert_eq!(state.value(), Value::Int(1));
    }

    #[test]
    fn absent_fields_leave_values_alone() {
        let (adapter, _rx, _fabric) = adapter();
        let lamp = adapter.accessory("lamp").unwrap();
        adapter.apply_state_update(&update(
            "lamp",
            &DeviceState {
                on: Some(true),
                brightness: Some(254),
                color_temp: Some(600),
                ..DeviceState::default()
            },
        ));
        adapter.apply_state_update(&update("lamp", &DeviceState::default()));

        let value = |k| lamp.characteristic(k).unwrap().value();
        assert_eq!(value(CharacteristicType::On), Value::Bool(true));
        assert_eq!(value(CharacteristicType::Brightness), Value::Int(100));
        assert_eq!(value(CharacteristicType::ColorTemperature), Value::Int(500));
    }

    #[test]
    fn unknown_device_is_ignored() {
        let (adapter, _rx, _fabric) = adapter();
        assert!(!adapter.apply_state_update(&update("hidden", &DeviceState::default())));
        assert_eq!(adapter.stats().outgoing_updates, 0);
    }

    #[tokio::test]
    async fn remote_updates_enqueue_commands() {
        let (adapter, mut rx, fabric) = adapter();
        let mut events = fabric.handle(Role::Metrics).subscribe_commands();
        let lamp = adapter.accessory("lamp").unwrap();

        lamp.characteristic(CharacteristicType::Brightness)
            .unwrap()
            .remote_update(Value::Int(75));
        assert_eq!(rx.recv().await.unwrap(), Command::brightness("lamp", 75));

        let event = events.recv().await.unwrap();
        assert_eq!(event.source, CommandSource::Homekit);
        assert_eq!(event.command_type, CommandType::SetBrightness);
        assert_eq!(event.brightness, Some(75));
        assert_eq!(adapter.stats().incoming_commands, 1);
    }

    #[tokio::test]
    async fn hue_carries_current_saturation() {
        let (adapter, mut rx, _fabric) = adapter();
        let lamp = adapter.accessory("lamp").unwrap();
        lamp.characteristic(CharacteristicType::Saturation)
            .unwrap()
            .set_value(Value::Float(80.0));

        lamp.characteristic(CharacteristicType::Hue)
            .unwrap()
            .remote_update(Value::Float(120.0));
        assert_eq!(rx.recv().await.unwrap(), Command::color("lamp", 120.0, 80.0));

        lamp.characteristic(CharacteristicType::Saturation)
            .unwrap()
            .remote_update(Value::Float(40.0));
        assert_eq!(rx.recv().await.unwrap(), Command::color("lamp", 120.0, 40.0));
    }

    #[tokio::test]
    async fn fan_speed_uses_brightness_field() {
        let (adapter, mut rx, _fabric) = adapter();
        adapter
            .accessory("fan")
            .unwrap()
            .characteristic(CharacteristicType::RotationSpeed)
            .unwrap()
            .remote_update(Value::Float(66.0));
        assert_eq!(rx.recv().await.unwrap(), Command::brightness("fan", 66));
    }

    #[test]
    fn full_queue_drops_without_blocking() {
        let fabric = EventFabric::new();
        let (tx, _rx) = command::channel(1);
        let registry = Registry::load(DOC).unwrap();
        let adapter = AccessoryAdapter::new(&registry, "Bridge", tx, &fabric);
        let on = adapter
            .accessory("plug")
            .unwrap()
            .characteristic(CharacteristicType::On)
            .unwrap();

        on.remote_update(Value::Bool(true));
        on.remote_update(Value::Bool(false));

        let stats = adapter.stats();
        assert_eq!(stats.incoming_commands, 2);
        assert_eq!(stats.dropped_commands, 1);
    }

    #[tokio::test]
    async fn worker_applies_published_updates() {
        let (adapter, _rx, fabric) = adapter();
        adapter.start().await;

        fabric
            .handle(Role::StateManager)
            .publish_state_update(&update(
                "plug",
                &DeviceState {
                    on: Some(true),
                    ..DeviceState::default()
                },
            ));

        let on = adapter
            .accessory("plug")
            .unwrap()
            .characteristic(CharacteristicType::On)
            .unwrap()
            .clone();
        for _ in 0..100 {
            if on.value() == Value::Bool(true) {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(on.value(), Value::Bool(true));
        adapter.shutdown().await;
    }

    #[test]
    fn debug_info_lists_values() {
        let (adapter, _rx, _fabric) = adapter();
        let info = adapter.debug_info();
        assert_eq!(info.accessories.len(), 5);
        assert_eq!(info.bridge.info.model, "Bridge");
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["accessories"][0]["device_id"], "office");
    }
}
