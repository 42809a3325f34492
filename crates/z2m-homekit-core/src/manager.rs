// ── Device state manager ──
//
// Owns the authoritative state store. Merges parsed bus telemetry,
// broadcasts post-merge state updates, and translates queued commands
// into bus publishes. Bus I/O always happens after the store lock is
// released.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::codec::{bool_to_power_word, bus_brightness_to_percent, percent_brightness_to_bus};
use crate::command::{Command, CommandReceiver};
use crate::error::CoreError;
use crate::fabric::{EventFabric, FabricHandle, Role, Subscription};
use crate::ingest::command_topic;
use crate::model::{
    Connectivity, Device, DeviceState, ErrorEvent, StateChanged, StateUpdate, UpdateSource,
};
use crate::registry::Registry;
use crate::store::StateStore;
use crate::transport::BusTransport;

/// A device together with a copy of its current state.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceEntry {
    pub device: Arc<Device>,
    pub state: DeviceState,
}

/// Build the broadcast view of one device. Brightness moves to the
/// percent scale here.
pub fn state_update(
    device: &Device,
    state: &DeviceState,
    source: UpdateSource,
    now: DateTime<Utc>,
) -> StateUpdate {
    let (connection_state, connection_note) = Connectivity::classify(state.last_seen, now);
    StateUpdate {
        timestamp: now,
        source,
        device_id: device.id.clone(),
        name: device.name.clone(),
        temperature: state.temperature,
        humidity: state.humidity,
        battery: state.battery,
        occupancy: state.occupancy,
        illuminance: state.illuminance,
        pressure: state.pressure,
        contact: state.contact,
        water_leak: state.water_leak,
        smoke: state.smoke,
        tamper: state.tamper,
        on: state.on,
        brightness: state.brightness.map(bus_brightness_to_percent),
        hue: state.hue,
        saturation: state.saturation,
        color_temp: state.color_temp,
        fan_speed: state.fan_speed,
        link_quality: state.link_quality,
        last_seen: state.last_seen,
        last_updated: state.last_updated,
        connection_state,
        connection_note,
    }
}

// ── StateManager ─────────────────────────────────────────────────

/// Cheaply cloneable via `Arc<ManagerInner>`.
#[derive(Clone)]
pub struct StateManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    registry: Registry,
    store: StateStore,
    transport: Arc<dyn BusTransport>,
    fabric: FabricHandle,
    state_changed: Mutex<Option<Subscription<StateChanged>>>,
    command_rx: Mutex<Option<CommandReceiver>>,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl StateManager {
    /// Seed an empty state for every registered device and subscribe to
    /// bus state changes. Nothing is broadcast until
    /// [`initialize`](Self::initialize).
    pub fn new(
        registry: Registry,
        fabric: &EventFabric,
        transport: Arc<dyn BusTransport>,
        command_rx: CommandReceiver,
    ) -> Self {
        let store = StateStore::new();
        for device in registry.iter() {
            store.seed(&device.id);
            debug!(device_id = %device.id, topic = %device.topic, "device registered");
        }

        let fabric = fabric.handle(Role::StateManager);
        let state_changed = fabric.subscribe_state_changed();

        Self {
            inner: Arc::new(ManagerInner {
                registry,
                store,
                transport,
                fabric,
                state_changed: Mutex::new(Some(state_changed)),
                command_rx: Mutex::new(Some(command_rx)),
                cancel: CancellationToken::new(),
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Broadcast one `initial` state update per device so subscribers
    /// start from a defined point.
    pub fn initialize(&self) {
        let now = Utc::now();
        for device in self.inner.registry.iter() {
            let state = self.inner.store.get(&device.id).unwrap_or_default();
            self.inner
                .fabric
                .publish_state_update(&state_update(device, &state, UpdateSource::Initial, now));
        }
        info!(devices = self.inner.registry.len(), "device states initialized");
    }

    // ── Merge ────────────────────────────────────────────────────────

    /// Selectively merge a bus state change and broadcast the result.
    pub fn merge_state_changed(&self, event: &StateChanged) -> Result<StateUpdate, CoreError> {
        let unknown = || {
            warn!(device_id = %event.device_id, "state change for unknown device");
            CoreError::UnknownDevice {
                id: event.device_id.clone(),
            }
        };
        let device = self.inner.registry.get(&event.device_id).ok_or_else(unknown)?;

        let now = Utc::now();
        let merged = self
            .inner
            .store
            .merge(&device.id, &event.state, &event.fields, now)
            .ok_or_else(unknown)?;

        let update = state_update(device, &merged, UpdateSource::Eventbus, now);
        self.inner.fabric.publish_state_update(&update);
        Ok(update)
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Translate a command into bus publishes. Every set part is handled
    /// independently; failures are logged and reported on the fabric.
    pub fn process_command(&self, cmd: &Command) {
        let Some(device) = self.inner.registry.get(&cmd.device_id) else {
            warn!(device_id = %cmd.device_id, "command for unknown device");
            return;
        };
        let topic = command_topic(&device.topic);

        if let Some(on) = cmd.on {
            info!(device_id = %device.id, %topic, on, "sending power command");
            self.send(device, &topic, &json!({ "state": bool_to_power_word(on) }), "power");
        }
        if let Some(percent) = cmd.brightness {
            let bus = percent_brightness_to_bus(percent);
            info!(
                device_id = %device.id,
                %topic,
                brightness_percent = percent,
                brightness_bus = bus,
                "sending brightness command"
            );
            self.send(device, &topic, &json!({ "brightness": bus }), "brightness");
        }
        if let (Some(hue), Some(saturation)) = (cmd.hue, cmd.saturation) {
            info!(device_id = %device.id, %topic, hue, saturation, "sending color command");
            self.send(
                device,
                &topic,
                &json!({ "color": { "hue": hue, "saturation": saturation } }),
                "color",
            );
        }
        if let Some(mireds) = cmd.color_temp {
            info!(device_id = %device.id, %topic, color_temp = mireds, "sending color temp command");
            self.send(device, &topic, &json!({ "color_temp": mireds }), "color temp");
        }
    }

    fn send(&self, device: &Device, topic: &str, payload: &serde_json::Value, kind: &str) {
        let bytes = payload.to_string();
        if let Err(e) = self.inner.transport.publish(topic, bytes.as_bytes()) {
            error!(device_id = %device.id, %topic, error = %e, "failed to publish {kind} command");
            self.inner.fabric.publish_error(&ErrorEvent {
                timestamp: Utc::now(),
                device_id: device.id.clone(),
                error: format!("failed to publish {kind} command: {e}"),
            });
        }
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// Every device with a copy of its state, in configuration order.
    /// Taken under one read guard.
    pub fn snapshot(&self) -> IndexMap<String, DeviceEntry> {
        let states = self.inner.store.snapshot();
        self.inner
            .registry
            .iter()
            .map(|device| {
                let state = states.get(&device.id).cloned().unwrap_or_default();
                (
                    device.id.clone(),
                    DeviceEntry {
                        device: Arc::clone(device),
                        state,
                    },
                )
            })
            .collect()
    }

    pub fn device(&self, id: &str) -> Option<DeviceEntry> {
        let device = self.inner.registry.get(id)?;
        Some(DeviceEntry {
            device: Arc::clone(device),
            state: self.inner.store.get(id).unwrap_or_default(),
        })
    }

    pub fn lookup_by_routing_key(&self, routing_key: &str) -> Option<Arc<Device>> {
        self.inner.registry.by_topic(routing_key).cloned()
    }

    /// Current broadcast view of every device.
    pub fn state_updates(&self) -> Vec<StateUpdate> {
        let now = Utc::now();
        self.snapshot()
            .values()
            .map(|entry| state_update(&entry.device, &entry.state, UpdateSource::Eventbus, now))
            .collect()
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Spawn the state-change merger and the command processor.
    /// Calling it twice is a no-op.
    pub async fn start(&self) {
        let mut handles = self.inner.task_handles.lock().await;

        if let Some(sub) = self.inner.state_changed.lock().await.take() {
            handles.push(tokio::spawn(state_changed_task(self.clone(), sub)));
        }
        if let Some(rx) = self.inner.command_rx.lock().await.take() {
            handles.push(tokio::spawn(command_processor_task(self.clone(), rx)));
        }
    }

    /// Cancel the workers, wait for them and close this manager's fabric
    /// handle.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        self.inner.fabric.close();
        debug!("state manager stopped");
    }
}

// ── Background tasks ─────────────────────────────────────────────

async fn state_changed_task(manager: StateManager, mut sub: Subscription<StateChanged>) {
    let cancel = manager.inner.cancel.clone();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = sub.recv() => {
                let Some(event) = event else { break };
                // Unknown devices are already logged by the merge.
                let _ = manager.merge_state_changed(&event);
            }
        }
    }
}

async fn command_processor_task(manager: StateManager, mut rx: CommandReceiver) {
    let cancel = manager.inner.cancel.clone();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            cmd = rx.recv() => {
                let Some(cmd) = cmd else { break };
                manager.process_command(&cmd);
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::command;
    use crate::model::StateField;
    use crate::transport::memory::RecordingTransport;

    const DOC: &str = r#"{"devices": [
        {"id": "office", "name": "Office", "topic": "office_sensor", "type": "climate_sensor",
         "features": {"temperature": true, "humidity": true}},
        {"id": "lamp", "name": "Lamp", "topic": "desk_lamp", "type": "lightbulb",
         "features": {"brightness": true, "color": true, "color_temperature": true}},
    ]}"#;

    fn manager(transport: Arc<RecordingTransport>) -> (StateManager, EventFabric) {
        let fabric = EventFabric::new();
        let (_tx, rx) = command::channel(4);
        let manager = StateManager::new(Registry::load(DOC).unwrap(), &fabric, transport, rx);
        (manager, fabric)
    }

    #[tokio::test]
    async fn initialize_emits_one_initial_update_per_device() {
        let (manager, fabric) = manager(Arc::default());
        let mut sub = fabric.handle(Role::Web).subscribe_state_updates();
        manager.initialize();

        let first = sub.recv().await.unwrap();
        let second = sub.recv().await.unwrap();
        assert_eq!(first.device_id, "office");
        assert_eq!(second.device_id, "lamp");
        assert_eq!(first.source, UpdateSource::Initial);
        assert_eq!(first.connection_state, Connectivity::Disconnected);
        assert_eq!(first.connection_note, "Never seen");
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn merge_is_selective_and_broadcast() {
        let (manager, fabric) = manager(Arc::default());
        let mut sub = fabric.handle(Role::Accessory).subscribe_state_updates();

        manager
            .merge_state_changed(&StateChanged {
                device_id: "office".into(),
                state: DeviceState {
                    temperature: Some(20.0),
                    ..DeviceState::default()
                },
                fields: vec![StateField::Temperature],
            })
            .unwrap();
        let update = manager
            .merge_state_changed(&StateChanged {
                device_id: "office".into(),
                state: DeviceState {
                    temperature: Some(99.0),
                    humidity: Some(55.0),
                    ..DeviceState::default()
                },
                fields: vec![StateField::Humidity],
            })
            .unwrap();

        assert_eq!(update.temperature, Some(20.0));
        assert_eq!(update.humidity, Some(55.0));
        assert_eq!(update.source, UpdateSource::Eventbus);
        assert!(update.last_updated.is_some());

        assert_eq!(sub.recv().await.unwrap().temperature, Some(20.0));
        assert_eq!(sub.recv().await.unwrap().humidity, Some(55.0));
    }

    #[tokio::test]
    async fn brightness_broadcast_in_percent() {
        let (manager, _fabric) = manager(Arc::default());
        let update = manager
            .merge_state_changed(&StateChanged {
                device_id: "lamp".into(),
                state: DeviceState {
                    brightness: Some(254),
                    ..DeviceState::default()
                },
                fields: vec![StateField::Brightness],
            })
            .unwrap();
        assert_eq!(update.brightness, Some(100));
        assert_eq!(manager.device("lamp").unwrap().state.brightness, Some(254));
    }

    #[test]
    fn unknown_device_is_not_fatal() {
        let (manager, _fabric) = manager(Arc::default());
        let before = manager.snapshot();
        let err = manager
            .merge_state_changed(&StateChanged {
                device_id: "ghost".into(),
                state: DeviceState::default(),
                fields: vec![StateField::Temperature],
            })
            .unwrap_err();
        assert!(matches!(err, CoreError::UnknownDevice { .. }));
        assert_eq!(before.len(), manager.snapshot().len());
        assert!(manager.device("ghost").is_none());
    }

    #[test]
    fn commands_translate_to_bus_payloads() {
        let transport = Arc::new(RecordingTransport::default());
        let (manager, _fabric) = manager(Arc::clone(&transport));

        manager.process_command(&Command::brightness("lamp", 75));
        manager.process_command(&Command::power("lamp", true));
        manager.process_command(&Command::color("lamp", 120.0, 80.0));
        manager.process_command(&Command::color_temp("lamp", 300));
        manager.process_command(&Command {
            device_id: "lamp".into(),
            hue: Some(10.0),
            ..Command::default()
        });

        let published = transport.taken();
        let topics: Vec<_> = published.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(topics, vec!["zigbee2mqtt/desk_lamp/set"; 4]);
        let payloads: Vec<serde_json::Value> = published
            .iter()
            .map(|(_, p)| serde_json::from_str(p).unwrap())
            .collect();
        assert_eq!(
            payloads,
            vec![
                json!({"brightness": 190}),
                json!({"state": "ON"}),
                json!({"color": {"hue": 120.0, "saturation": 80.0}}),
                json!({"color_temp": 300}),
            ]
        );
    }

    #[test]
    fn multi_part_commands_are_handled_independently() {
        let transport = Arc::new(RecordingTransport::default());
        let (manager, _fabric) = manager(Arc::clone(&transport));
        manager.process_command(&Command {
            device_id: "lamp".into(),
            on: Some(false),
            brightness: Some(0),
            ..Command::default()
        });
        assert_eq!(transport.taken().len(), 2);
    }

    #[tokio::test]
    async fn publish_failure_emits_error_event() {
        let transport = Arc::new(RecordingTransport::failing());
        let (manager, fabric) = manager(transport);
        let mut errors = fabric.handle(Role::Metrics).subscribe_errors();

        manager.process_command(&Command::power("lamp", true));

        let event = errors.recv().await.unwrap();
        assert_eq!(event.device_id, "lamp");
        assert!(event.error.contains("power"));
    }

    #[test]
    fn snapshot_and_lookups() {
        let (manager, _fabric) = manager(Arc::default());
        let snapshot = manager.snapshot();
        assert_eq!(snapshot.keys().collect::<Vec<_>>(), vec!["office", "lamp"]);
        assert_eq!(snapshot["lamp"].state, DeviceState::default());
        assert_eq!(manager.lookup_by_routing_key("desk_lamp").unwrap().id, "lamp");
        assert!(manager.lookup_by_routing_key("lamp").is_none());
    }

    #[tokio::test]
    async fn workers_drain_queues_and_stop() {
        let transport = Arc::new(RecordingTransport::default());
        let fabric = EventFabric::new();
        let (tx, rx) = command::channel(4);
        let manager =
            StateManager::new(Registry::load(DOC).unwrap(), &fabric, Arc::clone(&transport) as _, rx);
        let mut updates = fabric.handle(Role::Web).subscribe_state_updates();
        manager.start().await;

        fabric.handle(Role::Bus).publish_state_changed(&StateChanged {
            device_id: "office".into(),
            state: DeviceState {
                temperature: Some(18.5),
                ..DeviceState::default()
            },
            fields: vec![StateField::Temperature],
        });
        assert_eq!(updates.recv().await.unwrap().temperature, Some(18.5));

        tx.enqueue(Command::power("lamp", true)).await.unwrap();
        for _ in 0..100 {
            if !transport.published.lock().unwrap().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(transport.taken().len(), 1);

        manager.shutdown().await;
    }
}
