// ── Event fabric ──
//
// Typed publish/subscribe between components. Each component obtains a
// handle bound to its role; publishing and subscribing go through that
// handle. Delivery is at-least-once per subscriber and ordered per
// publisher. State updates are deduplicated per device before fan-out.

mod subscription;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use strum::{AsRefStr, Display, EnumIter, IntoEnumIterator};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::model::{CommandEvent, ConnectionStatusEvent, ErrorEvent, StateChanged, StateUpdate};

use self::subscription::Topic;
pub use self::subscription::{Subscription, SubscriptionStream};

/// Component roles that hold fabric handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, AsRefStr, EnumIter)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Role {
    StateManager,
    Accessory,
    Web,
    Bus,
    Metrics,
}

struct FabricInner {
    state_changed: Topic<StateChanged>,
    state_updates: Topic<StateUpdate>,
    commands: Topic<CommandEvent>,
    connection_status: Topic<ConnectionStatusEvent>,
    errors: Topic<ErrorEvent>,
    /// Last state update actually forwarded, per device.
    last_forwarded: DashMap<String, StateUpdate>,
    next_handle: AtomicU64,
    published: AtomicU64,
    suppressed: AtomicU64,
    cancel: CancellationToken,
}

/// Shared event fabric. Cheap to clone.
#[derive(Clone)]
pub struct EventFabric {
    inner: Arc<FabricInner>,
}

impl Default for EventFabric {
    fn default() -> Self {
        Self::new()
    }
}

impl EventFabric {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(FabricInner {
                state_changed: Topic::new(),
                state_updates: Topic::new(),
                commands: Topic::new(),
                connection_status: Topic::new(),
                errors: Topic::new(),
                last_forwarded: DashMap::new(),
                next_handle: AtomicU64::new(1),
                published: AtomicU64::new(0),
                suppressed: AtomicU64::new(0),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Obtain a handle bound to `role`. Handles close independently.
    pub fn handle(&self, role: Role) -> FabricHandle {
        FabricHandle {
            fabric: self.clone(),
            id: self.inner.next_handle.fetch_add(1, Ordering::Relaxed),
            role,
            cancel: self.inner.cancel.child_token(),
        }
    }

    /// Close every handle and drop every subscriber.
    pub fn close(&self) {
        self.inner.cancel.cancel();
        self.inner.state_changed.clear();
        self.inner.state_updates.clear();
        self.inner.commands.clear();
        self.inner.connection_status.clear();
        self.inner.errors.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    pub fn stats(&self) -> FabricStats {
        let inner = &self.inner;
        FabricStats {
            published: inner.published.load(Ordering::Relaxed),
            suppressed_duplicates: inner.suppressed.load(Ordering::Relaxed),
            tracked_devices: inner.last_forwarded.len(),
            closed: self.is_closed(),
            subscribers: Role::iter()
                .map(|role| RoleSubscribers {
                    role,
                    state_changed: inner.state_changed.count_for(role),
                    state_updates: inner.state_updates.count_for(role),
                    commands: inner.commands.count_for(role),
                    connection_status: inner.connection_status.count_for(role),
                    errors: inner.errors.count_for(role),
                })
                .collect(),
        }
    }
}

/// A role-bound view of the fabric.
#[derive(Clone)]
pub struct FabricHandle {
    fabric: EventFabric,
    id: u64,
    role: Role,
    cancel: CancellationToken,
}

impl FabricHandle {
    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop delivery to every subscription taken through this handle.
    /// Events already buffered for them are discarded. Later publishes
    /// through this handle are ignored.
    pub fn close(&self) {
        self.cancel.cancel();
        let inner = &self.fabric.inner;
        inner.state_changed.remove_handle(self.id);
        inner.state_updates.remove_handle(self.id);
        inner.commands.remove_handle(self.id);
        inner.connection_status.remove_handle(self.id);
        inner.errors.remove_handle(self.id);
    }

    // ── Publishing ───────────────────────────────────────────────────

    pub fn publish_state_changed(&self, event: &StateChanged) {
        if self.accepts() {
            self.fabric.inner.state_changed.publish(event);
        }
    }

    /// Publish unless value-equal to the last update forwarded for the
    /// same device. Returns whether the update went out.
    pub fn publish_state_update(&self, update: &StateUpdate) -> bool {
        if !self.accepts() {
            return false;
        }
        let inner = &self.fabric.inner;
        // The entry guard serializes concurrent publishers per device, so
        // the retained value always matches what subscribers saw last.
        match inner.last_forwarded.entry(update.device_id.clone()) {
            Entry::Occupied(mut retained) => {
                if retained.get().same_state(update) {
                    inner.suppressed.fetch_add(1, Ordering::Relaxed);
                    trace!(device_id = %update.device_id, "duplicate state update suppressed");
                    return false;
                }
                retained.insert(update.clone());
                inner.state_updates.publish(update);
            }
            Entry::Vacant(slot) => {
                slot.insert(update.clone());
                inner.state_updates.publish(update);
            }
        }
        true
    }

    pub fn publish_command(&self, event: &CommandEvent) {
        if self.accepts() {
            self.fabric.inner.commands.publish(event);
        }
    }

    pub fn publish_connection_status(&self, event: &ConnectionStatusEvent) {
        if self.accepts() {
            self.fabric.inner.connection_status.publish(event);
        }
    }

    pub fn publish_error(&self, event: &ErrorEvent) {
        if self.accepts() {
            self.fabric.inner.errors.publish(event);
        }
    }

    // ── Subscribing ──────────────────────────────────────────────────

    pub fn subscribe_state_changed(&self) -> Subscription<StateChanged> {
        self.fabric
            .inner
            .state_changed
            .subscribe(self.id, self.role, self.cancel.clone())
    }

    pub fn subscribe_state_updates(&self) -> Subscription<StateUpdate> {
        self.fabric
            .inner
            .state_updates
            .subscribe(self.id, self.role, self.cancel.clone())
    }

    pub fn subscribe_commands(&self) -> Subscription<CommandEvent> {
        self.fabric
            .inner
            .commands
            .subscribe(self.id, self.role, self.cancel.clone())
    }

    pub fn subscribe_connection_status(&self) -> Subscription<ConnectionStatusEvent> {
        self.fabric
            .inner
            .connection_status
            .subscribe(self.id, self.role, self.cancel.clone())
    }

    pub fn subscribe_errors(&self) -> Subscription<ErrorEvent> {
        self.fabric
            .inner
            .errors
            .subscribe(self.id, self.role, self.cancel.clone())
    }

    fn accepts(&self) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.fabric.inner.published.fetch_add(1, Ordering::Relaxed);
        true
    }
}

// ── Introspection ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct FabricStats {
    pub published: u64,
    pub suppressed_duplicates: u64,
    pub tracked_devices: usize,
    pub closed: bool,
    pub subscribers: Vec<RoleSubscribers>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoleSubscribers {
    pub role: Role,
    pub state_changed: usize,
    pub state_updates: usize,
    pub commands: usize,
    pub connection_status: usize,
    pub errors: usize,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::model::{
        CommandSource, CommandType, ConnectionStatus, Connectivity, DeviceState, UpdateSource,
    };

    fn update(id: &str, temperature: f64) -> StateUpdate {
        StateUpdate {
            timestamp: Utc::now(),
            source: UpdateSource::Eventbus,
            device_id: id.into(),
            name: id.into(),
            temperature: Some(temperature),
            humidity: None,
            battery: None,
            occupancy: None,
            illuminance: None,
            pressure: None,
            contact: None,
            water_leak: None,
            smoke: None,
            tamper: None,
            on: None,
            brightness: None,
            hue: None,
            saturation: None,
            color_temp: None,
            fan_speed: None,
            link_quality: None,
            last_seen: None,
            last_updated: None,
            connection_state: Connectivity::Disconnected,
            connection_note: "Never seen".into(),
        }
    }

    #[tokio::test]
    async fn identical_updates_delivered_once() {
        let fabric = EventFabric::new();
        let publisher = fabric.handle(Role::StateManager);
        let mut sub = fabric.handle(Role::Web).subscribe_state_updates();

        let first = update("office", 21.0);
        let mut second = first.clone();
        second.timestamp += chrono::Duration::seconds(1);

        assert!(publisher.publish_state_update(&first));
        assert!(!publisher.publish_state_update(&second));
        assert!(publisher.publish_state_update(&update("office", 22.0)));

        assert_eq!(sub.recv().await.unwrap().temperature, Some(21.0));
        assert_eq!(sub.recv().await.unwrap().temperature, Some(22.0));
        assert!(sub.try_recv().is_none());
        assert_eq!(fabric.stats().suppressed_duplicates, 1);
    }

    #[tokio::test]
    async fn dedup_is_per_device() {
        let fabric = EventFabric::new();
        let publisher = fabric.handle(Role::StateManager);
        let mut sub = fabric.handle(Role::Accessory).subscribe_state_updates();

        assert!(publisher.publish_state_update(&update("a", 20.0)));
        assert!(publisher.publish_state_update(&update("b", 20.0)));
        assert_eq!(sub.recv().await.unwrap().device_id, "a");
        assert_eq!(sub.recv().await.unwrap().device_id, "b");
    }

    #[tokio::test]
    async fn every_subscriber_gets_every_event_in_order() {
        let fabric = EventFabric::new();
        let bus = fabric.handle(Role::Bus);
        let mut a = fabric.handle(Role::StateManager).subscribe_state_changed();
        let mut b = fabric.handle(Role::Metrics).subscribe_state_changed();

        for i in 0..5 {
            bus.publish_state_changed(&StateChanged {
                device_id: format!("d{i}"),
                state: DeviceState::default(),
                fields: vec![],
            });
        }

        for sub in [&mut a, &mut b] {
            for i in 0..5 {
                assert_eq!(sub.recv().await.unwrap().device_id, format!("d{i}"));
            }
        }
    }

    #[tokio::test]
    async fn closing_a_handle_ends_its_subscriptions_only() {
        let fabric = EventFabric::new();
        let publisher = fabric.handle(Role::Accessory);
        let web = fabric.handle(Role::Web);
        let metrics = fabric.handle(Role::Metrics);
        let mut web_sub = web.subscribe_commands();
        let mut metrics_sub = metrics.subscribe_commands();

        web.close();
        publisher.publish_command(&CommandEvent {
            timestamp: Utc::now(),
            source: CommandSource::Homekit,
            device_id: "lamp".into(),
            command_type: CommandType::SetPower,
            on: Some(true),
            brightness: None,
            hue: None,
            saturation: None,
            color_temp: None,
        });

        assert!(web_sub.recv().await.is_none());
        assert_eq!(metrics_sub.recv().await.unwrap().device_id, "lamp");
        assert_eq!(
            fabric
                .stats()
                .subscribers
                .iter()
                .find(|s| s.role == Role::Web)
                .unwrap()
                .commands,
            0
        );
    }

    #[tokio::test]
    async fn closed_fabric_delivers_nothing() {
        let fabric = EventFabric::new();
        let handle = fabric.handle(Role::Web);
        let mut sub = handle.subscribe_connection_status();

        fabric.close();
        handle.publish_connection_status(&ConnectionStatusEvent::new(
            "web",
            ConnectionStatus::Connected,
        ));

        assert!(sub.recv().await.is_none());
        assert!(fabric.handle(Role::Bus).is_closed());
        assert!(fabric.stats().closed);
    }

    #[test]
    fn role_names() {
        assert_eq!(Role::StateManager.to_string(), "state-manager");
        assert_eq!(Role::Accessory.as_ref(), "accessory");
    }
}
