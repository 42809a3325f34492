//! Prometheus metrics fed from the event fabric.

use std::sync::Arc;

use prometheus::{CounterVec, Encoder, GaugeVec, Opts, Registry, TextEncoder};
use strum::IntoEnumIterator;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use z2m_homekit_core::{
    CommandEvent, ConnectionStatus, ConnectionStatusEvent, EventFabric, Role, StateUpdate,
    Subscription,
};

/// Subscribes to lifecycle, command and state events and keeps the
/// matching Prometheus series current.
#[derive(Clone)]
pub struct MetricsCollector {
    inner: Arc<CollectorInner>,
}

struct CollectorInner {
    registry: Registry,
    component_status: GaugeVec,
    commands: CounterVec,
    device_state: GaugeVec,
    pending: Mutex<Option<Pending>>,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

struct Pending {
    statuses: Subscription<ConnectionStatusEvent>,
    commands: Subscription<CommandEvent>,
    states: Subscription<StateUpdate>,
}

impl MetricsCollector {
    /// Register the metric families and subscribe. Create it before the
    /// bridge starts so the initial states are counted.
    pub fn new(fabric: &EventFabric) -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let component_status = GaugeVec::new(
            Opts::new(
                "z2m_homekit_component_status",
                "Lifecycle state per component (1 when matching status, 0 otherwise)",
            ),
            &["component", "status"],
        )?;
        let commands = CounterVec::new(
            Opts::new(
                "z2m_homekit_command_total",
                "Total control commands by source and device",
            ),
            &["source", "device_id", "command_type"],
        )?;
        let device_state = GaugeVec::new(
            Opts::new("z2m_homekit_device_state", "Device state values"),
            &["device_id", "name", "metric"],
        )?;
        registry.register(Box::new(component_status.clone()))?;
        registry.register(Box::new(commands.clone()))?;
        registry.register(Box::new(device_state.clone()))?;

        let handle = fabric.handle(Role::Metrics);
        let pending = Pending {
            statuses: handle.subscribe_connection_status(),
            commands: handle.subscribe_commands(),
            states: handle.subscribe_state_updates(),
        };

        Ok(Self {
            inner: Arc::new(CollectorInner {
                registry,
                component_status,
                commands,
                device_state,
                pending: Mutex::new(Some(pending)),
                cancel: CancellationToken::new(),
                task_handles: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Text exposition format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.inner.registry.gather(), &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    // ── Observers ────────────────────────────────────────────────────

    pub fn observe_status(&self, event: &ConnectionStatusEvent) {
        for status in ConnectionStatus::iter() {
            let value = if status == event.status { 1.0 } else { 0.0 };
            self.inner
                .component_status
                .with_label_values(&[event.component.as_str(), status.as_ref()])
                .set(value);
        }
    }

    pub fn observe_command(&self, event: &CommandEvent) {
        let device_id = if event.device_id.is_empty() {
            "unknown"
        } else {
            event.device_id.as_str()
        };
        self.inner
            .commands
            .with_label_values(&[event.source.as_ref(), device_id, event.command_type.as_ref()])
            .inc();
    }

    pub fn observe_state(&self, update: &StateUpdate) {
        let name = if update.name.is_empty() {
            update.device_id.as_str()
        } else {
            update.name.as_str()
        };
        let set = |metric: &str, value: f64| {
            self.inner
                .device_state
                .with_label_values(&[update.device_id.as_str(), name, metric])
                .set(value);
        };
        let flag = |b: bool| if b { 1.0 } else { 0.0 };

        if let Some(v) = update.temperature {
            set("temperature", v);
        }
        if let Some(v) = update.humidity {
            set("humidity", v);
        }
        if let Some(v) = update.battery {
            set("battery", f64::from(v));
        }
        if let Some(v) = update.occupancy {
            set("occupancy", flag(v));
        }
        if let Some(v) = update.illuminance {
            set("illuminance", f64::from(v));
        }
        if let Some(v) = update.pressure {
            set("pressure", v);
        }
        if let Some(v) = update.contact {
            set("contact", flag(v));
        }
        if let Some(v) = update.water_leak {
            set("water_leak", flag(v));
        }
        if let Some(v) = update.smoke {
            set("smoke", flag(v));
        }
        if let Some(v) = update.on {
            set("power", flag(v));
        }
        if let Some(v) = update.brightness {
            set("brightness", f64::from(v));
        }
        if let Some(v) = update.fan_speed {
            set("fan_speed", f64::from(v));
        }
        if let Some(v) = update.link_quality.filter(|q| *q > 0) {
            set("link_quality", f64::from(v));
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    pub async fn start(&self) {
        let Some(pending) = self.inner.pending.lock().await.take() else {
            return;
        };
        let mut handles = self.inner.task_handles.lock().await;
        handles.push(tokio::spawn(consume(
            self.inner.cancel.clone(),
            pending.statuses,
            {
                let c = self.clone();
                move |e: ConnectionStatusEvent| c.observe_status(&e)
            },
        )));
        handles.push(tokio::spawn(consume(
            self.inner.cancel.clone(),
            pending.commands,
            {
                let c = self.clone();
                move |e: CommandEvent| c.observe_command(&e)
            },
        )));
        handles.push(tokio::spawn(consume(
            self.inner.cancel.clone(),
            pending.states,
            {
                let c = self.clone();
                move |e: StateUpdate| c.observe_state(&e)
            },
        )));
        info!("metrics collector started");
    }

    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        debug!("metrics collector stopped");
    }
}

async fn consume<E>(
    cancel: CancellationToken,
    mut sub: Subscription<E>,
    observe: impl Fn(E) + Send + 'static,
) where
    E: Send + 'static,
{
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = sub.recv() => {
                let Some(event) = event else { break };
                observe(event);
            }
        }
    }
}
