// ── Browser push hub ──
//
// Keeps the latest state update per web-visible device and the latest
// status per component, and fans state updates out to connected push
// clients. Each client has a small bounded buffer; a client that falls
// behind loses events, the others do not.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_core::Stream;
use indexmap::IndexMap;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::fabric::{EventFabric, FabricHandle, Role, Subscription};
use crate::model::{ConnectionStatus, ConnectionStatusEvent, StateUpdate};
use crate::registry::Registry;

/// Per-client buffer size.
pub const CLIENT_BUFFER: usize = 10;
/// Rolling event log length.
pub const EVENT_LOG_CAPACITY: usize = 100;

const COMPONENT: &str = "web";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HubHealth {
    pub status: &'static str,
    pub devices: usize,
    pub sse_clients: usize,
    pub timestamp: DateTime<Utc>,
}

struct HubInner {
    registry: Registry,
    states: RwLock<IndexMap<String, StateUpdate>>,
    statuses: RwLock<IndexMap<String, ConnectionStatusEvent>>,
    clients: DashMap<u64, mpsc::Sender<StateUpdate>>,
    next_client: AtomicU64,
    events: Mutex<VecDeque<LogEntry>>,
    fabric: FabricHandle,
    subscriptions: tokio::sync::Mutex<
        Option<(
            Subscription<StateUpdate>,
            Subscription<ConnectionStatusEvent>,
        )>,
    >,
    cancel: CancellationToken,
    task_handles: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

/// Cheaply cloneable via `Arc<HubInner>`.
#[derive(Clone)]
pub struct PushHub {
    inner: Arc<HubInner>,
}

impl PushHub {
    /// Subscribes to state updates and component statuses immediately.
    pub fn new(registry: Registry, fabric: &EventFabric) -> Self {
        let fabric = fabric.handle(Role::Web);
        let subscriptions = (
            fabric.subscribe_state_updates(),
            fabric.subscribe_connection_status(),
        );

        Self {
            inner: Arc::new(HubInner {
                registry,
                states: RwLock::new(IndexMap::new()),
                statuses: RwLock::new(IndexMap::new()),
                clients: DashMap::new(),
                next_client: AtomicU64::new(1),
                events: Mutex::new(VecDeque::with_capacity(EVENT_LOG_CAPACITY)),
                fabric,
                subscriptions: tokio::sync::Mutex::new(Some(subscriptions)),
                cancel: CancellationToken::new(),
                task_handles: tokio::sync::Mutex::new(Vec::new()),
            }),
        }
    }

    // ── Ingest ───────────────────────────────────────────────────────

    /// Record and broadcast an update. Devices hidden from the web are
    /// ignored.
    pub fn handle_state_update(&self, update: StateUpdate) {
        let visible = self
            .inner
            .registry
            .get(&update.device_id)
            .is_some_and(|d| d.web);
        if !visible {
            return;
        }

        // Broadcasting under the write guard orders every live event
        // after the replay a concurrent subscriber copies.
        let mut states = self
            .inner
            .states
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        for client in &self.inner.clients {
            if client.value().try_send(update.clone()).is_err() {
                trace!(client = *client.key(), "push client lagging, event dropped");
            }
        }
        states.insert(update.device_id.clone(), update);
    }

    pub fn handle_connection_status(&self, event: ConnectionStatusEvent) {
        self.log_event(format!("{}: {}", event.component, event.status));
        self.inner
            .statuses
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(event.component.clone(), event);
    }

    // ── Clients ──────────────────────────────────────────────────────

    /// Register a push client. The stream first replays the current
    /// state of every web-visible device, then yields live updates.
    pub fn subscribe(&self) -> PushSubscription {
        let (tx, rx) = mpsc::channel(CLIENT_BUFFER);
        let id = self.inner.next_client.fetch_add(1, Ordering::Relaxed);

        let states = self
            .inner
            .states
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        self.inner.clients.insert(id, tx);
        let replay = states.values().cloned().collect();
        drop(states);

        debug!(client = id, "push client connected");
        PushSubscription {
            replay,
            rx: ReceiverStream::new(rx),
            _guard: ClientGuard {
                id,
                hub: Arc::downgrade(&self.inner),
            },
        }
    }

    pub fn client_count(&self) -> usize {
        self.inner.clients.len()
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub fn states(&self) -> Vec<StateUpdate> {
        self.inner
            .states
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn statuses(&self) -> Vec<ConnectionStatusEvent> {
        self.inner
            .statuses
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn health(&self) -> HubHealth {
        HubHealth {
            status: "ok",
            devices: self.inner.registry.len(),
            sse_clients: self.client_count(),
            timestamp: Utc::now(),
        }
    }

    /// Append to the rolling event log, evicting the oldest entry at
    /// capacity.
    pub fn log_event(&self, message: impl Into<String>) {
        let mut events = self
            .inner
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if events.len() == EVENT_LOG_CAPACITY {
            events.pop_front();
        }
        events.push_back(LogEntry {
            timestamp: Utc::now(),
            message: message.into(),
        });
    }

    /// Oldest first.
    pub fn recent_events(&self) -> Vec<LogEntry> {
        self.inner
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Spawn the fabric workers and announce the web component.
    pub async fn start(&self) {
        let Some((updates, statuses)) = self.inner.subscriptions.lock().await.take() else {
            return;
        };
        let mut handles = self.inner.task_handles.lock().await;
        handles.push(tokio::spawn(state_update_task(self.clone(), updates)));
        handles.push(tokio::spawn(status_task(self.clone(), statuses)));
        drop(handles);

        self.publish_status(ConnectionStatus::Connected);
    }

    /// Stop the workers and end every client stream.
    pub async fn shutdown(&self) {
        self.publish_status(ConnectionStatus::Disconnected);
        self.inner.cancel.cancel();
        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        self.inner.clients.clear();
        self.inner.fabric.close();
        debug!("push hub stopped");
    }

    fn publish_status(&self, status: ConnectionStatus) {
        self.inner
            .fabric
            .publish_connection_status(&ConnectionStatusEvent::new(COMPONENT, status));
    }
}

async fn state_update_task(hub: PushHub, mut sub: Subscription<StateUpdate>) {
    let cancel = hub.inner.cancel.clone();
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            update = sub.recv() => {
                let Some(update) = update else { break };
                hub.handle_state_update(update);
            }
        }
    }
}

async fn status_task(hub: PushHub, mut sub: Subscription<ConnectionStatusEvent>) {
    let cancel = hub.inner.cancel.clone();
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = sub.recv() => {
                let Some(event) = event else { break };
                hub.handle_connection_status(event);
            }
        }
    }
}

// ── PushSubscription ─────────────────────────────────────────────

struct ClientGuard {
    id: u64,
    hub: Weak<HubInner>,
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.clients.remove(&self.id);
            debug!(client = self.id, "push client disconnected");
        }
    }
}

/// One push client's stream. Dropping it deregisters the client.
pub struct PushSubscription {
    replay: VecDeque<StateUpdate>,
    rx: ReceiverStream<StateUpdate>,
    _guard: ClientGuard,
}

impl Stream for PushSubscription {
    type Item = StateUpdate;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(update) = self.replay.pop_front() {
            return Poll::Ready(Some(update));
        }
        Pin::new(&mut self.rx).poll_next(cx)
    }
}
