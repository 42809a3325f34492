//! MQTT link to the zigbee2mqtt broker.
//!
//! [`MqttTransport`] is the core's outbound [`BusTransport`]; [`MqttLink`]
//! drives the rumqttc event loop, feeds inbound publishes to the
//! ingestion hook and reports its lifecycle on the fabric.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rumqttc::{AsyncClient, ClientError, Event, EventLoop, MqttOptions, Packet, QoS};
use secrecy::ExposeSecret;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use z2m_homekit_config::AppConfig;
use z2m_homekit_core::ingest::SUBSCRIBE_FILTER;
use z2m_homekit_core::{
    BusIngestion, BusTransport, ConnectionStatus, ConnectionStatusEvent, FabricHandle,
    TransportError,
};

const COMPONENT: &str = "mqtt";
const KEEP_ALIVE: Duration = Duration::from_secs(30);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const REQUEST_CAPACITY: usize = 10;

/// Build the client and its event loop from the application config.
pub fn client(config: &AppConfig) -> (Arc<MqttTransport>, EventLoop) {
    let mut options = MqttOptions::new(
        config.mqtt_client_id.clone(),
        config.mqtt_host.clone(),
        config.mqtt_port,
    );
    options.set_keep_alive(KEEP_ALIVE);
    if let Some(username) = &config.mqtt_username {
        let password = config
            .mqtt_password
            .as_ref()
            .map(|p| p.expose_secret().to_owned())
            .unwrap_or_default();
        options.set_credentials(username.clone(), password);
    }

    let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
    (Arc::new(MqttTransport::new(client)), eventloop)
}

// ── Transport ────────────────────────────────────────────────────────

pub struct MqttTransport {
    client: AsyncClient,
    connected: AtomicBool,
}

impl MqttTransport {
    fn new(client: AsyncClient) -> Self {
        Self {
            client,
            connected: AtomicBool::new(false),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn set_connected(&self, connected: bool) -> bool {
        self.connected.swap(connected, Ordering::AcqRel)
    }
}

impl BusTransport for MqttTransport {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.client
            .try_publish(topic, QoS::AtLeastOnce, false, payload.to_vec())
            .map_err(|e| match e {
                ClientError::TryRequest(_) => TransportError::Busy,
                other => TransportError::Publish {
                    topic: topic.to_owned(),
                    reason: other.to_string(),
                },
            })
    }
}

// ── Link ─────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct MqttLink {
    inner: Arc<LinkInner>,
}

struct LinkInner {
    transport: Arc<MqttTransport>,
    ingestion: BusIngestion,
    fabric: FabricHandle,
    eventloop: Mutex<Option<EventLoop>>,
    cancel: CancellationToken,
    task_handle: Mutex<Option<JoinHandle<()>>>,
}

impl MqttLink {
    pub fn new(
        transport: Arc<MqttTransport>,
        eventloop: EventLoop,
        ingestion: BusIngestion,
        fabric: FabricHandle,
    ) -> Self {
        Self {
            inner: Arc::new(LinkInner {
                transport,
                ingestion,
                fabric,
                eventloop: Mutex::new(Some(eventloop)),
                cancel: CancellationToken::new(),
                task_handle: Mutex::new(None),
            }),
        }
    }

    pub async fn start(&self) {
        let Some(eventloop) = self.inner.eventloop.lock().await.take() else {
            return;
        };
        self.status(ConnectionStatusEvent::new(COMPONENT, ConnectionStatus::Connecting));
        let handle = tokio::spawn(event_loop_task(self.clone(), eventloop));
        *self.inner.task_handle.lock().await = Some(handle);
    }

    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        if let Some(handle) = self.inner.task_handle.lock().await.take() {
            let _ = handle.await;
        }
        if let Err(e) = self.inner.transport.client.try_disconnect() {
            debug!(error = %e, "mqtt disconnect request not sent");
        }
        self.inner.transport.set_connected(false);
        self.status(ConnectionStatusEvent::new(COMPONENT, ConnectionStatus::Disconnected));
        info!("mqtt link stopped");
    }

    fn status(&self, event: ConnectionStatusEvent) {
        self.inner.fabric.publish_connection_status(&event);
    }

    fn on_connected(&self, reconnects: u32) {
        self.inner.transport.set_connected(true);
        info!(reconnects, "connected to mqtt broker");
        if let Err(e) = self
            .inner
            .transport
            .client
            .try_subscribe(SUBSCRIBE_FILTER, QoS::AtLeastOnce)
        {
            error!(topic = SUBSCRIBE_FILTER, error = %e, "failed to subscribe");
        }
        self.status(
            ConnectionStatusEvent::new(COMPONENT, ConnectionStatus::Connected)
                .with_reconnects(reconnects),
        );
    }
}

async fn event_loop_task(link: MqttLink, mut eventloop: EventLoop) {
    let cancel = link.inner.cancel.clone();
    let mut reconnects: u32 = 0;
    let mut failed = false;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    if failed {
                        reconnects = reconnects.saturating_add(1);
                        failed = false;
                    }
                    link.on_connected(reconnects);
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    link.inner.ingestion.handle(&publish.topic, &publish.payload);
                }
                Ok(_) => {}
                Err(e) => {
                    let was_connected = link.inner.transport.set_connected(false);
                    if was_connected {
                        warn!(error = %e, "mqtt connection lost");
                    } else {
                        error!(error = %e, "mqtt connection failed");
                    }
                    failed = true;
                    link.status(
                        ConnectionStatusEvent::new(COMPONENT, ConnectionStatus::Failed)
                            .with_error(e.to_string())
                            .with_reconnects(reconnects),
                    );

                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(RECONNECT_DELAY) => {}
                    }
                    link.status(
                        ConnectionStatusEvent::new(COMPONENT, ConnectionStatus::Reconnecting)
                            .with_reconnects(reconnects),
                    );
                }
            }
        }
    }
}
