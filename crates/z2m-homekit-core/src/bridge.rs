// ── Bridge facade ──
//
// Wires the registry, fabric, state manager, accessory adapter, push hub
// and command path together with one shared command queue. The bus
// transport is injected; inbound bus messages enter through
// `ingestion()`.

use std::sync::Arc;

use tracing::info;

use crate::accessory::AccessoryAdapter;
use crate::command::{self, CommandGateway};
use crate::config::BridgeConfig;
use crate::error::CoreError;
use crate::fabric::{EventFabric, Role};
use crate::ingest::BusIngestion;
use crate::manager::StateManager;
use crate::push::PushHub;
use crate::registry::Registry;
use crate::transport::BusTransport;

/// The assembled bridge core. Cheap to clone.
#[derive(Clone)]
pub struct Bridge {
    fabric: EventFabric,
    manager: StateManager,
    adapter: AccessoryAdapter,
    hub: PushHub,
    gateway: CommandGateway,
    ingestion: BusIngestion,
}

impl Bridge {
    /// Build every component. Fails when no device is exposed to
    /// HomeKit.
    ///
    /// Nothing is broadcast until [`start`](Self::start), so fabric
    /// subscribers created in between still see the initial states.
    pub fn new(
        config: &BridgeConfig,
        registry: Registry,
        transport: Arc<dyn BusTransport>,
    ) -> Result<Self, CoreError> {
        let fabric = EventFabric::new();
        let (commands, command_rx) = command::channel(config.command_queue);

        let adapter =
            AccessoryAdapter::new(&registry, &config.bridge_name, commands.clone(), &fabric);
        adapter.require_accessories()?;

        let hub = PushHub::new(registry.clone(), &fabric);
        let gateway = CommandGateway::new(registry.clone(), commands, fabric.handle(Role::Web));
        let ingestion = BusIngestion::new(registry.clone(), fabric.handle(Role::Bus));
        let manager = StateManager::new(registry, &fabric, transport, command_rx);

        Ok(Self {
            fabric,
            manager,
            adapter,
            hub,
            gateway,
            ingestion,
        })
    }

    /// Start every worker, then broadcast the initial device states.
    pub async fn start(&self) {
        self.adapter.start().await;
        self.hub.start().await;
        self.manager.start().await;
        self.manager.initialize();
        info!(
            devices = self.manager.registry().len(),
            accessories = self.adapter.len(),
            "bridge started"
        );
    }

    /// Stop every worker and close the fabric.
    pub async fn shutdown(&self) {
        self.manager.shutdown().await;
        self.adapter.shutdown().await;
        self.hub.shutdown().await;
        self.fabric.close();
        info!("bridge stopped");
    }

    pub fn fabric(&self) -> &EventFabric {
        &self.fabric
    }

    pub fn manager(&self) -> &StateManager {
        &self.manager
    }

    pub fn adapter(&self) -> &AccessoryAdapter {
        &self.adapter
    }

    pub fn hub(&self) -> &PushHub {
        &self.hub
    }

    pub fn gateway(&self) -> &CommandGateway {
        &self.gateway
    }

    pub fn ingestion(&self) -> &BusIngestion {
        &self.ingestion
    }
}
