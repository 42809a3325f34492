//! State synchronization core for a zigbee2mqtt ↔ HomeKit bridge.
//!
//! Bus telemetry enters through [`BusIngestion`], is merged into the
//! authoritative store by [`StateManager`], and fans out over the
//! [`EventFabric`] to the [`AccessoryAdapter`] and the browser
//! [`PushHub`]. Controller writes and web requests travel the other way
//! through one shared command queue. Network transports are injected via
//! [`BusTransport`].

pub mod accessory;
pub mod bridge;
pub mod codec;
pub mod command;
pub mod config;
pub mod error;
pub mod fabric;
pub mod ingest;
pub mod manager;
pub mod model;
pub mod push;
pub mod registry;
pub mod store;
pub mod transport;

// ── Primary re-exports ──────────────────────────────────────────────
pub use accessory::{AccessoryAdapter, AccessoryStats};
pub use bridge::Bridge;
pub use command::{Command, CommandGateway, CommandSender};
pub use config::BridgeConfig;
pub use error::CoreError;
pub use fabric::{EventFabric, FabricHandle, Role, Subscription};
pub use ingest::BusIngestion;
pub use manager::{DeviceEntry, StateManager};
pub use push::{PushHub, PushSubscription};
pub use registry::Registry;
pub use store::StateStore;
pub use transport::{BusTransport, TransportError};

pub use model::{
    CommandEvent, CommandSource, CommandType, ConnectionStatus, ConnectionStatusEvent,
    Connectivity, Device, DeviceState, DeviceType, ErrorEvent, Features, StateChanged,
    StateField, StateUpdate, UpdateSource,
};
