// ── Domain model ──

pub mod device;
pub mod event;
pub mod state;

pub use device::{Device, DeviceType, Features};
pub use event::{
    CommandEvent, CommandSource, CommandType, ConnectionStatus, ConnectionStatusEvent,
    Connectivity, ErrorEvent, StateChanged, StateUpdate, UpdateSource,
};
pub use state::{DeviceState, StateField};
