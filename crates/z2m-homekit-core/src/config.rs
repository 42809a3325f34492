// ── Bridge runtime configuration ──
//
// What the core needs to know at construction time. Built by the config
// crate from the layered application settings; never touches disk or the
// environment itself.

/// Default capacity of the shared command queue.
pub const DEFAULT_COMMAND_QUEUE: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Name of the bridge accessory.
    pub bridge_name: String,
    /// Capacity of the shared command queue. Zero is raised to one.
    pub command_queue: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bridge_name: "z2m-homekit".into(),
            command_queue: DEFAULT_COMMAND_QUEUE,
        }
    }
}
