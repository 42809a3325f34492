// ── Command path ──
//
// Control requests from the accessory adapter and the web UI share one
// bounded queue drained by the state manager. Protocol callbacks enqueue
// without waiting: when the queue is full the command is dropped, counted
// and logged, so a stalled bus never blocks the accessory server. UI
// submissions may wait for room instead.

pub mod gateway;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tracing::warn;

use crate::error::CoreError;

pub use gateway::CommandGateway;

/// A control request addressed to one device.
///
/// Fields are independent; the state manager handles every one that is
/// set. Brightness is on the percent scale.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Command {
    pub device_id: String,
    pub on: Option<bool>,
    pub brightness: Option<i32>,
    pub hue: Option<f64>,
    pub saturation: Option<f64>,
    pub color_temp: Option<i32>,
}

impl Command {
    pub fn power(device_id: impl Into<String>, on: bool) -> Self {
        Self {
            device_id: device_id.into(),
            on: Some(on),
            ..Self::default()
        }
    }

    pub fn brightness(device_id: impl Into<String>, percent: i32) -> Self {
        Self {
            device_id: device_id.into(),
            brightness: Some(percent),
            ..Self::default()
        }
    }

    pub fn color(device_id: impl Into<String>, hue: f64, saturation: f64) -> Self {
        Self {
            device_id: device_id.into(),
            hue: Some(hue),
            saturation: Some(saturation),
            ..Self::default()
        }
    }

    pub fn color_temp(device_id: impl Into<String>, mireds: i32) -> Self {
        Self {
            device_id: device_id.into(),
            color_temp: Some(mireds),
            ..Self::default()
        }
    }
}

pub type CommandReceiver = mpsc::Receiver<Command>;

/// Create the shared command queue.
pub fn channel(capacity: usize) -> (CommandSender, CommandReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        CommandSender {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        rx,
    )
}

/// Producer half of the command queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CommandSender {
    tx: mpsc::Sender<Command>,
    dropped: Arc<AtomicU64>,
}

impl CommandSender {
    /// Enqueue without waiting. A full queue drops the command.
    pub fn try_enqueue(&self, command: Command) -> Result<(), CoreError> {
        match self.tx.try_send(command) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(command)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(device_id = %command.device_id, "command queue full, dropping command");
                Err(CoreError::CommandQueueFull {
                    device_id: command.device_id,
                })
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(CoreError::CommandChannelClosed),
        }
    }

    /// Enqueue, waiting for room.
    pub async fn enqueue(&self, command: Command) -> Result<(), CoreError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| CoreError::CommandChannelClosed)
    }

    /// Commands dropped so far because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
