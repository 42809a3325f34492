// ── UI command submission ──

use chrono::Utc;
use tracing::info;

use super::{Command, CommandSender};
use crate::codec::PERCENT_MAX;
use crate::error::CoreError;
use crate::fabric::FabricHandle;
use crate::model::{CommandEvent, CommandSource, CommandType};
use crate::registry::Registry;

/// Entry point for web-originated control requests. Shares the command
/// queue with the accessory adapter.
#[derive(Clone)]
pub struct CommandGateway {
    registry: Registry,
    commands: CommandSender,
    fabric: FabricHandle,
}

impl CommandGateway {
    pub fn new(registry: Registry, commands: CommandSender, fabric: FabricHandle) -> Self {
        Self {
            registry,
            commands,
            fabric,
        }
    }

    pub async fn set_power(&self, device_id: &str, on: bool) -> Result<(), CoreError> {
        self.ensure_visible(device_id)?;
        self.commands.enqueue(Command::power(device_id, on)).await?;
        info!(device_id, on, "web power command queued");
        self.publish(device_id, CommandType::SetPower, Some(on), None);
        Ok(())
    }

    /// `percent` is clamped to 0–100 before it is queued.
    pub async fn set_brightness(&self, device_id: &str, percent: i32) -> Result<(), CoreError> {
        self.ensure_visible(device_id)?;
        let percent = percent.clamp(0, PERCENT_MAX);
        self.commands
            .enqueue(Command::brightness(device_id, percent))
            .await?;
        info!(device_id, brightness = percent, "web brightness command queued");
        self.publish(device_id, CommandType::SetBrightness, None, Some(percent));
        Ok(())
    }

    fn ensure_visible(&self, device_id: &str) -> Result<(), CoreError> {
        let device = self
            .registry
            .get(device_id)
            .ok_or_else(|| CoreError::UnknownDevice {
                id: device_id.to_owned(),
            })?;
        if !device.web {
            return Err(CoreError::NotVisible {
                id: device_id.to_owned(),
            });
        }
        Ok(())
    }

    fn publish(
        &self,
        device_id: &str,
        command_type: CommandType,
        on: Option<bool>,
        brightness: Option<i32>,
    ) {
        self.fabric.publish_command(&CommandEvent {
            timestamp: Utc::now(),
            source: CommandSource::Web,
            device_id: device_id.to_owned(),
            command_type,
            on,
            brightness,
            hue: None,
            saturation: None,
            color_temp: None,
        });
    }
}
