// ── HomeKit accessory model ──
//
// Accessory → services → characteristics, the shape an accessory server
// publishes. The server itself lives outside this crate.

pub mod adapter;
pub mod characteristic;

use std::hash::Hasher;

use fnv::FnvHasher;
use serde::Serialize;
use strum::{AsRefStr, Display};

pub use adapter::{AccessoryAdapter, AccessoryStats};
pub use characteristic::{Characteristic, CharacteristicType, Value};

/// Stable 64-bit accessory identifier: FNV-1a over the device identifier.
pub fn accessory_id(device_id: &str) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(device_id.as_bytes());
    hasher.finish()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, AsRefStr)]
pub enum Category {
    Bridge,
    Sensor,
    Lightbulb,
    Outlet,
    Fan,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessoryInfo {
    pub name: String,
    pub manufacturer: String,
    pub model: String,
    pub serial_number: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, AsRefStr)]
pub enum ServiceType {
    TemperatureSensor,
    HumiditySensor,
    Battery,
    OccupancySensor,
    ContactSensor,
    LeakSensor,
    SmokeSensor,
    Lightbulb,
    Outlet,
    Fan,
}

#[derive(Debug, Clone)]
pub struct Service {
    pub kind: ServiceType,
    pub characteristics: Vec<Characteristic>,
}

impl Service {
    pub fn new(kind: ServiceType, characteristics: &[CharacteristicType]) -> Self {
        Self {
            kind,
            characteristics: characteristics
                .iter()
                .map(|c| Characteristic::new(*c))
                .collect(),
        }
    }

    pub fn add(&mut self, kind: CharacteristicType) -> Characteristic {
        let characteristic = Characteristic::new(kind);
        self.characteristics.push(characteristic.clone());
        characteristic
    }

    pub fn characteristic(&self, kind: CharacteristicType) -> Option<&Characteristic> {
        self.characteristics.iter().find(|c| c.kind() == kind)
    }
}

#[derive(Debug, Clone)]
pub struct Accessory {
    pub id: u64,
    pub category: Category,
    pub info: AccessoryInfo,
    pub services: Vec<Service>,
}

impl Accessory {
    pub fn new(id: u64, category: Category, info: AccessoryInfo) -> Self {
        Self {
            id,
            category,
            info,
            services: Vec::new(),
        }
    }

    pub fn service(&self, kind: ServiceType) -> Option<&Service> {
        self.services.iter().find(|s| s.kind == kind)
    }

    /// First characteristic of `kind` across all services.
    pub fn characteristic(&self, kind: CharacteristicType) -> Option<&Characteristic> {
        self.services.iter().find_map(|s| s.characteristic(kind))
    }

    pub fn characteristics(&self) -> impl Iterator<Item = &Characteristic> {
        self.services.iter().flat_map(|s| s.characteristics.iter())
    }
}

// ── Introspection ────────────────────────────────────────────────

/// Serializable description of an accessory and its live values.
#[derive(Debug, Clone, Serialize)]
pub struct AccessoryDescription {
    pub id: u64,
    pub device_id: Option<String>,
    pub category: Category,
    pub info: AccessoryInfo,
    pub services: Vec<ServiceDescription>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceDescription {
    pub kind: ServiceType,
    pub characteristics: Vec<CharacteristicDescription>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CharacteristicDescription {
    pub kind: CharacteristicType,
    pub value: Value,
    pub writable: bool,
}

impl AccessoryDescription {
    pub fn of(accessory: &Accessory, device_id: Option<&str>) -> Self {
        Self {
            id: accessory.id,
            device_id: device_id.map(str::to_owned),
            category: accessory.category,
            info: accessory.info.clone(),
            services: accessory
                .services
                .iter()
                .map(|s| ServiceDescription {
                    kind: s.kind,
                    characteristics: s
                        .characteristics
                        .iter()
                        .map(|c| CharacteristicDescription {
                            kind: c.kind(),
                            value: c.value(),
                            writable: c.kind().is_writable(),
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}
