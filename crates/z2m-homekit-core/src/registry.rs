// ── Device registry ──
//
// Parses the relaxed-JSON device document (comments and trailing commas
// allowed) and validates it into an immutable, ordered device set.

use std::collections::HashMap;
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Deserialize;
use tracing::debug;

use crate::error::CoreError;
use crate::model::{Device, DeviceType, Features};

// ── Wire shape ───────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct RawDocument {
    #[serde(default)]
    devices: Vec<RawDevice>,
}

/// Loose view of one entry; validation happens after parsing so that
/// errors name the offending device instead of a byte offset.
#[derive(Debug, Default, Deserialize)]
struct RawDevice {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    topic: String,
    #[serde(default, rename = "type")]
    device_type: String,
    #[serde(default)]
    features: Features,
    homekit: Option<bool>,
    web: Option<bool>,
}

impl RawDevice {
    fn validate(self, index: usize) -> Result<Device, CoreError> {
        if self.id.is_empty() {
            return Err(CoreError::MissingId { index });
        }
        let missing = |field| CoreError::MissingField {
            id: self.id.clone(),
            field,
        };
        if self.name.is_empty() {
            return Err(missing("name"));
        }
        if self.topic.is_empty() {
            return Err(missing("topic"));
        }
        if self.device_type.is_empty() {
            return Err(missing("type"));
        }
        let device_type =
            DeviceType::from_str(&self.device_type).map_err(|_| CoreError::InvalidDeviceType {
                id: self.id.clone(),
                device_type: self.device_type.clone(),
            })?;

        Ok(Device {
            id: self.id,
            name: self.name,
            topic: self.topic,
            device_type,
            features: self.features,
            homekit: self.homekit.unwrap_or(true),
            web: self.web.unwrap_or(true),
        })
    }
}

// ── Registry ─────────────────────────────────────────────────────

/// Immutable set of configured devices, in configuration order.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    devices: IndexMap<String, Arc<Device>>,
    by_topic: HashMap<String, String>,
}

impl Registry {
    /// Parse and validate a device document.
    ///
    /// Fails fast on the first violation: empty list, missing required
    /// field, unknown type, duplicate identifier.
    pub fn load(source: &str) -> Result<Self, CoreError> {
        let raw: RawDocument = json5::from_str(source).map_err(|e| CoreError::RegistryParse {
            message: e.to_string(),
        })?;

        if raw.devices.is_empty() {
            return Err(CoreError::NoDevices);
        }

        let mut seen = HashSet::with_capacity(raw.devices.len());
        let mut devices = Vec::with_capacity(raw.devices.len());
        for (index, entry) in raw.devices.into_iter().enumerate() {
            let device = entry.validate(index)?;
            if !seen.insert(device.id.clone()) {
                return Err(CoreError::DuplicateDevice { id: device.id });
            }
            devices.push(device);
        }

        Ok(Self::from_devices(devices))
    }

    /// Read a device document from disk and [`load`](Self::load) it.
    pub fn load_file(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| CoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let registry = Self::load(&source)?;
        debug!(path = %path.display(), devices = registry.len(), "device registry loaded");
        Ok(registry)
    }

    /// Build from already-validated devices. Later duplicates of a routing
    /// key never shadow the first.
    pub fn from_devices(devices: impl IntoIterator<Item = Device>) -> Self {
        let mut registry = Self::default();
        for device in devices {
            registry
                .by_topic
                .entry(device.topic.clone())
                .or_insert_with(|| device.id.clone());
            registry.devices.insert(device.id.clone(), Arc::new(device));
        }
        registry
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Device>> {
        self.devices.get(id)
    }

    /// Resolve a routing key to its device. First configured match wins.
    pub fn by_topic(&self, topic: &str) -> Option<&Arc<Device>> {
        self.by_topic.get(topic).and_then(|id| self.devices.get(id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Device>> {
        self.devices.values()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn homekit_count(&self) -> usize {
        self.iter().filter(|d| d.homekit).count()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const DOC: &str = r#"
    {
      // Living room
      "devices": [
        {
          "id": "living-temp",
          "name": "Living Room",
          "topic": "living_room_sensor",
          "type": "climate_sensor",
          "features": { "temperature": true, "humidity": true, "battery": true },
        },
        {
          "id": "desk-lamp",
          "name": "Desk Lamp",
          "topic": "desk_lamp",
          "type": "lightbulb",
          "features": { "brightness": true },
          "homekit": false,
        },
      ],
    }
    "#;

    #[test]
    fn loads_relaxed_json_in_order() {
        let registry = Registry::load(DOC).unwrap();
        let ids: Vec<_> = registry.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["living-temp", "desk-lamp"]);

        let lamp = registry.get("desk-lamp").unwrap();
        assert_eq!(lamp.device_type, DeviceType::Lightbulb);
        assert!(lamp.features.brightness);
        assert!(!lamp.homekit);
        assert!(lamp.web);
        assert_eq!(registry.homekit_count(), 1);
    }

    #[test]
    fn routing_key_lookup() {
        let registry = Registry::load(DOC).unwrap();
        assert_eq!(registry.by_topic("desk_lamp").unwrap().id, "desk-lamp");
        assert!(registry.by_topic("unknown").is_none());
    }

    #[test]
    fn first_routing_key_wins() {
        let doc = r#"{"devices": [
            {"id": "a", "name": "A", "topic": "shared", "type": "outlet"},
            {"id": "b", "name": "B", "topic": "shared", "type": "switch"},
        ]}"#;
        let registry = Registry::load(doc).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.by_topic("shared").unwrap().id, "a");
    }

    #[test]
    fn rejects_empty_document() {
        assert!(matches!(
            Registry::load(r#"{"devices": []}"#),
            Err(CoreError::NoDevices)
        ));
        assert!(matches!(Registry::load("{}"), Err(CoreError::NoDevices)));
    }

    #[test]
    fn rejects_missing_fields_in_order() {
        let err = Registry::load(r#"{"devices": [{"name": "x"}]}"#).unwrap_err();
        assert_eq!(err.to_string(), "device 0 has no ID");

        let err = Registry::load(r#"{"devices": [{"id": "x", "topic": "t"}]}"#).unwrap_err();
        assert_eq!(err.to_string(), "device x has no name");

        let err = Registry::load(r#"{"devices": [{"id": "x", "name": "X"}]}"#).unwrap_err();
        assert_eq!(err.to_string(), "device x has no topic");

        let err =
            Registry::load(r#"{"devices": [{"id": "x", "name": "X", "topic": "t"}]}"#).unwrap_err();
        assert_eq!(err.to_string(), "device x has no type");
    }

    #[test]
    fn rejects_unknown_type() {
        let err = Registry::load(
            r#"{"devices": [{"id": "x", "name": "X", "topic": "t", "type": "thermostat"}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::InvalidDeviceType { .. }));
        assert!(err.is_config());
    }

    #[test]
    fn rejects_duplicate_ids() {
        let err = Registry::load(
            r#"{"devices": [
                {"id": "x", "name": "X", "topic": "t1", "type": "outlet"},
                {"id": "x", "name": "Y", "topic": "t2", "type": "outlet"},
            ]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::DuplicateDevice { ref id } if id == "x"));
    }

    #[test]
    fn rejects_garbage() {
        let err = Registry::load("devices: [").unwrap_err();
        assert!(matches!(err, CoreError::RegistryParse { .. }));
    }

    #[test]
    fn load_file_reports_io_errors() {
        let dir = tempfile::tempdir().unwrap();
        let err = Registry::load_file(dir.path().join("missing.hujson")).unwrap_err();
        assert!(matches!(err, CoreError::Io { .. }));

        let path = dir.path().join("devices.hujson");
        std::fs::write(&path, DOC).unwrap();
        assert_eq!(Registry::load_file(&path).unwrap().len(), 2);
    }
}
