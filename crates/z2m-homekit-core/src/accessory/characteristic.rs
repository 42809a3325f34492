// ── Characteristics ──
//
// The live values an accessory server exposes to controllers. Local code
// sets values with `set_value`; a controller write arrives through
// `remote_update`, which stores the value and runs the registered hooks.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use strum::{AsRefStr, Display};

/// Characteristic kinds the bridge exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, AsRefStr)]
pub enum CharacteristicType {
    On,
    Brightness,
    Hue,
    Saturation,
    ColorTemperature,
    RotationSpeed,
    CurrentTemperature,
    CurrentRelativeHumidity,
    BatteryLevel,
    StatusLowBattery,
    OccupancyDetected,
    ContactSensorState,
    LeakDetected,
    SmokeDetected,
}

impl CharacteristicType {
    /// Whether controllers may write this characteristic.
    pub fn is_writable(self) -> bool {
        matches!(
            self,
            Self::On
                | Self::Brightness
                | Self::Hue
                | Self::Saturation
                | Self::ColorTemperature
                | Self::RotationSpeed
        )
    }

    fn initial(self) -> Value {
        match self {
            Self::On => Value::Bool(false),
            Self::Hue
            | Self::Saturation
            | Self::RotationSpeed
            | Self::CurrentTemperature
            | Self::CurrentRelativeHumidity => Value::Float(0.0),
            Self::ColorTemperature => Value::Int(crate::codec::COLOR_TEMP_MIN),
            Self::Brightness
            | Self::BatteryLevel
            | Self::StatusLowBattery
            | Self::OccupancyDetected
            | Self::ContactSensorState
            | Self::LeakDetected
            | Self::SmokeDetected => Value::Int(0),
        }
    }
}

/// A characteristic value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i32),
    Float(f64),
}

impl Value {
    pub fn as_bool(self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(v),
            _ => None,
        }
    }

    /// Integer view. Floats truncate.
    #[allow(clippy::cast_possible_truncation)]
    pub fn as_int(self) -> Option<i32> {
        match self {
            Self::Int(v) => Some(v),
            Self::Float(v) => Some(v as i32),
            Self::Bool(_) => None,
        }
    }

    pub fn as_float(self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(v),
            Self::Int(v) => Some(f64::from(v)),
            Self::Bool(_) => None,
        }
    }
}

type RemoteUpdateHook = Box<dyn Fn(Value) + Send + Sync>;

struct CharacteristicInner {
    kind: CharacteristicType,
    value: RwLock<Value>,
    hooks: RwLock<Vec<RemoteUpdateHook>>,
}

/// Shared handle to one characteristic. Cheap to clone; clones observe
/// the same value.
#[derive(Clone)]
pub struct Characteristic {
    inner: Arc<CharacteristicInner>,
}

impl fmt::Debug for Characteristic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Characteristic")
            .field("kind", &self.inner.kind)
            .field("value", &self.value())
            .finish_non_exhaustive()
    }
}

impl Characteristic {
    pub fn new(kind: CharacteristicType) -> Self {
        Self {
            inner: Arc::new(CharacteristicInner {
                kind,
                value: RwLock::new(kind.initial()),
                hooks: RwLock::new(Vec::new()),
            }),
        }
    }

    pub fn kind(&self) -> CharacteristicType {
        self.inner.kind
    }

    pub fn value(&self) -> Value {
        *self.inner.value.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Local update. Does not run remote-update hooks.
    pub fn set_value(&self, value: Value) {
        *self.inner.value.write().unwrap_or_else(PoisonError::into_inner) = value;
    }

    /// Register a hook for controller writes.
    pub fn on_remote_update(&self, hook: impl Fn(Value) + Send + Sync + 'static) {
        self.inner
            .hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(hook));
    }

    /// A controller wrote `value`: store it, then run every hook.
    pub fn remote_update(&self, value: Value) {
        self.set_value(value);
        let hooks = self.inner.hooks.read().unwrap_or_else(PoisonError::into_inner);
        for hook in hooks.iter() {
            hook(value);
        }
    }

    pub fn has_hooks(&self) -> bool {
        !self
            .inner
            .hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }
}
