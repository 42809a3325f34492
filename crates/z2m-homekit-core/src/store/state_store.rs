// ── Authoritative device state store ──
//
// One reader/writer lock over the whole map. A merge applies every named
// field before the write guard drops, so readers never observe a torn
// update. Nothing in here performs I/O.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};

use crate::model::{DeviceState, StateField};

#[derive(Debug, Default)]
pub struct StateStore {
    states: RwLock<HashMap<String, DeviceState>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an empty state for `id` unless one exists.
    pub fn seed(&self, id: &str) {
        self.states
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id.to_owned())
            .or_default();
    }

    /// Selectively merge `fields` from `candidate` and stamp
    /// `last_updated`. Returns the post-merge state, or `None` if `id` was
    /// never seeded.
    pub fn merge(
        &self,
        id: &str,
        candidate: &DeviceState,
        fields: &[StateField],
        now: DateTime<Utc>,
    ) -> Option<DeviceState> {
        let mut states = self.states.write().unwrap_or_else(PoisonError::into_inner);
        let state = states.get_mut(id)?;
        state.merge_fields(candidate, fields);
        state.last_updated = Some(now);
        Some(state.clone())
    }

    pub fn get(&self, id: &str) -> Option<DeviceState> {
        self.states
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Copy of every tracked state, taken under a single read guard.
    pub fn snapshot(&self) -> HashMap<String, DeviceState> {
        self.states
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.states.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn merge_requires_seed() {
        let store = StateStore::new();
        let candidate = DeviceState {
            temperature: Some(21.0),
            ..DeviceState::default()
        };
        assert!(
            store
                .merge("ghost", &candidate, &[StateField::Temperature], Utc::now())
                .is_none()
        );
        assert!(store.is_empty());
    }

    #[test]
    fn merge_is_selective_and_stamps_last_updated() {
        let store = StateStore::new();
        store.seed("office");
        let now = Utc::now();

        store.merge(
            "office",
            &DeviceState {
                temperature: Some(20.0),
                ..DeviceState::default()
            },
            &[StateField::Temperature],
            now,
        );
        let merged = store
            .merge(
                "office",
                &DeviceState {
                    temperature: Some(99.0),
                    humidity: Some(55.0),
                    ..DeviceState::default()
                },
                &[StateField::Humidity],
                now,
            )
            .unwrap();

        assert_eq!(merged.temperature, Some(20.0));
        assert_eq!(merged.humidity, Some(55.0));
        assert_eq!(merged.last_updated, Some(now));
        assert_eq!(store.get("office").unwrap(), merged);
    }

    #[test]
    fn seed_does_not_reset() {
        let store = StateStore::new();
        store.seed("lamp");
        store.merge(
            "lamp",
            &DeviceState {
                on: Some(true),
                ..DeviceState::default()
            },
            &[StateField::On],
            Utc::now(),
        );
        store.seed("lamp");
        assert_eq!(store.get("lamp").unwrap().on, Some(true));
    }

    #[test]
    fn concurrent_merges_never_tear() {
        let store = Arc::new(StateStore::new());
        store.seed("lamp");

        let writers: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        let v = i * 10;
                        store.merge(
                            "lamp",
                            &DeviceState {
                                brightness: Some(v),
                                color_temp: Some(v),
                                ..DeviceState::default()
                            },
                            &[StateField::Brightness, StateField::ColorTemp],
                            Utc::now(),
                        );
                    }
                })
            })
            .collect();

        for _ in 0..500 {
            let snap = store.snapshot();
            let lamp = &snap["lamp"];
            assert_eq!(lamp.brightness, lamp.color_temp);
        }
        for w in writers {
            w.join().unwrap();
        }
    }
}
