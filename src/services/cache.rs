//! State cache — latest application state per whiteboard, ahead of the store.
//!
//! DESIGN
//! ======
//! Each entry holds the last known state object and a version counter.
//! Every mutation bumps `version`; the persistence sweep records the version
//! it wrote in `flushed_version`. An entry is dirty while the two differ.
//!
//! Delta application is a shallow, last-writer-wins merge per top-level
//! field. There is no deep merge: snapshots are the source of truth, deltas
//! are hints.
//!
//! Snapshot and clear also record the image beside the state. Only that
//! record overrides the durable snapshot on join; an `image` field seeded
//! from the store may be older than the durable snapshot column.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::{Map, Value, json};
use uuid::Uuid;

/// Key inside the state object that carries the latest snapshot image.
pub const STATE_IMAGE: &str = "image";

#[derive(Debug, Default)]
struct CacheEntry {
    state: Option<Value>,
    /// Image from a snapshot or clear handled by this process.
    snapshot_image: Option<String>,
    version: u64,
    flushed_version: u64,
}

impl CacheEntry {
    fn is_dirty(&self) -> bool {
        self.state.is_some() && self.version != self.flushed_version
    }

    fn set(&mut self, state: Value) {
        self.state = Some(state);
        self.version += 1;
    }
}

/// A dirty state read out for persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct DirtyState {
    pub whiteboard_id: Uuid,
    pub state: Value,
    pub version: u64,
}

#[derive(Clone, Default)]
pub struct StateCache {
    entries: Arc<Mutex<HashMap<Uuid, CacheEntry>>>,
}

impl StateCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply an `update` event. `full_state` replaces the cached state
    /// wholesale and wins over `delta`; otherwise an object `delta` is merged
    /// shallowly. Returns whether the cache changed.
    pub fn apply_update(&self, whiteboard_id: Uuid, delta: Option<&Value>, full_state: Option<&Value>) -> bool {
        if let Some(full) = full_state {
            self.lock().entry(whiteboard_id).or_default().set(full.clone());
            return true;
        }

        let Some(Value::Object(delta)) = delta else {
            return false;
        };

        let mut entries = self.lock();
        let entry = entries.entry(whiteboard_id).or_default();
        let merged = merge_shallow(entry.state.take(), delta);
        entry.set(merged);
        true
    }

    /// Record a snapshot or clear (`image` empty). The cached state becomes
    /// `{image}` and the image overrides the durable one for later joins.
    pub fn set_snapshot(&self, whiteboard_id: Uuid, image: &str) {
        let mut entries = self.lock();
        let entry = entries.entry(whiteboard_id).or_default();
        entry.set(json!({ STATE_IMAGE: image }));
        entry.snapshot_image = Some(image.to_owned());
    }

    /// Prime the cache with durable state on join. Ignored if an entry
    /// already exists. The seeded entry starts clean.
    pub fn seed(&self, whiteboard_id: Uuid, state: Value) {
        self.lock().entry(whiteboard_id).or_insert_with(|| CacheEntry {
            state: Some(state),
            ..CacheEntry::default()
        });
    }

    #[cfg(test)]
    #[must_use]
    pub fn get(&self, whiteboard_id: Uuid) -> Option<Value> {
        self.lock().get(&whiteboard_id).and_then(|e| e.state.clone())
    }

    /// Image of the latest snapshot or clear seen by this process. An empty
    /// string is a real value (the board was cleared).
    #[must_use]
    pub fn image(&self, whiteboard_id: Uuid) -> Option<String> {
        self.lock().get(&whiteboard_id).and_then(|e| e.snapshot_image.clone())
    }

    /// Copy out every entry with unflushed changes.
    #[must_use]
    pub fn dirty(&self) -> Vec<DirtyState> {
        self.lock()
            .iter()
            .filter(|(_, e)| e.is_dirty())
            .filter_map(|(id, e)| {
                e.state.clone().map(|state| DirtyState { whiteboard_id: *id, state, version: e.version })
            })
            .collect()
    }

    /// Acknowledge a successful write. Ignored if the entry changed since
    /// `version` was read, so the newer state stays dirty.
    pub fn mark_flushed(&self, whiteboard_id: Uuid, version: u64) {
        if let Some(entry) = self.lock().get_mut(&whiteboard_id) {
            if entry.version == version {
                entry.flushed_version = version;
            }
        }
    }

    /// Drop clean entries for which `keep` returns false. Returns how many
    /// entries were evicted.
    pub fn evict_clean(&self, keep: impl Fn(Uuid) -> bool) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|id, e| e.is_dirty() || keep(*id));
        before - entries.len()
    }

    #[cfg(test)]
    #[must_use]
    pub fn is_dirty(&self, whiteboard_id: Uuid) -> bool {
        self.lock().get(&whiteboard_id).is_some_and(CacheEntry::is_dirty)
    }
}

/// Overwrite top-level fields of `base` with those in `delta`. A missing or
/// non-object base is treated as `{}`.
#[must_use]
pub fn merge_shallow(base: Option<Value>, delta: &Map<String, Value>) -> Value {
    let mut merged = match base {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };
    for (key, value) in delta {
        merged.insert(key.clone(), value.clone());
    }
    Value::Object(merged)
}

#[cfg(test)]
#[path = "cache_test.rs"]
mod tests;
