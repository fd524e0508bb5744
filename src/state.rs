//! Shared application state and whiteboard domain types.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor. It
//! owns the three transient services of the sync core (room registry, stroke
//! coalescer, state cache) plus the durable store they write through. The
//! services are constructed once at startup and cloned by handle, so tests
//! can build an isolated instance per case.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::services::auth::TokenVerifier;
use crate::services::cache::StateCache;
use crate::services::coalescer::StrokeCoalescer;
use crate::services::registry::Registry;
use crate::store::WhiteboardStore;

// =============================================================================
// STROKE
// =============================================================================

/// One line or eraser segment drawn by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    pub color: String,
    pub thickness: f64,
    #[serde(default)]
    pub erase: bool,
    /// Client timestamp, milliseconds.
    pub ts: i64,
}

// =============================================================================
// WHITEBOARD
// =============================================================================

/// Durable whiteboard as read from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Whiteboard {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub question_id: Option<String>,
    /// Member user ids. Set semantics: never contains duplicates.
    pub members: Vec<Uuid>,
    /// Last persisted application state object.
    pub state: serde_json::Value,
    /// Latest baked canvas, usually a data URL. Empty when none.
    pub snapshot_image: String,
    /// When `snapshot_image` was taken, milliseconds since Unix epoch.
    pub snapshot_at: Option<i64>,
    /// Recent strokes drawn since the snapshot, oldest first.
    pub strokes: Vec<Stroke>,
}

impl Whiteboard {
    #[must_use]
    pub fn is_member(&self, user_id: Uuid) -> bool {
        self.members.contains(&user_id)
    }
}

// =============================================================================
// APP STATE
// =============================================================================

/// Shared application state, injected into Axum handlers via State extractor.
/// Clone is required by Axum; all inner fields are Arc-wrapped or Clone.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn WhiteboardStore>,
    pub registry: Registry,
    pub coalescer: StrokeCoalescer,
    pub cache: StateCache,
    pub verifier: TokenVerifier,
    pub config: SyncConfig,
}

impl AppState {
    #[must_use]
    pub fn new(store: Arc<dyn WhiteboardStore>, verifier: TokenVerifier, config: SyncConfig) -> Self {
        Self {
            coalescer: StrokeCoalescer::new(store.clone(), config),
            store,
            registry: Registry::new(),
            cache: StateCache::new(),
            verifier,
            config,
        }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================


#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
