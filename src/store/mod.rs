//! Durable whiteboard store contract.
//!
//! SYSTEM CONTEXT
//! ==============
//! The sync core never talks to the database directly. Join, the stroke
//! coalescer, the persistence sweep and snapshot/clear handling all go
//! through `WhiteboardStore`, which keeps the in-memory services testable
//! without a live Postgres.
//!
//! The durable `Whiteboard` row is owned by the store; the server only holds
//! transient cached copies and deltas.

pub mod postgres;

#[cfg(test)]
pub mod memory;

use uuid::Uuid;

use crate::state::{Stroke, Whiteboard};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Narrow read/write contract the real-time core needs from durable storage.
///
/// Writes against a whiteboard that no longer exists are no-ops, not errors.
#[async_trait::async_trait]
pub trait WhiteboardStore: Send + Sync {
    /// Load a whiteboard with its member set. `Ok(None)` if it does not exist.
    async fn find_whiteboard(&self, id: Uuid) -> Result<Option<Whiteboard>, StoreError>;

    /// Add `user_id` to the member set. Idempotent.
    async fn add_member(&self, id: Uuid, user_id: Uuid) -> Result<(), StoreError>;

    /// Append `strokes` to the stroke log, then keep only the last `max_len`.
    async fn append_strokes_bounded(&self, id: Uuid, strokes: &[Stroke], max_len: usize) -> Result<(), StoreError>;

    /// Replace the snapshot image and timestamp, and empty the stroke log.
    async fn replace_snapshot(&self, id: Uuid, image: &str, at_ms: i64) -> Result<(), StoreError>;

    /// Blank the snapshot image and empty the stroke log.
    async fn clear_strokes_and_snapshot(&self, id: Uuid) -> Result<(), StoreError>;

    /// Replace the full application state object.
    async fn replace_state(&self, id: Uuid, state: &serde_json::Value) -> Result<(), StoreError>;
}
