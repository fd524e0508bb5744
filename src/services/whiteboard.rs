//! Whiteboard service — join/recovery, snapshot and clear handling.
//!
//! DESIGN
//! ======
//! Join is the only path that reads the store on behalf of a client. It
//! builds the recovery payload from three sources, freshest wins:
//!
//! - the cached image of a snapshot or clear handled by this process,
//! - the durable snapshot image and recent stroke log,
//! - strokes still buffered in the coalescer.
//!
//! The durable read is bracketed by the coalescer's `mark`/`recover`; a read
//! that raced a stroke-log write is repeated, up to `JOIN_READ_ATTEMPTS`.
//!
//! The client is registered in the room only after the payload is built, so
//! it never receives relayed events ahead of its `whiteboard:init`.
//!
//! Snapshot and clear update the cache and reserve the stroke-log reset
//! synchronously, then hand the durable write to a spawned task; relay never
//! waits on storage.
//!
//! ERROR HANDLING
//! ==============
//! Join failures surface to the joining client as `whiteboard:error`.
//! Snapshot and clear write failures are logged; the cache still holds the
//! new image, so clients joining on this instance see it.

use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::frame::{Data, ErrorCode, Frame, now_ms};
use crate::services::coalescer::LogReset;
use crate::state::{AppState, Stroke};
use crate::store::StoreError;

/// Durable reads a join makes before settling for a stale stroke log.
const JOIN_READ_ATTEMPTS: usize = 3;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum JoinError {
    #[error("Whiteboard not found")]
    NotFound(Uuid),
    #[error("Join failed")]
    Store(#[from] StoreError),
}

impl ErrorCode for JoinError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_WHITEBOARD_NOT_FOUND",
            Self::Store(_) => "E_JOIN_FAILED",
        }
    }
}

/// Recovery payload sent to a joining client as `whiteboard:init`.
#[derive(Debug, Clone, PartialEq)]
pub struct InitPayload {
    pub snapshot_image: String,
    pub snapshot_at: Option<i64>,
    /// Strokes drawn since the snapshot, oldest first.
    pub strokes: Vec<Stroke>,
}

impl InitPayload {
    #[must_use]
    pub fn into_data(self) -> Data {
        let mut data = Data::new();
        data.insert("snapshotImage".into(), json!(self.snapshot_image));
        data.insert("snapshotAt".into(), json!(self.snapshot_at));
        data.insert("strokes".into(), json!(self.strokes));
        data
    }
}

// =============================================================================
// JOIN
// =============================================================================

/// Join a whiteboard: ensure membership, build the recovery payload, then
/// register `client_id` in the room.
///
/// # Errors
///
/// Returns `NotFound` if the whiteboard does not exist, and `Store` if the
/// lookup or the membership write fails. No room registration happens on
/// error.
pub async fn join_whiteboard(
    state: &AppState,
    whiteboard_id: Uuid,
    user_id: Uuid,
    client_id: Uuid,
    tx: mpsc::Sender<Frame>,
) -> Result<InitPayload, JoinError> {
    let mut mark = state.coalescer.mark(whiteboard_id);
    let Some(mut board) = state.store.find_whiteboard(whiteboard_id).await? else {
        return Err(JoinError::NotFound(whiteboard_id));
    };

    if !board.is_member(user_id) {
        state.store.add_member(board.id, user_id).await?;
        info!(whiteboard_id = %board.id, %user_id, owner_id = %board.owner_id, "whiteboard: added member");
    }

    let mut attempt = 1;
    let strokes = loop {
        let recovery = state.coalescer.recover(whiteboard_id, mark, std::mem::take(&mut board.strokes));
        if !recovery.stale || attempt == JOIN_READ_ATTEMPTS {
            break recovery.strokes;
        }
        debug!(%whiteboard_id, attempt, "whiteboard: stroke log changed during join read; rereading");
        attempt += 1;
        mark = state.coalescer.mark(whiteboard_id);
        board = state
            .store
            .find_whiteboard(whiteboard_id)
            .await?
            .ok_or(JoinError::NotFound(whiteboard_id))?;
    };

    // Later deltas merge onto the durable state, not onto `{}`.
    state.cache.seed(whiteboard_id, board.state);

    let snapshot_image = state
        .cache
        .image(whiteboard_id)
        .unwrap_or(board.snapshot_image);

    state.registry.join(whiteboard_id, client_id, tx);
    info!(
        %whiteboard_id,
        %client_id,
        question_id = board.question_id.as_deref().unwrap_or(""),
        strokes = strokes.len(),
        peers = state.registry.room_size(whiteboard_id).saturating_sub(1),
        "whiteboard: joined"
    );

    Ok(InitPayload { snapshot_image, snapshot_at: board.snapshot_at, strokes })
}

// =============================================================================
// MUTATIONS
// =============================================================================

/// Fold an `update` event into the state cache. The periodic sweep persists
/// it later.
pub fn apply_update(
    state: &AppState,
    whiteboard_id: Uuid,
    delta: Option<&serde_json::Value>,
    full_state: Option<&serde_json::Value>,
) {
    state.cache.apply_update(whiteboard_id, delta, full_state);
}

/// Queue a stroke segment for the next coalesced write.
pub fn apply_stroke(state: &AppState, whiteboard_id: Uuid, stroke: Stroke) {
    state.coalescer.append(whiteboard_id, stroke);
}

/// Record a new baked image. The cached state becomes `{image}`, buffered
/// strokes are dropped, and the store write (which also empties the stroke
/// log) runs in the background ahead of any later stroke flush.
pub fn apply_snapshot(state: &AppState, whiteboard_id: Uuid, image: String) -> JoinHandle<()> {
    state.cache.set_snapshot(whiteboard_id, &image);
    let reset = state.coalescer.begin_reset(whiteboard_id);
    let dropped = reset.dropped;

    let coalescer = state.coalescer.clone();
    let at_ms = now_ms();
    tokio::spawn(async move {
        match coalescer.run_reset(reset, LogReset::Snapshot { image, at_ms }).await {
            Ok(()) => info!(%whiteboard_id, dropped, "whiteboard: snapshot saved"),
            Err(e) => error!(error = %e, %whiteboard_id, "whiteboard: snapshot write failed"),
        }
    })
}

/// Blank the board. Same shape as `apply_snapshot` with an empty image.
pub fn apply_clear(state: &AppState, whiteboard_id: Uuid) -> JoinHandle<()> {
    state.cache.set_snapshot(whiteboard_id, "");
    let reset = state.coalescer.begin_reset(whiteboard_id);
    let dropped = reset.dropped;

    let coalescer = state.coalescer.clone();
    tokio::spawn(async move {
        match coalescer.run_reset(reset, LogReset::Clear).await {
            Ok(()) => info!(%whiteboard_id, dropped, "whiteboard: cleared"),
            Err(e) => error!(error = %e, %whiteboard_id, "whiteboard: clear write failed"),
        }
    })
}

#[cfg(test)]
#[path = "whiteboard_test.rs"]
mod tests;
