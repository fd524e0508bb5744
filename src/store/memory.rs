//! In-memory `WhiteboardStore` for tests.
//!
//! Mirrors the Postgres semantics (bounded append, snapshot clears strokes,
//! writes to unknown ids are no-ops) and records every write so tests can
//! assert on write counts. Writes can be forced to fail or delayed.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use uuid::Uuid;

use super::{StoreError, WhiteboardStore};
use crate::state::{Stroke, Whiteboard};

/// One recorded write call.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCall {
    AddMember { id: Uuid, user_id: Uuid },
    AppendStrokes { id: Uuid, count: usize },
    ReplaceSnapshot { id: Uuid },
    Clear { id: Uuid },
    ReplaceState { id: Uuid, state: serde_json::Value },
}

#[derive(Default)]
pub struct MemoryStore {
    boards: Mutex<HashMap<Uuid, Whiteboard>>,
    calls: Mutex<Vec<StoreCall>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    write_delay: Mutex<Option<Duration>>,
    reset_delay: Mutex<Option<Duration>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a whiteboard owned by `owner`, who becomes its first member.
    pub fn create_whiteboard(&self, owner: Uuid) -> Uuid {
        let id = Uuid::new_v4();
        let board = Whiteboard {
            id,
            owner_id: owner,
            question_id: None,
            members: vec![owner],
            state: serde_json::json!({}),
            snapshot_image: String::new(),
            snapshot_at: None,
            strokes: Vec::new(),
        };
        self.boards.lock().unwrap().insert(id, board);
        id
    }

    /// Current durable copy of a whiteboard.
    pub fn get(&self, id: Uuid) -> Option<Whiteboard> {
        self.boards.lock().unwrap().get(&id).cloned()
    }

    /// Mutate the durable copy directly (test setup).
    pub fn update(&self, id: Uuid, f: impl FnOnce(&mut Whiteboard)) {
        if let Some(board) = self.boards.lock().unwrap().get_mut(&id) {
            f(board);
        }
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count_calls(&self, pred: impl Fn(&StoreCall) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_write_delay(&self, delay: Option<Duration>) {
        *self.write_delay.lock().unwrap() = delay;
    }

    /// Extra delay for snapshot and clear writes only, on top of `write_delay`.
    pub fn set_reset_delay(&self, delay: Option<Duration>) {
        *self.reset_delay.lock().unwrap() = delay;
    }

    async fn write(&self, call: StoreCall, apply: impl FnOnce(&mut Whiteboard)) -> Result<(), StoreError> {
        let reset_delay = match call {
            StoreCall::ReplaceSnapshot { .. } | StoreCall::Clear { .. } => *self.reset_delay.lock().unwrap(),
            _ => None,
        };
        if let Some(delay) = reset_delay {
            tokio::time::sleep(delay).await;
        }
        let delay = *self.write_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.calls.lock().unwrap().push(call.clone());
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!("forced failure: {call:?}")));
        }
        let id = match &call {
            StoreCall::AddMember { id, .. }
            | StoreCall::AppendStrokes { id, .. }
            | StoreCall::ReplaceSnapshot { id }
            | StoreCall::Clear { id }
            | StoreCall::ReplaceState { id, .. } => *id,
        };
        if let Some(board) = self.boards.lock().unwrap().get_mut(&id) {
            apply(board);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl WhiteboardStore for MemoryStore {
    async fn find_whiteboard(&self, id: Uuid) -> Result<Option<Whiteboard>, StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("forced read failure".into()));
        }
        Ok(self.get(id))
    }

    async fn add_member(&self, id: Uuid, user_id: Uuid) -> Result<(), StoreError> {
        self.write(StoreCall::AddMember { id, user_id }, |board| {
            if !board.members.contains(&user_id) {
                board.members.push(user_id);
            }
        })
        .await
    }

    async fn append_strokes_bounded(&self, id: Uuid, strokes: &[Stroke], max_len: usize) -> Result<(), StoreError> {
        self.write(StoreCall::AppendStrokes { id, count: strokes.len() }, |board| {
            board.strokes.extend_from_slice(strokes);
            let excess = board.strokes.len().saturating_sub(max_len);
            board.strokes.drain(..excess);
        })
        .await
    }

    async fn replace_snapshot(&self, id: Uuid, image: &str, at_ms: i64) -> Result<(), StoreError> {
        self.write(StoreCall::ReplaceSnapshot { id }, |board| {
            board.snapshot_image = image.to_owned();
            board.snapshot_at = Some(at_ms);
            board.strokes.clear();
        })
        .await
    }

    async fn clear_strokes_and_snapshot(&self, id: Uuid) -> Result<(), StoreError> {
        self.write(StoreCall::Clear { id }, |board| {
            board.snapshot_image.clear();
            board.strokes.clear();
        })
        .await
    }

    async fn replace_state(&self, id: Uuid, state: &serde_json::Value) -> Result<(), StoreError> {
        self.write(StoreCall::ReplaceState { id, state: state.clone() }, |board| {
            board.state = state.clone();
        })
        .await
    }
}
