use super::*;
use crate::state::test_helpers::{connect_client, stroke, test_app_state};
use crate::store::memory::StoreCall;
use serde_json::json;
use std::time::Duration;
use uuid::Uuid;

fn state_writes(store: &crate::store::memory::MemoryStore) -> usize {
    store.count_calls(|c| matches!(c, StoreCall::ReplaceState { .. }))
}

// =============================================================================
// sweep
// =============================================================================

#[tokio::test]
async fn sweep_writes_dirty_state_once() {
    let (state, store) = test_app_state();
    let id = store.create_whiteboard(Uuid::new_v4());
    let (_client, _rx) = connect_client(&state, id);
    state.cache.apply_update(id, Some(&json!({ "tool": "pen" })), None);

    assert_eq!(sweep(&state).await, 1);
    assert_eq!(store.get(id).unwrap().state, json!({ "tool": "pen" }));

    assert_eq!(sweep(&state).await, 0, "clean entries are not rewritten");
    assert_eq!(state_writes(&store), 1);
}

#[tokio::test]
async fn sweep_writes_merged_result_of_many_deltas() {
    let (state, store) = test_app_state();
    let id = store.create_whiteboard(Uuid::new_v4());
    for (k, v) in [("a", 1), ("b", 2), ("a", 3)] {
        state.cache.apply_update(id, Some(&json!({ k: v })), None);
    }

    sweep(&state).await;

    assert_eq!(store.calls(), vec![StoreCall::ReplaceState { id, state: json!({ "a": 3, "b": 2 }) }]);
}

#[tokio::test]
async fn failed_write_stays_dirty_and_other_boards_still_flush() {
    let (state, store) = test_app_state();
    let id = store.create_whiteboard(Uuid::new_v4());
    let (_client, _rx) = connect_client(&state, id);
    state.cache.apply_update(id, Some(&json!({ "x": 1 })), None);
    store.set_fail_writes(true);

    assert_eq!(sweep(&state).await, 0);
    assert!(state.cache.is_dirty(id));

    store.set_fail_writes(false);
    assert_eq!(sweep(&state).await, 1);
    assert!(!state.cache.is_dirty(id));
}

#[tokio::test]
async fn sweep_evicts_clean_entries_without_room() {
    let (state, store) = test_app_state();
    let idle = store.create_whiteboard(Uuid::new_v4());
    let active = store.create_whiteboard(Uuid::new_v4());
    let (_client, _rx) = connect_client(&state, active);
    state.cache.apply_update(idle, Some(&json!({ "x": 1 })), None);
    state.cache.apply_update(active, Some(&json!({ "y": 1 })), None);

    sweep(&state).await;

    assert!(state.cache.get(idle).is_none(), "idle board evicted after its write");
    assert_eq!(state.cache.get(active), Some(json!({ "y": 1 })));
    assert_eq!(store.get(idle).unwrap().state, json!({ "x": 1 }));
}

#[tokio::test]
async fn sweep_evicts_settled_stroke_buffers_without_room() {
    let (state, store) = test_app_state();
    let idle = store.create_whiteboard(Uuid::new_v4());
    let active = store.create_whiteboard(Uuid::new_v4());
    let (_client, _rx) = connect_client(&state, active);
    for id in [idle, active] {
        state.coalescer.append(id, stroke(1));
        state.coalescer.flush(id).await;
    }
    assert_eq!(state.coalescer.buffered_boards(), 2);

    sweep(&state).await;

    assert_eq!(state.coalescer.buffered_boards(), 1);
    assert_eq!(store.get(idle).unwrap().strokes, vec![stroke(1)]);
}

#[tokio::test]
async fn write_to_deleted_whiteboard_is_harmless() {
    let (state, store) = test_app_state();
    let gone = Uuid::new_v4();
    state.cache.apply_update(gone, Some(&json!({ "x": 1 })), None);

    assert_eq!(sweep(&state).await, 1);
    assert!(store.get(gone).is_none());
}

// =============================================================================
// spawn_persistence_task
// =============================================================================

#[tokio::test]
async fn background_task_persists_on_interval() {
    let (state, store) = test_app_state();
    let id = store.create_whiteboard(Uuid::new_v4());
    let (_client, _rx) = connect_client(&state, id);
    let handle = spawn_persistence_task(state.clone());

    state.cache.apply_update(id, None, Some(&json!({ "full": true })));
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(store.get(id).unwrap().state, json!({ "full": true }));
    assert_eq!(state_writes(&store), 1);
    handle.abort();
}
