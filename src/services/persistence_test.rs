use super::*;
use crate::state::{RoomState, test_helpers};
use uuid::Uuid;

// =============================================================================
// env_parse
// =============================================================================

#[test]
fn env_parse_missing_returns_default() {
    let val: usize = env_parse("__TEST_TB_NONEXISTENT_KEY__", 42);
    assert_eq!(val, 42);
}

#[test]
fn env_parse_present_valid() {
    unsafe { std::env::set_var("__TEST_TB_EP_VALID__", "99") };
    let val: usize = env_parse("__TEST_TB_EP_VALID__", 0);
    assert_eq!(val, 99);
    unsafe { std::env::remove_var("__TEST_TB_EP_VALID__") };
}

#[test]
fn env_parse_present_invalid_returns_default() {
    unsafe { std::env::set_var("__TEST_TB_EP_INVALID__", "notanumber") };
    let val: u64 = env_parse("__TEST_TB_EP_INVALID__", 7);
    assert_eq!(val, 7);
    unsafe { std::env::remove_var("__TEST_TB_EP_INVALID__") };
}

#[test]
fn frame_persist_config_defaults_match_constants() {
    unsafe {
        std::env::remove_var("FRAME_PERSIST_QUEUE_CAPACITY");
        std::env::remove_var("FRAME_PERSIST_BATCH_SIZE");
        std::env::remove_var("FRAME_PERSIST_FLUSH_MS");
        std::env::remove_var("FRAME_PERSIST_RETRIES");
        std::env::remove_var("FRAME_PERSIST_RETRY_BASE_MS");
    }
    let config = FramePersistConfig::from_env();
    assert_eq!(config.queue_capacity, DEFAULT_FRAME_PERSIST_QUEUE_CAPACITY);
    assert_eq!(config.batch_size, DEFAULT_FRAME_PERSIST_BATCH_SIZE);
    assert_eq!(config.flush_ms, DEFAULT_FRAME_PERSIST_FLUSH_MS);
    assert_eq!(config.retries, DEFAULT_FRAME_PERSIST_RETRIES);
    assert_eq!(config.retry_base_ms, DEFAULT_FRAME_PERSIST_RETRY_BASE_MS);
}

// =============================================================================
// enqueue_frame
// =============================================================================

#[tokio::test]
async fn enqueue_frame_no_sender_is_noop() {
    let state = test_helpers::test_app_state();
    let frame = Frame::request("channel:publish", crate::frame::Data::new());
    enqueue_frame(&state, &frame);
}

#[tokio::test]
async fn enqueue_frame_sends_to_channel() {
    let (tx, mut rx) = tokio::sync::mpsc::channel::<Frame>(16);
    let mut state = test_helpers::test_app_state();
    state.frame_persist_tx = Some(tx);

    let frame = Frame::request("room:vote", crate::frame::Data::new());
    enqueue_frame(&state, &frame);

    let received = rx.try_recv().expect("frame should be queued");
    assert_eq!(received.id, frame.id);
    assert_eq!(received.syscall, "room:vote");
}

#[tokio::test]
async fn enqueue_frame_full_channel_drops_frame() {
    let (tx, mut rx) = tokio::sync::mpsc::channel::<Frame>(1);
    let mut state = test_helpers::test_app_state();
    state.frame_persist_tx = Some(tx);

    let first = Frame::request("room:join", crate::frame::Data::new());
    let second = Frame::request("room:leave", crate::frame::Data::new());
    enqueue_frame(&state, &first);
    enqueue_frame(&state, &second);

    assert_eq!(rx.try_recv().expect("first frame queued").id, first.id);
    assert!(rx.try_recv().is_err(), "second frame should have been dropped");
}

// =============================================================================
// room flush bookkeeping
// =============================================================================

#[tokio::test]
async fn clear_flushed_rooms_acks_unchanged_room() {
    let state = test_helpers::test_app_state();
    let room_id = test_helpers::seed_room(&state, Uuid::new_v4()).await;
    let snapshot = {
        let mut rooms = state.rooms.write().await;
        let rs = rooms.get_mut(&room_id).expect("room seeded");
        rs.room.voting_active = true;
        rs.dirty = true;
        rs.room.clone()
    };

    state.rooms.write().await.get_mut(&room_id).expect("room seeded").clients.insert(Uuid::new_v4(), Uuid::new_v4());

    clear_flushed_rooms(&state, &[snapshot]).await;

    let rooms = state.rooms.read().await;
    assert!(!rooms[&room_id].dirty);
}

#[tokio::test]
async fn clear_flushed_rooms_evicts_clean_room_without_clients() {
    let state = test_helpers::test_app_state();
    let room_id = test_helpers::seed_room(&state, Uuid::new_v4()).await;
    let snapshot = {
        let mut rooms = state.rooms.write().await;
        let rs = rooms.get_mut(&room_id).expect("room seeded");
        rs.dirty = true;
        rs.room.clone()
    };

    clear_flushed_rooms(&state, &[snapshot]).await;

    assert!(!state.rooms.read().await.contains_key(&room_id));
}

#[tokio::test]
async fn clear_flushed_rooms_keeps_flag_when_room_changed_after_snapshot() {
    let state = test_helpers::test_app_state();
    let room_id = test_helpers::seed_room(&state, Uuid::new_v4()).await;
    let snapshot = {
        let mut rooms = state.rooms.write().await;
        let rs = rooms.get_mut(&room_id).expect("room seeded");
        rs.dirty = true;
        rs.room.clone()
    };
    {
        let mut rooms = state.rooms.write().await;
        let rs = rooms.get_mut(&room_id).expect("room seeded");
        rs.room.current_story = Some("Checkout flow".into());
    }

    clear_flushed_rooms(&state, &[snapshot]).await;

    let rooms = state.rooms.read().await;
    assert!(rooms[&room_id].dirty);
}

#[tokio::test]
async fn flush_dirty_rooms_retains_flag_when_database_unavailable() {
    let state = test_helpers::test_app_state();
    let room = test_helpers::dummy_room(Uuid::new_v4());
    let room_id = room.id;
    {
        let mut rs = RoomState::new(room);
        rs.dirty = true;
        state.rooms.write().await.insert(room_id, rs);
    }

    // With connect_lazy test state, the write fails.
    flush_dirty_rooms(&state).await;

    let rooms = state.rooms.read().await;
    assert!(rooms[&room_id].dirty);
}
