use super::*;
use crate::state::test_helpers;

fn vote(value: VoteValue) -> Vote {
    Vote {
        id: Uuid::new_v4(),
        room_id: Uuid::nil(),
        user_id: Uuid::new_v4(),
        user_name: "u".into(),
        story_title: "s".into(),
        value,
        created_at: 0,
    }
}

async fn live_room_with_manager() -> (AppState, Uuid, Uuid) {
    let state = test_helpers::test_app_state();
    let manager = Uuid::new_v4();
    let room_id = test_helpers::seed_room(&state, manager).await;
    join_room(&state, room_id, manager, "Morgan", Uuid::new_v4()).await.unwrap();
    (state, room_id, manager)
}

// =============================================================================
// room codes
// =============================================================================

#[test]
fn generate_room_code_uses_alphabet() {
    for _ in 0..200 {
        let code = generate_room_code();
        assert_eq!(code.len(), ROOM_CODE_LEN);
        assert!(code.bytes().all(|b| ROOM_CODE_ALPHABET.contains(&b)), "bad code {code}");
    }
}

#[test]
fn normalize_room_code_trims_and_uppercases() {
    assert_eq!(normalize_room_code("  ab12cd\n"), "AB12CD");
}

// =============================================================================
// vote values
// =============================================================================

#[test]
fn vote_value_parse_deck() {
    assert_eq!(VoteValue::parse("5"), Some(VoteValue::Points(5)));
    assert_eq!(VoteValue::parse("21"), Some(VoteValue::Points(21)));
    assert_eq!(VoteValue::parse("?"), Some(VoteValue::Unsure));
    assert_eq!(VoteValue::parse("☕"), Some(VoteValue::Pass));
}

#[test]
fn vote_value_parse_rejects_off_deck() {
    for raw in ["4", "0", "34", "", "abc", "-1"] {
        assert_eq!(VoteValue::parse(raw), None, "{raw:?} should be rejected");
    }
}

#[test]
fn vote_value_serializes_as_card_string() {
    assert_eq!(serde_json::to_value(VoteValue::Points(13)).unwrap(), serde_json::json!("13"));
    assert_eq!(serde_json::to_value(VoteValue::Pass).unwrap(), serde_json::json!("☕"));
    let parsed: VoteValue = serde_json::from_value(serde_json::json!("?")).unwrap();
    assert_eq!(parsed, VoteValue::Unsure);
    assert!(serde_json::from_value::<VoteValue>(serde_json::json!("7")).is_err());
}

// =============================================================================
// tally
// =============================================================================

#[test]
fn tally_three_five_eight() {
    let votes = [3, 5, 8].map(|n| vote(VoteValue::Points(n)));
    let t = tally(&votes);
    assert_eq!(t.average, Some(5.3));
    assert_eq!(t.min, Some(3));
    assert_eq!(t.max, Some(8));
    assert_eq!(t.numeric_votes, 3);
}

#[test]
fn tally_excludes_sentinels() {
    let votes = vec![
        vote(VoteValue::Points(2)),
        vote(VoteValue::Unsure),
        vote(VoteValue::Pass),
        vote(VoteValue::Points(8)),
    ];
    let t = tally(&votes);
    assert_eq!(t.average, Some(5.0));
    assert_eq!(t.min, Some(2));
    assert_eq!(t.max, Some(8));
    assert_eq!(t.numeric_votes, 2);
    assert_eq!(t.total_votes, 4);
}

#[test]
fn tally_only_sentinels_has_no_average() {
    let t = tally(&[vote(VoteValue::Unsure), vote(VoteValue::Pass)]);
    assert_eq!(t.average, None);
    assert_eq!(t.min, None);
    assert_eq!(t.max, None);
    assert_eq!(t.total_votes, 2);
}

#[test]
fn tally_empty() {
    let t = tally(&[]);
    assert_eq!(t.average, None);
    assert_eq!(t.total_votes, 0);
}

// =============================================================================
// live rooms
// =============================================================================

#[tokio::test]
async fn join_marks_manager_and_rejoin_replaces() {
    let (state, room_id, manager) = live_room_with_manager().await;
    let member = Uuid::new_v4();
    let (_, p) = join_room(&state, room_id, member, "Sam", Uuid::new_v4()).await.unwrap();
    assert!(!p.is_manager);

    let (snap, _) = join_room(&state, room_id, member, "Sam R.", Uuid::new_v4()).await.unwrap();
    assert_eq!(snap.participants.len(), 2);
    let sam = snap.participants.iter().find(|p| p.user_id == member).unwrap();
    assert_eq!(sam.user_name, "Sam R.");
    let boss = snap.participants.iter().find(|p| p.user_id == manager).unwrap();
    assert!(boss.is_manager);
}

#[tokio::test]
async fn start_voting_manager_only() {
    let (state, room_id, _manager) = live_room_with_manager().await;
    let err = start_voting(&state, room_id, Uuid::new_v4(), "Login").await.unwrap_err();
    assert!(matches!(err, VotingError::Forbidden));
}

#[tokio::test]
async fn start_voting_requires_story() {
    let (state, room_id, manager) = live_room_with_manager().await;
    let err = start_voting(&state, room_id, manager, "   ").await.unwrap_err();
    assert!(matches!(err, VotingError::Validation(_)));
}

#[tokio::test]
async fn start_voting_sets_story_and_marks_dirty() {
    let (state, room_id, manager) = live_room_with_manager().await;
    let room = start_voting(&state, room_id, manager, "  Login page ").await.unwrap();
    assert!(room.voting_active);
    assert_eq!(room.current_story.as_deref(), Some("Login page"));
    assert!(state.rooms.read().await[&room_id].dirty);
}

#[tokio::test]
async fn cast_vote_requires_active_round() {
    let (state, room_id, manager) = live_room_with_manager().await;
    let err = cast_vote(&state, room_id, manager, "5").await.unwrap_err();
    assert!(matches!(err, VotingError::VotingInactive));
}

#[tokio::test]
async fn cast_vote_rejects_invalid_value_and_non_participant() {
    let (state, room_id, manager) = live_room_with_manager().await;
    start_voting(&state, room_id, manager, "Story").await.unwrap();

    let err = cast_vote(&state, room_id, manager, "4").await.unwrap_err();
    assert!(matches!(err, VotingError::InvalidVote(_)));

    let err = cast_vote(&state, room_id, Uuid::new_v4(), "5").await.unwrap_err();
    assert!(matches!(err, VotingError::NotInRoom));
}

#[tokio::test]
async fn cast_vote_once_per_user() {
    let (state, room_id, manager) = live_room_with_manager().await;
    start_voting(&state, room_id, manager, "Story").await.unwrap();

    let v = cast_vote(&state, room_id, manager, "8").await.unwrap();
    assert_eq!(v.value, VoteValue::Points(8));
    assert_eq!(v.story_title, "Story");
    assert_eq!(v.user_name, "Morgan");

    let err = cast_vote(&state, room_id, manager, "3").await.unwrap_err();
    assert!(matches!(err, VotingError::AlreadyVoted));
}

#[tokio::test]
async fn snapshot_hides_values_while_active() {
    let (state, room_id, manager) = live_room_with_manager().await;
    start_voting(&state, room_id, manager, "Story").await.unwrap();
    cast_vote(&state, room_id, manager, "5").await.unwrap();

    let snap = snapshot(&state, room_id).await.unwrap();
    assert_eq!(snap.votes.len(), 1);
    assert!(snap.votes[0].value.is_none());
    assert!(snap.tally.is_none());
}

#[tokio::test]
async fn end_voting_reveals_and_tallies() {
    let (state, room_id, manager) = live_room_with_manager().await;
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    join_room(&state, room_id, a, "A", Uuid::new_v4()).await.unwrap();
    join_room(&state, room_id, b, "B", Uuid::new_v4()).await.unwrap();
    start_voting(&state, room_id, manager, "Checkout").await.unwrap();
    cast_vote(&state, room_id, manager, "3").await.unwrap();
    cast_vote(&state, room_id, a, "5").await.unwrap();
    cast_vote(&state, room_id, b, "8").await.unwrap();

    // Session insert fails against the lazy pool; the round still ends.
    let (snap, record) = end_voting(&state, room_id, manager).await.unwrap();
    assert!(!snap.room.voting_active);
    assert!(snap.votes.iter().all(|v| v.value.is_some()));
    let t = snap.tally.expect("tally after end");
    assert_eq!(t.average, Some(5.3));
    assert_eq!(record.story_title, "Checkout");
    assert_eq!(record.min_vote, Some(3));
    assert_eq!(record.max_vote, Some(8));
    assert_eq!(record.total_votes, 3);
}

#[tokio::test]
async fn end_voting_errors() {
    let (state, room_id, manager) = live_room_with_manager().await;
    let err = end_voting(&state, room_id, manager).await.unwrap_err();
    assert!(matches!(err, VotingError::VotingInactive));

    start_voting(&state, room_id, manager, "S").await.unwrap();
    let err = end_voting(&state, room_id, Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, VotingError::Forbidden));
}

#[tokio::test]
async fn restart_clears_previous_votes() {
    let (state, room_id, manager) = live_room_with_manager().await;
    start_voting(&state, room_id, manager, "One").await.unwrap();
    cast_vote(&state, room_id, manager, "1").await.unwrap();
    end_voting(&state, room_id, manager).await.unwrap();

    start_voting(&state, room_id, manager, "Two").await.unwrap();
    let snap = snapshot(&state, room_id).await.unwrap();
    assert!(snap.votes.is_empty());
    cast_vote(&state, room_id, manager, "2").await.unwrap();
}

#[tokio::test]
async fn leave_keeps_participant_while_other_tab_open() {
    let state = test_helpers::test_app_state();
    let manager = Uuid::new_v4();
    let room_id = test_helpers::seed_room(&state, manager).await;
    let tab1 = Uuid::new_v4();
    let tab2 = Uuid::new_v4();
    join_room(&state, room_id, manager, "M", tab1).await.unwrap();
    join_room(&state, room_id, manager, "M", tab2).await.unwrap();

    assert!(leave_room(&state, room_id, tab1).await.is_none());
    assert_eq!(snapshot(&state, room_id).await.unwrap().participants.len(), 1);

    let left = leave_room(&state, room_id, tab2).await.expect("last tab leaves");
    assert_eq!(left.user_id, manager);
}

#[tokio::test]
async fn last_leave_evicts_clean_room() {
    let state = test_helpers::test_app_state();
    let manager = Uuid::new_v4();
    let room_id = test_helpers::seed_room(&state, manager).await;
    let client = Uuid::new_v4();
    join_room(&state, room_id, manager, "M", client).await.unwrap();

    leave_room(&state, room_id, client).await;
    assert!(!state.rooms.read().await.contains_key(&room_id));
}

#[tokio::test]
async fn last_leave_keeps_dirty_room_when_flush_fails() {
    let state = test_helpers::test_app_state();
    let manager = Uuid::new_v4();
    let room_id = test_helpers::seed_room(&state, manager).await;
    let client = Uuid::new_v4();
    join_room(&state, room_id, manager, "M", client).await.unwrap();
    start_voting(&state, room_id, manager, "S").await.unwrap();

    leave_room(&state, room_id, client).await;
    let rooms = state.rooms.read().await;
    assert!(rooms[&room_id].dirty);
}

#[tokio::test]
async fn operations_on_unknown_room_not_found() {
    let state = test_helpers::test_app_state();
    let id = Uuid::new_v4();
    assert!(matches!(snapshot(&state, id).await.unwrap_err(), VotingError::NotFound(_)));
    assert!(matches!(start_voting(&state, id, id, "s").await.unwrap_err(), VotingError::NotFound(_)));
    assert!(leave_room(&state, id, id).await.is_none());
}

#[test]
fn error_codes() {
    use crate::frame::ErrorCode;
    assert_eq!(VotingError::Forbidden.error_code(), "E_FORBIDDEN");
    assert_eq!(VotingError::VotingInactive.error_code(), "E_VOTING_INACTIVE");
    assert_eq!(VotingError::AlreadyVoted.error_code(), "E_ALREADY_VOTED");
    assert_eq!(VotingError::CodeNotFound("X".into()).error_code(), "E_ROOM_NOT_FOUND");
    assert!(!VotingError::Forbidden.retryable());
}

#[tokio::test]
async fn create_room_blank_name_rejected_before_db() {
    let state = test_helpers::test_app_state();
    let err = create_room(&state.pool, "  ", Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, VotingError::Validation(_)));
}

#[cfg(feature = "live-db-tests")]
mod live {
    use super::*;

    #[tokio::test]
    async fn create_find_and_list_sessions() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL");
        let pool = PgPool::connect(&url).await.expect("connect");
        sqlx::migrate!("src/db/migrations").run(&pool).await.expect("migrate");
        let user = crate::services::session::upsert_user(&pool, &format!("{}@example.com", Uuid::new_v4()), None)
            .await
            .expect("user");

        let room = create_room(&pool, "Refinement", user.id).await.expect("create");
        let found = find_room_by_code(&pool, &room.code.to_lowercase()).await.expect("by code");
        assert_eq!(found.id, room.id);

        let record = session_record(&room, "Story".into(), 1, &[vote(VoteValue::Points(5))]);
        record_session(&pool, &record).await.expect("record");
        let sessions = list_sessions(&pool, room.id).await.expect("sessions");
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].average_vote, Some(5.0));
    }

    #[tokio::test]
    async fn rejoin_after_eviction_rehydrates_room() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL");
        let pool = PgPool::connect(&url).await.expect("connect");
        sqlx::migrate!("src/db/migrations").run(&pool).await.expect("migrate");
        let user = crate::services::session::upsert_user(&pool, &format!("{}@example.com", Uuid::new_v4()), None)
            .await
            .expect("user");
        let room = create_room(&pool, "Refinement", user.id).await.expect("create");
        let state = AppState::new(pool, None, std::sync::Arc::new(test_helpers::StaticTracker(Vec::new())));

        let first = Uuid::new_v4();
        join_room(&state, room.id, user.id, "Morgan", first).await.expect("hydrating join");
        leave_room(&state, room.id, first).await;
        assert!(!state.rooms.read().await.contains_key(&room.id), "clean room evicted");

        let second = Uuid::new_v4();
        let (snap, participant) = join_room(&state, room.id, user.id, "Morgan", second).await.expect("rejoin");
        assert!(participant.is_manager);
        assert_eq!(snap.participants.len(), 1);
        assert_eq!(state.rooms.read().await[&room.id].clients.get(&second), Some(&user.id));

        let err = join_room(&state, Uuid::new_v4(), user.id, "Morgan", Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, VotingError::NotFound(_)));
    }
}
