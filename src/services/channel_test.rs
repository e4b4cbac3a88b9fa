use super::*;
use crate::state::test_helpers;

fn client() -> (Uuid, mpsc::Sender<Frame>, mpsc::Receiver<Frame>) {
    let (tx, rx) = mpsc::channel(16);
    (Uuid::new_v4(), tx, rx)
}

// =============================================================================
// channel names
// =============================================================================

#[test]
fn channel_name_helpers() {
    let id = Uuid::nil();
    assert_eq!(voting_room_channel(id), format!("voting-room-{id}"));
    assert_eq!(retro_board_channel(id), format!("retro-board-{id}"));
    assert_eq!(project_channel(id), format!("project-{id}"));
}

#[test]
fn room_and_board_channels_are_server_owned() {
    let id = Uuid::new_v4();
    assert!(is_server_owned(&voting_room_channel(id)));
    assert!(is_server_owned(&retro_board_channel(id)));
    assert!(!is_server_owned(&project_channel(id)));
    assert!(!is_server_owned(VOTING_ROOMS_CHANNEL));
    assert!(!is_server_owned(TEAM_ACTIVITY_CHANNEL));
}

// =============================================================================
// subscribe / unsubscribe
// =============================================================================

#[tokio::test]
async fn subscribe_blank_channel_rejected() {
    let state = test_helpers::test_app_state();
    let (client_id, tx, _rx) = client();
    let err = subscribe(&state, "  ", client_id, Uuid::new_v4(), serde_json::Value::Null, tx)
        .await
        .unwrap_err();
    assert!(matches!(err, ChannelError::MissingChannel));
}

#[tokio::test]
async fn subscribe_returns_presence_and_notifies_peers() {
    let state = test_helpers::test_app_state();
    let (a, a_tx, mut a_rx) = client();
    let (b, b_tx, mut b_rx) = client();
    let user_b = Uuid::new_v4();

    subscribe(&state, "voting-rooms", a, Uuid::new_v4(), serde_json::json!({}), a_tx)
        .await
        .unwrap();
    let presence = subscribe(&state, "voting-rooms", b, user_b, serde_json::json!({"name": "Grace"}), b_tx)
        .await
        .unwrap();

    assert_eq!(presence.len(), 2);
    let join = a_rx.try_recv().expect("peer should see join");
    assert_eq!(join.syscall, "channel:join");
    assert_eq!(join.channel.as_deref(), Some("voting-rooms"));
    assert_eq!(join.uuid_field("user_id"), Some(user_b));
    assert!(b_rx.try_recv().is_err(), "subscriber does not see its own join");
}

#[tokio::test]
async fn unsubscribe_notifies_remaining_and_errors_when_absent() {
    let state = test_helpers::test_app_state();
    let (a, a_tx, mut a_rx) = client();
    let (b, b_tx, _b_rx) = client();
    subscribe(&state, "team-activity", a, Uuid::new_v4(), serde_json::Value::Null, a_tx)
        .await
        .unwrap();
    subscribe(&state, "team-activity", b, Uuid::new_v4(), serde_json::Value::Null, b_tx)
        .await
        .unwrap();
    let _ = a_rx.try_recv();

    unsubscribe(&state, "team-activity", b).await.unwrap();
    let part = a_rx.try_recv().expect("peer should see part");
    assert_eq!(part.syscall, "channel:part");
    assert_eq!(part.uuid_field("client_id"), Some(b));

    let err = unsubscribe(&state, "team-activity", b).await.unwrap_err();
    assert!(matches!(err, ChannelError::NotSubscribed(_)));
}

#[tokio::test]
async fn unsubscribe_all_leaves_every_channel() {
    let state = test_helpers::test_app_state();
    let (a, a_tx, _a_rx) = client();
    let user = Uuid::new_v4();
    for name in ["one", "two", "three"] {
        subscribe(&state, name, a, user, serde_json::Value::Null, a_tx.clone())
            .await
            .unwrap();
    }

    let mut left = unsubscribe_all(&state, a).await;
    left.sort();
    assert_eq!(left, vec!["one", "three", "two"]);
    assert!(presence(&state, "one").await.is_empty());
    assert!(state.channels.read().await.is_empty());
}

#[tokio::test]
async fn last_unsubscribe_drops_channel_and_history() {
    let state = test_helpers::test_app_state();
    let (a, a_tx, _a_rx) = client();
    subscribe(&state, "project-x", a, Uuid::new_v4(), serde_json::Value::Null, a_tx)
        .await
        .unwrap();
    publish(&state, "project-x", "tick", serde_json::Value::Null, None, None).await;
    assert_eq!(messages(&state, "project-x", 10).await.len(), 1);

    unsubscribe(&state, "project-x", a).await.unwrap();
    assert!(!state.channels.read().await.contains_key("project-x"));
    assert!(messages(&state, "project-x", 10).await.is_empty());
}

#[tokio::test]
async fn subscription_churn_leaves_no_channels_behind() {
    let state = test_helpers::test_app_state();
    let user = Uuid::new_v4();
    for i in 0..200 {
        let (client_id, tx, _rx) = client();
        let name = format!("churn-{i}");
        subscribe(&state, &name, client_id, user, serde_json::Value::Null, tx)
            .await
            .unwrap();
        unsubscribe(&state, &name, client_id).await.unwrap();
        publish(&state, &format!("never-{i}"), "tick", serde_json::Value::Null, Some(user), None).await;
    }
    assert!(state.channels.read().await.is_empty());
}

#[tokio::test]
async fn team_feeds_outlive_their_subscribers() {
    let state = test_helpers::test_app_state();
    let (a, a_tx, _a_rx) = client();
    subscribe(&state, TEAM_ACTIVITY_CHANNEL, a, Uuid::new_v4(), serde_json::Value::Null, a_tx)
        .await
        .unwrap();
    publish(&state, TEAM_ACTIVITY_CHANNEL, "activity", serde_json::json!({}), None, None).await;
    unsubscribe(&state, TEAM_ACTIVITY_CHANNEL, a).await.unwrap();

    assert_eq!(messages(&state, TEAM_ACTIVITY_CHANNEL, 10).await.len(), 1);
}

// =============================================================================
// publish / history
// =============================================================================

#[tokio::test]
async fn publish_delivers_to_subscribers_except_excluded() {
    let state = test_helpers::test_app_state();
    let (a, a_tx, mut a_rx) = client();
    let (b, b_tx, mut b_rx) = client();
    let user_a = Uuid::new_v4();
    subscribe(&state, "project-x", a, user_a, serde_json::Value::Null, a_tx)
        .await
        .unwrap();
    subscribe(&state, "project-x", b, Uuid::new_v4(), serde_json::Value::Null, b_tx)
        .await
        .unwrap();
    let _ = a_rx.try_recv();

    let msg = publish(&state, "project-x", "task_updated", serde_json::json!({"n": 1}), Some(user_a), Some(a)).await;

    let frame = b_rx.try_recv().expect("peer receives message");
    assert_eq!(frame.syscall, "channel:message");
    assert_eq!(frame.str_field("type"), Some("task_updated"));
    assert_eq!(frame.from.as_deref(), Some(user_a.to_string().as_str()));
    assert_eq!(frame.uuid_field("message_id"), Some(msg.id));
    assert!(a_rx.try_recv().is_err(), "excluded sender gets nothing");
}

#[tokio::test]
async fn team_feed_records_history_without_subscribers() {
    let state = test_helpers::test_app_state();
    publish(&state, "team-activity", "activity", serde_json::json!({}), None, None).await;
    let history = messages(&state, "team-activity", DEFAULT_MESSAGES_LIMIT).await;
    assert_eq!(history.len(), 1);
    assert!(history[0].user_id.is_none());
}

#[tokio::test]
async fn publish_to_unsubscribed_channel_is_not_retained() {
    let state = test_helpers::test_app_state();
    let msg = publish(&state, "project-y", "task_updated", serde_json::json!({}), None, None).await;
    assert_eq!(msg.channel, "project-y");
    assert!(messages(&state, "project-y", DEFAULT_MESSAGES_LIMIT).await.is_empty());
    assert!(!state.channels.read().await.contains_key("project-y"));
}

#[tokio::test]
async fn history_is_bounded_and_newest_first() {
    let mut state = test_helpers::test_app_state();
    state.channel_history_limit = 3;
    let (a, a_tx, _a_rx) = client();
    subscribe(&state, "c", a, Uuid::new_v4(), serde_json::Value::Null, a_tx)
        .await
        .unwrap();
    for i in 0..5 {
        publish(&state, "c", "tick", serde_json::json!(i), None, None).await;
    }

    let all = messages(&state, "c", 100).await;
    let values: Vec<i64> = all.iter().filter_map(|m| m.data.as_i64()).collect();
    assert_eq!(values, vec![4, 3, 2]);

    let two = messages(&state, "c", 2).await;
    assert_eq!(two.len(), 2);
    assert_eq!(two[0].data, serde_json::json!(4));
}

#[tokio::test]
async fn messages_and_presence_unknown_channel_empty() {
    let state = test_helpers::test_app_state();
    assert!(messages(&state, "nope", 10).await.is_empty());
    assert!(presence(&state, "nope").await.is_empty());
}

#[tokio::test]
async fn full_subscriber_queue_drops_without_blocking() {
    let state = test_helpers::test_app_state();
    let (tx, mut rx) = mpsc::channel(1);
    subscribe(&state, "busy", Uuid::new_v4(), Uuid::new_v4(), serde_json::Value::Null, tx)
        .await
        .unwrap();

    publish(&state, "busy", "a", serde_json::Value::Null, None, None).await;
    publish(&state, "busy", "b", serde_json::Value::Null, None, None).await;

    assert_eq!(rx.try_recv().unwrap().str_field("type"), Some("a"));
    assert!(rx.try_recv().is_err());
    assert_eq!(messages(&state, "busy", 10).await.len(), 2);
}

#[test]
fn message_frame_carries_message_ts() {
    let msg = ChannelMessage {
        id: Uuid::new_v4(),
        channel: "c".into(),
        kind: "k".into(),
        data: serde_json::Value::Null,
        user_id: None,
        ts: 1234,
    };
    let frame = message_frame(&msg);
    assert_eq!(frame.ts, 1234);
    assert!(frame.from.is_none());
}
