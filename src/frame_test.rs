use super::*;

#[test]
fn request_sets_fields() {
    let frame = Frame::request("channel:subscribe", Data::new());
    assert_eq!(frame.syscall, "channel:subscribe");
    assert_eq!(frame.status, Status::Request);
    assert!(frame.parent_id.is_none());
    assert!(frame.channel.is_none());
    assert!(frame.ts > 0);
}

#[test]
fn reply_inherits_context() {
    let req = Frame::request("room:vote", Data::new()).with_channel("voting-room-1");
    let reply = req.done();

    assert_eq!(reply.parent_id, Some(req.id));
    assert_eq!(reply.channel.as_deref(), Some("voting-room-1"));
    assert_eq!(reply.syscall, "room:vote");
    assert_eq!(reply.status, Status::Done);
}

#[test]
fn done_with_carries_payload() {
    let req = Frame::request("channel:presence", Data::new());
    let mut data = Data::new();
    data.insert("count".into(), serde_json::json!(2));
    let done = req.done_with(data);

    assert_eq!(done.status, Status::Done);
    assert_eq!(done.parent_id, Some(req.id));
    assert_eq!(done.data.get("count").and_then(serde_json::Value::as_i64), Some(2));
}

#[test]
fn prefix_and_op_extraction() {
    let frame = Frame::request("room:start", Data::new());
    assert_eq!(frame.prefix(), "room");
    assert_eq!(frame.op(), "start");

    let frame = Frame::request("noseparator", Data::new());
    assert_eq!(frame.prefix(), "noseparator");
    assert_eq!(frame.op(), "");
}

#[test]
fn field_readers() {
    let id = Uuid::new_v4();
    let frame = Frame::request("room:join", Data::new())
        .with_data("room_id", id.to_string())
        .with_data("story", "Login page")
        .with_data("bogus", "not-a-uuid");

    assert_eq!(frame.uuid_field("room_id"), Some(id));
    assert_eq!(frame.str_field("story"), Some("Login page"));
    assert_eq!(frame.uuid_field("bogus"), None);
    assert_eq!(frame.str_field("missing"), None);
}

#[test]
fn inbound_json_without_optional_fields_parses() {
    let id = Uuid::new_v4();
    let text = format!(r#"{{"id":"{id}","parent_id":null,"ts":1,"syscall":"channel:presence","status":"request"}}"#);
    let frame: Frame = serde_json::from_str(&text).expect("frame should parse");
    assert_eq!(frame.id, id);
    assert!(frame.data.is_empty());
    assert!(frame.channel.is_none());
    assert!(frame.from.is_none());
}

#[test]
fn error_from_typed() {
    #[derive(Debug, thiserror::Error)]
    #[error("room not found")]
    struct NotFound;

    impl ErrorCode for NotFound {
        fn error_code(&self) -> &'static str {
            "E_ROOM_NOT_FOUND"
        }
    }

    let req = Frame::request("room:join", Data::new());
    let err = req.error_from(&NotFound);

    assert_eq!(err.status, Status::Error);
    assert_eq!(err.data.get("code").and_then(|v| v.as_str()), Some("E_ROOM_NOT_FOUND"));
    assert_eq!(err.data.get("message").and_then(|v| v.as_str()), Some("room not found"));
    assert_eq!(err.data.get("retryable").and_then(serde_json::Value::as_bool), Some(false));
}

#[test]
fn status_as_str_matches_serde() {
    for status in [Status::Request, Status::Item, Status::Done, Status::Error, Status::Cancel] {
        let json = serde_json::to_value(status).expect("serialize");
        assert_eq!(json.as_str(), Some(status.as_str()));
    }
}
