use super::*;

#[test]
fn event_sets_fields() {
    let frame = Frame::event(EVENT_STROKE, Data::new());
    assert_eq!(frame.event, "whiteboard:stroke");
    assert!(frame.parent_id.is_none());
    assert!(frame.whiteboard_id.is_none());
    assert!(frame.ts > 0);
}

#[test]
fn reply_inherits_whiteboard_and_links_parent() {
    let whiteboard_id = Uuid::new_v4();
    let req = Frame::event(EVENT_JOIN, Data::new()).with_whiteboard_id(whiteboard_id);
    let init = req.reply(EVENT_INIT, Data::new());

    assert_eq!(init.parent_id, Some(req.id));
    assert_eq!(init.whiteboard_id, Some(whiteboard_id));
    assert_eq!(init.event, EVENT_INIT);
}

#[test]
fn target_whiteboard_prefers_envelope() {
    let envelope = Uuid::new_v4();
    let in_data = Uuid::new_v4();
    let frame = Frame::event(EVENT_CLEAR, Data::new())
        .with_whiteboard_id(envelope)
        .with_data(FRAME_WHITEBOARD_ID, in_data.to_string());
    assert_eq!(frame.target_whiteboard(), Some(envelope));
}

#[test]
fn target_whiteboard_falls_back_to_data() {
    let id = Uuid::new_v4();
    let frame = Frame::event(EVENT_CLEAR, Data::new()).with_data(FRAME_WHITEBOARD_ID, id.to_string());
    assert_eq!(frame.target_whiteboard(), Some(id));

    let bad = Frame::event(EVENT_CLEAR, Data::new()).with_data(FRAME_WHITEBOARD_ID, "not-a-uuid");
    assert_eq!(bad.target_whiteboard(), None);
}

#[test]
fn minimal_client_frame_deserializes() {
    let id = Uuid::new_v4();
    let json = format!(r#"{{"event":"whiteboard:join","whiteboard_id":"{id}"}}"#);
    let frame: Frame = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(frame.event, EVENT_JOIN);
    assert_eq!(frame.whiteboard_id, Some(id));
    assert!(frame.data.is_empty());
}

#[test]
fn error_from_typed() {
    #[derive(Debug, thiserror::Error)]
    #[error("Whiteboard not found")]
    struct NotFound;

    impl ErrorCode for NotFound {
        fn error_code(&self) -> &'static str {
            "E_WHITEBOARD_NOT_FOUND"
        }
    }

    let req = Frame::event(EVENT_JOIN, Data::new());
    let err = req.error_from(&NotFound);

    assert_eq!(err.event, EVENT_ERROR);
    assert_eq!(err.parent_id, Some(req.id));
    assert_eq!(err.data.get("code").and_then(|v| v.as_str()), Some("E_WHITEBOARD_NOT_FOUND"));
    assert_eq!(err.data.get("message").and_then(|v| v.as_str()), Some("Whiteboard not found"));
}
