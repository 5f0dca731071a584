//! Room state machine tests

use std::{sync::Arc, time::Instant};

use async_trait::async_trait;
use http::{Method, StatusCode, header::AUTHORIZATION};
use proptest::prelude::*;
use roomlink_core::{
    CLOSE_NOT_OPEN, CLOSE_ROOM_FULL, ControlMessage, Environment, PairingHooks, Room, RoomAction,
    RoomCode, RoomError, RoomRequest, RoomResponse, RoomState,
};
use serde_json::{Value, json};

#[derive(Clone)]
struct TestEnv;

impl Environment for TestEnv {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        buffer.fill(7);
    }
}

/// Accepts requests carrying `Authorization: ok`.
#[derive(Default)]
struct TokenHooks;

#[async_trait]
impl PairingHooks for TokenHooks {
    async fn auth(&self, request: &RoomRequest) -> RoomResponse {
        match request.header(AUTHORIZATION) {
            None => RoomResponse::text(StatusCode::UNAUTHORIZED, "Missing auth header"),
            Some("ok") => RoomResponse::empty(StatusCode::OK),
            Some(_) => RoomResponse::text(StatusCode::FORBIDDEN, "Invalid header"),
        }
    }
}

fn new_room() -> Room<TokenHooks> {
    Room::new(RoomCode::parse("123456").unwrap(), Arc::new(TokenHooks), Instant::now())
}

fn open_request(body: &str) -> RoomRequest {
    RoomRequest::new(Method::POST).with_header(AUTHORIZATION, "ok").with_body(body.to_string())
}

async fn status(room: &mut Room<TokenHooks>, method: Method) -> StatusCode {
    room.handle_request(RoomRequest::new(method), &TestEnv).await.status
}

async fn opened_room(note: Value) -> Room<TokenHooks> {
    let mut room = new_room();
    let body = json!({ "note": note }).to_string();
    let response = room.handle_request(open_request(&body), &TestEnv).await;
    assert_eq!(response.status, StatusCode::OK);
    room
}

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(future)
}

#[tokio::test]
async fn head_reports_availability_then_conflict() {
    let mut room = new_room();
    assert_eq!(status(&mut room, Method::HEAD).await, StatusCode::OK);

    room.handle_request(open_request(r#"{"note":"hello"}"#), &TestEnv).await;
    assert_eq!(status(&mut room, Method::HEAD).await, StatusCode::CONFLICT);
}

#[tokio::test]
async fn get_on_unopened_room_conflicts() {
    let mut room = new_room();
    assert_eq!(status(&mut room, Method::GET).await, StatusCode::CONFLICT);
}

#[tokio::test]
async fn get_returns_note_from_open() {
    let mut room = opened_room(json!({ "device": "laptop", "words": ["a", "b"] })).await;

    let response = room.handle_request(RoomRequest::new(Method::GET), &TestEnv).await;
    assert_eq!(response.status, StatusCode::OK);

    let body: Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(body, json!({ "note": { "device": "laptop", "words": ["a", "b"] } }));
}

#[tokio::test]
async fn second_open_conflicts() {
    let mut room = opened_room(json!("first")).await;

    let response = room.handle_request(open_request(r#"{"note":"second"}"#), &TestEnv).await;
    assert_eq!(response.status, StatusCode::CONFLICT);
    assert_eq!(room.note(), Some(&json!("first")));
}

#[tokio::test]
async fn open_without_note_stores_false() {
    let mut room = new_room();
    let response = room.handle_request(open_request("{}"), &TestEnv).await;

    assert_eq!(response.status, StatusCode::OK);
    assert!(room.is_open());
    assert_eq!(room.state(), &RoomState::Open { note: json!(false) });
}

#[tokio::test]
async fn malformed_body_is_unprocessable_and_room_stays_unopened() {
    let mut room = new_room();

    let response = room.handle_request(open_request("not json"), &TestEnv).await;
    assert_eq!(response.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(!room.is_open());
    assert_eq!(status(&mut room, Method::HEAD).await, StatusCode::OK);
}

#[tokio::test]
async fn auth_failure_is_forwarded_verbatim() {
    let mut room = new_room();

    let missing = RoomRequest::new(Method::POST).with_body(r#"{"note":"x"}"#);
    let response = room.handle_request(missing, &TestEnv).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(response.body.as_ref(), b"Missing auth header");

    let forged = RoomRequest::new(Method::POST)
        .with_header(AUTHORIZATION, "forged")
        .with_body(r#"{"note":"x"}"#);
    let response = room.handle_request(forged, &TestEnv).await;
    assert_eq!(response.status, StatusCode::FORBIDDEN);

    assert!(!room.is_open());
}

#[tokio::test]
async fn auth_runs_before_body_parse() {
    let mut room = new_room();
    let request = RoomRequest::new(Method::POST).with_body("not json");

    let response = room.handle_request(request, &TestEnv).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn options_and_unknown_verbs() {
    let mut room = new_room();
    assert_eq!(status(&mut room, Method::OPTIONS).await, StatusCode::OK);
    assert_eq!(status(&mut room, Method::PUT).await, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(status(&mut room, Method::DELETE).await, StatusCode::METHOD_NOT_ALLOWED);
    assert!(!room.is_open());
}

#[tokio::test]
async fn every_response_carries_cors() {
    let mut room = new_room();
    for method in [Method::OPTIONS, Method::HEAD, Method::GET, Method::POST, Method::PATCH] {
        let response = room.handle_request(RoomRequest::new(method.clone()), &TestEnv).await;
        assert_eq!(
            response.headers.get("access-control-allow-origin").unwrap(),
            "*",
            "{method} response missing CORS"
        );
        assert_eq!(
            response.headers.get("access-control-allow-methods").unwrap(),
            "HEAD, POST, GET, OPTIONS"
        );
        assert_eq!(
            response.headers.get("access-control-allow-headers").unwrap(),
            "Origin, X-Requested-With, Content-Type, Accept, Authorization"
        );
    }
}

#[test]
fn connect_to_unopened_room_is_closed() {
    let mut room = new_room();
    let actions = room.on_connect(1);

    assert_eq!(
        actions,
        vec![RoomAction::Close { conn: 1, code: CLOSE_NOT_OPEN, reason: "Room is not open" }]
    );
    assert_eq!(room.peer_count(), 0);
}

#[tokio::test]
async fn third_peer_is_refused() {
    let mut room = opened_room(json!("hi")).await;
    assert!(room.on_connect(1).is_empty());
    assert!(room.on_connect(2).is_empty());

    let actions = room.on_connect(3);
    assert!(matches!(actions[..], [RoomAction::Close { conn: 3, code: CLOSE_ROOM_FULL, .. }]));

    room.on_disconnect(2);
    assert!(room.on_connect(3).is_empty());
}

#[tokio::test]
async fn join_is_relayed_to_other_peer_only() {
    let mut room = opened_room(json!("hi")).await;
    room.on_connect(1);
    room.on_connect(2);

    let frame = r#"{"type":"join","data":{"name":"B"}}"#;
    let actions = room.on_message(2, frame).unwrap();

    assert_eq!(actions, vec![RoomAction::Broadcast { message: frame.to_string(), exclude: 2 }]);
    assert_eq!(room.metadata().relayed, 1);
}

#[tokio::test]
async fn approve_schedules_hook_after_relay() {
    let mut room = opened_room(json!("hi")).await;
    room.on_connect(1);
    room.on_connect(2);

    let frame = r#"{"type":"approve"}"#;
    let actions = room.on_message(1, frame).unwrap();

    assert_eq!(actions.len(), 2);
    assert!(matches!(&actions[0], RoomAction::Broadcast { exclude: 1, .. }));
    assert_eq!(actions[1], RoomAction::NotifyApprove(ControlMessage::approve(None)));
}

#[tokio::test]
async fn reject_schedules_reject_hook() {
    let mut room = opened_room(json!("hi")).await;
    room.on_connect(1);

    let actions = room.on_message(1, r#"{"type":"reject","data":"nope"}"#).unwrap();
    assert_eq!(actions[1], RoomAction::NotifyReject(ControlMessage::reject(Some(json!("nope")))));
}

#[tokio::test]
async fn unknown_types_are_relayed_without_hooks() {
    let mut room = opened_room(json!("hi")).await;
    room.on_connect(1);

    let actions = room.on_message(1, r#"{"type":"wave"}"#).unwrap();
    assert_eq!(actions.len(), 1);
}

#[tokio::test]
async fn malformed_frames_are_errors() {
    let mut room = opened_room(json!("hi")).await;
    room.on_connect(1);

    let result = room.on_message(1, "{not json");
    assert!(matches!(result, Err(RoomError::MalformedMessage { conn: 1, .. })));
    assert_eq!(room.metadata().relayed, 0);

    let result = room.on_message(9, r#"{"type":"join"}"#);
    assert!(matches!(result, Err(RoomError::UnknownConnection(9))));
}

#[tokio::test]
async fn untyped_json_is_relayed_without_hooks() {
    let mut room = opened_room(json!("hi")).await;
    room.on_connect(1);
    room.on_connect(2);

    for frame in [r#"{"data":1}"#, r#"{"type":5}"#, r#""hello""#, "[1,2]", r#"{"type":{"x":"approve"}}"#] {
        let actions = room.on_message(2, frame).unwrap();
        assert_eq!(
            actions,
            vec![RoomAction::Broadcast { message: frame.to_string(), exclude: 2 }],
            "{frame} not relayed"
        );
    }
    assert_eq!(room.metadata().relayed, 5);
}

#[test]
fn messages_on_unopened_room_are_dropped() {
    let mut room = new_room();
    assert!(room.on_message(1, r#"{"type":"join"}"#).unwrap().is_empty());
}

#[derive(Debug, Clone)]
enum Op {
    Head,
    Get,
    Open(Option<String>),
    Garbage,
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Head),
        Just(Op::Get),
        proptest::option::of("[a-z]{0,8}").prop_map(Op::Open),
        Just(Op::Garbage),
    ]
}

proptest! {
    #[test]
    fn open_is_one_way(ops in prop::collection::vec(arb_op(), 1..24)) {
        block_on(async {
            let mut room = new_room();
            let mut first_note: Option<Value> = None;

            for op in ops {
                let was_open = room.is_open();
                let expected_when_open = match op {
                    Op::Get => StatusCode::OK,
                    Op::Head | Op::Open(_) | Op::Garbage => StatusCode::CONFLICT,
                };

                let request = match op {
                    Op::Head => RoomRequest::new(Method::HEAD),
                    Op::Get => RoomRequest::new(Method::GET),
                    Op::Open(note) => open_request(&json!({ "note": note }).to_string()),
                    Op::Garbage => open_request("]["),
                };
                let response = room.handle_request(request, &TestEnv).await;

                if was_open {
                    prop_assert!(room.is_open());
                    prop_assert_eq!(room.note(), first_note.as_ref());
                    prop_assert_eq!(response.status, expected_when_open);
                } else if room.is_open() {
                    first_note = room.note().cloned();
                }
            }
            Ok::<(), proptest::test_runner::TestCaseError>(())
        })?;
    }
}
