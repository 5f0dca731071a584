//! End-to-end pairing scenarios against a real server

use std::time::Duration;

use futures_util::{FutureExt, StreamExt};
use http::StatusCode;
use roomlink_client::{ClientError, OpenOptions, PairingSession, RoomHttp, initiate, join};
use roomlink_core::{
    CLOSE_NOT_OPEN, CLOSE_ROOM_FULL, ControlKind, ControlMessage, HeaderSigner, Role, RoomCode,
    SessionEvent, SessionEventKind, SessionState, Verification,
};
use roomlink_harness::TestServer;
use serde_json::json;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const WAIT: Duration = Duration::from_secs(5);

fn signer() -> HeaderSigner {
    HeaderSigner::from_secret_bytes(&[42; 32])
}

async fn event(session: &PairingSession, kind: SessionEventKind) -> SessionEvent {
    tokio::time::timeout(WAIT, session.subscribe(kind))
        .await
        .expect("timed out waiting for event")
        .expect("session finished before the event")
}

/// Scenario A: open with a note, join, initiator sees exactly one `join`.
async fn paired(server: &TestServer) -> (RoomCode, PairingSession, PairingSession) {
    let options = OpenOptions::new().with_note(json!("hello")).signed_by(&mut signer()).unwrap();
    let (code, initiator) = initiate(&server.base_url(), options, None).await.unwrap();
    assert_eq!(initiator.role(), Role::Initiator);

    let joiner = join(&code, &server.base_url(), Some(json!({ "name": "B" }))).await.unwrap();
    assert_eq!(joiner.peer_note(), Some(json!("hello")));

    let joined = event(&initiator, SessionEventKind::Join).await;
    assert_eq!(joined.data()["name"], "B");
    assert_eq!(initiator.peer_join_payload(), Some(json!({ "name": "B" })));
    assert_eq!(initiator.state(), SessionState::Joined);

    (code, initiator, joiner)
}

#[tokio::test]
async fn scenario_a_join_reaches_initiator_once() {
    let server = TestServer::start().await.unwrap();
    let (_code, mut initiator, joiner) = paired(&server).await;

    // A duplicate join is relayed but not surfaced again.
    joiner.send(&ControlMessage::join(Some(json!({ "name": "C" })))).unwrap();

    let first = tokio::time::timeout(WAIT, initiator.next_event()).await.unwrap();
    assert_eq!(first, Some(SessionEvent::Join(Some(json!({ "name": "B" })))));
    assert!(tokio::time::timeout(Duration::from_millis(200), initiator.next_event()).await.is_err());
    assert_eq!(initiator.peer_join_payload(), Some(json!({ "name": "B" })));
}

#[tokio::test]
async fn scenario_b_approve_reaches_joiner_once() {
    let server = TestServer::start().await.unwrap();
    let (code, initiator, mut joiner) = paired(&server).await;

    initiator.approve(Some(json!({ "token": "t" }))).unwrap();
    assert_eq!(initiator.verification(), Verification::Approved);

    let approved = event(&joiner, SessionEventKind::Approve).await;
    assert_eq!(approved, SessionEvent::Approve(Some(json!({ "token": "t" }))));
    assert_eq!(joiner.verification(), Verification::Approved);
    assert_eq!(joiner.state(), SessionState::Resolved(Verification::Approved));

    let note = tokio::time::timeout(WAIT, joiner.next_event()).await.unwrap();
    assert_eq!(note, Some(SessionEvent::Note(json!("hello"))));
    let verdict = tokio::time::timeout(WAIT, joiner.next_event()).await.unwrap();
    assert_eq!(verdict.map(|e| e.kind()), Some(SessionEventKind::Approve));

    let mut reject = joiner.subscribe(SessionEventKind::Reject);
    assert!(reject.try_recv().is_err());

    assert!(server.eventually(WAIT, |hooks| hooks.count(ControlKind::Approve) == 1).await);
    assert_eq!(server.hooks().verdicts()[0].code, code);
    assert_eq!(server.hooks().count(ControlKind::Reject), 0);
}

#[tokio::test]
async fn scenario_c_reject_is_final() {
    let server = TestServer::start().await.unwrap();
    let (_code, initiator, mut joiner) = paired(&server).await;

    initiator.reject(Some(json!("unknown device"))).unwrap();
    let rejected = event(&joiner, SessionEventKind::Reject).await;
    assert_eq!(rejected, SessionEvent::Reject(Some(json!("unknown device"))));

    // The initiator's own state is already resolved; a late approve still
    // reaches the wire but the joiner ignores it.
    initiator.approve(None).unwrap();
    assert_eq!(initiator.verification(), Verification::Rejected);

    assert!(server.eventually(WAIT, |hooks| hooks.count(ControlKind::Approve) == 1).await);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(joiner.verification(), Verification::Rejected);

    let mut approve = joiner.subscribe(SessionEventKind::Approve);
    assert!(approve.try_recv().is_err());

    let mut kinds = Vec::new();
    while let Some(Some(event)) = joiner.next_event().now_or_never() {
        kinds.push(event.kind());
    }
    assert_eq!(kinds, vec![SessionEventKind::Note, SessionEventKind::Reject]);
}

#[tokio::test]
async fn joiner_cannot_send_verdicts() {
    let server = TestServer::start().await.unwrap();
    let (_code, _initiator, joiner) = paired(&server).await;

    assert!(matches!(joiner.approve(None), Err(ClientError::InvalidState { .. })));
}

#[tokio::test]
async fn join_before_open_is_a_transient_conflict() {
    let server = TestServer::start().await.unwrap();
    let code = RoomCode::parse("555555").unwrap();

    let err = join(&code, &server.base_url(), None).await.unwrap_err();
    assert!(matches!(&err, ClientError::RoomNotOpen { code: refused } if *refused == code));
    assert!(!err.is_fatal());
}

#[tokio::test]
async fn conflicting_open_is_fatal() {
    let server = TestServer::start().await.unwrap();
    let http = RoomHttp::new(&server.base_url());
    let code = RoomCode::parse("565656").unwrap();
    let mut signer = signer();

    http.open(&code, &OpenOptions::new().signed_by(&mut signer).unwrap()).await.unwrap();
    let err = http
        .open(&code, &OpenOptions::new().signed_by(&mut signer).unwrap())
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::Status { status: StatusCode::CONFLICT, .. }));
    assert!(err.is_fatal());
}

#[tokio::test]
async fn initiate_without_auth_is_refused() {
    let server = TestServer::start().await.unwrap();

    let err = initiate(&server.base_url(), OpenOptions::new(), None).await.unwrap_err();
    match &err {
        ClientError::Status { status, body } => {
            assert_eq!(*status, StatusCode::UNAUTHORIZED);
            assert_eq!(body, "Missing auth header");
        },
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.is_fatal());
}

#[tokio::test]
async fn replayed_header_is_forbidden() {
    let server = TestServer::start().await.unwrap();
    let options = OpenOptions::new().signed_by(&mut signer()).unwrap();

    initiate(&server.base_url(), options.clone(), None).await.unwrap();
    let err = initiate(&server.base_url(), options, None).await.unwrap_err();
    assert!(matches!(err, ClientError::Status { status: StatusCode::FORBIDDEN, .. }));
}

#[tokio::test]
async fn socket_to_unopened_room_is_closed_with_1002() {
    let server = TestServer::start().await.unwrap();
    let (mut socket, _) = connect_async(server.socket_url("123456")).await.unwrap();

    let frame = tokio::time::timeout(WAIT, socket.next()).await.unwrap().unwrap().unwrap();
    match frame {
        Message::Close(Some(close)) => {
            assert_eq!(u16::from(close.code), CLOSE_NOT_OPEN);
            assert_eq!(close.reason.as_str(), "Room is not open");
        },
        other => panic!("expected close frame, got {other:?}"),
    }
}

#[tokio::test]
async fn third_socket_is_refused() {
    let server = TestServer::start().await.unwrap();
    let (code, _initiator, _joiner) = paired(&server).await;

    let (mut socket, _) = connect_async(server.socket_url(code.as_str())).await.unwrap();
    let frame = tokio::time::timeout(WAIT, socket.next()).await.unwrap().unwrap().unwrap();
    assert!(
        matches!(&frame, Message::Close(Some(close)) if u16::from(close.code) == CLOSE_ROOM_FULL),
        "expected 1008, got {frame:?}"
    );
}
