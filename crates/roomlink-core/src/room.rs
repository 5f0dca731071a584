//! Room State Machine
//!
//! Per-room authority over the pairing handshake. A room starts `Unopened`,
//! becomes `Open` exactly once through an authorized POST carrying the
//! initiator's note, and never goes back.
//!
//! ## Responsibilities
//!
//! - HTTP contract: OPTIONS/HEAD/GET/POST semantics and the fixed CORS set
//! - Connection gate: WebSocket peers are only admitted once the room is open
//! - Relay: every control message is rebroadcast to the other peers
//!
//! ## Design
//!
//! - Capability injection: `auth`, `on_approve` and `on_reject` come from a
//!   [`PairingHooks`] value handed over at construction
//! - Action-based: WebSocket events return [`RoomAction`]s, the hosting
//!   substrate performs the I/O
//! - Serialized access: the substrate must deliver one event at a time per
//!   room (`&mut self` everywhere)

use std::{collections::BTreeSet, sync::Arc, time::Instant};

use async_trait::async_trait;
use bytes::Bytes;
use http::{
    HeaderMap, HeaderValue, Method, StatusCode,
    header::{
        ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
        CONTENT_TYPE,
    },
};
use serde::Serialize;
use serde_json::Value;

use crate::{
    code::RoomCode,
    env::Environment,
    error::RoomError,
    message::{ControlKind, ControlMessage, NoteResponse, OpenRequest},
};

/// Identifier the substrate assigns to each WebSocket connection.
pub type ConnectionId = u64;

/// Close code for a connection attempt against an unopened room.
pub const CLOSE_NOT_OPEN: u16 = 1002;

/// Close reason sent with [`CLOSE_NOT_OPEN`].
pub const CLOSE_NOT_OPEN_REASON: &str = "Room is not open";

/// Close code for a connection attempt against a room that already has both
/// peers.
pub const CLOSE_ROOM_FULL: u16 = 1008;

/// Close reason sent with [`CLOSE_ROOM_FULL`].
pub const CLOSE_ROOM_FULL_REASON: &str = "Room is full";

/// Peers admitted concurrently: the initiator and the joiner.
pub const MAX_PEERS: usize = 2;

/// `Access-Control-Allow-Methods` value.
pub const CORS_ALLOW_METHODS: &str = "HEAD, POST, GET, OPTIONS";

/// `Access-Control-Allow-Headers` value.
pub const CORS_ALLOW_HEADERS: &str =
    "Origin, X-Requested-With, Content-Type, Accept, Authorization";

/// The CORS header set applied to every room response.
pub fn cors_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static(CORS_ALLOW_METHODS));
    headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static(CORS_ALLOW_HEADERS));
    headers
}

/// An HTTP request addressed to one room.
#[derive(Debug, Clone)]
pub struct RoomRequest {
    /// HTTP method.
    pub method: Method,
    /// Request headers, including the authorization header on POST.
    pub headers: HeaderMap,
    /// Raw request body.
    pub body: Bytes,
}

impl RoomRequest {
    /// Request with no headers and an empty body.
    pub fn new(method: Method) -> Self {
        Self { method, headers: HeaderMap::new(), body: Bytes::new() }
    }

    /// Replace the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Add a header. Values that are not valid header text are skipped.
    #[must_use]
    pub fn with_header(mut self, name: http::header::HeaderName, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.insert(name, value);
        }
        self
    }

    /// Header value as text, if present and valid UTF-8.
    pub fn header(&self, name: impl http::header::AsHeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// An HTTP response produced by the room.
#[derive(Debug, Clone)]
pub struct RoomResponse {
    /// Status code.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Response body.
    pub body: Bytes,
}

impl RoomResponse {
    /// Empty-bodied response carrying the CORS set.
    pub fn empty(status: StatusCode) -> Self {
        Self { status, headers: cors_headers(), body: Bytes::new() }
    }

    /// Plain-text response carrying the CORS set.
    pub fn text(status: StatusCode, text: &str) -> Self {
        let mut response = Self::empty(status);
        response.headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
        response.body = Bytes::copy_from_slice(text.as_bytes());
        response
    }

    /// JSON response carrying the CORS set.
    pub fn json<T: Serialize>(status: StatusCode, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => {
                let mut response = Self::empty(status);
                response.headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                response.body = Bytes::from(body);
                response
            },
            Err(e) => {
                tracing::error!("failed to encode response body: {}", e);
                Self::empty(StatusCode::INTERNAL_SERVER_ERROR)
            },
        }
    }

    /// Add any CORS header the response is missing.
    #[must_use]
    pub fn with_cors(mut self) -> Self {
        for (name, value) in &cors_headers() {
            if !self.headers.contains_key(name) {
                self.headers.insert(name.clone(), value.clone());
            }
        }
        self
    }

    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Capabilities the hosting application supplies to every room.
///
/// `auth` gates the opening POST; its response is forwarded verbatim when it
/// is not 2xx and returned as the POST's response when it is. The
/// notification hooks run after the corresponding message has been relayed;
/// their outcome does not affect the room.
#[async_trait]
pub trait PairingHooks: Send + Sync + 'static {
    /// Decide whether `request` may open the room.
    async fn auth(&self, request: &RoomRequest) -> RoomResponse;

    /// The initiator approved the joiner.
    async fn on_approve(&self, code: &RoomCode, message: &ControlMessage) {
        tracing::debug!(%code, ?message, "approve relayed");
    }

    /// The initiator rejected the joiner.
    async fn on_reject(&self, code: &RoomCode, message: &ControlMessage) {
        tracing::debug!(%code, ?message, "reject relayed");
    }
}

/// Lifecycle state of a room.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomState {
    /// No successful opening POST yet.
    Unopened,
    /// Opened; holds the initiator's note.
    Open {
        /// Note returned to GET requests.
        note: Value,
    },
}

/// Bookkeeping about a room, for logs.
#[derive(Debug, Clone)]
pub struct RoomMetadata {
    /// When the room authority was created.
    pub created_at: Instant,
    /// When the opening POST succeeded.
    pub opened_at: Option<Instant>,
    /// Control messages relayed so far.
    pub relayed: u64,
}

/// Work the substrate performs on behalf of the room.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomAction {
    /// Send `message` to every connected peer except `exclude`.
    Broadcast {
        /// Raw text frame, relayed verbatim.
        message: String,
        /// The sender.
        exclude: ConnectionId,
    },

    /// Close a connection.
    Close {
        /// Connection to close.
        conn: ConnectionId,
        /// WebSocket close code.
        code: u16,
        /// Close reason.
        reason: &'static str,
    },

    /// Invoke [`PairingHooks::on_approve`].
    NotifyApprove(ControlMessage),

    /// Invoke [`PairingHooks::on_reject`].
    NotifyReject(ControlMessage),
}

/// Per-room authority for one pairing handshake.
pub struct Room<H: PairingHooks> {
    code: RoomCode,
    state: RoomState,
    peers: BTreeSet<ConnectionId>,
    hooks: Arc<H>,
    metadata: RoomMetadata,
}

impl<H: PairingHooks> Room<H> {
    /// Create an unopened room.
    pub fn new(code: RoomCode, hooks: Arc<H>, created_at: Instant) -> Self {
        Self {
            code,
            state: RoomState::Unopened,
            peers: BTreeSet::new(),
            hooks,
            metadata: RoomMetadata { created_at, opened_at: None, relayed: 0 },
        }
    }

    /// The room's code.
    pub fn code(&self) -> &RoomCode {
        &self.code
    }

    /// Current lifecycle state.
    pub fn state(&self) -> &RoomState {
        &self.state
    }

    /// Whether the opening POST has succeeded.
    pub fn is_open(&self) -> bool {
        matches!(self.state, RoomState::Open { .. })
    }

    /// The stored note, once open.
    pub fn note(&self) -> Option<&Value> {
        match &self.state {
            RoomState::Open { note } => Some(note),
            RoomState::Unopened => None,
        }
    }

    /// Connected peers, in connection-id order.
    pub fn peers(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.peers.iter().copied()
    }

    /// Number of connected peers.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Room bookkeeping.
    pub fn metadata(&self) -> &RoomMetadata {
        &self.metadata
    }

    /// The injected capability set.
    pub fn hooks(&self) -> &Arc<H> {
        &self.hooks
    }

    /// Answer an HTTP request.
    ///
    /// Every response carries the CORS set. Error responses never mutate
    /// state.
    pub async fn handle_request<E: Environment>(
        &mut self,
        request: RoomRequest,
        env: &E,
    ) -> RoomResponse {
        let response = match request.method {
            Method::OPTIONS => RoomResponse::empty(StatusCode::OK),
            Method::HEAD => {
                if self.is_open() {
                    RoomResponse::empty(StatusCode::CONFLICT)
                } else {
                    RoomResponse::empty(StatusCode::OK)
                }
            },
            Method::GET => match &self.state {
                RoomState::Open { note } => {
                    RoomResponse::json(StatusCode::OK, &NoteResponse { note: note.clone() })
                },
                RoomState::Unopened => RoomResponse::empty(StatusCode::CONFLICT),
            },
            Method::POST => self.handle_open(&request, env).await,
            _ => RoomResponse::empty(StatusCode::METHOD_NOT_ALLOWED),
        };

        response.with_cors()
    }

    /// The opening POST: auth, parse the note, transition to `Open`.
    async fn handle_open<E: Environment>(&mut self, request: &RoomRequest, env: &E) -> RoomResponse {
        if self.is_open() {
            tracing::debug!(code = %self.code, "open rejected: room already open");
            return RoomResponse::empty(StatusCode::CONFLICT);
        }

        let auth = self.hooks.auth(request).await;
        if !auth.is_success() {
            tracing::debug!(code = %self.code, status = %auth.status, "open rejected by auth");
            return auth;
        }

        let note = match OpenRequest::note_from_body(&request.body) {
            Ok(note) => note,
            Err(e) => {
                tracing::warn!(code = %self.code, "open body unparseable: {}", e);
                return RoomResponse::empty(StatusCode::UNPROCESSABLE_ENTITY);
            },
        };

        self.state = RoomState::Open { note };
        self.metadata.opened_at = Some(env.now());
        tracing::info!(code = %self.code, "room opened");

        auth
    }

    /// A WebSocket connection attempt.
    ///
    /// Unopened rooms close the connection with [`CLOSE_NOT_OPEN`]; rooms
    /// that already hold [`MAX_PEERS`] close it with [`CLOSE_ROOM_FULL`].
    pub fn on_connect(&mut self, conn: ConnectionId) -> Vec<RoomAction> {
        if !self.is_open() {
            tracing::debug!(code = %self.code, conn, "connect refused: room not open");
            return vec![RoomAction::Close {
                conn,
                code: CLOSE_NOT_OPEN,
                reason: CLOSE_NOT_OPEN_REASON,
            }];
        }

        if self.peers.len() >= MAX_PEERS && !self.peers.contains(&conn) {
            tracing::warn!(code = %self.code, conn, "connect refused: room full");
            return vec![RoomAction::Close {
                conn,
                code: CLOSE_ROOM_FULL,
                reason: CLOSE_ROOM_FULL_REASON,
            }];
        }

        self.peers.insert(conn);
        tracing::debug!(code = %self.code, conn, peers = self.peers.len(), "peer connected");
        Vec::new()
    }

    /// A WebSocket connection ended.
    pub fn on_disconnect(&mut self, conn: ConnectionId) {
        if self.peers.remove(&conn) {
            tracing::debug!(code = %self.code, conn, peers = self.peers.len(), "peer left");
        }
    }

    /// A text frame arrived from `conn`.
    ///
    /// Any JSON frame is relayed verbatim to every other peer. Frames whose
    /// `type` is `approve` or `reject` also schedule the matching hook after
    /// the relay.
    ///
    /// # Errors
    ///
    /// Returns `RoomError::UnknownConnection` for frames from a connection
    /// the room never admitted and `RoomError::MalformedMessage` for frames
    /// that are not JSON. Neither changes state.
    pub fn on_message(
        &mut self,
        conn: ConnectionId,
        text: &str,
    ) -> Result<Vec<RoomAction>, RoomError> {
        if !self.is_open() {
            // Unreachable through the connect gate.
            tracing::debug!(code = %self.code, conn, "message on unopened room dropped");
            return Ok(Vec::new());
        }

        if !self.peers.contains(&conn) {
            return Err(RoomError::UnknownConnection(conn));
        }

        let frame: Value = serde_json::from_str(text)
            .map_err(|e| RoomError::MalformedMessage { conn, source: e.into() })?;
        let message = ControlMessage::from_value(&frame);

        tracing::debug!(
            code = %self.code,
            conn,
            kind = message.as_ref().map_or("untyped", |m| m.kind.as_str()),
            "relaying"
        );
        self.metadata.relayed += 1;

        let mut actions = vec![RoomAction::Broadcast { message: text.to_string(), exclude: conn }];
        match message {
            Some(message) if message.kind == ControlKind::Approve => {
                actions.push(RoomAction::NotifyApprove(message));
            },
            Some(message) if message.kind == ControlKind::Reject => {
                actions.push(RoomAction::NotifyReject(message));
            },
            _ => {},
        }

        Ok(actions)
    }

    /// Whether the room has no connected peers.
    pub fn is_idle(&self) -> bool {
        self.peers.is_empty()
    }
}

impl<H: PairingHooks> std::fmt::Debug for Room<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Room")
            .field("code", &self.code)
            .field("open", &self.is_open())
            .field("peers", &self.peers.len())
            .finish_non_exhaustive()
    }
}
