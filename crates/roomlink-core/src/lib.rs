//! roomlink core
//!
//! Sans-IO protocol logic for pairing two machines through an ephemeral,
//! code-named room. Nothing in this crate touches a socket: the hosting
//! substrate and the client drive these state machines and perform the I/O
//! they ask for.
//!
//! # Components
//!
//! - [`RoomCode`]: validated numeric room identifier
//! - [`Room`]: server-side authority for one room (HTTP contract, connection
//!   gate, relay)
//! - [`SessionCore`]: client-side pairing session with at-most-once events
//! - [`ControlMessage`]: `join`/`approve`/`reject` wire frames
//! - [`HeaderSigner`] / [`HeaderVerifier`]: signed authorization header for
//!   the opening POST
//! - [`Environment`]: time and randomness, swappable for tests

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod auth;
pub mod code;
pub mod env;
pub mod error;
pub mod message;
pub mod room;
pub mod session;

pub use auth::{
    AUTH_SCHEME, DEFAULT_REPLAY_CAPACITY, HeaderSigner, HeaderVerifier, SignedHeader,
    parse_verifying_key,
};
pub use code::{DEFAULT_CODE_LENGTH, MAX_CODE_LENGTH, RoomCode};
pub use env::{Environment, SystemEnv};
pub use error::{AuthError, CodeError, MessageError, RoomError};
pub use message::{ControlKind, ControlMessage, NoteResponse, OpenRequest, normalize_note};
pub use room::{
    CLOSE_NOT_OPEN, CLOSE_NOT_OPEN_REASON, CLOSE_ROOM_FULL, CLOSE_ROOM_FULL_REASON, ConnectionId,
    MAX_PEERS, PairingHooks, Room, RoomAction, RoomMetadata, RoomRequest, RoomResponse, RoomState,
    cors_headers,
};
pub use session::{
    Role, SessionCore, SessionEvent, SessionEventKind, SessionState, Verification,
};

/// Path prefix under which rooms are routed: `{base}/parties/main/{code}`.
pub const ROOM_PATH_PREFIX: &str = "/parties/main";
