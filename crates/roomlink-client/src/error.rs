//! Client error types.

use http::StatusCode;
use roomlink_core::{CodeError, MessageError, RoomCode};
use thiserror::Error;

/// Errors from client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The room answered with a non-2xx status.
    #[error("room responded {status}: {body}")]
    Status {
        /// Response status.
        status: StatusCode,
        /// Response body, as text.
        body: String,
    },

    /// The note fetch found the room not open yet (GET answered 409).
    #[error("room {code} is not open yet")]
    RoomNotOpen {
        /// Room that was fetched.
        code: RoomCode,
    },

    /// HTTP request could not be completed.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// WebSocket handshake or I/O failed.
    #[error("websocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    /// Base URL cannot be turned into a room URL.
    #[error("invalid base url {url:?}: {reason}")]
    InvalidUrl {
        /// Offending URL.
        url: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Header name or value is not valid HTTP.
    #[error("invalid header: {reason}")]
    InvalidHeader {
        /// Description of the header error.
        reason: String,
    },

    /// Room code failed validation.
    #[error("invalid room code: {0}")]
    InvalidCode(#[from] CodeError),

    /// A body or frame failed to decode.
    #[error("invalid message: {0}")]
    Message(#[from] MessageError),

    /// Every generated code was taken.
    #[error("no free room code after {attempts} attempts")]
    CodeSpaceExhausted {
        /// Candidates probed.
        attempts: u32,
    },

    /// Session is in the wrong state for the operation.
    #[error("invalid state: {reason}")]
    InvalidState {
        /// Description of the state error.
        reason: String,
    },

    /// The session's socket is gone.
    #[error("session closed")]
    SessionClosed,
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}

impl ClientError {
    /// Returns true if this error is fatal (unrecoverable).
    ///
    /// Fatal errors mean the same call will fail again. Transient errors
    /// (network failures, a joiner's room that is not open yet) may succeed
    /// on a later attempt. Every other refused request, including a 409 on
    /// the opening POST, is fatal.
    pub fn is_fatal(&self) -> bool {
        match self {
            // Transient: the room may open, the network may recover
            Self::RoomNotOpen { .. } | Self::Request(_) | Self::WebSocket(_) => false,

            // Fatal: refused request, bad input, exhausted code space, dead session
            Self::Status { .. }
            | Self::InvalidUrl { .. }
            | Self::InvalidHeader { .. }
            | Self::InvalidCode(_)
            | Self::Message(_)
            | Self::CodeSpaceExhausted { .. }
            | Self::InvalidState { .. }
            | Self::SessionClosed => true,
        }
    }
}
