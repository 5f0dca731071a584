//! Core error types.

use thiserror::Error;

/// Errors from room code validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodeError {
    /// Code is the empty string.
    #[error("room code is empty")]
    Empty,

    /// Code exceeds the widest accepted length.
    #[error("room code has {len} digits, at most {max} allowed")]
    TooLong {
        /// Length of the rejected code.
        len: usize,
        /// Maximum accepted length.
        max: usize,
    },

    /// Code contains something other than an ASCII digit.
    #[error("room code contains non-digit {0:?}")]
    NonDigit(char),
}

/// Errors from decoding control messages and request bodies.
#[derive(Debug, Error)]
pub enum MessageError {
    /// Payload was not valid JSON or did not match the expected shape.
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors from signed authorization headers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// No `Authorization` header on the request.
    #[error("missing authorization header")]
    Missing,

    /// Header is not of the form `Signed <key>.<seq>.<signature>`.
    #[error("malformed authorization header: {reason}")]
    Malformed {
        /// What was wrong with the header.
        reason: String,
    },

    /// Signature does not verify against the embedded key.
    #[error("signature verification failed")]
    BadSignature,

    /// Key is well-formed but not in the trusted set.
    #[error("untrusted signing key {key}")]
    UntrustedKey {
        /// Hex-encoded public key.
        key: String,
    },

    /// Sequence number did not increase since the last accepted header.
    #[error("replayed sequence {seq}, last accepted {last}")]
    Replayed {
        /// Sequence number presented.
        seq: u64,
        /// Highest sequence number accepted so far for this key.
        last: u64,
    },
}

/// Errors from the room state machine.
#[derive(Debug, Error)]
pub enum RoomError {
    /// A WebSocket frame could not be decoded as a control message.
    #[error("malformed control message from connection {conn}: {source}")]
    MalformedMessage {
        /// Connection the frame came from.
        conn: u64,
        /// Underlying decode failure.
        #[source]
        source: MessageError,
    },

    /// Message arrived from a connection the room never accepted.
    #[error("unknown connection {0}")]
    UnknownConnection(u64),
}
