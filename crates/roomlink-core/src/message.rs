//! Wire payloads.
//!
//! Control messages travel as single JSON text frames over the room's
//! WebSocket: `{"type": "join" | "approve" | "reject", "data": <opaque>}`.
//! The opening POST body and the note GET response are small JSON objects
//! carrying the initiator's note.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::MessageError;

/// Discriminant of a control message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlKind {
    /// Joiner announces itself to the initiator.
    Join,
    /// Initiator accepts the joiner.
    Approve,
    /// Initiator refuses the joiner.
    Reject,
    /// Any other `type`. Relayed by the room, ignored by sessions.
    #[serde(other)]
    Unknown,
}

impl ControlKind {
    /// Lowercase wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Join => "join",
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Unknown => "unknown",
        }
    }
}

/// A typed JSON frame exchanged once both peers are connected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlMessage {
    /// Message type.
    #[serde(rename = "type")]
    pub kind: ControlKind,
    /// Application payload, omitted on the wire when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ControlMessage {
    /// Build a message of the given kind.
    pub fn new(kind: ControlKind, data: Option<Value>) -> Self {
        Self { kind, data }
    }

    /// `join` carrying the joiner's payload.
    pub fn join(data: Option<Value>) -> Self {
        Self::new(ControlKind::Join, data)
    }

    /// `approve`, optionally with application data.
    pub fn approve(data: Option<Value>) -> Self {
        Self::new(ControlKind::Approve, data)
    }

    /// `reject`, optionally with application data.
    pub fn reject(data: Option<Value>) -> Self {
        Self::new(ControlKind::Reject, data)
    }

    /// Decode a text frame.
    ///
    /// # Errors
    ///
    /// Returns `MessageError::Json` if the frame is not a JSON object with a
    /// string `type` field.
    pub fn from_json(text: &str) -> Result<Self, MessageError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Interpret an already parsed frame.
    ///
    /// Returns `None` unless `frame` is an object with a string `type`.
    pub fn from_value(frame: &Value) -> Option<Self> {
        frame.get("type")?.as_str()?;
        Self::deserialize(frame).ok()
    }

    /// Encode as a text frame.
    pub fn to_json(&self) -> String {
        // A struct of an enum and a `Value` always serializes.
        serde_json::to_string(self)
            .unwrap_or_else(|_| format!("{{\"type\":\"{}\"}}", self.kind.as_str()))
    }
}

/// Body of the opening POST.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpenRequest {
    /// Note published to the joiner. Omitted when the initiator has none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<Value>,
}

impl OpenRequest {
    /// Parse an opening body and return the note to store.
    ///
    /// Any JSON document is accepted; the note is the `note` field of an
    /// object, normalized by [`normalize_note`].
    ///
    /// # Errors
    ///
    /// Returns `MessageError::Json` if `body` is not valid JSON.
    pub fn note_from_body(body: &[u8]) -> Result<Value, MessageError> {
        let document: Value = serde_json::from_slice(body)?;
        Ok(normalize_note(document.get("note").cloned()))
    }
}

/// Body of a successful GET on an open room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteResponse {
    /// The note stored by the opening POST.
    pub note: Value,
}

/// Map an absent or falsy note (`null`, `false`, `0`, `""`) to `false`.
///
/// An open room always holds a non-null note, so `false` doubles as the
/// "opened without a note" marker.
pub fn normalize_note(note: Option<Value>) -> Value {
    match note {
        None | Some(Value::Null) | Some(Value::Bool(false)) => Value::Bool(false),
        Some(Value::String(s)) if s.is_empty() => Value::Bool(false),
        Some(Value::Number(n)) if n.as_f64() == Some(0.0) => Value::Bool(false),
        Some(other) => other,
    }
}
