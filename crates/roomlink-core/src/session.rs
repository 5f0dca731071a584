//! Pairing session state machine.
//!
//! `SessionCore` is the sans-IO half of a pairing session. The client feeds it
//! decoded control messages and socket lifecycle changes; it answers with the
//! lifecycle events to surface, enforcing that each event kind fires at most
//! once per session.
//!
//! ```text
//! Connecting ──► Connected ──► Joined (initiator) ──────┐
//!                    │                                    ├──► Resolved
//!                    └───────► NoteReceived (joiner) ─────┘
//! any state ──► Closed
//! ```

use serde_json::Value;

use crate::message::{ControlKind, ControlMessage};

/// Which side of the handshake a session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Opened the room; approves or rejects the joiner.
    Initiator,
    /// Knows the code; waits for a verdict.
    Joiner,
}

/// Outcome of the handshake as seen by this session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Verification {
    /// No verdict yet.
    #[default]
    Unknown,
    /// Joiner was approved.
    Approved,
    /// Joiner was rejected.
    Rejected,
}

/// Lifecycle state of a pairing session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Socket not yet established.
    Connecting,
    /// Socket established, nothing observed yet.
    Connected,
    /// Initiator saw the joiner's `join`.
    Joined,
    /// Joiner fetched the initiator's note.
    NoteReceived,
    /// A verdict was sent (initiator) or received (joiner).
    Resolved(Verification),
    /// Socket ended.
    Closed {
        /// WebSocket close code, if the peer sent one.
        code: Option<u16>,
        /// Close reason.
        reason: String,
    },
}

impl SessionState {
    fn rank(&self) -> u8 {
        match self {
            Self::Connecting => 0,
            Self::Connected => 1,
            Self::Joined | Self::NoteReceived => 2,
            Self::Resolved(_) => 3,
            Self::Closed { .. } => 4,
        }
    }
}

const KIND_COUNT: usize = 5;

/// Event kinds a session can surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionEventKind {
    /// Joiner received the initiator's note.
    Note,
    /// Initiator received the joiner's `join`.
    Join,
    /// Joiner was approved.
    Approve,
    /// Joiner was rejected.
    Reject,
    /// Socket closed.
    Closed,
}

impl SessionEventKind {
    /// Every kind, in declaration order.
    pub const ALL: [Self; KIND_COUNT] =
        [Self::Note, Self::Join, Self::Approve, Self::Reject, Self::Closed];

    /// Position of this kind in [`Self::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }
}

/// A lifecycle event.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The initiator's note (joiner only).
    Note(Value),
    /// The joiner's `join` payload (initiator only).
    Join(Option<Value>),
    /// The initiator's approval payload (joiner only).
    Approve(Option<Value>),
    /// The initiator's rejection payload (joiner only).
    Reject(Option<Value>),
    /// The socket ended.
    Closed {
        /// WebSocket close code, if any.
        code: Option<u16>,
        /// Close reason.
        reason: String,
    },
}

impl SessionEvent {
    /// The event's kind.
    pub fn kind(&self) -> SessionEventKind {
        match self {
            Self::Note(_) => SessionEventKind::Note,
            Self::Join(_) => SessionEventKind::Join,
            Self::Approve(_) => SessionEventKind::Approve,
            Self::Reject(_) => SessionEventKind::Reject,
            Self::Closed { .. } => SessionEventKind::Closed,
        }
    }

    /// The event's payload as a JSON value (`null` when absent).
    pub fn data(&self) -> Value {
        match self {
            Self::Note(note) => note.clone(),
            Self::Join(data) | Self::Approve(data) | Self::Reject(data) => {
                data.clone().unwrap_or(Value::Null)
            },
            Self::Closed { .. } => Value::Null,
        }
    }
}

/// Sans-IO pairing session.
#[derive(Debug, Clone)]
pub struct SessionCore {
    role: Role,
    state: SessionState,
    verification: Verification,
    peer_note: Option<Value>,
    peer_join_payload: Option<Value>,
    fired: [bool; KIND_COUNT],
}

impl SessionCore {
    /// A fresh session in `Connecting`.
    pub fn new(role: Role) -> Self {
        Self {
            role,
            state: SessionState::Connecting,
            verification: Verification::Unknown,
            peer_note: None,
            peer_join_payload: None,
            fired: [false; KIND_COUNT],
        }
    }

    /// This session's role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Current state.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Verdict so far.
    pub fn verification(&self) -> Verification {
        self.verification
    }

    /// The initiator's note, once fetched (joiner only).
    pub fn peer_note(&self) -> Option<&Value> {
        self.peer_note.as_ref()
    }

    /// The joiner's `join` payload, once received (initiator only).
    pub fn peer_join_payload(&self) -> Option<&Value> {
        self.peer_join_payload.as_ref()
    }

    /// Whether an event of `kind` has already been emitted.
    pub fn has_fired(&self, kind: SessionEventKind) -> bool {
        self.fired[kind.index()]
    }

    fn is_closed(&self) -> bool {
        matches!(self.state, SessionState::Closed { .. })
    }

    fn advance(&mut self, next: SessionState) {
        if next.rank() >= self.state.rank() {
            self.state = next;
        }
    }

    fn fire(&mut self, event: SessionEvent) -> Option<SessionEvent> {
        let slot = &mut self.fired[event.kind().index()];
        if *slot {
            return None;
        }
        *slot = true;
        Some(event)
    }

    /// The socket is established.
    pub fn connected(&mut self) {
        if self.state == SessionState::Connecting {
            self.state = SessionState::Connected;
        }
    }

    /// The joiner fetched the initiator's note.
    ///
    /// Returns the `Note` event the first time; `None` afterwards or for an
    /// initiator.
    pub fn note_received(&mut self, note: Value) -> Option<SessionEvent> {
        if self.role != Role::Joiner || self.is_closed() {
            return None;
        }
        let event = self.fire(SessionEvent::Note(note.clone()))?;
        self.peer_note = Some(note);
        self.advance(SessionState::NoteReceived);
        Some(event)
    }

    /// A control message arrived from the peer.
    ///
    /// Initiators surface the first `join`; joiners surface the first
    /// `approve` or `reject`, after which the session is resolved and any
    /// further verdict is ignored.
    pub fn handle_message(&mut self, message: ControlMessage) -> Option<SessionEvent> {
        if self.is_closed() {
            return None;
        }

        match (self.role, message.kind) {
            (Role::Initiator, ControlKind::Join) => {
                let event = self.fire(SessionEvent::Join(message.data.clone()))?;
                self.peer_join_payload = message.data;
                self.advance(SessionState::Joined);
                Some(event)
            },
            (Role::Joiner, ControlKind::Approve | ControlKind::Reject) => {
                if self.verification != Verification::Unknown {
                    tracing::debug!(kind = message.kind.as_str(), "verdict after resolution ignored");
                    return None;
                }
                let (event, verdict) = if message.kind == ControlKind::Approve {
                    (SessionEvent::Approve(message.data), Verification::Approved)
                } else {
                    (SessionEvent::Reject(message.data), Verification::Rejected)
                };
                let event = self.fire(event)?;
                self.verification = verdict;
                self.advance(SessionState::Resolved(verdict));
                Some(event)
            },
            (role, kind) => {
                tracing::debug!(?role, kind = kind.as_str(), "unexpected message type");
                None
            },
        }
    }

    /// The initiator sent its verdict.
    ///
    /// Only the first verdict is recorded; the message itself is still the
    /// caller's to send.
    pub fn verdict_sent(&mut self, verdict: Verification) {
        if self.role != Role::Initiator
            || self.is_closed()
            || self.verification != Verification::Unknown
            || verdict == Verification::Unknown
        {
            return;
        }
        self.verification = verdict;
        self.advance(SessionState::Resolved(verdict));
    }

    /// The socket ended.
    pub fn closed(&mut self, code: Option<u16>, reason: String) -> Option<SessionEvent> {
        if self.is_closed() {
            return None;
        }
        self.state = SessionState::Closed { code, reason: reason.clone() };
        self.fire(SessionEvent::Closed { code, reason })
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    #[test]
    fn initiator_emits_single_join() {
        let mut session = SessionCore::new(Role::Initiator);
        session.connected();

        let first = session.handle_message(ControlMessage::join(Some(json!({ "name": "B" }))));
        assert_eq!(first, Some(SessionEvent::Join(Some(json!({ "name": "B" })))));
        assert_eq!(session.state(), &SessionState::Joined);
        assert_eq!(session.peer_join_payload(), Some(&json!({ "name": "B" })));

        let second = session.handle_message(ControlMessage::join(Some(json!({ "name": "C" }))));
        assert_eq!(second, None);
        assert_eq!(session.peer_join_payload(), Some(&json!({ "name": "B" })));
    }

    #[test]
    fn initiator_ignores_verdicts_from_peer() {
        let mut session = SessionCore::new(Role::Initiator);
        assert_eq!(session.handle_message(ControlMessage::approve(None)), None);
        assert_eq!(session.verification(), Verification::Unknown);
    }

    #[test]
    fn joiner_reject_blocks_later_approve() {
        let mut session = SessionCore::new(Role::Joiner);
        session.connected();

        let reject = session.handle_message(ControlMessage::reject(None));
        assert_eq!(reject, Some(SessionEvent::Reject(None)));

        let approve = session.handle_message(ControlMessage::approve(None));
        assert_eq!(approve, None);
        assert_eq!(session.verification(), Verification::Rejected);
        assert_eq!(session.state(), &SessionState::Resolved(Verification::Rejected));
    }

    #[test]
    fn joiner_note_fires_once() {
        let mut session = SessionCore::new(Role::Joiner);
        assert!(session.note_received(json!("hello")).is_some());
        assert!(session.note_received(json!("again")).is_none());
        assert_eq!(session.peer_note(), Some(&json!("hello")));
        assert_eq!(session.state(), &SessionState::NoteReceived);

        // Socket opening after the note does not move the state backwards.
        session.connected();
        assert_eq!(session.state(), &SessionState::NoteReceived);
    }

    #[test]
    fn closed_session_ignores_messages() {
        let mut session = SessionCore::new(Role::Joiner);
        let closed = session.closed(Some(1002), "Room is not open".to_string());
        assert_eq!(
            closed,
            Some(SessionEvent::Closed { code: Some(1002), reason: "Room is not open".to_string() })
        );
        assert_eq!(session.handle_message(ControlMessage::approve(None)), None);
        assert_eq!(session.closed(None, String::new()), None);
    }

    #[test]
    fn initiator_verdict_recorded_once() {
        let mut session = SessionCore::new(Role::Initiator);
        session.verdict_sent(Verification::Approved);
        session.verdict_sent(Verification::Rejected);
        assert_eq!(session.verification(), Verification::Approved);
    }

    fn arb_kind() -> impl Strategy<Value = ControlKind> {
        prop_oneof![
            Just(ControlKind::Join),
            Just(ControlKind::Approve),
            Just(ControlKind::Reject),
            Just(ControlKind::Unknown),
        ]
    }

    proptest! {
        #[test]
        fn joiner_resolves_at_most_once(kinds in prop::collection::vec(arb_kind(), 0..32)) {
            let mut session = SessionCore::new(Role::Joiner);
            session.connected();

            let resolutions = kinds
                .into_iter()
                .filter_map(|kind| session.handle_message(ControlMessage::new(kind, None)))
                .filter(|e| matches!(e, SessionEvent::Approve(_) | SessionEvent::Reject(_)))
                .count();

            prop_assert!(resolutions <= 1);
            prop_assert_eq!(resolutions == 1, session.verification() != Verification::Unknown);
        }

        #[test]
        fn initiator_joins_at_most_once(kinds in prop::collection::vec(arb_kind(), 0..32)) {
            let mut session = SessionCore::new(Role::Initiator);
            let joins = kinds
                .iter()
                .filter_map(|kind| session.handle_message(ControlMessage::new(*kind, None)))
                .count();

            prop_assert_eq!(joins, usize::from(kinds.contains(&ControlKind::Join)));
        }
    }
}
