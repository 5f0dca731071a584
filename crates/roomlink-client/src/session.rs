//! Pairing session over a WebSocket.
//!
//! A [`PairingSession`] owns one socket. A reader task decodes incoming
//! control frames and feeds them to the session's [`SessionCore`]; a writer
//! task drains outgoing frames. Sends never wait for the peer.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use roomlink_core::{
    ControlMessage, Role, RoomCode, SessionCore, SessionEvent, SessionEventKind, SessionState,
    Verification,
};
use serde_json::Value;
use tokio::{
    net::TcpStream,
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

use crate::{error::ClientError, events::EventBus};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug)]
struct Shared {
    core: SessionCore,
    bus: EventBus,
}

impl Shared {
    fn emit(&mut self, event: Option<SessionEvent>) {
        if let Some(event) = event {
            tracing::debug!(kind = ?event.kind(), "session event");
            self.bus.publish(event);
        }
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

enum Outgoing {
    Frame(String),
    Close,
}

/// A session that has not connected its socket yet.
pub(crate) struct SessionBuilder {
    shared: Arc<Mutex<Shared>>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
}

impl SessionBuilder {
    pub(crate) fn new(role: Role) -> Self {
        let (bus, events) = EventBus::new();
        Self { shared: Arc::new(Mutex::new(Shared { core: SessionCore::new(role), bus })), events }
    }

    /// Record the initiator's note (joiner only).
    pub(crate) fn note_received(&self, note: Value) {
        let mut shared = lock(&self.shared);
        let event = shared.core.note_received(note);
        shared.emit(event);
    }

    /// Open the socket and start the reader and writer tasks.
    pub(crate) async fn connect(
        self,
        url: &str,
        code: RoomCode,
    ) -> Result<PairingSession, ClientError> {
        let (socket, _response) = connect_async(url).await?;
        tracing::debug!(%code, url, "socket established");

        let (sink, stream) = socket.split();
        lock(&self.shared).core.connected();

        let (outgoing, queue) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_loop(sink, queue));
        let reader = tokio::spawn(read_loop(stream, Arc::clone(&self.shared)));

        Ok(PairingSession { code, shared: self.shared, outgoing, events: self.events, reader, writer })
    }
}

/// One side of a pairing handshake.
///
/// Events can be observed two ways: [`subscribe`](Self::subscribe) for a
/// single kind, or [`next_event`](Self::next_event) for every event in order.
/// Neither imposes a timeout; wrap them in `tokio::time::timeout` to bound
/// the wait.
pub struct PairingSession {
    code: RoomCode,
    shared: Arc<Mutex<Shared>>,
    outgoing: mpsc::UnboundedSender<Outgoing>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl PairingSession {
    /// The room code.
    pub fn code(&self) -> &RoomCode {
        &self.code
    }

    /// This session's role.
    pub fn role(&self) -> Role {
        lock(&self.shared).core.role()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        lock(&self.shared).core.state().clone()
    }

    /// Verdict so far.
    pub fn verification(&self) -> Verification {
        lock(&self.shared).core.verification()
    }

    /// The initiator's note (joiner only).
    pub fn peer_note(&self) -> Option<Value> {
        lock(&self.shared).core.peer_note().cloned()
    }

    /// The joiner's `join` payload, once received (initiator only).
    pub fn peer_join_payload(&self) -> Option<Value> {
        lock(&self.shared).core.peer_join_payload().cloned()
    }

    /// Approve the joiner.
    ///
    /// # Errors
    ///
    /// - `ClientError::InvalidState` for a joiner session
    /// - `ClientError::SessionClosed` if the socket is gone
    pub fn approve(&self, data: Option<Value>) -> Result<(), ClientError> {
        self.send_verdict(ControlMessage::approve(data), Verification::Approved)
    }

    /// Reject the joiner.
    ///
    /// # Errors
    ///
    /// - `ClientError::InvalidState` for a joiner session
    /// - `ClientError::SessionClosed` if the socket is gone
    pub fn reject(&self, data: Option<Value>) -> Result<(), ClientError> {
        self.send_verdict(ControlMessage::reject(data), Verification::Rejected)
    }

    fn send_verdict(&self, message: ControlMessage, verdict: Verification) -> Result<(), ClientError> {
        if self.role() != Role::Initiator {
            return Err(ClientError::InvalidState {
                reason: "only the initiator sends a verdict".to_string(),
            });
        }
        self.send(&message)?;
        lock(&self.shared).core.verdict_sent(verdict);
        Ok(())
    }

    /// Queue a control frame for the peer.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::SessionClosed` if the writer has stopped.
    pub fn send(&self, message: &ControlMessage) -> Result<(), ClientError> {
        tracing::debug!(code = %self.code, kind = message.kind.as_str(), "sending control frame");
        self.outgoing
            .send(Outgoing::Frame(message.to_json()))
            .map_err(|_| ClientError::SessionClosed)
    }

    /// Receive the event of `kind`.
    ///
    /// Resolves immediately if it already fired. The receiver errors if the
    /// socket closes or the session is dropped before the event fires.
    pub fn subscribe(&self, kind: SessionEventKind) -> oneshot::Receiver<SessionEvent> {
        lock(&self.shared).bus.subscribe(kind)
    }

    /// Next event in emission order, or `None` once the session is finished.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    /// Close the socket.
    ///
    /// # Errors
    ///
    /// This never fails today; the signature leaves room for reporting a
    /// failed close handshake.
    pub async fn close(mut self) -> Result<(), ClientError> {
        if self.outgoing.send(Outgoing::Close).is_ok() {
            let _ = (&mut self.writer).await;
        }
        tracing::debug!(code = %self.code, "session closed");
        Ok(())
    }
}

impl Drop for PairingSession {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

impl std::fmt::Debug for PairingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairingSession")
            .field("code", &self.code)
            .field("role", &self.role())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

async fn write_loop(
    mut sink: SplitSink<Socket, Message>,
    mut queue: mpsc::UnboundedReceiver<Outgoing>,
) {
    while let Some(outgoing) = queue.recv().await {
        match outgoing {
            Outgoing::Frame(text) => {
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    tracing::warn!("send failed: {}", e);
                    break;
                }
            },
            Outgoing::Close => {
                if let Err(e) = sink.close().await {
                    tracing::debug!("close failed: {}", e);
                }
                break;
            },
        }
    }
}

async fn read_loop(mut stream: SplitStream<Socket>, shared: Arc<Mutex<Shared>>) {
    let (code, reason) = loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => match ControlMessage::from_json(text.as_str()) {
                Ok(message) => {
                    let mut shared = lock(&shared);
                    let event = shared.core.handle_message(message);
                    shared.emit(event);
                },
                Err(e) => tracing::warn!("ignoring malformed frame: {}", e),
            },
            Some(Ok(Message::Close(frame))) => {
                break match frame {
                    Some(frame) => (Some(u16::from(frame.code)), frame.reason.as_str().to_owned()),
                    None => (None, String::new()),
                };
            },
            Some(Ok(_)) => {},
            Some(Err(e)) => break (None, e.to_string()),
            None => break (None, String::new()),
        }
    };

    tracing::debug!(?code, reason, "socket closed");
    let mut shared = lock(&shared);
    let event = shared.core.closed(code, reason);
    shared.emit(event);
    shared.bus.finish();
}
