//! Per-session publish/subscribe with at-most-once delivery per kind.
//!
//! [`SessionCore`](roomlink_core::SessionCore) already guarantees each kind
//! is emitted at most once. The bus remembers what was emitted so a
//! subscriber that arrives late still sees it, and feeds an ordered stream of
//! every event. Once the socket is gone the bus is finished: the stream ends
//! and subscriptions to kinds that never fired resolve with an error.

use roomlink_core::{SessionEvent, SessionEventKind};
use tokio::sync::{mpsc, oneshot};

#[derive(Debug)]
pub(crate) struct EventBus {
    fired: Vec<Option<SessionEvent>>,
    waiters: Vec<Vec<oneshot::Sender<SessionEvent>>>,
    /// `None` once finished.
    stream: Option<mpsc::UnboundedSender<SessionEvent>>,
}

impl EventBus {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let kinds = SessionEventKind::ALL.len();
        let (stream, receiver) = mpsc::unbounded_channel();
        let bus = Self {
            fired: vec![None; kinds],
            waiters: (0..kinds).map(|_| Vec::new()).collect(),
            stream: Some(stream),
        };
        (bus, receiver)
    }

    /// Deliver `event` to its subscribers and the stream.
    pub(crate) fn publish(&mut self, event: SessionEvent) {
        let index = event.kind().index();
        for waiter in self.waiters[index].drain(..) {
            let _ = waiter.send(event.clone());
        }
        // Receiver may be gone if the session was dropped.
        if let Some(stream) = &self.stream {
            let _ = stream.send(event.clone());
        }
        self.fired[index] = Some(event);
    }

    /// Receive the single event of `kind`, including one already published.
    pub(crate) fn subscribe(&mut self, kind: SessionEventKind) -> oneshot::Receiver<SessionEvent> {
        let (sender, receiver) = oneshot::channel();
        match &self.fired[kind.index()] {
            Some(event) => {
                let _ = sender.send(event.clone());
            },
            None if self.is_finished() => drop(sender),
            None => self.waiters[kind.index()].push(sender),
        }
        receiver
    }

    /// No further events will be published.
    ///
    /// Ends the stream after the events already queued and releases every
    /// pending subscriber.
    pub(crate) fn finish(&mut self) {
        self.stream = None;
        self.waiters.iter_mut().for_each(Vec::clear);
    }

    fn is_finished(&self) -> bool {
        self.stream.is_none()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn subscribers_before_and_after_publish_both_see_event() {
        let (mut bus, _stream) = EventBus::new();
        let early = bus.subscribe(SessionEventKind::Join);

        bus.publish(SessionEvent::Join(Some(json!({ "name": "B" }))));
        let late = bus.subscribe(SessionEventKind::Join);

        assert_eq!(early.await.unwrap(), SessionEvent::Join(Some(json!({ "name": "B" }))));
        assert_eq!(late.await.unwrap(), SessionEvent::Join(Some(json!({ "name": "B" }))));
    }

    #[tokio::test]
    async fn stream_preserves_order() {
        let (mut bus, mut stream) = EventBus::new();
        bus.publish(SessionEvent::Note(json!("hi")));
        bus.publish(SessionEvent::Approve(None));

        assert_eq!(stream.recv().await, Some(SessionEvent::Note(json!("hi"))));
        assert_eq!(stream.recv().await, Some(SessionEvent::Approve(None)));
    }

    #[tokio::test]
    async fn other_kinds_stay_pending() {
        let (mut bus, _stream) = EventBus::new();
        let mut reject = bus.subscribe(SessionEventKind::Reject);
        bus.publish(SessionEvent::Approve(None));

        assert!(reject.try_recv().is_err());
    }

    #[tokio::test]
    async fn finish_ends_stream_and_releases_waiters() {
        let (mut bus, mut stream) = EventBus::new();
        let pending = bus.subscribe(SessionEventKind::Approve);
        bus.publish(SessionEvent::Closed { code: Some(1000), reason: "bye".to_string() });
        bus.finish();

        assert!(matches!(stream.recv().await, Some(SessionEvent::Closed { .. })));
        assert_eq!(stream.recv().await, None);
        assert!(pending.await.is_err());
        assert!(bus.subscribe(SessionEventKind::Reject).await.is_err());
        assert!(bus.subscribe(SessionEventKind::Closed).await.is_ok());
    }
}
