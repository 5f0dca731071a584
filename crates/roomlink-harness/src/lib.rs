//! In-process harness for roomlink end-to-end tests.
//!
//! [`TestServer`] binds a real server on an ephemeral loopback port so tests
//! can drive it with the real client, raw HTTP, or raw WebSockets.
//! [`RecordingHooks`] wraps any [`PairingHooks`] and records the verdict
//! notifications the rooms deliver.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::{
    net::SocketAddr,
    sync::{Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use roomlink_core::{
    ControlKind, ControlMessage, PairingHooks, RoomCode, RoomRequest, RoomResponse, SystemEnv,
};
use roomlink_server::{
    RoomConfig, RoomRegistry, Server, ServerError, ServerRuntimeConfig, SignedHeaderHooks,
};
use tokio::task::JoinHandle;

/// A verdict notification seen by [`RecordingHooks`].
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    /// Room the verdict was relayed in.
    pub code: RoomCode,
    /// The relayed message.
    pub message: ControlMessage,
}

/// Delegates to `inner` and records every approve/reject notification.
#[derive(Debug, Default)]
pub struct RecordingHooks<H = SignedHeaderHooks> {
    inner: H,
    verdicts: Mutex<Vec<Verdict>>,
}

impl<H: PairingHooks> RecordingHooks<H> {
    /// Wrap `inner`.
    pub fn new(inner: H) -> Self {
        Self { inner, verdicts: Mutex::new(Vec::new()) }
    }

    /// Verdicts in the order they were delivered.
    pub fn verdicts(&self) -> Vec<Verdict> {
        self.verdicts.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Number of recorded verdicts of `kind`.
    pub fn count(&self, kind: ControlKind) -> usize {
        self.verdicts().iter().filter(|v| v.message.kind == kind).count()
    }

    fn record(&self, code: &RoomCode, message: &ControlMessage) {
        self.verdicts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Verdict { code: code.clone(), message: message.clone() });
    }
}

#[async_trait]
impl<H: PairingHooks> PairingHooks for RecordingHooks<H> {
    async fn auth(&self, request: &RoomRequest) -> RoomResponse {
        self.inner.auth(request).await
    }

    async fn on_approve(&self, code: &RoomCode, message: &ControlMessage) {
        self.record(code, message);
        self.inner.on_approve(code, message).await;
    }

    async fn on_reject(&self, code: &RoomCode, message: &ControlMessage) {
        self.record(code, message);
        self.inner.on_reject(code, message).await;
    }
}

/// A server running on `127.0.0.1:<ephemeral>`. Stopped on drop.
pub struct TestServer<H: PairingHooks = RecordingHooks> {
    addr: SocketAddr,
    registry: RoomRegistry<H, SystemEnv>,
    task: JoinHandle<Result<(), ServerError>>,
}

impl TestServer {
    /// Start a server with signed-header auth, recording verdicts.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Transport` if the loopback bind fails.
    pub async fn start() -> Result<Self, ServerError> {
        Self::with_hooks(RecordingHooks::new(SignedHeaderHooks::new()), RoomConfig::default())
            .await
    }
}

impl<H: PairingHooks> TestServer<H> {
    /// Start a server with custom hooks and room limits.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Transport` if the loopback bind fails.
    pub async fn with_hooks(hooks: H, room: RoomConfig) -> Result<Self, ServerError> {
        let config = ServerRuntimeConfig {
            bind_address: "127.0.0.1:0".to_string(),
            room,
            trusted_keys: Vec::new(),
        };
        let server = Server::bind_with_hooks(config, hooks).await?;
        let addr = server.local_addr()?;
        let registry = server.registry().clone();
        let task = tokio::spawn(server.run());

        tracing::debug!(%addr, "test server started");
        Ok(Self { addr, registry, task })
    }

    /// Bound address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// `http://127.0.0.1:<port>`.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// `ws://127.0.0.1:<port>/parties/main/{code}`.
    pub fn socket_url(&self, code: &str) -> String {
        format!("ws://{}{}/{code}", self.addr, roomlink_core::ROOM_PATH_PREFIX)
    }

    /// `http://127.0.0.1:<port>/parties/main/{code}`.
    pub fn room_url(&self, code: &str) -> String {
        format!("{}{}/{code}", self.base_url(), roomlink_core::ROOM_PATH_PREFIX)
    }

    /// The server's room registry.
    pub fn registry(&self) -> &RoomRegistry<H, SystemEnv> {
        &self.registry
    }

    /// The hooks every room shares.
    pub fn hooks(&self) -> &H {
        self.registry.hooks()
    }

    /// Poll `condition` every few milliseconds until it holds or `timeout`
    /// elapses. Returns whether it held.
    pub async fn eventually(&self, timeout: Duration, condition: impl Fn(&H) -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if condition(self.hooks()) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl<H: PairingHooks> Drop for TestServer<H> {
    fn drop(&mut self) {
        self.task.abort();
    }
}
