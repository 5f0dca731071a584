//! Room registry.
//!
//! Maps room codes to running room actors. A room comes into existence the
//! first time an HTTP request or WebSocket connection references its code,
//! and is replaced by a fresh one if its actor has retired.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use roomlink_core::{
    ConnectionId, Environment, PairingHooks, Room, RoomCode, RoomRequest, RoomResponse,
};
use tokio::sync::{mpsc, oneshot};

use crate::{
    RoomConfig,
    actor::{Outbound, RoomActor, RoomCommand},
    error::ServerError,
};

struct RoomHandle {
    commands: mpsc::UnboundedSender<RoomCommand>,
    generation: u64,
}

pub(crate) struct Shared<H: PairingHooks, E: Environment> {
    rooms: Mutex<HashMap<RoomCode, RoomHandle>>,
    hooks: Arc<H>,
    env: E,
    config: RoomConfig,
    generations: AtomicU64,
    connections: AtomicU64,
}

impl<H: PairingHooks, E: Environment> Shared<H, E> {
    pub(crate) fn config(&self) -> &RoomConfig {
        &self.config
    }

    /// Remove an idle room unless a command slipped in after the timeout.
    ///
    /// Senders only enqueue while holding the registry lock, so checking the
    /// queue under the same lock is race-free.
    pub(crate) fn retire(
        &self,
        code: &RoomCode,
        generation: u64,
        commands: &mut mpsc::UnboundedReceiver<RoomCommand>,
    ) -> Option<RoomCommand> {
        let mut rooms = self.rooms.lock().unwrap_or_else(PoisonError::into_inner);
        if let Ok(command) = commands.try_recv() {
            return Some(command);
        }

        if rooms.get(code).is_some_and(|handle| handle.generation == generation) {
            rooms.remove(code);
        }
        commands.close();
        None
    }
}

/// A connection attached to a room.
#[derive(Debug)]
pub struct PeerLink {
    /// Connection id assigned by the registry.
    pub conn: ConnectionId,
    /// Frames the room wants written to this connection.
    pub outbound: mpsc::UnboundedReceiver<Outbound>,
}

/// Shared handle to every live room.
pub struct RoomRegistry<H: PairingHooks, E: Environment> {
    shared: Arc<Shared<H, E>>,
}

impl<H: PairingHooks, E: Environment> Clone for RoomRegistry<H, E> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl<H: PairingHooks, E: Environment> RoomRegistry<H, E> {
    /// Create an empty registry. Every room shares `hooks`.
    pub fn new(hooks: H, env: E, config: RoomConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                rooms: Mutex::new(HashMap::new()),
                hooks: Arc::new(hooks),
                env,
                config,
                generations: AtomicU64::new(0),
                connections: AtomicU64::new(1),
            }),
        }
    }

    /// Per-room limits.
    pub fn config(&self) -> &RoomConfig {
        &self.shared.config
    }

    /// Hooks shared by every room.
    pub fn hooks(&self) -> &Arc<H> {
        &self.shared.hooks
    }

    /// Number of live rooms.
    pub fn room_count(&self) -> usize {
        self.lock_rooms().len()
    }

    /// Whether a live room exists for `code`.
    pub fn contains(&self, code: &RoomCode) -> bool {
        self.lock_rooms().contains_key(code)
    }

    /// Hand an HTTP request to the room and wait for its response.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::RoomUnavailable` if the actor stops before
    /// answering.
    pub async fn request(
        &self,
        code: &RoomCode,
        request: RoomRequest,
    ) -> Result<RoomResponse, ServerError> {
        let (reply, response) = oneshot::channel();
        self.dispatch(code, RoomCommand::Request { request, reply });
        response.await.map_err(|_| ServerError::RoomUnavailable(code.to_string()))
    }

    /// Attach a new connection to the room.
    ///
    /// The room decides admission: a refused connection receives a single
    /// [`Outbound::Close`]. Connection ids are unique for the registry's
    /// lifetime.
    pub fn connect(&self, code: &RoomCode) -> PeerLink {
        let conn = self.shared.connections.fetch_add(1, Ordering::Relaxed);
        let (outbound, receiver) = mpsc::unbounded_channel();
        self.dispatch(code, RoomCommand::Connect { conn, outbound });
        PeerLink { conn, outbound: receiver }
    }

    /// Deliver a text frame from `conn`.
    pub fn send(&self, code: &RoomCode, conn: ConnectionId, text: String) {
        self.dispatch(code, RoomCommand::Message { conn, text });
    }

    /// Detach `conn` from the room.
    pub fn disconnect(&self, code: &RoomCode, conn: ConnectionId) {
        self.dispatch(code, RoomCommand::Disconnect { conn });
    }

    fn lock_rooms(&self) -> std::sync::MutexGuard<'_, HashMap<RoomCode, RoomHandle>> {
        self.shared.rooms.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn dispatch(&self, code: &RoomCode, command: RoomCommand) {
        let mut rooms = self.lock_rooms();

        let command = match rooms.get(code) {
            Some(handle) => match handle.commands.send(command) {
                Ok(()) => return,
                Err(mpsc::error::SendError(command)) => command,
            },
            None => command,
        };

        if !command.creates_room() {
            tracing::debug!(%code, "room gone, dropping event");
            return;
        }

        let handle = self.spawn_room(code);
        if handle.commands.send(command).is_err() {
            tracing::error!(%code, "fresh room actor refused a command");
        }
        rooms.insert(code.clone(), handle);
    }

    fn spawn_room(&self, code: &RoomCode) -> RoomHandle {
        let generation = self.shared.generations.fetch_add(1, Ordering::Relaxed);
        let room = Room::new(code.clone(), Arc::clone(&self.shared.hooks), self.shared.env.now());
        let actor = RoomActor::new(room, self.shared.env.clone());
        let (commands, receiver) = mpsc::unbounded_channel();

        tracing::info!(%code, generation, "room created");
        tokio::spawn(actor.run(receiver, Arc::clone(&self.shared), generation));

        RoomHandle { commands, generation }
    }
}

impl<H: PairingHooks, E: Environment> std::fmt::Debug for RoomRegistry<H, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomRegistry")
            .field("rooms", &self.room_count())
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}
