//! Per-room actor.
//!
//! Each room lives on its own task and owns its [`Room`]. HTTP requests and
//! connection events for the room arrive as [`RoomCommand`]s on one channel,
//! so the room handles them strictly one at a time. The actor performs the
//! [`RoomAction`]s the room returns, in order.

use std::{collections::HashMap, sync::Arc};

use roomlink_core::{
    ConnectionId, Environment, PairingHooks, Room, RoomAction, RoomRequest, RoomResponse,
};
use tokio::sync::{mpsc, oneshot};

use crate::registry::Shared;

/// Events delivered to a room actor.
pub(crate) enum RoomCommand {
    /// An HTTP request addressed to the room.
    Request { request: RoomRequest, reply: oneshot::Sender<RoomResponse> },
    /// A WebSocket connection was upgraded.
    Connect { conn: ConnectionId, outbound: mpsc::UnboundedSender<Outbound> },
    /// A text frame arrived on a connection.
    Message { conn: ConnectionId, text: String },
    /// A connection ended.
    Disconnect { conn: ConnectionId },
}

impl RoomCommand {
    /// Whether this command may bring a room into existence.
    pub(crate) fn creates_room(&self) -> bool {
        matches!(self, Self::Request { .. } | Self::Connect { .. })
    }
}

/// A frame the room wants written to one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Relay a text frame.
    Text(String),
    /// Close the connection with a code and reason.
    Close {
        /// WebSocket close code.
        code: u16,
        /// Close reason.
        reason: &'static str,
    },
}

pub(crate) struct RoomActor<H: PairingHooks, E: Environment> {
    room: Room<H>,
    peers: HashMap<ConnectionId, mpsc::UnboundedSender<Outbound>>,
    env: E,
}

impl<H: PairingHooks, E: Environment> RoomActor<H, E> {
    pub(crate) fn new(room: Room<H>, env: E) -> Self {
        Self { room, peers: HashMap::new(), env }
    }

    /// Process commands until the room retires or the registry goes away.
    ///
    /// While the room has no peers, an idle period of `idle_timeout` with no
    /// commands retires it. Retirement happens under the registry lock, so a
    /// command is either delivered to this actor or to its successor.
    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<RoomCommand>,
        shared: Arc<Shared<H, E>>,
        generation: u64,
    ) {
        let idle_timeout = shared.config().idle_timeout;
        tracing::debug!(code = %self.room.code(), generation, "room actor started");

        loop {
            let next = if self.room.is_idle() {
                match tokio::time::timeout(idle_timeout, commands.recv()).await {
                    Ok(next) => next,
                    Err(_) => match shared.retire(self.room.code(), generation, &mut commands) {
                        Some(command) => Some(command),
                        None => break,
                    },
                }
            } else {
                commands.recv().await
            };

            let Some(command) = next else { break };
            self.handle(command).await;
        }

        tracing::info!(
            code = %self.room.code(),
            open = self.room.is_open(),
            relayed = self.room.metadata().relayed,
            "room retired"
        );
    }

    async fn handle(&mut self, command: RoomCommand) {
        match command {
            RoomCommand::Request { request, reply } => {
                let response = self.room.handle_request(request, &self.env).await;
                if reply.send(response).is_err() {
                    tracing::debug!(code = %self.room.code(), "requester went away");
                }
            },

            RoomCommand::Connect { conn, outbound } => {
                let actions = self.room.on_connect(conn);
                self.peers.insert(conn, outbound);
                tracing::debug!(code = %self.room.code(), conn, "connection arrived");
                self.execute(actions).await;
            },

            RoomCommand::Message { conn, text } => match self.room.on_message(conn, &text) {
                Ok(actions) => self.execute(actions).await,
                Err(e) => tracing::warn!(code = %self.room.code(), "dropping frame: {}", e),
            },

            RoomCommand::Disconnect { conn } => {
                self.room.on_disconnect(conn);
                self.peers.remove(&conn);
                tracing::debug!(code = %self.room.code(), conn, "connection left");
            },
        }
    }

    async fn execute(&mut self, actions: Vec<RoomAction>) {
        for action in actions {
            match action {
                RoomAction::Broadcast { message, exclude } => {
                    for (&conn, outbound) in &self.peers {
                        if conn == exclude {
                            continue;
                        }
                        if outbound.send(Outbound::Text(message.clone())).is_err() {
                            tracing::debug!(code = %self.room.code(), conn, "peer writer gone");
                        }
                    }
                },

                RoomAction::Close { conn, code, reason } => {
                    if let Some(outbound) = self.peers.remove(&conn) {
                        tracing::info!(room = %self.room.code(), conn, code, reason, "closing connection");
                        let _ = outbound.send(Outbound::Close { code, reason });
                    }
                },

                RoomAction::NotifyApprove(message) => {
                    self.room.hooks().on_approve(self.room.code(), &message).await;
                },

                RoomAction::NotifyReject(message) => {
                    self.room.hooks().on_reject(self.room.code(), &message).await;
                },
            }
        }
    }
}
