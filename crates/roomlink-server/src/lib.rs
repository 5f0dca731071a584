//! roomlink hosting substrate.
//!
//! This crate runs [`roomlink_core::Room`] authorities behind a real network
//! surface:
//! - Axum for HTTP and WebSocket transport
//! - Tokio for the async runtime, one task per room
//! - System time and cryptographic RNG
//!
//! ## Architecture
//!
//! ```text
//! roomlink-server
//!   ├─ routes             (HTTP verbs + WebSocket upgrades on /parties/main/{code})
//!   ├─ RoomRegistry       (code -> room actor, created on first reference)
//!   ├─ RoomActor          (serializes events, executes RoomActions)
//!   └─ SignedHeaderHooks  (default auth gate + approve/reject logging)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod actor;
mod error;
mod hooks;
mod registry;
mod routes;

use std::{future::Future, net::SocketAddr, time::Duration};

pub use actor::Outbound;
pub use error::ServerError;
pub use hooks::{INVALID_AUTH_BODY, MISSING_AUTH_BODY, SignedHeaderHooks};
pub use registry::{PeerLink, RoomRegistry};
use roomlink_core::{PairingHooks, SystemEnv};
pub use routes::router;
use tokio::net::TcpListener;

/// Limits applied to every room.
#[derive(Debug, Clone)]
pub struct RoomConfig {
    /// How long a room with no connections survives without any traffic.
    pub idle_timeout: Duration,
    /// Largest accepted HTTP request body.
    pub max_body_bytes: usize,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self { idle_timeout: Duration::from_secs(300), max_body_bytes: 64 * 1024 }
    }
}

/// Server configuration for the production runtime.
#[derive(Debug, Clone)]
pub struct ServerRuntimeConfig {
    /// Address to bind to (e.g., "0.0.0.0:1999")
    pub bind_address: String,
    /// Room limits
    pub room: RoomConfig,
    /// Hex-encoded public keys allowed to open rooms. Empty accepts any
    /// correctly signed header.
    pub trusted_keys: Vec<String>,
}

impl Default for ServerRuntimeConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:1999".to_string(),
            room: RoomConfig::default(),
            trusted_keys: Vec::new(),
        }
    }
}

/// Production roomlink server.
///
/// Wraps a [`RoomRegistry`] with a TCP listener and the system environment.
pub struct Server<H: PairingHooks = SignedHeaderHooks> {
    listener: TcpListener,
    registry: RoomRegistry<H, SystemEnv>,
}

impl Server {
    /// Create and bind a server using [`SignedHeaderHooks`].
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - A trusted key does not parse
    /// - Binding to the address fails
    pub async fn bind(config: ServerRuntimeConfig) -> Result<Self, ServerError> {
        let hooks = SignedHeaderHooks::with_trusted_keys(&config.trusted_keys)?;
        Self::bind_with_hooks(config, hooks).await
    }
}

impl<H: PairingHooks> Server<H> {
    /// Create and bind a server with application-supplied hooks.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Transport` if binding fails.
    pub async fn bind_with_hooks(
        config: ServerRuntimeConfig,
        hooks: H,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(&config.bind_address).await?;
        let registry = RoomRegistry::new(hooks, SystemEnv::new(), config.room);
        Ok(Self { listener, registry })
    }

    /// Get the local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// The live room registry.
    pub fn registry(&self) -> &RoomRegistry<H, SystemEnv> {
        &self.registry
    }

    /// Serve until an I/O error occurs.
    pub async fn run(self) -> Result<(), ServerError> {
        tracing::info!("Server starting on {}", self.local_addr()?);
        axum::serve(self.listener, router(self.registry)).await?;
        Ok(())
    }

    /// Serve until `shutdown` resolves.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tracing::info!("Server starting on {}", self.local_addr()?);
        axum::serve(self.listener, router(self.registry))
            .with_graceful_shutdown(shutdown)
            .await?;
        tracing::info!("Server stopped");
        Ok(())
    }
}
