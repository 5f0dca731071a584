//! Default [`PairingHooks`] for the production server.
//!
//! Opening a room requires a signed `Authorization` header (see
//! [`roomlink_core::auth`]). Approve and reject notifications are logged.

use async_trait::async_trait;
use http::{StatusCode, header::AUTHORIZATION};
use roomlink_core::{
    AuthError, ControlMessage, HeaderVerifier, PairingHooks, RoomCode, RoomRequest, RoomResponse,
    parse_verifying_key,
};

/// Body of the 401 returned when the header is absent.
pub const MISSING_AUTH_BODY: &str = "Missing auth header";

/// Body of the 403 returned when the header does not verify.
pub const INVALID_AUTH_BODY: &str = "Invalid header";

/// Hooks that verify a signed authorization header on the opening POST.
#[derive(Debug, Default)]
pub struct SignedHeaderHooks {
    verifier: HeaderVerifier,
}

impl SignedHeaderHooks {
    /// Accept any correctly signed header.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept headers only from the given hex-encoded public keys. An empty
    /// list accepts any key.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Malformed` if a key does not parse.
    pub fn with_trusted_keys<S: AsRef<str>>(keys: &[S]) -> Result<Self, AuthError> {
        if keys.is_empty() {
            return Ok(Self::new());
        }
        let keys =
            keys.iter().map(|k| parse_verifying_key(k.as_ref())).collect::<Result<Vec<_>, _>>()?;
        Ok(Self { verifier: HeaderVerifier::with_trusted_keys(keys) })
    }

    /// The underlying verifier.
    pub fn verifier(&self) -> &HeaderVerifier {
        &self.verifier
    }
}

#[async_trait]
impl PairingHooks for SignedHeaderHooks {
    async fn auth(&self, request: &RoomRequest) -> RoomResponse {
        match self.verifier.check(request.header(AUTHORIZATION)) {
            Ok(header) => {
                tracing::debug!(key = %header.key_hex(), seq = header.seq(), "open authorized");
                RoomResponse::empty(StatusCode::OK)
            },
            Err(AuthError::Missing) => {
                RoomResponse::text(StatusCode::UNAUTHORIZED, MISSING_AUTH_BODY)
            },
            Err(e) => {
                tracing::warn!("open refused: {}", e);
                RoomResponse::text(StatusCode::FORBIDDEN, INVALID_AUTH_BODY)
            },
        }
    }

    async fn on_approve(&self, code: &RoomCode, message: &ControlMessage) {
        tracing::info!(%code, data = ?message.data, "pairing approved");
    }

    async fn on_reject(&self, code: &RoomCode, message: &ControlMessage) {
        tracing::info!(%code, data = ?message.data, "pairing rejected");
    }
}
