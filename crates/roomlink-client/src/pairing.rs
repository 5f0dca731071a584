//! Initiator and joiner entry points.

use roomlink_core::{ControlMessage, Role, RoomCode};
use serde_json::Value;

use crate::{
    error::ClientError,
    generator::{CodeGenerator, HttpProbe},
    room_http::{OpenOptions, RoomHttp, socket_url},
    session::{PairingSession, SessionBuilder},
};

/// Open a fresh room and connect to it as the initiator.
///
/// Draws a free code (with `generator`, or the default one), sends the
/// opening POST, then connects. The first `join` from the peer surfaces as a
/// [`SessionEvent::Join`](roomlink_core::SessionEvent::Join).
///
/// # Errors
///
/// - `ClientError::CodeSpaceExhausted` if no free code was found
/// - `ClientError::Status` if the opening POST is refused (not retried)
/// - `ClientError::WebSocket` if the socket cannot be established
pub async fn initiate(
    base: &str,
    options: OpenOptions,
    generator: Option<CodeGenerator>,
) -> Result<(RoomCode, PairingSession), ClientError> {
    initiate_with(&RoomHttp::new(base), options, generator).await
}

/// [`initiate`] with an existing HTTP client.
///
/// # Errors
///
/// See [`initiate`].
pub async fn initiate_with(
    http: &RoomHttp,
    options: OpenOptions,
    generator: Option<CodeGenerator>,
) -> Result<(RoomCode, PairingSession), ClientError> {
    let mut generator = generator.unwrap_or_default();
    let code = generator.generate(&HttpProbe::new(http.clone())).await?;
    let url = socket_url(http.base(), &code)?;

    http.open(&code, &options).await?;
    tracing::info!(%code, "room opened");

    let session = SessionBuilder::new(Role::Initiator).connect(&url, code.clone()).await?;
    Ok((code, session))
}

/// Join an open room.
///
/// Fetches the note (surfaced as
/// [`SessionEvent::Note`](roomlink_core::SessionEvent::Note)), connects, and
/// sends `join` carrying `data`.
///
/// # Errors
///
/// - `ClientError::RoomNotOpen` if the room is not open yet (callers may poll)
/// - `ClientError::Status` if the note fetch fails otherwise
/// - `ClientError::WebSocket` if the socket cannot be established
pub async fn join(
    code: &RoomCode,
    base: &str,
    data: Option<Value>,
) -> Result<PairingSession, ClientError> {
    join_with(&RoomHttp::new(base), code, data).await
}

/// [`join`] with an existing HTTP client.
///
/// # Errors
///
/// See [`join`].
pub async fn join_with(
    http: &RoomHttp,
    code: &RoomCode,
    data: Option<Value>,
) -> Result<PairingSession, ClientError> {
    let url = socket_url(http.base(), code)?;

    let note = http.fetch_note(code).await?;
    let builder = SessionBuilder::new(Role::Joiner);
    builder.note_received(note);

    let session = builder.connect(&url, code.clone()).await?;
    session.send(&ControlMessage::join(data))?;
    tracing::info!(%code, "join sent");

    Ok(session)
}
