//! HTTP and WebSocket routing.
//!
//! Every verb on `/parties/main/{code}` reaches the room's HTTP contract,
//! except WebSocket upgrade requests, which become room connections.

use axum::{
    Router,
    extract::{
        FromRequestParts, Path, Request, State,
        ws::{CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, StatusCode, header::UPGRADE},
    response::{IntoResponse, Response},
    routing::{any, get},
};
use futures_util::{SinkExt, StreamExt};
use roomlink_core::{
    Environment, PairingHooks, ROOM_PATH_PREFIX, RoomCode, RoomRequest, RoomResponse, cors_headers,
};

use crate::{
    actor::Outbound,
    registry::{PeerLink, RoomRegistry},
};

/// Build the application router over `registry`.
pub fn router<H: PairingHooks, E: Environment>(registry: RoomRegistry<H, E>) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route(&format!("{ROOM_PATH_PREFIX}/{{code}}"), any(room_endpoint::<H, E>))
        .with_state(registry)
}

fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

fn to_http(response: RoomResponse) -> Response {
    (response.status, response.headers, response.body).into_response()
}

async fn room_endpoint<H: PairingHooks, E: Environment>(
    State(registry): State<RoomRegistry<H, E>>,
    Path(code): Path<String>,
    request: Request,
) -> Response {
    let code = match RoomCode::parse(&code) {
        Ok(code) => code,
        Err(e) => {
            tracing::debug!(code = %code, "rejecting room path: {}", e);
            return to_http(RoomResponse::empty(StatusCode::NOT_FOUND));
        },
    };

    let (mut parts, body) = request.into_parts();

    if is_websocket_upgrade(&parts.headers) {
        return match WebSocketUpgrade::from_request_parts(&mut parts, &registry).await {
            Ok(upgrade) => {
                upgrade.on_upgrade(move |socket| serve_socket(socket, registry, code))
            },
            Err(rejection) => rejection.into_response(),
        };
    }

    let limit = registry.config().max_body_bytes;
    let body = match axum::body::to_bytes(body, limit).await {
        Ok(body) => body,
        Err(e) => {
            tracing::debug!(%code, "request body refused: {}", e);
            return (StatusCode::PAYLOAD_TOO_LARGE, cors_headers()).into_response();
        },
    };

    let request = RoomRequest { method: parts.method, headers: parts.headers, body };
    match registry.request(&code, request).await {
        Ok(response) => to_http(response),
        Err(e) => {
            tracing::error!("{}", e);
            to_http(RoomResponse::empty(StatusCode::SERVICE_UNAVAILABLE))
        },
    }
}

/// Pump one WebSocket connection between the socket and its room.
async fn serve_socket<H: PairingHooks, E: Environment>(
    socket: WebSocket,
    registry: RoomRegistry<H, E>,
    code: RoomCode,
) {
    let PeerLink { conn, mut outbound } = registry.connect(&code);
    let (mut sink, mut stream) = socket.split();

    let mut writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            match frame {
                Outbound::Text(text) => {
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                },
                Outbound::Close { code, reason } => {
                    let frame = CloseFrame { code, reason: Utf8Bytes::from_static(reason) };
                    let _ = sink.send(Message::Close(Some(frame))).await;
                    break;
                },
            }
        }
    });

    loop {
        tokio::select! {
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => registry.send(&code, conn, text.as_str().to_owned()),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {},
                Some(Err(e)) => {
                    tracing::debug!(%code, conn, "socket error: {}", e);
                    break;
                },
            },
            _ = &mut writer => break,
        }
    }

    registry.disconnect(&code, conn);
    writer.abort();
}
