//! WebSocket wire
//!
//! One task reads frames off the socket and dispatches them; one task
//! drains the connection's bounded queue onto the socket with the
//! per-frame write deadline. A malformed frame or a failed dispatch closes
//! the wire; closing the wire unregisters the connection and starts the
//! group disposal clock.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::header::SEC_WEBSOCKET_PROTOCOL;
use axum::http::HeaderMap;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use lvt::action::ClientFrame;
use lvt::live::LiveHandle;
use std::sync::Arc;
use tokio::time::timeout;

use crate::app::RouteState;
use crate::error::TransportError;

/// The negotiated wire subprotocol. A client may omit it; offering
/// anything else is rejected before the upgrade.
pub const SUBPROTOCOL: &str = "lvt.v1";

pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<RouteState>,
    headers: HeaderMap,
) -> Result<Response, TransportError> {
    if let Some(offered) = headers
        .get(SEC_WEBSOCKET_PROTOCOL)
        .and_then(|value| value.to_str().ok())
    {
        let matches = offered.split(',').map(str::trim).any(|p| p == SUBPROTOCOL);
        if !matches {
            return Err(TransportError::BadSubprotocol(offered.to_string()));
        }
    }

    let group = (state.identity)(&headers).ok_or(TransportError::MissingGroup)?;
    let user = (state.authenticator)(&headers);

    // Answer cap exhaustion with 503 while we can still refuse the
    // upgrade; the post-upgrade join re-checks under the registry lock.
    let config = state.handle.config();
    if state.handle.connections().count() >= config.max_connections {
        return Err(TransportError::RegistryFull);
    }

    let handle = state.handle.clone();
    Ok(ws
        .protocols([SUBPROTOCOL])
        .on_upgrade(move |socket| serve_socket(socket, handle, group, user)))
}

async fn serve_socket(socket: WebSocket, handle: Arc<LiveHandle>, group: String, user: String) {
    let (connection, mut frames) = match handle.join(&group, &user).await {
        Ok(joined) => joined,
        Err(err) => {
            tracing::warn!(%group, %err, "join failed after upgrade");
            return;
        }
    };
    tracing::debug!(connection = %connection.id(), %group, "socket connected");

    let (mut sink, mut stream) = socket.split();
    let write_timeout = handle.config().write_timeout;
    let writer = tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(err) => {
                    tracing::error!(%err, "frame serialisation failed");
                    continue;
                }
            };
            match timeout(write_timeout, sink.send(Message::Text(text))).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) | Err(_) => break,
            }
        }
    });

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => {
                let frame: ClientFrame = match serde_json::from_str(&text) {
                    Ok(frame) => frame,
                    Err(err) => {
                        tracing::warn!(
                            connection = %connection.id(),
                            %err,
                            "malformed frame; closing connection"
                        );
                        break;
                    }
                };
                if let Err(err) = handle.dispatch(&connection, frame).await {
                    tracing::warn!(
                        connection = %connection.id(),
                        %err,
                        "dispatch failed; closing connection"
                    );
                    break;
                }
            }
            Ok(Message::Close(_)) | Err(_) => break,
            // Protocol ping/pong is answered by the socket layer.
            Ok(_) => {}
        }
    }

    handle.leave(&connection).await;
    writer.abort();
    tracing::debug!(connection = %connection.id(), "socket closed");
}
