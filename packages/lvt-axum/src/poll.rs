//! HTTP long-poll fallback
//!
//! Mirrors the socket loop over hanging POSTs: the request body carries the
//! client's outbound frames, the response carries whatever the connection's
//! queue yields within the poll interval. The first poll (no connection ID)
//! joins the group and returns the ID the client threads through subsequent
//! polls.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use lvt::action::{ClientFrame, ServerFrame};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::time::timeout;
use uuid::Uuid;

use crate::app::RouteState;
use crate::error::TransportError;

/// One long-poll request body.
#[derive(Debug, Deserialize)]
pub struct PollRequest {
    /// The connection ID from a previous poll; absent on the first
    #[serde(default)]
    pub conn: Option<Uuid>,
    /// Outbound frames to dispatch before waiting
    #[serde(default)]
    pub frames: Vec<ClientFrame>,
}

/// One long-poll response body.
#[derive(Debug, Serialize)]
pub struct PollResponse {
    /// The connection ID to thread through the next poll
    pub conn: Uuid,
    /// Queued inbound frames; empty when the hang expired quietly
    pub frames: Vec<ServerFrame>,
}

type SharedReceiver = Arc<AsyncMutex<mpsc::Receiver<ServerFrame>>>;

/// Wire queues parked between polls, keyed by connection ID.
#[derive(Default)]
pub(crate) struct PollSessions {
    receivers: Mutex<HashMap<Uuid, SharedReceiver>>,
}

impl PollSessions {
    fn insert(&self, id: Uuid, receiver: mpsc::Receiver<ServerFrame>) {
        self.receivers
            .lock()
            .insert(id, Arc::new(AsyncMutex::new(receiver)));
    }

    fn get(&self, id: &Uuid) -> Option<SharedReceiver> {
        self.receivers.lock().get(id).cloned()
    }

    fn remove(&self, id: &Uuid) {
        self.receivers.lock().remove(id);
    }
}

pub(crate) async fn poll_handler(
    State(state): State<RouteState>,
    headers: HeaderMap,
    Json(request): Json<PollRequest>,
) -> Result<Json<PollResponse>, TransportError> {
    match request.conn {
        None => open_poll(state, headers, request.frames).await,
        Some(id) => continue_poll(state, id, request.frames).await,
    }
}

/// First poll: join the group and hand back the connection ID along with
/// the initial `full` frame.
async fn open_poll(
    state: RouteState,
    headers: HeaderMap,
    frames: Vec<ClientFrame>,
) -> Result<Json<PollResponse>, TransportError> {
    let group = (state.identity)(&headers).ok_or(TransportError::MissingGroup)?;
    let user = (state.authenticator)(&headers);
    let (connection, receiver) = state.handle.join(&group, &user).await?;
    let id = connection.id();
    state.polls.insert(id, receiver);
    tracing::debug!(connection = %id, %group, "long-poll connected");

    for frame in frames {
        if let Err(err) = state.handle.dispatch(&connection, frame).await {
            tracing::warn!(connection = %id, %err, "dispatch failed; dropping poll connection");
            state.handle.leave(&connection).await;
            state.polls.remove(&id);
            return Err(TransportError::ConnectionGone);
        }
    }

    // The initial frame is already queued, so this returns immediately.
    let receiver = state.polls.get(&id).ok_or(TransportError::ConnectionGone)?;
    match drain_frames(&receiver, state.handle.config().poll_interval).await {
        Some(frames) => Ok(Json(PollResponse { conn: id, frames })),
        None => {
            state.polls.remove(&id);
            Err(TransportError::ConnectionGone)
        }
    }
}

/// Subsequent polls: dispatch, then hang on the queue up to the poll
/// interval.
async fn continue_poll(
    state: RouteState,
    id: Uuid,
    frames: Vec<ClientFrame>,
) -> Result<Json<PollResponse>, TransportError> {
    let Some(connection) = state.handle.connections().get(id) else {
        // Evicted between polls (write timeout, disposal).
        state.polls.remove(&id);
        return Err(TransportError::ConnectionGone);
    };
    let receiver = state.polls.get(&id).ok_or(TransportError::ConnectionGone)?;

    for frame in frames {
        if let Err(err) = state.handle.dispatch(&connection, frame).await {
            tracing::warn!(connection = %id, %err, "dispatch failed; dropping poll connection");
            state.handle.leave(&connection).await;
            state.polls.remove(&id);
            return Err(TransportError::ConnectionGone);
        }
    }

    match drain_frames(&receiver, state.handle.config().poll_interval).await {
        Some(frames) => Ok(Json(PollResponse { conn: id, frames })),
        None => {
            state.handle.leave(&connection).await;
            state.polls.remove(&id);
            Err(TransportError::ConnectionGone)
        }
    }
}

/// Wait up to `hang` for the first frame, then sweep whatever else is
/// already queued. `None` means the queue is closed and the connection is
/// gone.
async fn drain_frames(receiver: &SharedReceiver, hang: Duration) -> Option<Vec<ServerFrame>> {
    let mut receiver = receiver.lock().await;
    let mut frames = Vec::new();
    match timeout(hang, receiver.recv()).await {
        Err(_) => Some(frames),
        Ok(None) => None,
        Ok(Some(frame)) => {
            frames.push(frame);
            while let Ok(frame) = receiver.try_recv() {
                frames.push(frame);
            }
            Some(frames)
        }
    }
}
