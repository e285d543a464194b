//! HTTP surface: lobby administration, a thin action gateway and
//! server-sent event streams per room.

use crate::engine::{Committed, EngineError, LobbySummary, RoomEngine};
use crate::hub::{RoomBroadcast, RoomHub};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use squarely_rules::{
    ConnectionId, ErrorKind, Participant, Rect, RoomEvent, RoomId, RoomIdError, RoomState, Slot,
};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

/// Shared handler state.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Applies room transitions.
    pub engine: RoomEngine,
    /// Delivers committed events.
    pub hub: RoomHub,
}

impl AppState {
    /// Bundles an engine and a hub, registering the hub as the engine's
    /// commit listener.
    pub fn new(engine: RoomEngine, hub: RoomHub) -> Self {
        let engine = engine.with_listener(Arc::new(hub.clone()));
        Self { engine, hub }
    }

    /// Drops channels nobody listens to, then closes the channels of rooms
    /// that expired or were deleted elsewhere so their subscribers' streams
    /// end.
    ///
    /// # Errors
    ///
    /// [`EngineError::Store`] if a room's existence cannot be checked.
    #[instrument(skip(self))]
    pub async fn sweep(&self) -> Result<SweepReport, EngineError> {
        let mut report = SweepReport {
            idle_channels: self.hub.prune(),
            ..SweepReport::default()
        };
        for room_id in self.hub.room_ids() {
            if self.engine.close_if_gone(&room_id).await? {
                report.closed_rooms += 1;
            }
        }
        report.idle_locks = self.engine.prune_locks();
        debug!(?report, "Sweep finished");
        Ok(report)
    }
}

/// What one [`AppState::sweep`] removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Channels dropped for lack of subscribers.
    pub idle_channels: usize,
    /// Channels closed because their room is gone.
    pub closed_rooms: usize,
    /// Room lock entries dropped.
    pub idle_locks: usize,
}

/// Runs [`AppState::sweep`] every `every` until the task is aborted.
pub fn spawn_sweeper(state: AppState, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = state.sweep().await {
                warn!(error = %e, "Room sweep failed");
            }
        }
    })
}

/// Request naming the acting connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRequest {
    /// Acting connection.
    pub connection_id: ConnectionId,
}

/// Request for a seat in a room.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    /// Joining connection.
    pub connection_id: ConnectionId,
    /// Display name; blank picks "Player N".
    #[serde(default)]
    pub name: String,
    /// Preferred slot, honoured when free.
    #[serde(default, rename = "playerIndex")]
    pub slot: Option<Slot>,
}

/// Request for placing a number.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceRequest {
    /// Acting connection.
    pub connection_id: ConnectionId,
    /// Row.
    pub row: usize,
    /// Column.
    pub col: usize,
    /// Value 1-9.
    pub value: u8,
}

/// Request for circling an area.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircleRequest {
    /// Acting connection.
    pub connection_id: ConnectionId,
    /// The circled square.
    #[serde(flatten)]
    pub rect: Rect,
}

/// Response to room creation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomResponse {
    /// The new room's code.
    pub room_id: RoomId,
    /// Its initial state.
    pub state: RoomState,
}

/// Response to administrative actions.
#[derive(Debug, Clone, Serialize)]
pub struct AdminResponse {
    /// Always true; failures use an error status.
    pub success: bool,
    /// Room state after the action, if the room still exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<RoomState>,
}

/// Error answered to the caller only.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    rejection: Option<RoomEvent>,
}

impl ApiError {
    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
            rejection: None,
        }
    }

    /// Status code of the response.
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<RoomIdError> for ApiError {
    fn from(err: RoomIdError) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: err.to_string(),
            rejection: None,
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let status = match &err {
            EngineError::RoomNotFound(_) => StatusCode::NOT_FOUND,
            EngineError::Rejected(e) => match e.kind() {
                ErrorKind::Structural | ErrorKind::TurnOrdering => StatusCode::CONFLICT,
                ErrorKind::Geometry => StatusCode::UNPROCESSABLE_ENTITY,
            },
            EngineError::Store(_)
            | EngineError::IdSpaceExhausted(_)
            | EngineError::Contended(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        Self {
            status,
            message: err.to_string(),
            rejection: err.rejection(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.rejection {
            Some(event) => {
                debug!(status = %self.status, message = %self.message, "Action rejected");
                (self.status, Json(event)).into_response()
            }
            None => {
                warn!(status = %self.status, message = %self.message, "Request failed");
                (
                    self.status,
                    Json(serde_json::json!({ "error": self.message })),
                )
                    .into_response()
            }
        }
    }
}

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/rooms", get(list_rooms))
        .route("/api/room/create", post(create_room))
        .route("/api/room/{room_id}", get(get_room).delete(delete_room))
        .route("/api/room/{room_id}/reset", post(reset_room))
        .route("/api/room/{room_id}/join", post(join_room))
        .route("/api/room/{room_id}/leave", post(leave_room))
        .route("/api/room/{room_id}/place", post(place_number))
        .route("/api/room/{room_id}/circle", post(circle_area))
        .route("/api/room/{room_id}/skip", post(skip_turn))
        .route("/api/room/{room_id}/events", get(room_events))
        .with_state(state)
}

fn parse_room_id(raw: &str) -> Result<RoomId, ApiError> {
    Ok(RoomId::parse(raw)?)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[instrument(skip(state))]
async fn list_rooms(State(state): State<AppState>) -> Result<Json<LobbySummary>, ApiError> {
    Ok(Json(state.engine.list_rooms().await?))
}

#[instrument(skip(state))]
async fn create_room(
    State(state): State<AppState>,
) -> Result<Json<CreateRoomResponse>, ApiError> {
    let room = state.engine.create_room().await?;
    info!(room_id = %room.room_id(), "Room created via API");
    Ok(Json(CreateRoomResponse {
        room_id: room.room_id().clone(),
        state: room,
    }))
}

#[instrument(skip(state))]
async fn get_room(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<Json<RoomState>, ApiError> {
    let room_id = parse_room_id(&room_id)?;
    Ok(Json(state.engine.fetch_room(&room_id).await?))
}

#[instrument(skip(state))]
async fn reset_room(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<Json<AdminResponse>, ApiError> {
    let room_id = parse_room_id(&room_id)?;
    let committed = state.engine.reset_room(&room_id).await?;
    Ok(Json(AdminResponse {
        success: true,
        state: Some(committed.state),
    }))
}

#[instrument(skip(state))]
async fn delete_room(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<Json<AdminResponse>, ApiError> {
    let room_id = parse_room_id(&room_id)?;
    state.engine.delete_room(&room_id).await?;
    Ok(Json(AdminResponse {
        success: true,
        state: None,
    }))
}

#[instrument(skip(state, req), fields(connection = %req.connection_id))]
async fn join_room(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Json(req): Json<JoinRequest>,
) -> Result<Json<Committed>, ApiError> {
    let room_id = parse_room_id(&room_id)?;
    let participant = Participant::new(req.connection_id, req.name);
    let committed = state.engine.join_room(&room_id, participant, req.slot).await?;
    Ok(Json(committed))
}

#[instrument(skip(state, req), fields(connection = %req.connection_id))]
async fn leave_room(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Json(req): Json<ConnectionRequest>,
) -> Result<Json<Committed>, ApiError> {
    let room_id = parse_room_id(&room_id)?;
    let committed = state.engine.leave_room(&room_id, &req.connection_id).await?;
    Ok(Json(committed))
}

#[instrument(skip(state, req), fields(connection = %req.connection_id))]
async fn place_number(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Json(req): Json<PlaceRequest>,
) -> Result<Json<Committed>, ApiError> {
    let room_id = parse_room_id(&room_id)?;
    let committed = state
        .engine
        .place_number(&room_id, &req.connection_id, req.row, req.col, req.value)
        .await?;
    Ok(Json(committed))
}

#[instrument(skip(state, req), fields(connection = %req.connection_id))]
async fn circle_area(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Json(req): Json<CircleRequest>,
) -> Result<Json<Committed>, ApiError> {
    let room_id = parse_room_id(&room_id)?;
    let committed = state
        .engine
        .circle_area(&room_id, &req.connection_id, req.rect)
        .await?;
    Ok(Json(committed))
}

#[instrument(skip(state, req), fields(connection = %req.connection_id))]
async fn skip_turn(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Json(req): Json<ConnectionRequest>,
) -> Result<Json<Committed>, ApiError> {
    let room_id = parse_room_id(&room_id)?;
    let committed = state.engine.skip_turn(&room_id, &req.connection_id).await?;
    Ok(Json(committed))
}

fn broadcast_event(broadcast: &RoomBroadcast) -> Event {
    Event::default()
        .event(broadcast.event.name())
        .json_data(broadcast)
        .unwrap_or_else(|e| {
            warn!(error = %e, "Failed to encode broadcast");
            Event::default().comment("encoding failed")
        })
}

/// Streams the room's current state, then every broadcast until the room
/// closes.
#[instrument(skip(state))]
async fn room_events(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let room_id = parse_room_id(&room_id)?;
    // Subscribe before the snapshot so no commit falls between them.
    let receiver = state.hub.subscribe(&room_id);
    let snapshot = match state.engine.fetch_room(&room_id).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            drop(receiver);
            state.hub.release_if_idle(&room_id);
            return Err(e.into());
        }
    };
    let initial = Event::default()
        .event("gameStateUpdate")
        .json_data(&snapshot)
        .map_err(|e| ApiError::internal(format!("Failed to encode room: {}", e)))?;
    info!(%room_id, "Subscriber attached");

    let updates = futures::stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(broadcast) => return Some((broadcast_event(&broadcast), receiver)),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Subscriber lagged behind");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });
    let stream = futures::stream::once(async move { initial })
        .chain(updates)
        .map(Ok::<_, Infallible>);

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
