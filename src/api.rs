//! HTTP API endpoints.
//!
//! Read-only access to room state, for polling clients and diagnostics.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use crate::error::RoomError;
use crate::state::AppState;

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub rooms: usize,
    pub subscribed_rooms: usize,
}

#[derive(Debug, Clone, Serialize)]
struct ErrorBody {
    code: &'static str,
    msg: String,
}

impl IntoResponse for RoomError {
    fn into_response(self) -> Response {
        let status = match self {
            RoomError::NotFound(_) => StatusCode::NOT_FOUND,
            RoomError::InvalidRoomCode(_) | RoomError::InvariantViolation(_) => {
                StatusCode::BAD_REQUEST
            }
            RoomError::NotHost => StatusCode::FORBIDDEN,
            RoomError::HostUnavailable(_) => StatusCode::CONFLICT,
            RoomError::StoreUnavailable(_) | RoomError::Configuration(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        };
        let body = ErrorBody {
            code: self.code(),
            msg: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Fetch the full current state of a room.
///
/// GET /api/rooms/{room_id}
pub async fn get_room(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
) -> Result<Response, RoomError> {
    let room_id = crate::types::normalize_room_code(&room_id)?;
    let room = state.get_room(&room_id).await?;
    Ok(Json(room).into_response())
}

/// GET /api/health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        rooms: state.rooms.read().await.len(),
        subscribed_rooms: state.notifier.room_count(),
    })
}
