use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;
use crate::reveal::machine::{ReplayOutcome, RevealSnapshot};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StartRevealRequest {
    pub turn_id: Option<String>,
    #[serde(default)]
    pub accessibility_mode: bool,
}

#[derive(Debug, Serialize)]
pub struct ReplayResponse {
    pub outcome: ReplayOutcome,
    pub snapshot: RevealSnapshot,
}

/// PUT /api/v1/sessions/:session_id/reveal
pub async fn handle_start_reveal(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(req): Json<StartRevealRequest>,
) -> Result<Json<RevealSnapshot>, AppError> {
    let snapshot = state
        .reveals
        .start(session_id, req.turn_id.as_deref(), req.accessibility_mode);
    Ok(Json(snapshot))
}

/// GET /api/v1/sessions/:session_id/reveal
pub async fn handle_get_reveal(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<RevealSnapshot>, AppError> {
    state
        .reveals
        .snapshot(session_id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("No reveal session for {session_id}")))
}

/// POST /api/v1/sessions/:session_id/reveal/replay
pub async fn handle_replay(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<ReplayResponse>, AppError> {
    let (outcome, snapshot) = state
        .reveals
        .request_replay(session_id)
        .ok_or_else(|| AppError::NotFound(format!("No reveal session for {session_id}")))?;
    Ok(Json(ReplayResponse { outcome, snapshot }))
}

/// DELETE /api/v1/sessions/:session_id/reveal
pub async fn handle_close_reveal(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> StatusCode {
    state.reveals.remove(session_id);
    StatusCode::NO_CONTENT
}
