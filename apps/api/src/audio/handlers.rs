use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::audio::controller::{AudioSnapshot, PlayCallbacks, PlayOutcome, ReplayAudioOutcome};
use crate::audio::media::{MediaEvent, PlaybackId};
use crate::errors::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PlayRequest {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct SpeakRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct PlayResponse {
    pub outcome: PlayOutcome,
    pub snapshot: AudioSnapshot,
}

#[derive(Debug, Serialize)]
pub struct ReplayAudioResponse {
    pub outcome: ReplayAudioOutcome,
    pub snapshot: AudioSnapshot,
}

#[derive(Debug, Serialize)]
pub struct SpeakResponse {
    pub url: String,
    pub outcome: PlayOutcome,
    pub snapshot: AudioSnapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaEventKind {
    Started,
    Ended,
    Failed,
    AutoplayBlocked,
}

/// Lifecycle report from a stage client for the resource it was told to play.
#[derive(Debug, Deserialize)]
pub struct MediaEventReport {
    pub playback_id: PlaybackId,
    pub kind: MediaEventKind,
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MediaEventAck {
    pub accepted: bool,
}

impl MediaEventReport {
    fn into_event(self) -> MediaEvent {
        match self.kind {
            MediaEventKind::Started => MediaEvent::Started,
            MediaEventKind::Ended => MediaEvent::Ended,
            MediaEventKind::Failed => MediaEvent::Failed(
                self.message
                    .unwrap_or_else(|| "media element reported an error".to_string()),
            ),
            MediaEventKind::AutoplayBlocked => MediaEvent::AutoplayBlocked,
        }
    }
}

/// POST /api/v1/audio/play
pub async fn handle_play(
    State(state): State<AppState>,
    Json(req): Json<PlayRequest>,
) -> Result<Json<PlayResponse>, AppError> {
    let url = req.url.trim();
    if url.is_empty() {
        return Err(AppError::Validation("url must not be empty".to_string()));
    }
    let outcome = state.audio.play(url, PlayCallbacks::new());
    Ok(Json(PlayResponse {
        outcome,
        snapshot: state.audio.snapshot(),
    }))
}

/// POST /api/v1/audio/speak
/// Synthesizes `text` and plays the result.
pub async fn handle_speak(
    State(state): State<AppState>,
    Json(req): Json<SpeakRequest>,
) -> Result<Json<SpeakResponse>, AppError> {
    let url = state.speech.synthesize(&req.text).await?;
    let outcome = state.audio.play(&url, PlayCallbacks::new());
    Ok(Json(SpeakResponse {
        url,
        outcome,
        snapshot: state.audio.snapshot(),
    }))
}

/// POST /api/v1/audio/stop
pub async fn handle_stop(State(state): State<AppState>) -> Json<AudioSnapshot> {
    state.audio.stop();
    Json(state.audio.snapshot())
}

/// POST /api/v1/audio/replay
pub async fn handle_replay_audio(State(state): State<AppState>) -> Json<ReplayAudioResponse> {
    let outcome = state.audio.replay();
    Json(ReplayAudioResponse {
        outcome,
        snapshot: state.audio.snapshot(),
    })
}

/// GET /api/v1/audio
pub async fn handle_get_audio(State(state): State<AppState>) -> Json<AudioSnapshot> {
    Json(state.audio.snapshot())
}

/// POST /api/v1/audio/media-events
/// Reports for superseded resources are acknowledged but not applied.
pub async fn handle_media_event(
    State(state): State<AppState>,
    Json(report): Json<MediaEventReport>,
) -> Json<MediaEventAck> {
    let id = report.playback_id;
    let accepted = state.audio.report(id, report.into_event());
    Json(MediaEventAck { accepted })
}
