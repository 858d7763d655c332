//! Stage events: the structured notifications emitted by the reveal timer and
//! the audio controller.
//!
//! Every event has a stable wire name (`reveal_started`, `replay_used`, ...)
//! and optionally a short human-readable notification for toast/snackbar UIs.
//! Publishing is fire-and-forget: a sink with no listeners must never affect
//! core state.

pub mod bus;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::audio::media::PlaybackId;
use crate::audio::remote::AudioCommand;
use crate::audio::AudioState;

pub use bus::EventBus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

/// A short status line meant for a toast or banner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
}

impl Notification {
    fn info(message: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Info,
            message: message.into(),
        }
    }

    fn warning(message: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Warning,
            message: message.into(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Error,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StageEvent {
    // ── Reveal ──────────────────────────────────────────────────────────────
    CountdownTick {
        turn_id: String,
        value: u8,
    },
    RevealStarted {
        turn_id: String,
        accessible: bool,
        deadline: Option<DateTime<Utc>>,
    },
    HidingSoon {
        turn_id: String,
        remaining_secs: u64,
    },
    RevealHidden {
        turn_id: String,
        replays_left: u32,
    },
    ReplayUsed {
        turn_id: String,
        reveal_count: u32,
        max_reveals: u32,
        deadline: DateTime<Utc>,
    },
    ReplaysExhausted {
        turn_id: String,
        max_reveals: u32,
    },

    // ── Audio ───────────────────────────────────────────────────────────────
    AudioStateChanged {
        playback_id: Option<PlaybackId>,
        state: AudioState,
        url: Option<String>,
    },
    PlaybackComplete {
        playback_id: PlaybackId,
        url: String,
    },
    AutoplayBlocked {
        playback_id: PlaybackId,
        url: String,
    },
    PlaybackFailed {
        playback_id: PlaybackId,
        url: String,
        message: String,
    },
    AudioCommand {
        command: AudioCommand,
    },
}

impl StageEvent {
    /// Stable event name used as the SSE `event:` field.
    pub fn name(&self) -> &'static str {
        match self {
            StageEvent::CountdownTick { .. } => "countdown_tick",
            StageEvent::RevealStarted { .. } => "reveal_started",
            StageEvent::HidingSoon { .. } => "hiding_soon",
            StageEvent::RevealHidden { .. } => "reveal_hidden",
            StageEvent::ReplayUsed { .. } => "replay_used",
            StageEvent::ReplaysExhausted { .. } => "replays_exhausted",
            StageEvent::AudioStateChanged { .. } => "audio_state",
            StageEvent::PlaybackComplete { .. } => "playback_complete",
            StageEvent::AutoplayBlocked { .. } => "autoplay_blocked",
            StageEvent::PlaybackFailed { .. } => "playback_failed",
            StageEvent::AudioCommand { .. } => "audio_command",
        }
    }

    /// Turn the event belongs to, for reveal events.
    pub fn turn_id(&self) -> Option<&str> {
        match self {
            StageEvent::CountdownTick { turn_id, .. }
            | StageEvent::RevealStarted { turn_id, .. }
            | StageEvent::HidingSoon { turn_id, .. }
            | StageEvent::RevealHidden { turn_id, .. }
            | StageEvent::ReplayUsed { turn_id, .. }
            | StageEvent::ReplaysExhausted { turn_id, .. } => Some(turn_id),
            _ => None,
        }
    }

    /// User-facing status line. Bookkeeping transitions (countdown ticks,
    /// audio state changes) are conveyed visually and carry none.
    pub fn notification(&self) -> Option<Notification> {
        match self {
            StageEvent::HidingSoon { remaining_secs, .. } => Some(Notification::warning(format!(
                "Question hides in {remaining_secs} seconds"
            ))),
            StageEvent::RevealHidden { replays_left, .. } => Some(Notification::info(
                match replays_left {
                    0 => "Question hidden. No replays left".to_string(),
                    1 => "Question hidden. 1 replay left".to_string(),
                    n => format!("Question hidden. {n} replays left"),
                },
            )),
            StageEvent::ReplayUsed {
                reveal_count,
                max_reveals,
                ..
            } => Some(Notification::info(format!(
                "Replay {reveal_count} of {max_reveals}"
            ))),
            StageEvent::ReplaysExhausted { .. } => Some(Notification::warning("No replays left")),
            StageEvent::AutoplayBlocked { .. } => Some(Notification::warning("Tap to play audio")),
            StageEvent::PlaybackFailed { .. } => {
                Some(Notification::error("Audio playback failed"))
            }
            _ => None,
        }
    }
}

/// Anything that accepts stage events: the SSE bus in production, a recorder in tests.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: StageEvent);
}
