//! Single-flight audio playback.
//!
//! One controller owns the only playable resource. Every accepted `play`
//! stops and releases the previous resource before the next one starts, and
//! play requests arriving inside the debounce window are dropped before any
//! state is touched. Lifecycle reports are keyed by `PlaybackId`; reports for
//! a resource that has been superseded or stopped are ignored, which is what
//! makes `stop()` silence the old resource's listeners.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::media::{MediaEvent, MediaPlayer, PlaybackId};
use crate::events::{EventSink, StageEvent};
use crate::runtime::Clock;

pub const DEFAULT_DEBOUNCE_MS: u64 = 500;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioState {
    #[default]
    Idle,
    Loading,
    Playing,
    Paused,
    Error,
}

/// Delivered to `on_error`. Autoplay blocking is expected and recoverable
/// with a user tap; it is kept apart from genuine failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaybackError {
    #[error("autoplay blocked until the user interacts with the page")]
    AutoplayBlocked,

    #[error("playback failed: {0}")]
    Media(String),
}

type Callback = Box<dyn FnOnce() + Send + 'static>;
type ErrorCallback = Box<dyn FnOnce(PlaybackError) + Send + 'static>;

/// Per-request lifecycle hooks. Each fires at most once; hooks of a request
/// that is superseded or stopped are dropped without being called.
#[derive(Default)]
pub struct PlayCallbacks {
    on_play: Option<Callback>,
    on_end: Option<Callback>,
    on_error: Option<ErrorCallback>,
}

// The HTTP surface follows the lifecycle over the event stream; hooks serve in-process callers.
#[allow(dead_code)]
impl PlayCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_play(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.on_play = Some(Box::new(f));
        self
    }

    pub fn on_end(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.on_end = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl FnOnce(PlaybackError) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum PlayOutcome {
    Accepted { playback_id: PlaybackId },
    /// Dropped: another request was accepted less than one debounce window ago.
    Debounced { retry_after_ms: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ReplayAudioOutcome {
    Restarted { playback_id: PlaybackId },
    NothingBound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AudioSnapshot {
    pub state: AudioState,
    pub current_url: Option<String>,
    pub playback_id: Option<PlaybackId>,
    pub is_playing: bool,
    pub last_play_request_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct PlaybackSession {
    state: AudioState,
    current_url: Option<String>,
    /// Resource whose lifecycle reports are still accepted.
    active: Option<PlaybackId>,
    next_id: u64,
    last_play_request_at: Option<DateTime<Utc>>,
    callbacks: PlayCallbacks,
    /// Resource whose `MediaPlayer::start` call is still in progress.
    launching: Option<PlaybackId>,
    /// Reports delivered from inside `start`, applied once the flight lock is released.
    queued: Vec<(PlaybackId, MediaEvent)>,
}

impl PlaybackSession {
    /// Installs a new resource. Returns its id, the id it displaced, and the
    /// displaced request's callbacks (to be dropped uncalled).
    fn bind(&mut self, url: String, callbacks: PlayCallbacks) -> (PlaybackId, Option<PlaybackId>, PlayCallbacks) {
        let previous = self.active.take();
        self.next_id += 1;
        let id = PlaybackId(self.next_id);
        self.active = Some(id);
        self.current_url = Some(url);
        self.state = AudioState::Loading;
        self.launching = Some(id);
        let displaced = std::mem::replace(&mut self.callbacks, callbacks);
        (id, previous, displaced)
    }
}

enum Deferred {
    Call(Callback),
    CallError(ErrorCallback, PlaybackError),
}

impl Deferred {
    fn run(self) {
        match self {
            Deferred::Call(f) => f(),
            Deferred::CallError(f, e) => f(e),
        }
    }
}

struct ControllerShared {
    /// Serialises play/stop/replay so stop-before-start holds across callers.
    flight: Mutex<()>,
    session: Mutex<PlaybackSession>,
    player: Arc<dyn MediaPlayer>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn EventSink>,
    debounce: Duration,
}

impl ControllerShared {
    fn flight(&self) -> MutexGuard<'_, ()> {
        self.flight.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn session(&self) -> MutexGuard<'_, PlaybackSession> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Application-wide audio owner. Cheap to clone; all clones share one session.
#[derive(Clone)]
pub struct AudioPlaybackController {
    shared: Arc<ControllerShared>,
}

impl AudioPlaybackController {
    pub fn new(
        player: Arc<dyn MediaPlayer>,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn EventSink>,
        debounce: std::time::Duration,
    ) -> Self {
        let debounce = Duration::from_std(debounce)
            .unwrap_or_else(|_| Duration::milliseconds(DEFAULT_DEBOUNCE_MS as i64));
        Self {
            shared: Arc::new(ControllerShared {
                flight: Mutex::new(()),
                session: Mutex::new(PlaybackSession::default()),
                player,
                clock,
                sink,
                debounce,
            }),
        }
    }

    pub fn play(&self, url: &str, callbacks: PlayCallbacks) -> PlayOutcome {
        let flight = self.shared.flight();
        let now = self.shared.clock.now();

        let (id, previous, displaced) = {
            let mut session = self.shared.session();
            if let Some(last) = session.last_play_request_at {
                let since = now - last;
                // A clock stepped backwards leaves `since` negative: restart the window from now.
                if since < Duration::zero() {
                    debug!(url, "Clock moved backwards since last play request");
                } else if since < self.shared.debounce {
                    let retry_after_ms = (self.shared.debounce - since).num_milliseconds().max(0) as u64;
                    debug!(url, retry_after_ms, "Play request debounced");
                    return PlayOutcome::Debounced { retry_after_ms };
                }
            }
            session.last_play_request_at = Some(now);
            session.bind(url.to_string(), callbacks)
        };
        drop(displaced);

        let failure = self.launch(id, url, previous);
        let queued = self.finish_launch();
        drop(flight);
        self.apply_launch_reports(id, queued, failure);
        PlayOutcome::Accepted { playback_id: id }
    }

    /// Halts whatever is loading or playing and returns to idle. A no-op when already idle.
    pub fn stop(&self) {
        let _flight = self.shared.flight();
        let (previous, url, displaced) = {
            let mut session = self.shared.session();
            if session.state == AudioState::Idle && session.active.is_none() {
                return;
            }
            session.state = AudioState::Idle;
            (
                session.active.take(),
                session.current_url.clone(),
                std::mem::take(&mut session.callbacks),
            )
        };
        drop(displaced);

        if let Some(id) = previous {
            self.shared.player.stop(id);
        }
        self.shared.player.cancel_speech();
        info!("Audio playback stopped");
        self.shared.sink.publish(StageEvent::AudioStateChanged {
            playback_id: None,
            state: AudioState::Idle,
            url,
        });
    }

    /// Restarts the bound resource from the beginning. Not debounced.
    pub fn replay(&self) -> ReplayAudioOutcome {
        let flight = self.shared.flight();
        let (id, url, previous, displaced) = {
            let mut session = self.shared.session();
            let Some(url) = session.current_url.clone() else {
                debug!("Replay requested with no audio bound");
                return ReplayAudioOutcome::NothingBound;
            };
            let (id, previous, displaced) = session.bind(url.clone(), PlayCallbacks::default());
            (id, url, previous, displaced)
        };
        drop(displaced);

        let failure = self.launch(id, &url, previous);
        let queued = self.finish_launch();
        drop(flight);
        self.apply_launch_reports(id, queued, failure);
        ReplayAudioOutcome::Restarted { playback_id: id }
    }

    /// Stop-before-start: releases `previous`, then starts `id`. Returns the
    /// message of a synchronous start failure for the caller to report.
    fn launch(&self, id: PlaybackId, url: &str, previous: Option<PlaybackId>) -> Option<String> {
        if let Some(previous) = previous {
            self.shared.player.stop(previous);
        }
        self.shared.player.cancel_speech();

        self.shared.sink.publish(StageEvent::AudioStateChanged {
            playback_id: Some(id),
            state: AudioState::Loading,
            url: Some(url.to_string()),
        });
        info!(playback_id = id.0, url, "Starting audio playback");

        let reporter = MediaReporter {
            id,
            shared: Arc::downgrade(&self.shared),
        };
        match self.shared.player.start(id, url, reporter) {
            Ok(()) => None,
            Err(e) => {
                warn!(playback_id = id.0, "Audio start failed: {e}");
                Some(e.to_string())
            }
        }
    }

    fn finish_launch(&self) -> Vec<(PlaybackId, MediaEvent)> {
        let mut session = self.shared.session();
        session.launching = None;
        std::mem::take(&mut session.queued)
    }

    /// Runs with no lock held, so callbacks may call back into the controller.
    fn apply_launch_reports(
        &self,
        id: PlaybackId,
        queued: Vec<(PlaybackId, MediaEvent)>,
        failure: Option<String>,
    ) {
        for (queued_id, event) in queued {
            self.report(queued_id, event);
        }
        if let Some(message) = failure {
            self.report(id, MediaEvent::Failed(message));
        }
    }

    /// Applies a lifecycle report. Returns false when it was ignored (stale id
    /// or a transition that doesn't apply in the current state). Reports sent
    /// from inside `MediaPlayer::start` are queued and applied after it returns.
    pub fn report(&self, id: PlaybackId, event: MediaEvent) -> bool {
        let mut deferred = None;
        let mut events = Vec::new();
        {
            let mut session = self.shared.session();
            if session.active != Some(id) {
                debug!(playback_id = id.0, ?event, "Ignoring report for inactive resource");
                return false;
            }
            if session.launching == Some(id) {
                debug!(playback_id = id.0, ?event, "Queueing report until start returns");
                session.queued.push((id, event));
                return true;
            }
            let url = session.current_url.clone().unwrap_or_default();

            match event {
                MediaEvent::Started => {
                    if !matches!(session.state, AudioState::Loading | AudioState::Paused) {
                        return false;
                    }
                    session.state = AudioState::Playing;
                    deferred = session.callbacks.on_play.take().map(Deferred::Call);
                }
                MediaEvent::Ended => {
                    if session.state != AudioState::Playing {
                        debug!(playback_id = id.0, state = ?session.state, "Ignoring end of a resource that never started");
                        return false;
                    }
                    session.state = AudioState::Idle;
                    session.active = None;
                    deferred = session.callbacks.on_end.take().map(Deferred::Call);
                    session.callbacks = PlayCallbacks::default();
                    events.push(StageEvent::PlaybackComplete {
                        playback_id: id,
                        url: url.clone(),
                    });
                }
                MediaEvent::Failed(message) => {
                    warn!(playback_id = id.0, url = %url, "Audio playback failed: {message}");
                    session.state = AudioState::Error;
                    session.active = None;
                    deferred = session
                        .callbacks
                        .on_error
                        .take()
                        .map(|f| Deferred::CallError(f, PlaybackError::Media(message.clone())));
                    session.callbacks = PlayCallbacks::default();
                    events.push(StageEvent::PlaybackFailed {
                        playback_id: id,
                        url: url.clone(),
                        message,
                    });
                }
                MediaEvent::AutoplayBlocked => {
                    if session.state != AudioState::Loading {
                        return false;
                    }
                    // Resource stays bound: a user tap may still start it.
                    session.state = AudioState::Paused;
                    deferred = session
                        .callbacks
                        .on_error
                        .take()
                        .map(|f| Deferred::CallError(f, PlaybackError::AutoplayBlocked));
                    events.push(StageEvent::AutoplayBlocked {
                        playback_id: id,
                        url: url.clone(),
                    });
                }
            }
            events.insert(
                0,
                StageEvent::AudioStateChanged {
                    playback_id: Some(id),
                    state: session.state,
                    url: Some(url),
                },
            );
        }

        if let Some(callback) = deferred {
            callback.run();
        }
        for event in events {
            self.shared.sink.publish(event);
        }
        true
    }

    #[allow(dead_code)]
    pub fn state(&self) -> AudioState {
        self.shared.session().state
    }

    #[allow(dead_code)]
    pub fn current_url(&self) -> Option<String> {
        self.shared.session().current_url.clone()
    }

    #[allow(dead_code)]
    pub fn is_playing(&self) -> bool {
        self.state() == AudioState::Playing
    }

    pub fn snapshot(&self) -> AudioSnapshot {
        let session = self.shared.session();
        AudioSnapshot {
            state: session.state,
            current_url: session.current_url.clone(),
            playback_id: session.active,
            is_playing: session.state == AudioState::Playing,
            last_play_request_at: session.last_play_request_at,
        }
    }
}

/// Handed to the media backend with each started resource; routes lifecycle
/// reports back to the controller that issued it.
#[derive(Clone)]
pub struct MediaReporter {
    id: PlaybackId,
    shared: Weak<ControllerShared>,
}

impl MediaReporter {
    /// Whether the controller still wants reports for this resource.
    pub fn is_current(&self) -> bool {
        self.shared
            .upgrade()
            .is_some_and(|shared| shared.session().active == Some(self.id))
    }

    pub fn report(&self, event: MediaEvent) -> bool {
        match self.shared.upgrade() {
            Some(shared) => AudioPlaybackController { shared }.report(self.id, event),
            None => false,
        }
    }

    pub fn failed(&self, message: impl Into<String>) -> bool {
        self.report(MediaEvent::Failed(message.into()))
    }
}
