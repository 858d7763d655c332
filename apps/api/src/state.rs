use std::sync::Arc;

use crate::audio::AudioPlaybackController;
use crate::events::EventBus;
use crate::reveal::RevealRegistry;
use crate::speech::SpeechProvider;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub bus: EventBus,
    /// Reveal timers, one per interview session on stage.
    pub reveals: Arc<RevealRegistry>,
    /// The only audio owner in the process.
    pub audio: AudioPlaybackController,
    pub speech: Arc<dyn SpeechProvider>,
}
