use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::controller::MediaReporter;

/// Identifies one bound media resource. A fresh id is issued for every
/// accepted `play`/`replay`, so reports about an older resource can be told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlaybackId(pub u64);

/// Lifecycle report from the media backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    Started,
    Ended,
    Failed(String),
    /// The platform refused to start audio without a user gesture.
    AutoplayBlocked,
}

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("invalid audio url: {0}")]
    InvalidUrl(String),

    #[error("audio resource unreachable: {0}")]
    Unreachable(String),

    #[error("audio resource returned status {0}")]
    Status(u16),

    #[error("resource is not audio (content-type {0})")]
    NotAudio(String),
}

/// "Load and play a resource, report its lifecycle" capability.
///
/// Implementations report asynchronously through the `MediaReporter` handed to
/// `start`; they must not assume reports for a stopped id are still wanted.
pub trait MediaPlayer: Send + Sync {
    /// Begins loading `url`. Synchronous failures are returned; everything
    /// later goes through `reporter`.
    fn start(&self, id: PlaybackId, url: &str, reporter: MediaReporter) -> Result<(), MediaError>;

    /// Halts and releases resource `id`, resetting its position.
    fn stop(&self, id: PlaybackId);

    /// Cancels any platform speech-synthesis fallback that may be talking.
    fn cancel_speech(&self) {}
}
