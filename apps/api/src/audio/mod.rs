// Single-flight audio: at most one resource bound and audible at a time.
// `controller` owns the state machine, `media` is the backend seam and
// `remote` drives browser stage clients through the event bus.

pub mod controller;
pub mod handlers;
pub mod media;
pub mod remote;

pub use controller::{AudioPlaybackController, AudioState, MediaReporter};
pub use remote::RemoteMediaPlayer;
