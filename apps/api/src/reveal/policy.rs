use chrono::Duration;

/// Timing rules for revealing one interview question.
///
/// Defaults: 3-2-1 countdown, 20 s initial window, +8 s per replay, 2 replays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevealPolicy {
    /// Countdown length in whole seconds (the first value shown).
    pub countdown_secs: u8,
    pub initial_window: Duration,
    pub replay_extension: Duration,
    pub max_reveals: u32,
    /// Remaining time at which the one-shot "hides soon" warning fires.
    pub hiding_soon_threshold: Duration,
}

pub const DEFAULT_COUNTDOWN_SECS: u8 = 3;
pub const DEFAULT_WINDOW_SECS: i64 = 20;
pub const DEFAULT_EXTENSION_SECS: i64 = 8;
pub const DEFAULT_MAX_REVEALS: u32 = 2;
const HIDING_SOON_SECS: i64 = 5;

impl Default for RevealPolicy {
    fn default() -> Self {
        Self {
            countdown_secs: DEFAULT_COUNTDOWN_SECS,
            initial_window: Duration::seconds(DEFAULT_WINDOW_SECS),
            replay_extension: Duration::seconds(DEFAULT_EXTENSION_SECS),
            max_reveals: DEFAULT_MAX_REVEALS,
            hiding_soon_threshold: Duration::seconds(HIDING_SOON_SECS),
        }
    }
}

impl RevealPolicy {
    pub fn countdown(&self) -> Duration {
        Duration::seconds(i64::from(self.countdown_secs))
    }

    /// Longest a question can stay visible: initial window plus every replay.
    pub fn max_visible(&self) -> Duration {
        self.initial_window + self.replay_extension * self.max_reveals as i32
    }
}
