//! Deterministic doubles for the runtime seams: a manual clock, a scheduler
//! driven by virtual time, an event recorder and a scriptable media player.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::audio::media::{MediaError, MediaEvent, MediaPlayer, PlaybackId};
use crate::audio::MediaReporter;
use crate::events::{EventSink, StageEvent};
use crate::runtime::{Clock, Scheduler, TimerId, TimerTask};
use crate::speech::{SpeechError, SpeechProvider};

// ────────────────────────────────────────────────────────────────────────────
// Clock
// ────────────────────────────────────────────────────────────────────────────

pub struct ManualClock {
    origin: DateTime<Utc>,
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new() -> Arc<Self> {
        let origin = Utc
            .with_ymd_and_hms(2026, 3, 2, 9, 0, 0)
            .single()
            .expect("valid fixed instant");
        Arc::new(Self {
            origin,
            now: Mutex::new(origin),
        })
    }

    /// Instant at `secs` seconds after the clock was created.
    pub fn at(&self, secs: i64) -> DateTime<Utc> {
        self.origin + Duration::seconds(secs)
    }

    pub fn at_ms(&self, ms: i64) -> DateTime<Utc> {
        self.origin + Duration::milliseconds(ms)
    }

    pub fn set(&self, t: DateTime<Utc>) {
        let mut now = self.now.lock().unwrap();
        if t > *now {
            *now = t;
        }
    }

    pub fn set_ms(&self, ms: i64) {
        self.set(self.at_ms(ms));
    }

    pub fn advance(&self, d: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += d;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Scheduler
// ────────────────────────────────────────────────────────────────────────────

struct Entry {
    id: TimerId,
    due: DateTime<Utc>,
    task: TimerTask,
}

#[derive(Default)]
struct Queue {
    next_id: u64,
    entries: Vec<Entry>,
    fired: usize,
}

/// Scheduler whose callbacks fire only from `advance*`, in due order, with the
/// manual clock set to each callback's due time while it runs.
pub struct VirtualScheduler {
    clock: Arc<ManualClock>,
    queue: Mutex<Queue>,
}

impl VirtualScheduler {
    pub fn new(clock: Arc<ManualClock>) -> Arc<Self> {
        Arc::new(Self {
            clock,
            queue: Mutex::new(Queue::default()),
        })
    }

    pub fn advance(&self, d: Duration) {
        let target = self.clock.now() + d;
        self.run_until(target);
    }

    pub fn advance_ms(&self, ms: i64) {
        self.advance(Duration::milliseconds(ms));
    }

    /// Advances to an absolute offset (ms since the clock origin).
    pub fn advance_to_ms(&self, ms: i64) {
        self.run_until(self.clock.at_ms(ms));
    }

    pub fn fired(&self) -> usize {
        self.queue.lock().unwrap().fired
    }

    fn run_until(&self, target: DateTime<Utc>) {
        loop {
            let next = {
                let mut queue = self.queue.lock().unwrap();
                let idx = queue
                    .entries
                    .iter()
                    .enumerate()
                    .filter(|(_, e)| e.due <= target)
                    .min_by_key(|(_, e)| (e.due, e.id))
                    .map(|(i, _)| i);
                idx.map(|i| {
                    queue.fired += 1;
                    queue.entries.remove(i)
                })
            };
            // Lock released before running: tasks schedule follow-ups.
            match next {
                Some(entry) => {
                    self.clock.set(entry.due);
                    (entry.task)();
                }
                None => break,
            }
        }
        self.clock.set(target);
    }
}

impl Scheduler for VirtualScheduler {
    fn schedule(&self, delay: std::time::Duration, task: TimerTask) -> TimerId {
        let due = self.clock.now() + Duration::from_std(delay).unwrap_or(Duration::zero());
        let mut queue = self.queue.lock().unwrap();
        queue.next_id += 1;
        let id = TimerId(queue.next_id);
        queue.entries.push(Entry { id, due, task });
        id
    }

    fn cancel(&self, id: TimerId) -> bool {
        let mut queue = self.queue.lock().unwrap();
        let before = queue.entries.len();
        queue.entries.retain(|e| e.id != id);
        queue.entries.len() != before
    }

    fn pending(&self) -> usize {
        self.queue.lock().unwrap().entries.len()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Event sink
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<StageEvent>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<StageEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().iter().map(|e| e.name()).collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.names().into_iter().filter(|n| *n == name).count()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl EventSink for RecordingSink {
    fn publish(&self, event: StageEvent) {
        self.events.lock().unwrap().push(event);
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Media player
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerCall {
    Start(PlaybackId, String),
    Stop(PlaybackId),
    CancelSpeech,
}

/// Records every call and keeps the reporters so tests can play the part of
/// the media backend. Tracks which resources are audible at once.
#[derive(Default)]
pub struct FakeMediaPlayer {
    calls: Mutex<Vec<PlayerCall>>,
    reporters: Mutex<HashMap<PlaybackId, MediaReporter>>,
    audible: Mutex<HashSet<PlaybackId>>,
    max_audible: AtomicUsize,
    reject_next_start: AtomicBool,
    report_during_start: Mutex<Option<MediaEvent>>,
}

impl FakeMediaPlayer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<PlayerCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn starts(&self) -> Vec<(PlaybackId, String)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                PlayerCall::Start(id, url) => Some((id, url)),
                _ => None,
            })
            .collect()
    }

    pub fn reject_next_start(&self) {
        self.reject_next_start.store(true, Ordering::SeqCst);
    }

    /// Makes the next `start` deliver `event` before returning, like a
    /// backend that fails or starts instantly.
    pub fn report_during_next_start(&self, event: MediaEvent) {
        *self.report_during_start.lock().unwrap() = Some(event);
    }

    pub fn max_audible(&self) -> usize {
        self.max_audible.load(Ordering::SeqCst)
    }

    /// Delivers a lifecycle event for `id` the way a real backend would.
    pub fn emit(&self, id: PlaybackId, event: MediaEvent) -> bool {
        if matches!(event, MediaEvent::Ended | MediaEvent::Failed(_)) {
            self.audible.lock().unwrap().remove(&id);
        }
        let reporter = self
            .reporters
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .expect("no resource started with this id");
        reporter.report(event)
    }
}

impl MediaPlayer for FakeMediaPlayer {
    fn start(&self, id: PlaybackId, url: &str, reporter: MediaReporter) -> Result<(), MediaError> {
        self.calls
            .lock()
            .unwrap()
            .push(PlayerCall::Start(id, url.to_string()));
        if self.reject_next_start.swap(false, Ordering::SeqCst) {
            return Err(MediaError::InvalidUrl(url.to_string()));
        }
        self.reporters.lock().unwrap().insert(id, reporter.clone());
        {
            let mut audible = self.audible.lock().unwrap();
            audible.insert(id);
            self.max_audible.fetch_max(audible.len(), Ordering::SeqCst);
        }
        let pending = self.report_during_start.lock().unwrap().take();
        if let Some(event) = pending {
            reporter.report(event);
        }
        Ok(())
    }

    fn stop(&self, id: PlaybackId) {
        self.calls.lock().unwrap().push(PlayerCall::Stop(id));
        self.audible.lock().unwrap().remove(&id);
    }

    fn cancel_speech(&self) {
        self.calls.lock().unwrap().push(PlayerCall::CancelSpeech);
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Speech provider
// ────────────────────────────────────────────────────────────────────────────

/// Returns a deterministic URL per input, or fails when constructed with `failing()`.
pub struct StaticSpeechProvider {
    fail: bool,
}

impl StaticSpeechProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { fail: false })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self { fail: true })
    }
}

#[async_trait]
impl SpeechProvider for StaticSpeechProvider {
    async fn synthesize(&self, text: &str) -> Result<String, SpeechError> {
        if self.fail {
            return Err(SpeechError::Api {
                status: 503,
                message: "speech backend down".to_string(),
            });
        }
        Ok(format!("https://tts.test/{}.mp3", text.len()))
    }
}
