use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::events::EventSink;
use crate::reveal::driver::RevealController;
use crate::reveal::machine::{ReplayOutcome, RevealPhase, RevealSnapshot};
use crate::reveal::policy::RevealPolicy;
use crate::runtime::{Clock, Scheduler};

pub const DEFAULT_SESSION_TTL_SECS: i64 = 30 * 60;

struct SessionEntry {
    controller: RevealController,
    touched: DateTime<Utc>,
}

/// One reveal controller per interview session currently on stage.
///
/// Removing an entry drops its controller, which cancels every pending timer.
/// Sessions no longer counting down or visible are evicted once untouched for
/// the idle TTL, so clients that never unmount don't accumulate.
pub struct RevealRegistry {
    sessions: Mutex<HashMap<Uuid, SessionEntry>>,
    policy: RevealPolicy,
    idle_ttl: Duration,
    clock: Arc<dyn Clock>,
    scheduler: Arc<dyn Scheduler>,
    sink: Arc<dyn EventSink>,
}

impl RevealRegistry {
    pub fn new(
        policy: RevealPolicy,
        clock: Arc<dyn Clock>,
        scheduler: Arc<dyn Scheduler>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            policy,
            idle_ttl: Duration::seconds(DEFAULT_SESSION_TTL_SECS),
            clock,
            scheduler,
            sink,
        }
    }

    pub fn with_idle_ttl(mut self, idle_ttl: Duration) -> Self {
        self.idle_ttl = idle_ttl;
        self
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<Uuid, SessionEntry>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Shows `turn_id` for `session_id`. Re-sending the current turn with the
    /// same mode is a no-op, so a client may retry the call safely.
    pub fn start(
        &self,
        session_id: Uuid,
        turn_id: Option<&str>,
        accessibility_mode: bool,
    ) -> RevealSnapshot {
        self.evict_idle();
        let now = self.clock.now();
        let mut sessions = self.sessions();
        let entry = sessions.entry(session_id).or_insert_with(|| {
            info!("Opening reveal session for interview {session_id}");
            SessionEntry {
                controller: RevealController::new(
                    self.policy,
                    Arc::clone(&self.clock),
                    Arc::clone(&self.scheduler),
                    Arc::clone(&self.sink),
                ),
                touched: now,
            }
        });
        entry.touched = now;

        if entry.controller.is_current(turn_id, accessibility_mode) {
            return entry.controller.snapshot();
        }
        entry.controller.start(turn_id, accessibility_mode)
    }

    pub fn request_replay(&self, session_id: Uuid) -> Option<(ReplayOutcome, RevealSnapshot)> {
        let now = self.clock.now();
        self.sessions().get_mut(&session_id).map(|entry| {
            entry.touched = now;
            entry.controller.request_replay()
        })
    }

    pub fn snapshot(&self, session_id: Uuid) -> Option<RevealSnapshot> {
        let now = self.clock.now();
        self.sessions().get_mut(&session_id).map(|entry| {
            entry.touched = now;
            entry.controller.snapshot()
        })
    }

    /// Unmounts the session. Returns false if there was none.
    pub fn remove(&self, session_id: Uuid) -> bool {
        let removed = self.sessions().remove(&session_id);
        if removed.is_some() {
            info!("Closed reveal session for interview {session_id}");
        }
        removed.is_some()
    }

    /// Drops sessions that are not counting down or visible and have been
    /// untouched for the idle TTL. Returns how many were evicted.
    pub fn evict_idle(&self) -> usize {
        let cutoff = self.clock.now() - self.idle_ttl;
        let mut sessions = self.sessions();
        let before = sessions.len();
        sessions.retain(|session_id, entry| {
            if entry.touched > cutoff {
                return true;
            }
            let phase = entry.controller.snapshot().phase;
            let keep = matches!(phase, RevealPhase::CountingDown | RevealPhase::Visible);
            if !keep {
                debug!(%session_id, ?phase, "Evicting idle reveal session");
            }
            keep
        });
        let evicted = before - sessions.len();
        if evicted > 0 {
            info!("Evicted {evicted} idle reveal sessions");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.sessions().len()
    }
}
