//! Binds a `RevealTimer` to a `Scheduler`.
//!
//! At most one wakeup is pending per controller. Every operation cancels it
//! before touching the machine and re-arms from `next_wakeup()` afterwards, and
//! each wakeup carries a ticket (session epoch + arm sequence) so one that
//! raced past cancellation is recognised and dropped.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tracing::{debug, info};

use crate::events::{EventSink, StageEvent};
use crate::reveal::machine::{ReplayOutcome, RevealPhase, RevealSnapshot, RevealTimer};
use crate::reveal::policy::RevealPolicy;
use crate::runtime::{Clock, Scheduler, TimerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct WakeTicket {
    epoch: u64,
    seq: u64,
}

struct DriverState {
    timer: RevealTimer,
    pending: Option<TimerId>,
    armed: WakeTicket,
}

struct Shared {
    state: Mutex<DriverState>,
    scheduler: Arc<dyn Scheduler>,
    sink: Arc<dyn EventSink>,
}

/// Owner of one question's reveal session. Dropping it tears the session down.
pub struct RevealController {
    shared: Arc<Shared>,
}

impl RevealController {
    pub fn new(
        policy: RevealPolicy,
        clock: Arc<dyn Clock>,
        scheduler: Arc<dyn Scheduler>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(DriverState {
                    timer: RevealTimer::new(policy, clock),
                    pending: None,
                    armed: WakeTicket { epoch: 0, seq: 0 },
                }),
                scheduler,
                sink,
            }),
        }
    }

    /// (Re)starts the session for `turn_id`, cancelling every pending wakeup first.
    pub fn start(&self, turn_id: Option<&str>, accessibility_mode: bool) -> RevealSnapshot {
        let (events, snapshot) = {
            let mut state = self.shared.lock();
            self.shared.cancel_pending(&mut state);
            let events = state.timer.start(turn_id, accessibility_mode);
            info!(
                turn_id = state.timer.turn_id().unwrap_or("-"),
                accessible = accessibility_mode,
                "Reveal session started"
            );
            Shared::arm(&self.shared, &mut state);
            (events, state.timer.snapshot())
        };
        self.shared.publish(events);
        snapshot
    }

    pub fn request_replay(&self) -> (ReplayOutcome, RevealSnapshot) {
        let (outcome, events, snapshot) = {
            let mut state = self.shared.lock();
            self.shared.cancel_pending(&mut state);
            let (outcome, events) = state.timer.request_replay();
            debug!(?outcome, "Replay requested");
            Shared::arm(&self.shared, &mut state);
            (outcome, events, state.timer.snapshot())
        };
        self.shared.publish(events);
        (outcome, snapshot)
    }

    /// Current state, caught up to now.
    pub fn snapshot(&self) -> RevealSnapshot {
        let (events, snapshot) = {
            let mut state = self.shared.lock();
            let events = state.timer.poll();
            if !events.is_empty() {
                self.shared.cancel_pending(&mut state);
                Shared::arm(&self.shared, &mut state);
            }
            (events, state.timer.snapshot())
        };
        self.shared.publish(events);
        snapshot
    }

    /// True when `start(turn_id, accessibility_mode)` would recreate the current session.
    pub fn is_current(&self, turn_id: Option<&str>, accessibility_mode: bool) -> bool {
        let state = self.shared.lock();
        let turn_id = turn_id.map(str::trim).filter(|t| !t.is_empty());
        let accessible = state.timer.phase() == RevealPhase::AccessibleAlwaysVisible;
        state.timer.turn_id() == turn_id && (turn_id.is_none() || accessible == accessibility_mode)
    }

    /// Unmount: cancel everything and go idle.
    pub fn teardown(&self) {
        let mut state = self.shared.lock();
        self.shared.cancel_pending(&mut state);
        if state.timer.turn_id().is_some() {
            debug!(turn_id = state.timer.turn_id().unwrap_or("-"), "Reveal session torn down");
        }
        state.timer.teardown();
    }
}

impl Drop for RevealController {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, DriverState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn cancel_pending(&self, state: &mut DriverState) {
        if let Some(id) = state.pending.take() {
            self.scheduler.cancel(id);
        }
    }

    fn arm(shared: &Arc<Shared>, state: &mut DriverState) {
        let Some(at) = state.timer.next_wakeup() else {
            return;
        };
        let delay = (at - state.timer.now()).to_std().unwrap_or_default();
        let ticket = WakeTicket {
            epoch: state.timer.epoch(),
            seq: state.armed.seq + 1,
        };
        state.armed = ticket;

        let weak: Weak<Shared> = Arc::downgrade(shared);
        let id = shared.scheduler.schedule(
            delay,
            Box::new(move || {
                if let Some(shared) = weak.upgrade() {
                    Shared::wake(&shared, ticket);
                }
            }),
        );
        state.pending = Some(id);
    }

    fn wake(shared: &Arc<Shared>, ticket: WakeTicket) {
        let events = {
            let mut state = shared.lock();
            if state.timer.epoch() != ticket.epoch || state.armed != ticket {
                debug!(?ticket, "Discarding stale reveal wakeup");
                return;
            }
            state.pending = None;
            let events = state.timer.poll();
            Shared::arm(shared, &mut state);
            events
        };
        shared.publish(events);
    }

    fn publish(&self, events: Vec<StageEvent>) {
        for event in events {
            self.sink.publish(event);
        }
    }
}
