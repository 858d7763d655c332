//! Question reveal state machine.
//!
//! Pure and clock-driven: every method reads `clock.now()` and transitions
//! from stored absolute instants, so catching up after a long gap (backgrounded
//! tab, late wakeup) lands in exactly the state a continuously running timer
//! would be in. Scheduling of wakeups lives in `driver`.
//!
//! ```text
//!            start(turn)                 countdown ends          deadline
//!   Idle ─────────────────▶ CountingDown ─────────────▶ Visible ─────────▶ Hidden
//!    ▲  start(turn, a11y)                                  ▲ replay (+8s)     │
//!    │ ─────────────────▶ AccessibleAlwaysVisible          └──────────────────┘ replay (now+8s)
//!    └── start(None) / teardown from any phase
//! ```

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::events::StageEvent;
use crate::reveal::policy::RevealPolicy;
use crate::runtime::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RevealPhase {
    Idle,
    CountingDown,
    Visible,
    Hidden,
    AccessibleAlwaysVisible,
}

/// Result of `request_replay`. Exhaustion is an outcome, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ReplayOutcome {
    Granted {
        reveal_count: u32,
        remaining_secs: u64,
    },
    /// No replays left; nothing changed.
    Exhausted { max_reveals: u32 },
    /// Nothing to replay in this phase (idle, counting down, accessible).
    Unavailable { phase: RevealPhase },
}

/// Everything a view needs to render the current question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RevealSnapshot {
    pub turn_id: Option<String>,
    pub phase: RevealPhase,
    pub countdown_value: Option<u8>,
    pub question_visible: bool,
    pub reveal_count: u32,
    pub max_reveals: u32,
    pub remaining_time: Option<u64>,
    pub reveal_deadline: Option<DateTime<Utc>>,
}

pub struct RevealTimer {
    policy: RevealPolicy,
    clock: Arc<dyn Clock>,
    /// Bumped on every start/teardown; wakeups scheduled under an older epoch are stale.
    epoch: u64,
    turn_id: Option<String>,
    phase: RevealPhase,
    countdown_started_at: Option<DateTime<Utc>>,
    last_countdown: Option<u8>,
    reveal_count: u32,
    reveal_deadline: Option<DateTime<Utc>>,
    hiding_soon_sent: bool,
}

impl RevealTimer {
    pub fn new(policy: RevealPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            policy,
            clock,
            epoch: 0,
            turn_id: None,
            phase: RevealPhase::Idle,
            countdown_started_at: None,
            last_countdown: None,
            reveal_count: 0,
            reveal_deadline: None,
            hiding_soon_sent: false,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn phase(&self) -> RevealPhase {
        self.phase
    }

    pub fn turn_id(&self) -> Option<&str> {
        self.turn_id.as_deref()
    }

    pub fn reveal_count(&self) -> u32 {
        self.reveal_count
    }

    pub fn reveal_deadline(&self) -> Option<DateTime<Utc>> {
        self.reveal_deadline
    }

    /// Starts a fresh session. A missing or blank `turn_id` means "no active
    /// question" and leaves the machine idle.
    pub fn start(&mut self, turn_id: Option<&str>, accessibility_mode: bool) -> Vec<StageEvent> {
        self.reset();

        let Some(turn_id) = turn_id.map(str::trim).filter(|t| !t.is_empty()) else {
            return Vec::new();
        };
        self.turn_id = Some(turn_id.to_string());

        if accessibility_mode {
            self.phase = RevealPhase::AccessibleAlwaysVisible;
            return vec![StageEvent::RevealStarted {
                turn_id: turn_id.to_string(),
                accessible: true,
                deadline: None,
            }];
        }

        self.phase = RevealPhase::CountingDown;
        self.countdown_started_at = Some(self.clock.now());
        self.last_countdown = Some(self.policy.countdown_secs);
        vec![StageEvent::CountdownTick {
            turn_id: turn_id.to_string(),
            value: self.policy.countdown_secs,
        }]
    }

    /// Drops the session (turn change or unmount). Any wakeup from before is now stale.
    pub fn teardown(&mut self) {
        self.reset();
    }

    fn reset(&mut self) {
        self.epoch += 1;
        self.turn_id = None;
        self.phase = RevealPhase::Idle;
        self.countdown_started_at = None;
        self.last_countdown = None;
        self.reveal_count = 0;
        self.reveal_deadline = None;
        self.hiding_soon_sent = false;
    }

    /// Brings the machine up to `clock.now()`, returning every transition crossed.
    pub fn poll(&mut self) -> Vec<StageEvent> {
        let now = self.clock.now();
        let mut events = Vec::new();
        let Some(turn_id) = self.turn_id.clone() else {
            return events;
        };

        loop {
            match self.phase {
                RevealPhase::CountingDown => {
                    let Some(started) = self.countdown_started_at else {
                        break;
                    };
                    let countdown_end = started + self.policy.countdown();
                    if now >= countdown_end {
                        // Anchor on the scheduled end so a late wakeup doesn't shorten the window.
                        let deadline = countdown_end + self.policy.initial_window;
                        self.phase = RevealPhase::Visible;
                        self.countdown_started_at = None;
                        self.last_countdown = None;
                        self.reveal_deadline = Some(deadline);
                        self.hiding_soon_sent = false;
                        events.push(StageEvent::RevealStarted {
                            turn_id: turn_id.clone(),
                            accessible: false,
                            deadline: Some(deadline),
                        });
                        continue;
                    }
                    if let Some(value) = self.countdown_at(now) {
                        if self.last_countdown != Some(value) {
                            self.last_countdown = Some(value);
                            events.push(StageEvent::CountdownTick {
                                turn_id: turn_id.clone(),
                                value,
                            });
                        }
                    }
                    break;
                }
                RevealPhase::Visible => {
                    let Some(deadline) = self.reveal_deadline else {
                        break;
                    };
                    if now >= deadline {
                        self.phase = RevealPhase::Hidden;
                        self.reveal_deadline = None;
                        events.push(StageEvent::RevealHidden {
                            turn_id: turn_id.clone(),
                            replays_left: self.replays_left(),
                        });
                        break;
                    }
                    if !self.hiding_soon_sent && deadline - now <= self.policy.hiding_soon_threshold {
                        self.hiding_soon_sent = true;
                        events.push(StageEvent::HidingSoon {
                            turn_id: turn_id.clone(),
                            remaining_secs: ceil_secs(deadline - now),
                        });
                    }
                    break;
                }
                RevealPhase::Idle | RevealPhase::Hidden | RevealPhase::AccessibleAlwaysVisible => {
                    break
                }
            }
        }
        events
    }

    /// Consumes one replay if any are left.
    ///
    /// Hidden: shows the question again for one extension window starting now.
    /// Visible: pushes the existing deadline out by exactly one extension.
    pub fn request_replay(&mut self) -> (ReplayOutcome, Vec<StageEvent>) {
        let mut events = self.poll();

        if !matches!(self.phase, RevealPhase::Visible | RevealPhase::Hidden) {
            return (ReplayOutcome::Unavailable { phase: self.phase }, events);
        }
        let turn_id = self.turn_id.clone().unwrap_or_default();

        if self.reveal_count >= self.policy.max_reveals {
            events.push(StageEvent::ReplaysExhausted {
                turn_id,
                max_reveals: self.policy.max_reveals,
            });
            return (
                ReplayOutcome::Exhausted {
                    max_reveals: self.policy.max_reveals,
                },
                events,
            );
        }

        let now = self.clock.now();
        let deadline = match (self.phase, self.reveal_deadline) {
            (RevealPhase::Visible, Some(current)) => current + self.policy.replay_extension,
            _ => now + self.policy.replay_extension,
        };
        self.reveal_count += 1;
        self.phase = RevealPhase::Visible;
        self.reveal_deadline = Some(deadline);
        if deadline - now > self.policy.hiding_soon_threshold {
            self.hiding_soon_sent = false;
        }

        events.push(StageEvent::ReplayUsed {
            turn_id,
            reveal_count: self.reveal_count,
            max_reveals: self.policy.max_reveals,
            deadline,
        });
        (
            ReplayOutcome::Granted {
                reveal_count: self.reveal_count,
                remaining_secs: ceil_secs(deadline - now),
            },
            events,
        )
    }

    /// Next instant at which `poll` would change something, if any.
    pub fn next_wakeup(&self) -> Option<DateTime<Utc>> {
        let now = self.clock.now();
        match self.phase {
            RevealPhase::CountingDown => {
                let started = self.countdown_started_at?;
                let elapsed = (now - started).num_seconds().max(0);
                let next = started + Duration::seconds(elapsed + 1);
                Some(next.min(started + self.policy.countdown()))
            }
            RevealPhase::Visible => {
                let deadline = self.reveal_deadline?;
                let warn_at = deadline - self.policy.hiding_soon_threshold;
                if !self.hiding_soon_sent && warn_at > now {
                    Some(warn_at)
                } else {
                    Some(deadline)
                }
            }
            RevealPhase::Idle | RevealPhase::Hidden | RevealPhase::AccessibleAlwaysVisible => None,
        }
    }

    pub fn countdown_value(&self) -> Option<u8> {
        match self.phase {
            RevealPhase::CountingDown => self.countdown_at(self.clock.now()),
            _ => None,
        }
    }

    pub fn question_visible(&self) -> bool {
        match self.phase {
            RevealPhase::AccessibleAlwaysVisible => true,
            RevealPhase::Visible => self
                .reveal_deadline
                .is_some_and(|deadline| self.clock.now() < deadline),
            _ => false,
        }
    }

    /// Whole seconds left in the visible window, rounded up.
    pub fn remaining_time(&self) -> Option<u64> {
        match (self.phase, self.reveal_deadline) {
            (RevealPhase::Visible, Some(deadline)) => Some(ceil_secs(deadline - self.clock.now())),
            _ => None,
        }
    }

    pub fn replays_left(&self) -> u32 {
        self.policy.max_reveals.saturating_sub(self.reveal_count)
    }

    pub fn snapshot(&self) -> RevealSnapshot {
        RevealSnapshot {
            turn_id: self.turn_id.clone(),
            phase: self.phase,
            countdown_value: self.countdown_value(),
            question_visible: self.question_visible(),
            reveal_count: self.reveal_count(),
            max_reveals: self.policy.max_reveals,
            remaining_time: self.remaining_time(),
            reveal_deadline: self.reveal_deadline(),
        }
    }

    fn countdown_at(&self, now: DateTime<Utc>) -> Option<u8> {
        let started = self.countdown_started_at?;
        let elapsed = (now - started).num_seconds().max(0);
        let total = i64::from(self.policy.countdown_secs);
        (elapsed < total).then(|| (total - elapsed) as u8)
    }
}

fn ceil_secs(d: Duration) -> u64 {
    let ms = d.num_milliseconds();
    if ms <= 0 {
        0
    } else {
        ((ms + 999) / 1000) as u64
    }
}
