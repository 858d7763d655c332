//! Timer facility: "run this callback after N ms" plus cancellation.
//!
//! `TokioScheduler` is the production backend: one spawned task per timer,
//! tracked by `AbortHandle` so cancellation is total rather than best-effort.
//! Tests use `testing::VirtualScheduler`, which fires callbacks only when
//! virtual time is advanced.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::debug;

/// Opaque handle for a scheduled callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

pub type TimerTask = Box<dyn FnOnce() + Send + 'static>;

pub trait Scheduler: Send + Sync {
    /// Schedules `task` to run once after `delay`.
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerId;

    /// Cancels a scheduled task. Returns false if it already ran or was never scheduled.
    fn cancel(&self, id: TimerId) -> bool;

    /// Number of callbacks scheduled but not yet run or cancelled.
    fn pending(&self) -> usize;
}

/// Scheduler that runs each callback on the tokio runtime after a `sleep`.
pub struct TokioScheduler {
    handle: Handle,
    next_id: AtomicU64,
    tasks: Arc<Mutex<HashMap<TimerId, AbortHandle>>>,
}

impl TokioScheduler {
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            next_id: AtomicU64::new(1),
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Binds to the runtime of the calling task. Panics outside a runtime, like `tokio::spawn`.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerId {
        let id = TimerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let tasks = Arc::clone(&self.tasks);

        // Hold the map lock across spawn + insert so a zero-delay timer cannot
        // look itself up before it has been registered.
        let mut guard = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        let join = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            let still_pending = tasks
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&id)
                .is_some();
            if still_pending {
                task();
            }
        });
        guard.insert(id, join.abort_handle());
        id
    }

    fn cancel(&self, id: TimerId) -> bool {
        let removed = self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
        match removed {
            Some(handle) => {
                handle.abort();
                debug!("Cancelled timer {:?}", id);
                true
            }
            None => false,
        }
    }

    fn pending(&self) -> usize {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter_task(counter: &Arc<AtomicUsize>) -> TimerTask {
        let counter = Arc::clone(counter);
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_runs_after_delay() {
        let scheduler = TokioScheduler::current();
        let fired = Arc::new(AtomicUsize::new(0));
        scheduler.schedule(Duration::from_secs(3), counter_task(&fired));

        tokio::time::sleep(Duration::from_millis(2_900)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.pending(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_task_never_runs() {
        let scheduler = TokioScheduler::current();
        let fired = Arc::new(AtomicUsize::new(0));
        let id = scheduler.schedule(Duration::from_secs(1), counter_task(&fired));

        assert!(scheduler.cancel(id));
        assert!(!scheduler.cancel(id), "second cancel is a no-op");

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_delay_task_runs() {
        let scheduler = TokioScheduler::current();
        let fired = Arc::new(AtomicUsize::new(0));
        scheduler.schedule(Duration::ZERO, counter_task(&fired));

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_after_fire_returns_false() {
        let scheduler = TokioScheduler::current();
        let fired = Arc::new(AtomicUsize::new(0));
        let id = scheduler.schedule(Duration::from_millis(10), counter_task(&fired));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!scheduler.cancel(id));
    }
}
