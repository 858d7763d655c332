// Runtime seams: wall clock and timer facility.
// The reveal and audio state machines never touch tokio or the system clock directly;
// they are handed an `Arc<dyn Clock>` / `Arc<dyn Scheduler>` so tests can drive virtual time.

pub mod clock;
pub mod scheduler;

pub use clock::{Clock, SystemClock};
pub use scheduler::{Scheduler, TimerId, TimerTask, TokioScheduler};
