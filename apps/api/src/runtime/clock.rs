use chrono::{DateTime, Utc};

/// Source of "now" for every deadline computation in the stage.
///
/// Deadlines are stored as absolute wall-clock instants, so a client that
/// resumes after a long pause gets the correct remaining time instead of a
/// drifted countdown.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
