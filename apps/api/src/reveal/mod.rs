// Question reveal: 3-2-1 countdown, 20s visible window, up to two +8s replays,
// or permanently visible in accessibility mode.
// `machine` is pure and clock-driven; `driver` owns the timers; `registry` keys
// controllers by interview session for the HTTP layer.

pub mod driver;
pub mod handlers;
pub mod machine;
pub mod policy;
pub mod registry;

pub use registry::RevealRegistry;
