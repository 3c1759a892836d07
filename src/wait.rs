//! Bounded polling.
//!
//! Every blocking wait in the crate (export detection, control
//! availability, session materialization) goes through [`Poll`] so timeout
//! semantics stay uniform and testable.

use std::time::Duration;

use tokio::time::{sleep, Instant};

/// A poll-until-deadline policy: check a predicate every `interval` until
/// it holds or `timeout` has elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Poll {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Poll {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// Polls `pred` until it returns `true` or the deadline passes.
    /// The predicate is evaluated at least once, even with a zero timeout.
    pub async fn until<F>(&self, mut pred: F) -> bool
    where
        F: FnMut() -> bool,
    {
        self.until_some(|| pred().then_some(())).await.is_some()
    }

    /// Polls `f` until it yields a value or the deadline passes.
    pub async fn until_some<T, F>(&self, mut f: F) -> Option<T>
    where
        F: FnMut() -> Option<T>,
    {
        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(value) = f() {
                return Some(value);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            sleep(self.interval.min(deadline - now)).await;
        }
    }
}
