use std::thread::sleep;
use std::time::{Duration, Instant};

use crate::cancel::CancellationToken;

pub const DEFAULT_EDIT_DELAY_MS: u64 = 2_000;

const WAIT_SLICE: Duration = Duration::from_millis(50);

/// Fixed minimum spacing between successive edits. No call counting and no
/// adaptive backoff: every wait is the same length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiter {
    min_delay: Duration,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_EDIT_DELAY_MS))
    }
}

impl RateLimiter {
    pub fn new(min_delay: Duration) -> Self {
        Self { min_delay }
    }

    pub fn from_millis(min_delay_ms: u64) -> Self {
        Self::new(Duration::from_millis(min_delay_ms))
    }

    pub fn min_delay(&self) -> Duration {
        self.min_delay
    }

    /// Wait the configured spacing. Returns `false` when `cancel` fired
    /// before the wait finished.
    pub fn wait(&self, cancel: &CancellationToken) -> bool {
        wait_for(self.min_delay, cancel)
    }
}

/// Sleep for `duration` in short slices so a cancellation ends the wait
/// early. Returns `false` if cancelled.
pub fn wait_for(duration: Duration, cancel: &CancellationToken) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        sleep((deadline - now).min(WAIT_SLICE));
    }
}
