use std::time::{Duration, Instant};

/// Fixed-reset rate window: when the interval since the window start
/// has elapsed, the count resets and the window start advances to now.
/// O(1) per check, no send log.
#[derive(Debug)]
pub(crate) struct FixedWindow {
    started: Instant,
    count: u32,
}

impl FixedWindow {
    pub(crate) fn new(now: Instant) -> Self {
        Self {
            started: now,
            count: 0,
        }
    }

    /// Counts one send against the window and reports whether it is
    /// within the cap. Rejected sends still advance the count, so a
    /// sender cannot probe the limit for free.
    pub(crate) fn allow(&mut self, limit: u32, window: Duration, now: Instant) -> bool {
        if now.duration_since(self.started) > window {
            self.count = 0;
            self.started = now;
        }
        self.count = self.count.saturating_add(1);
        self.count <= limit
    }
}

/// Per-connection file-chunk budget. Unlike [`FixedWindow`] the reset
/// is driven externally by the connection task's recurring interval,
/// which dies with the task. One throttle notice per violation window.
#[derive(Debug, Default)]
pub(crate) struct ChunkBudget {
    count: u32,
    throttle_notified: bool,
}

impl ChunkBudget {
    pub(crate) fn reset(&mut self) {
        self.count = 0;
        self.throttle_notified = false;
    }

    pub(crate) fn allow(&mut self, limit: u32) -> bool {
        self.count = self.count.saturating_add(1);
        self.count <= limit
    }

    /// True the first time it is called inside a violation window.
    pub(crate) fn should_notify_throttle(&mut self) -> bool {
        if self.throttle_notified {
            return false;
        }
        self.throttle_notified = true;
        true
    }
}
