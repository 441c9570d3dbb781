//! Rate limiting for hot-path log sites.

use std::time::{Duration, Instant};

/// Limits how often a repeated warning may be emitted.
///
/// `allow` returns `Some(suppressed)` when a message may go out, where
/// `suppressed` is the number of messages swallowed since the last one;
/// `None` means stay quiet.
#[derive(Debug)]
pub struct LogThrottle {
    interval: Duration,
    last_emit: Option<Instant>,
    suppressed: u64,
}

impl LogThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emit: None,
            suppressed: 0,
        }
    }

    /// Ask to emit. The first call always passes.
    pub fn allow(&mut self) -> Option<u64> {
        let now = Instant::now();
        let due = self
            .last_emit
            .is_none_or(|last| now.duration_since(last) >= self.interval);
        if due {
            self.last_emit = Some(now);
            Some(std::mem::take(&mut self.suppressed))
        } else {
            self.suppressed += 1;
            None
        }
    }
}
