//! Token-bucket rate limiting for log call sites.
//!
//! Diagnostics that a hostile peer can trigger at wire speed go through one
//! of these per call site, so a flood of bad messages cannot flood the log.
//! The count of suppressed events is reported on the next admitted line.

/// A token bucket. `interval_ms` is the refill period for one token;
/// `burst` bounds how many tokens can accumulate.
#[derive(Debug)]
pub struct RateLimit {
    interval_ms: u64,
    burst: u32,
    tokens: u32,
    last_fill_ms: u64,
    suppressed: u64,
}

/// One line per five seconds per call site, unless configured otherwise.
pub const DEFAULT_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_BURST: u32 = 1;

impl RateLimit {
    pub fn new(interval_ms: u64, burst: u32) -> RateLimit {
        RateLimit {
            interval_ms,
            burst,
            tokens: burst,
            last_fill_ms: 0,
            suppressed: 0,
        }
    }

    /// Returns `Some(previously_suppressed)` when the caller may log, and
    /// `None` when the event should be dropped.
    pub fn admit(&mut self, now_ms: u64) -> Option<u64> {
        if now_ms >= self.last_fill_ms {
            let refill = ((now_ms - self.last_fill_ms) / self.interval_ms) as u32;
            if refill > 0 {
                self.tokens = self.tokens.saturating_add(refill).min(self.burst);
                self.last_fill_ms = now_ms - (now_ms - self.last_fill_ms) % self.interval_ms;
            }
        } else {
            // Clock went backwards; start over rather than stall forever.
            self.last_fill_ms = now_ms;
        }
        if self.tokens > 0 {
            self.tokens -= 1;
            let suppressed = self.suppressed;
            self.suppressed = 0;
            Some(suppressed)
        } else {
            self.suppressed += 1;
            None
        }
    }
}

impl Default for RateLimit {
    fn default() -> RateLimit {
        RateLimit::new(DEFAULT_INTERVAL_MS, DEFAULT_BURST)
    }
}

/// Log a rate-limited warning, appending the suppressed-count when nonzero.
#[macro_export]
macro_rules! warn_rl {
    ($rl:expr, $now_ms:expr, $($arg:tt)*) => {
        if let Some(suppressed) = $rl.admit($now_ms) {
            if suppressed > 0 {
                log::warn!("{} ({} messages suppressed)", format!($($arg)*), suppressed);
            } else {
                log::warn!($($arg)*);
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_event_is_admitted() {
        let mut rl = RateLimit::default();
        assert_eq!(rl.admit(0), Some(0));
    }

    #[test]
    fn burst_exhaustion_suppresses() {
        let mut rl = RateLimit::new(5_000, 1);
        assert!(rl.admit(0).is_some());
        assert!(rl.admit(1).is_none());
        assert!(rl.admit(2).is_none());
        // After the interval the bucket refills and reports what was dropped.
        assert_eq!(rl.admit(5_000), Some(2));
    }

    #[test]
    fn tokens_cap_at_burst() {
        let mut rl = RateLimit::new(1_000, 2);
        assert!(rl.admit(10_000).is_some());
        assert!(rl.admit(10_000).is_some());
        assert!(rl.admit(10_000).is_none());
    }
}
