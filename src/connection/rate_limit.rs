//! Sliding-window admission control over incoming frames.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::RateLimit;
use crate::error::{Error, Result};

/// Upper bound on the window preallocation.
const PREALLOCATED: usize = 64;

/// Remembers the arrival time of the last `burst` frames and refuses a new
/// one if those frames arrived faster than `delay` apart on average.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    limit: RateLimit,
    timestamps: VecDeque<Instant>,
}

impl RateLimiter {
    pub fn new(limit: RateLimit) -> Self {
        Self {
            limit,
            timestamps: VecDeque::with_capacity(limit.burst.min(PREALLOCATED)),
        }
    }

    /// Admit a frame received at `now`.
    ///
    /// # Errors
    ///
    /// Returns `Error::RateLimitExceeded` if the window is full and its
    /// oldest entry is more recent than `burst * delay`. A refused frame is
    /// not recorded.
    pub fn check(&mut self, now: Instant) -> Result<()> {
        let burst = self.limit.burst;
        if burst == 0 {
            return Ok(());
        }
        if self.timestamps.len() >= burst {
            if let Some(&oldest) = self.timestamps.front() {
                if now.saturating_duration_since(oldest) < self.window() {
                    return Err(Error::RateLimitExceeded);
                }
            }
            self.timestamps.pop_front();
        }
        self.timestamps.push_back(now);
        Ok(())
    }

    /// Span the last `burst` frames must cover, `burst * delay`.
    fn window(&self) -> Duration {
        u32::try_from(self.limit.burst)
            .map_or(Duration::MAX, |burst| self.limit.delay.saturating_mul(burst))
    }
}
