use std::num::NonZeroU32;

use governor::{
    Quota,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};

use crate::config::EngineConfig;

type DirectLimiter = governor::RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

const DEFAULT_PER_MINUTE: NonZeroU32 = NonZeroU32::new(60).unwrap();

/// Token bucket guarding calls to the embedding model.
pub struct RateLimiter {
    limiter: DirectLimiter,
    per_minute: NonZeroU32,
    burst: NonZeroU32,
}

impl RateLimiter {
    /// `per_minute` sustained requests with up to `burst` at once.
    /// Zero values fall back to 60/min and a burst of 1.
    pub fn new(per_minute: u32, burst: u32) -> Self {
        let per_minute = NonZeroU32::new(per_minute).unwrap_or(DEFAULT_PER_MINUTE);
        let burst = NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::per_minute(per_minute).allow_burst(burst);
        Self {
            limiter: DirectLimiter::direct(quota),
            per_minute,
            burst,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.embedding_requests_per_minute, config.embedding_burst)
    }

    /// Take one token if available
    pub fn try_acquire(&self) -> bool {
        self.limiter.check().is_ok()
    }

    pub fn per_minute(&self) -> u32 {
        self.per_minute.get()
    }

    pub fn burst(&self) -> u32 {
        self.burst.get()
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("per_minute", &self.per_minute)
            .field("burst", &self.burst)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_then_throttled() {
        let limiter = RateLimiter::new(1, 3);
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn test_zero_values_fall_back() {
        let limiter = RateLimiter::new(0, 0);
        assert_eq!(limiter.per_minute(), 60);
        assert_eq!(limiter.burst(), 1);
    }
}
