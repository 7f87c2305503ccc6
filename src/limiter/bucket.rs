//! Token bucket handed to a connection for byte-rate limiting

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::fmt;
use std::num::NonZeroU32;

/// A token bucket of `rate` tokens per second with a burst of `rate`
///
/// One token is one byte.
pub struct TokenBucket {
    limiter: DefaultDirectRateLimiter,
    rate: NonZeroU32,
}

impl TokenBucket {
    pub fn new(rate: NonZeroU32) -> Self {
        Self {
            limiter: RateLimiter::direct(Quota::per_second(rate).allow_burst(rate)),
            rate,
        }
    }

    /// Build a bucket from a bytes/sec ceiling; 0 means unlimited
    pub fn from_rate(rate: u64) -> Option<Self> {
        let clamped = u32::try_from(rate).unwrap_or(u32::MAX);
        NonZeroU32::new(clamped).map(Self::new)
    }

    pub fn rate(&self) -> u32 {
        self.rate.get()
    }

    /// Largest number of tokens a single acquisition can take
    pub fn burst(&self) -> u32 {
        self.rate.get()
    }

    /// Take `n` tokens if they are available right now
    pub fn try_acquire(&self, n: u32) -> bool {
        match NonZeroU32::new(n) {
            None => true,
            Some(n) => matches!(self.limiter.check_n(n), Ok(Ok(()))),
        }
    }

    /// Wait until `n` tokens have been taken
    ///
    /// Requests above the burst are served in burst-sized chunks.
    pub async fn acquire(&self, n: usize) {
        let mut remaining = n;
        while remaining > 0 {
            let chunk = remaining.min(self.rate.get() as usize);
            let Some(tokens) = u32::try_from(chunk).ok().and_then(NonZeroU32::new) else {
                return;
            };
            if self.limiter.until_n_ready(tokens).await.is_err() {
                return;
            }
            remaining -= chunk;
        }
    }
}

impl fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenBucket").field("rate", &self.rate).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn test_zero_rate_is_unlimited() {
        assert!(TokenBucket::from_rate(0).is_none());
    }

    #[test]
    fn test_rate_is_clamped() {
        let bucket = TokenBucket::from_rate(u64::MAX).unwrap();
        assert_eq!(bucket.rate(), u32::MAX);
    }

    #[test]
    fn test_burst_is_available_immediately() {
        let bucket = TokenBucket::from_rate(10).unwrap();
        for _ in 0..10 {
            assert!(bucket.try_acquire(1));
        }
        assert!(!bucket.try_acquire(1));
    }

    #[test]
    fn test_request_above_burst_is_rejected_without_waiting() {
        let bucket = TokenBucket::from_rate(10).unwrap();
        assert!(!bucket.try_acquire(11));
        assert!(bucket.try_acquire(10));
    }

    #[tokio::test]
    async fn test_acquire_replenishes_at_rate() {
        let bucket = TokenBucket::from_rate(100).unwrap();
        let start = Instant::now();
        bucket.acquire(100).await;
        assert!(start.elapsed() < Duration::from_millis(100));

        bucket.acquire(50).await;
        assert!(start.elapsed() >= Duration::from_millis(400));
    }
}
