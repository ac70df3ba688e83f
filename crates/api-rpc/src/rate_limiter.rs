//! Rate Limiter (Token Bucket)
//!
//! Caps enqueue throughput per daemon. Token count and last-refill time are
//! packed into one atomic word so the hot path is a lock-free CAS loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

pub struct RateLimiter {
    // Upper 32 bits: tokens. Lower 32 bits: last refill, in milliseconds
    // since `creation_time`.
    packed: AtomicU64,
    creation_time: Instant,
    max_tokens: u32,
    refill_rate: u32, // tokens per second
}

impl RateLimiter {
    /// `max_tokens` is the burst ceiling, `refill_rate` the sustained
    /// tokens per second.
    pub fn new(max_tokens: u32, refill_rate: u32) -> Self {
        Self {
            packed: AtomicU64::new((max_tokens as u64) << 32),
            creation_time: Instant::now(),
            max_tokens,
            refill_rate,
        }
    }

    /// Consume one token. Returns false when the bucket is empty.
    pub fn check(&self) -> bool {
        loop {
            let packed = self.packed.load(Ordering::Acquire);
            let tokens = (packed >> 32) as u32;
            let last_refill_ms = (packed & 0xFFFF_FFFF) as u32;

            let elapsed_ms = Instant::now()
                .duration_since(self.creation_time)
                .as_millis() as u32;
            let delta_ms = elapsed_ms.saturating_sub(last_refill_ms);

            let tokens_to_add = (delta_ms as u64 * self.refill_rate as u64) / 1000;
            let new_tokens =
                ((tokens as u64 + tokens_to_add).min(self.max_tokens as u64)) as u32;

            if new_tokens >= 1 {
                let new_packed = (((new_tokens - 1) as u64) << 32) | (elapsed_ms as u64);
                match self.packed.compare_exchange(
                    packed,
                    new_packed,
                    Ordering::Release,
                    Ordering::Acquire,
                ) {
                    Ok(_) => return true,
                    Err(_) => continue, // lost the race, retry
                }
            } else {
                // empty; still advance the refill timestamp
                let new_packed = ((new_tokens as u64) << 32) | (elapsed_ms as u64);
                let _ = self.packed.compare_exchange(
                    packed,
                    new_packed,
                    Ordering::Release,
                    Ordering::Acquire,
                );
                return false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_allows_up_to_burst() {
        let limiter = RateLimiter::new(10, 10);

        for _ in 0..10 {
            assert!(limiter.check());
        }
        assert!(!limiter.check());
    }

    #[test]
    fn test_refills_over_time() {
        let limiter = RateLimiter::new(5, 10); // 10 tokens/sec

        for _ in 0..5 {
            assert!(limiter.check());
        }
        assert!(!limiter.check());

        std::thread::sleep(Duration::from_millis(1100));
        assert!(limiter.check());
    }

    #[test]
    fn test_concurrent_consumers_respect_burst() {
        use std::sync::Arc;

        let limiter = Arc::new(RateLimiter::new(100, 50));
        let mut handles = vec![];
        for _ in 0..10 {
            let limiter = Arc::clone(&limiter);
            handles.push(std::thread::spawn(move || {
                let mut allowed = 0;
                for _ in 0..20 {
                    if limiter.check() {
                        allowed += 1;
                    }
                }
                allowed
            }));
        }

        let total: u32 = handles.into_iter().map(|h| h.join().unwrap()).sum();

        // 200 attempts against a burst of 100; a handful of refills may
        // land while the threads run
        assert!(total <= 110, "expected at most ~100 allowed, got {total}");
        assert!(total >= 90, "expected at least 90 allowed, got {total}");
    }
}
