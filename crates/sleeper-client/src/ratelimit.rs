use std::time::Duration;

use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound of the additive jitter as a fraction of the capped delay.
    pub jitter_ratio: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(8),
            jitter_ratio: 0.2,
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }

    pub fn jittered_delay(&self, attempt_index: usize) -> Duration {
        let delay = self.delay_for_attempt(attempt_index);
        let ceiling = delay.mul_f64(self.jitter_ratio.clamp(0.0, 1.0));
        if ceiling.is_zero() {
            return delay;
        }
        let extra_ms = rand::thread_rng().gen_range(0..=ceiling.as_millis() as u64);
        delay + Duration::from_millis(extra_ms)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TokenBucketConfig {
    pub capacity: u32,
    pub refill_every: Duration,
}

impl Default for TokenBucketConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            refill_every: Duration::from_millis(100),
        }
    }
}

/// Process-wide request budget: `capacity` tokens, one added per `refill_every`.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: u32,
    refill_every: Duration,
    state: Mutex<BucketState>,
}

#[derive(Debug, Clone, Copy)]
struct BucketState {
    tokens: u32,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(config: TokenBucketConfig) -> Self {
        Self {
            capacity: config.capacity.max(1),
            refill_every: config.refill_every,
            state: Mutex::new(BucketState {
                tokens: config.capacity.max(1),
                last_refill: Instant::now(),
            }),
        }
    }

    pub async fn take(&self) {
        loop {
            let mut state = self.state.lock().await;
            let period = self.refill_every.as_millis();
            if period > 0 {
                let elapsed = state.last_refill.elapsed();
                let refills = elapsed.as_millis() / period;
                if refills > 0 {
                    let added = u32::try_from(refills).unwrap_or(u32::MAX);
                    state.tokens = state.tokens.saturating_add(added).min(self.capacity);
                    state.last_refill += self.refill_every.saturating_mul(added);
                    if state.tokens == self.capacity {
                        state.last_refill = Instant::now();
                    }
                }
            } else {
                state.tokens = self.capacity;
            }

            if state.tokens > 0 {
                state.tokens -= 1;
                return;
            }

            let wait = (state.last_refill + self.refill_every).saturating_duration_since(Instant::now());
            drop(state);
            tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_exponential_and_capped() {
        let policy = BackoffPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            jitter_ratio: 0.0,
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.jittered_delay(5), Duration::from_millis(350));
    }

    #[test]
    fn jitter_stays_within_bound() {
        let policy = BackoffPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            jitter_ratio: 0.5,
        };
        for _ in 0..50 {
            let delay = policy.jittered_delay(1);
            assert!(delay >= Duration::from_millis(200));
            assert!(delay <= Duration::from_millis(300));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn empty_bucket_waits_for_refill() {
        let bucket = TokenBucket::new(TokenBucketConfig {
            capacity: 2,
            refill_every: Duration::from_millis(100),
        });
        let started = Instant::now();
        bucket.take().await;
        bucket.take().await;
        assert!(started.elapsed() < Duration::from_millis(1));

        bucket.take().await;
        assert!(started.elapsed() >= Duration::from_millis(100));
    }
}
