use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::warn;

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Local token bucket guarding the venue's rate limit (default 60 req/min).
/// Every exchange round-trip acquires one token; callers block until one is
/// available rather than getting banned.
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(requests_per_minute: u32) -> Self {
        let capacity = requests_per_minute as f64;
        Self {
            capacity,
            refill_per_sec: capacity / 60.0,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let elapsed = state.last_refill.elapsed().as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
                state.last_refill = Instant::now();

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }
                let deficit = 1.0 - state.tokens;
                Duration::from_secs_f64(deficit / self.refill_per_sec)
            };

            warn!(
                "TokenBucket: venue rate limit reached, waiting {}ms",
                wait.as_millis()
            );
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn grants_up_to_capacity_immediately() {
        let bucket = TokenBucket::new(60);
        let started = Instant::now();
        for _ in 0..60 {
            bucket.acquire().await;
        }
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn blocks_when_exhausted() {
        let bucket = TokenBucket::new(60);
        for _ in 0..60 {
            bucket.acquire().await;
        }
        let started = Instant::now();
        bucket.acquire().await;
        // One token refills in one second at 60/min.
        assert!(started.elapsed() >= Duration::from_millis(900));
    }
}
