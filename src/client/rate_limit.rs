use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Requests per minute without a token
pub const UNAUTHENTICATED_PER_MINUTE: u32 = 5;
/// Requests per minute with a token
pub const AUTHENTICATED_PER_MINUTE: u32 = 20;

/// Token bucket shared by every request of one client.
///
/// Waiters queue on the bucket's mutex, so permits are granted in arrival order.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: f64,
    per_second: f64,
    bucket: Mutex<Bucket>,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    refilled_at: Instant,
}

impl RateLimiter {
    /// Bucket of `capacity` tokens refilled at `per_second`
    pub fn new(capacity: u32, per_second: f64) -> Self {
        let capacity = f64::from(capacity.max(1));
        Self {
            capacity,
            per_second: per_second.max(f64::MIN_POSITIVE),
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                refilled_at: Instant::now(),
            }),
        }
    }

    /// `n` requests per minute with bursts of up to `n`
    pub fn per_minute(n: u32) -> Self {
        Self::new(n, f64::from(n.max(1)) / 60.0)
    }

    /// Default limiter for a client with or without a token
    pub fn for_auth(authenticated: bool) -> Self {
        Self::per_minute(if authenticated {
            AUTHENTICATED_PER_MINUTE
        } else {
            UNAUTHENTICATED_PER_MINUTE
        })
    }

    /// Wait until one request may be made
    pub async fn acquire(&self) {
        let mut bucket = self.bucket.lock().await;
        self.refill(&mut bucket);

        if bucket.tokens < 1.0 {
            let wait = Duration::from_secs_f64((1.0 - bucket.tokens) / self.per_second);
            tracing::debug!(wait_ms = wait.as_millis() as u64, "rate limited");
            tokio::time::sleep(wait).await;
            self.refill(&mut bucket);
        }
        bucket.tokens = (bucket.tokens - 1.0).max(0.0);
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.refilled_at).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.per_second).min(self.capacity);
        bucket.refilled_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_wait() {
        let limiter = RateLimiter::per_minute(2);
        let start = Instant::now();

        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(1));

        limiter.acquire().await;
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(29), "waited {:?}", waited);
        assert!(waited <= Duration::from_secs(31), "waited {:?}", waited);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refills_over_time() {
        let limiter = RateLimiter::per_minute(5);
        for _ in 0..5 {
            limiter.acquire().await;
        }
        tokio::time::sleep(Duration::from_secs(60)).await;

        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_waiters_are_spaced() {
        let limiter = Arc::new(RateLimiter::per_minute(1));
        let start = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..3 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                limiter.acquire().await;
                Instant::now()
            }));
        }
        let mut times = Vec::new();
        for handle in handles {
            times.push(handle.await.unwrap().duration_since(start));
        }
        times.sort();

        assert!(times[0] < Duration::from_secs(1));
        assert!(times[1] >= Duration::from_secs(59));
        assert!(times[2] >= Duration::from_secs(119));
    }

    #[test]
    fn test_auth_selects_limit() {
        assert_eq!(RateLimiter::for_auth(false).capacity, 5.0);
        assert_eq!(RateLimiter::for_auth(true).capacity, 20.0);
    }
}
