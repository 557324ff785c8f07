//! Token bucket throttle for KIS API requests.
//!
//! KIS enforces a per-second request quota per app key (roughly 20/s on the
//! live endpoint, far less on the mock one). Requests from all scan workers
//! share one bucket so the quota is respected before the server complains.

use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::trace;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Shared request throttle.
///
/// Holds up to `capacity` tokens and refills at `capacity` tokens per second.
#[derive(Debug)]
pub struct RequestThrottle {
    capacity: f64,
    refill_per_sec: f64,
    bucket: Mutex<Bucket>,
    name: String,
}

impl RequestThrottle {
    /// Create a throttle allowing `requests_per_second` sustained requests.
    pub fn new(name: impl Into<String>, requests_per_second: u32) -> Self {
        let capacity = requests_per_second.max(1) as f64;
        Self {
            capacity,
            refill_per_sec: capacity,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            name: name.into(),
        }
    }

    fn refill(&self, bucket: &mut Bucket, now: Instant) {
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
            bucket.last_refill = now;
        }
    }

    /// Take a token, or report how long until one is available.
    async fn take(&self) -> Result<(), Duration> {
        let mut bucket = self.bucket.lock().await;
        self.refill(&mut bucket, Instant::now());
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return Ok(());
        }
        let missing = 1.0 - bucket.tokens;
        Err(Duration::from_secs_f64(missing / self.refill_per_sec))
    }

    /// Wait until a token is available and take it.
    pub async fn acquire(&self) {
        while let Err(wait) = self.take().await {
            trace!(
                throttle = %self.name,
                wait_ms = wait.as_millis() as u64,
                "Request budget exhausted, waiting"
            );
            tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
        }
    }
}
