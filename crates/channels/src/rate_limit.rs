//! Token-bucket limiting for outbound REST sends.
//!
//! Discord scopes the create-message limit per channel, so each target channel
//! gets its own bucket. Callers `await` on `acquire()`: it returns immediately
//! when a token is available, or sleeps until the bucket refills.
//!
//! Callers pick the channel id, so buckets idle long enough to be full again
//! are swept; a full bucket and a missing one behave the same.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn full(capacity: u32) -> Self {
        Self {
            tokens: capacity as f64,
            last_refill: Instant::now(),
        }
    }

    /// Take one token, or return how long until one is available.
    fn try_consume(&mut self, capacity: u32, per_second: f64) -> Option<Duration> {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * per_second).min(capacity as f64);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            None
        } else {
            Some(Duration::try_from_secs_f64((1.0 - self.tokens) / per_second).unwrap_or(Duration::MAX))
        }
    }
}

struct Buckets {
    by_channel: HashMap<u64, Bucket>,
    last_sweep: Instant,
}

impl Buckets {
    /// Drop buckets untouched for `idle`. Runs at most once per `idle`.
    fn sweep(&mut self, now: Instant, idle: Duration) {
        if now.duration_since(self.last_sweep) < idle {
            return;
        }
        self.by_channel
            .retain(|_, bucket| now.duration_since(bucket.last_refill) < idle);
        self.last_sweep = now;
    }
}

pub struct ChannelRateLimiter {
    capacity: u32,
    per_second: f64,
    buckets: Mutex<Buckets>,
}

impl ChannelRateLimiter {
    /// * `capacity`   – burst size per channel
    /// * `per_second` – sustained rate per channel
    pub fn new(capacity: u32, per_second: f64) -> Self {
        Self {
            capacity: capacity.max(1),
            per_second: per_second.max(f64::MIN_POSITIVE),
            buckets: Mutex::new(Buckets {
                by_channel: HashMap::new(),
                last_sweep: Instant::now(),
            }),
        }
    }

    /// Time for an empty bucket to refill completely.
    fn refill_window(&self) -> Duration {
        Duration::try_from_secs_f64(self.capacity as f64 / self.per_second).unwrap_or(Duration::MAX)
    }

    /// 5 msg/s per channel, the create-message allowance.
    pub fn discord() -> Self {
        Self::new(5, 5.0)
    }

    pub async fn acquire(&self, channel_id: u64) {
        loop {
            let wait = {
                let mut buckets = self.buckets.lock().await;
                buckets.sweep(Instant::now(), self.refill_window());
                buckets
                    .by_channel
                    .entry(channel_id)
                    .or_insert_with(|| Bucket::full(self.capacity))
                    .try_consume(self.capacity, self.per_second)
            };
            match wait {
                None => return,
                Some(d) => tokio::time::sleep(d).await,
            }
        }
    }
}
