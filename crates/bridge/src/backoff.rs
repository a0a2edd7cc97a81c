use rand::Rng;
use relaycell_core::config::SupervisorConfig;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
    /// Fraction of the current step added as random delay, in [0, 1].
    pub jitter: f64,
    /// A session must stay up this long before the next outage starts from `base` again.
    pub stable_after: Duration,
}

impl BackoffPolicy {
    pub fn new(base: Duration, cap: Duration, jitter: f64) -> Self {
        Self {
            base,
            cap: cap.max(base),
            jitter: if jitter.is_finite() { jitter.clamp(0.0, 1.0) } else { 0.0 },
            stable_after: cap.max(base),
        }
    }

    pub fn with_stable_after(mut self, stable_after: Duration) -> Self {
        self.stable_after = stable_after;
        self
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from(&SupervisorConfig::default())
    }
}

impl From<&SupervisorConfig> for BackoffPolicy {
    fn from(config: &SupervisorConfig) -> Self {
        Self::new(
            Duration::from_millis(config.backoff_base_ms),
            Duration::from_millis(config.backoff_cap_ms),
            config.jitter,
        )
        .with_stable_after(Duration::from_millis(config.stable_after_ms))
    }
}

/// Exponential backoff with bounded jitter.
///
/// Delays within one outage never decrease: the jitter on a step is at most
/// the step itself, and the next step is double, so step `n + 1` is always at
/// least the jittered step `n`. Everything is clamped to `cap`.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    attempt: u32,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    pub fn next_delay(&mut self) -> Duration {
        let step = self.step(self.attempt);
        self.attempt = self.attempt.saturating_add(1);

        let jitter = if self.policy.jitter > 0.0 {
            let max_extra = step.as_secs_f64() * self.policy.jitter;
            Duration::from_secs_f64(rand::rng().random_range(0.0..=max_extra))
        } else {
            Duration::ZERO
        };
        (step + jitter).min(self.policy.cap)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    fn step(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(31));
        self.policy
            .base
            .checked_mul(factor)
            .unwrap_or(self.policy.cap)
            .min(self.policy.cap)
    }
}
