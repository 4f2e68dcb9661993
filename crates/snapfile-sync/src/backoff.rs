use std::time::Duration;

/// Exponential reconnect delay: `base * 2^attempt`, abandoned at `ceiling`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    ceiling: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            ceiling: Duration::from_secs(60),
        }
    }
}

impl Backoff {
    pub fn new(base: Duration, ceiling: Duration) -> Self {
        Self { base, ceiling }
    }

    /// Delay before reconnect attempt number `attempt` (0-based), or `None`
    /// once the delay would reach the ceiling.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        let factor = 2u32.checked_pow(attempt)?;
        let delay = self.base.checked_mul(factor)?;
        (delay < self.ceiling).then_some(delay)
    }
}
