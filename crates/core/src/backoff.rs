use chrono::Duration;

/// Retry delay schedule for transient transport failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base_delay_secs: i64,
    pub max_delay_secs: i64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self { base_delay_secs: 30, max_delay_secs: 3600 }
    }
}

impl BackoffPolicy {
    /// Delay before the next attempt, given how many attempts have already
    /// happened: `base * 2^attempts`, capped.
    pub fn delay_after(&self, attempts: u32) -> Duration {
        let exponent = attempts.min(30);
        let raw = self.base_delay_secs.saturating_mul(1i64 << exponent);
        Duration::seconds(raw.min(self.max_delay_secs))
    }
}
