use std::time::Duration;

/// Retry pacing for temporary remote failures inside a single task.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    delay: Duration,
    max: Duration,
    limit: Option<u32>,
}

impl Backoff {
    /// Same delay before every attempt, never giving up.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            delay,
            max: delay,
            limit: None,
        }
    }

    /// Caps the number of retries; `0` keeps retrying forever.
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = (limit > 0).then_some(limit);
        self
    }

    /// Upper bound applied to server supplied `Retry-After` hints.
    pub fn with_max(mut self, max: Duration) -> Self {
        self.max = max.max(self.delay);
        self
    }

    /// Whether retry number `attempt` (starting at 1) may run.
    pub fn allows(&self, attempt: u32) -> bool {
        self.limit.is_none_or(|limit| attempt <= limit)
    }

    pub fn delay(&self, retry_after: Option<Duration>) -> Duration {
        match retry_after {
            Some(hint) => hint.clamp(self.delay, self.max),
            None => self.delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_backoff_is_unbounded_by_default() {
        let backoff = Backoff::fixed(Duration::from_millis(3000));
        assert!(backoff.allows(1));
        assert!(backoff.allows(10_000));
        assert_eq!(backoff.delay(None), Duration::from_millis(3000));
    }

    #[test]
    fn limit_stops_after_configured_retries() {
        let backoff = Backoff::fixed(Duration::from_millis(10)).with_limit(2);
        assert!(backoff.allows(1));
        assert!(backoff.allows(2));
        assert!(!backoff.allows(3));

        let unbounded = Backoff::fixed(Duration::from_millis(10)).with_limit(0);
        assert!(unbounded.allows(99));
    }

    #[test]
    fn retry_after_hint_is_clamped() {
        let backoff = Backoff::fixed(Duration::from_millis(100)).with_max(Duration::from_secs(5));
        assert_eq!(
            backoff.delay(Some(Duration::from_secs(2))),
            Duration::from_secs(2)
        );
        assert_eq!(
            backoff.delay(Some(Duration::from_secs(60))),
            Duration::from_secs(5)
        );
        assert_eq!(
            backoff.delay(Some(Duration::ZERO)),
            Duration::from_millis(100)
        );
    }
}
