use std::time::Duration;

/// Backoff schedule for transient disconnects.
///
/// Attempts are counted from 1 and reset once a connection opens.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            max_attempts: Some(10),
        }
    }
}

impl ReconnectPolicy {
    /// Same delay every time, no cap on attempts.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            multiplier: 1.0,
            max_delay: delay,
            max_attempts: None,
        }
    }

    pub fn allows(&self, attempt: u32) -> bool {
        attempt >= 1 && self.max_attempts.is_none_or(|max| attempt <= max)
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        let secs = (self.initial_delay.as_secs_f64() * factor).min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(secs.max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_grow_and_cap() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay(1), Duration::from_secs(1));
        assert_eq!(policy.delay(2), Duration::from_secs(2));
        assert_eq!(policy.delay(4), Duration::from_secs(8));
        assert_eq!(policy.delay(7), Duration::from_secs(60));
        assert_eq!(policy.delay(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn delays_never_decrease() {
        let policy = ReconnectPolicy {
            initial_delay: Duration::from_millis(300),
            multiplier: 1.7,
            max_delay: Duration::from_secs(20),
            max_attempts: None,
        };

        let mut last = Duration::ZERO;
        for attempt in 1..200 {
            let delay = policy.delay(attempt);
            assert!(delay >= last);
            assert!(delay <= policy.max_delay);
            last = delay;
        }
    }

    #[test]
    fn attempts_beyond_cap_are_refused() {
        let policy = ReconnectPolicy::default();
        assert!(!policy.allows(0));
        assert!(policy.allows(1));
        assert!(policy.allows(10));
        assert!(!policy.allows(11));
    }

    #[test]
    fn fixed_policy_is_uncapped() {
        let policy = ReconnectPolicy::fixed(Duration::from_secs(1));
        assert!(policy.allows(10_000));
        assert_eq!(policy.delay(50), Duration::from_secs(1));
    }
}
