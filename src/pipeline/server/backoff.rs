//! Back-off applied when accepting a connection fails.

use std::time::Duration;

const FLOOR: Duration = Duration::from_millis(1);

/// Exponential back-off for accept errors.
///
/// The delay starts at `initial_delay`, doubles after every consecutive
/// failure, is capped at `max_delay` and resets once an accept succeeds.
/// Defaults are 10 ms and 1 s.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Delay used for the first retry after an accept failure.
    pub initial_delay: Duration,
    /// Upper bound for the delay.
    pub max_delay: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
        }
    }
}

impl BackoffConfig {
    /// Raise both delays to at least 1 ms and order them.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use wspipe::BackoffConfig;
    ///
    /// let cfg = BackoffConfig {
    ///     initial_delay: Duration::from_millis(5),
    ///     max_delay: Duration::ZERO,
    /// }
    /// .normalized();
    /// assert_eq!(cfg.initial_delay, Duration::from_millis(1));
    /// assert_eq!(cfg.max_delay, Duration::from_millis(5));
    /// ```
    #[must_use]
    pub fn normalized(self) -> Self {
        let a = self.initial_delay.max(FLOOR);
        let b = self.max_delay.max(FLOOR);
        Self {
            initial_delay: a.min(b),
            max_delay: a.max(b),
        }
    }

    /// Delay to use after a failure that followed a wait of `current`.
    #[must_use]
    pub fn next_delay(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(Duration::from_millis(10), Duration::from_millis(20))]
    #[case(Duration::from_millis(400), Duration::from_millis(800))]
    #[case(Duration::from_millis(600), Duration::from_secs(1))]
    #[case(Duration::from_secs(1), Duration::from_secs(1))]
    fn delay_doubles_up_to_cap(#[case] current: Duration, #[case] expected: Duration) {
        assert_eq!(BackoffConfig::default().next_delay(current), expected);
    }

    #[test]
    fn zero_delays_are_raised_to_floor() {
        let cfg = BackoffConfig {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
        .normalized();
        assert_eq!(cfg.initial_delay, FLOOR);
        assert_eq!(cfg.max_delay, FLOOR);
    }
}
