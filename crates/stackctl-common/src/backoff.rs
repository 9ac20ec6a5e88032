//! Additive-increase / multiplicative-decrease poll interval
//!
//! Long-running poll loops keep one [`Aimd`] each. A throttled request
//! multiplies the wait; every successful request shaves a fixed amount off
//! it, so the interval drifts back toward the minimum once the API calms down.

use std::time::Duration;

use crate::defaults::{DEFAULT_MAX_POLL_MULTIPLE, DEFAULT_MIN_POLL_INTERVAL, DEFAULT_MULTIPLY_ON_ERROR};

/// Tuning for an [`Aimd`] controller.
///
/// Zero-valued fields fall back to their defaults: `min` = 1s,
/// `max` = 128 × `min`, `multiply_on_error` = 2, `subtract_on_success` = `min / 4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AimdConfig {
    pub min: Duration,
    pub max: Duration,
    pub multiply_on_error: u32,
    pub subtract_on_success: Duration,
}

impl AimdConfig {
    /// Config with the given lower bound and every other field derived from it
    pub fn with_min(min: Duration) -> Self {
        Self {
            min,
            ..Self::default()
        }
    }

    fn min(&self) -> Duration {
        if self.min.is_zero() {
            DEFAULT_MIN_POLL_INTERVAL
        } else {
            self.min
        }
    }

    fn max(&self) -> Duration {
        if self.max.is_zero() {
            self.min().saturating_mul(DEFAULT_MAX_POLL_MULTIPLE)
        } else {
            // A max below min would make the clamp ambiguous
            self.max.max(self.min())
        }
    }

    fn multiply_on_error(&self) -> u32 {
        if self.multiply_on_error == 0 {
            DEFAULT_MULTIPLY_ON_ERROR
        } else {
            self.multiply_on_error
        }
    }

    fn subtract_on_success(&self) -> Duration {
        if self.subtract_on_success.is_zero() {
            self.min() / 4
        } else {
            self.subtract_on_success
        }
    }
}

/// Poll-interval controller. Not shared between loops.
#[derive(Debug, Clone)]
pub struct Aimd {
    config: AimdConfig,
    current: Duration,
}

impl Default for Aimd {
    fn default() -> Self {
        Self::new(AimdConfig::default())
    }
}

impl Aimd {
    pub fn new(config: AimdConfig) -> Self {
        Self {
            current: config.min(),
            config,
        }
    }

    /// The interval to wait before the next request
    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn min(&self) -> Duration {
        self.config.min()
    }

    pub fn max(&self) -> Duration {
        self.config.max()
    }

    /// Record a throttled request
    pub fn on_error(&mut self) {
        self.current = self
            .current
            .saturating_mul(self.config.multiply_on_error());
        self.clamp();
    }

    /// Record a successful request
    pub fn on_success(&mut self) {
        self.current = self
            .current
            .saturating_sub(self.config.subtract_on_success());
        self.clamp();
    }

    fn clamp(&mut self) {
        self.current = self.current.clamp(self.config.min(), self.config.max());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_min() {
        let aimd = Aimd::default();
        assert_eq!(aimd.current(), Duration::from_secs(1));
        assert_eq!(aimd.max(), Duration::from_secs(128));
    }

    #[test]
    fn zero_config_uses_defaults() {
        let aimd = Aimd::new(AimdConfig::with_min(Duration::from_millis(200)));
        assert_eq!(aimd.current(), Duration::from_millis(200));
        assert_eq!(aimd.max(), Duration::from_millis(200 * 128));
    }

    #[test]
    fn error_doubles_and_success_subtracts_quarter_min() {
        let mut aimd = Aimd::default();
        aimd.on_error();
        assert_eq!(aimd.current(), Duration::from_secs(2));
        aimd.on_error();
        assert_eq!(aimd.current(), Duration::from_secs(4));
        aimd.on_success();
        assert_eq!(aimd.current(), Duration::from_millis(3750));
    }

    #[test]
    fn clamps_at_max() {
        let mut aimd = Aimd::new(AimdConfig {
            min: Duration::from_secs(1),
            max: Duration::from_secs(5),
            ..Default::default()
        });
        for _ in 0..10 {
            aimd.on_error();
        }
        assert_eq!(aimd.current(), Duration::from_secs(5));
    }

    #[test]
    fn success_never_goes_below_min() {
        let mut aimd = Aimd::default();
        for _ in 0..10 {
            aimd.on_success();
        }
        assert_eq!(aimd.current(), aimd.min());
    }

    #[test]
    fn max_below_min_is_raised_to_min() {
        let aimd = Aimd::new(AimdConfig {
            min: Duration::from_secs(3),
            max: Duration::from_secs(1),
            ..Default::default()
        });
        assert_eq!(aimd.max(), Duration::from_secs(3));
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn consecutive_errors_follow_geometric_growth(
                min_ms in 1u64..5_000,
                multiplier in 2u32..5,
                n in 0u32..20,
            ) {
                let config = AimdConfig {
                    min: Duration::from_millis(min_ms),
                    multiply_on_error: multiplier,
                    ..Default::default()
                };
                let mut aimd = Aimd::new(config);
                for _ in 0..n {
                    aimd.on_error();
                }

                let min = Duration::from_millis(min_ms);
                let max = min * 128;
                let mut expected = min;
                for _ in 0..n {
                    expected = expected.saturating_mul(multiplier).min(max);
                }
                prop_assert_eq!(aimd.current(), expected.clamp(min, max));
            }

            #[test]
            fn interval_stays_within_bounds(ops in proptest::collection::vec(any::<bool>(), 0..200)) {
                let mut aimd = Aimd::default();
                for is_error in ops {
                    if is_error {
                        aimd.on_error();
                    } else {
                        aimd.on_success();
                    }
                    prop_assert!(aimd.current() >= aimd.min());
                    prop_assert!(aimd.current() <= aimd.max());
                }
            }
        }
    }
}
