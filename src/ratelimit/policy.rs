//! Rate limit policy: how many requests a window admits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::limiter::{Decision, LimiterError};

/// Time unit for configured windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
    Day,
}

impl TimeUnit {
    /// Get the duration of this time unit.
    pub fn duration(&self) -> Duration {
        match self {
            TimeUnit::Second => Duration::from_secs(1),
            TimeUnit::Minute => Duration::from_secs(60),
            TimeUnit::Hour => Duration::from_secs(3600),
            TimeUnit::Day => Duration::from_secs(86400),
        }
    }
}

/// Threshold and window of a fixed-window limit.
///
/// `threshold` is the number of requests allowed per window; a count equal to
/// it is still allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    threshold: u64,
    window: Duration,
}

impl Policy {
    /// Create a policy, rejecting a zero threshold or an empty window.
    pub fn new(threshold: u64, window: Duration) -> Result<Self, LimiterError> {
        if threshold == 0 {
            return Err(LimiterError::InvalidPolicy(
                "threshold must be a positive integer".to_string(),
            ));
        }
        // Stores expire keys at millisecond granularity at best.
        if window < Duration::from_millis(1) {
            return Err(LimiterError::InvalidPolicy(format!(
                "window must be at least 1ms, got {:?}",
                window
            )));
        }
        Ok(Self { threshold, window })
    }

    /// `requests` per one `unit`.
    pub fn per_unit(requests: u64, unit: TimeUnit) -> Result<Self, LimiterError> {
        Self::new(requests, unit.duration())
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Whether `count` requests in one window exceed this policy.
    pub fn is_exceeded(&self, count: u64) -> bool {
        count > self.threshold
    }

    /// Build the decision for a freshly incremented count.
    pub fn decide(&self, count: u64) -> Decision {
        Decision {
            current_count: count,
            exceeded: self.is_exceeded(count),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_unit_duration() {
        assert_eq!(TimeUnit::Second.duration(), Duration::from_secs(1));
        assert_eq!(TimeUnit::Minute.duration(), Duration::from_secs(60));
        assert_eq!(TimeUnit::Hour.duration(), Duration::from_secs(3600));
        assert_eq!(TimeUnit::Day.duration(), Duration::from_secs(86400));
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let policy = Policy::per_unit(3, TimeUnit::Minute).unwrap();

        assert!(!policy.is_exceeded(1));
        assert!(!policy.is_exceeded(3));
        assert!(policy.is_exceeded(4));
    }

    #[test]
    fn test_decide() {
        let policy = Policy::new(2, Duration::from_secs(10)).unwrap();

        assert_eq!(
            policy.decide(2),
            Decision {
                current_count: 2,
                exceeded: false
            }
        );
        assert!(policy.decide(3).exceeded);
    }

    #[test]
    fn test_rejects_zero_threshold() {
        let err = Policy::new(0, Duration::from_secs(60)).unwrap_err();
        assert!(matches!(err, LimiterError::InvalidPolicy(_)));
    }

    #[test]
    fn test_rejects_empty_window() {
        assert!(Policy::new(5, Duration::ZERO).is_err());
        assert!(Policy::new(5, Duration::from_micros(999)).is_err());
        assert!(Policy::new(5, Duration::from_millis(1)).is_ok());
    }

    #[test]
    fn test_time_unit_deserializes_lowercase() {
        let unit: TimeUnit = serde_yaml::from_str("minute").unwrap();
        assert_eq!(unit, TimeUnit::Minute);
    }
}
