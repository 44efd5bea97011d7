//! Recurrence intervals for scheduled workers.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Unit in which an `Interval` length is expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    fn millis_per_unit(self) -> u64 {
        match self {
            Self::Milliseconds => 1,
            Self::Seconds => 1_000,
            Self::Minutes => 60_000,
            Self::Hours => 3_600_000,
            Self::Days => 86_400_000,
        }
    }

    /// Duration of `length` units.
    #[must_use]
    pub fn duration(self, length: u64) -> Duration {
        Duration::from_millis(length.saturating_mul(self.millis_per_unit()))
    }

    /// Drops the part of `duration` that is not a whole number of units.
    #[must_use]
    pub fn truncate(self, duration: Duration) -> Duration {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        self.duration(millis / self.millis_per_unit())
    }
}

/// Gap between the end of one execution and the start of the next.
///
/// A `length` of 0 means the worker runs continuously, with no gap at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Interval {
    pub length: u64,
    pub unit: TimeUnit,
}

impl Interval {
    #[must_use]
    pub fn new(length: u64, unit: TimeUnit) -> Self {
        Self { length, unit }
    }

    #[must_use]
    pub fn seconds(length: u64) -> Self {
        Self::new(length, TimeUnit::Seconds)
    }

    /// Interval for workers that are re-run back-to-back.
    #[must_use]
    pub fn continuous() -> Self {
        Self::new(0, TimeUnit::Seconds)
    }

    #[must_use]
    pub fn is_continuous(&self) -> bool {
        self.length == 0
    }

    #[must_use]
    pub fn duration(&self) -> Duration {
        self.unit.duration(self.length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_per_unit() {
        assert_eq!(TimeUnit::Milliseconds.duration(250), Duration::from_millis(250));
        assert_eq!(TimeUnit::Minutes.duration(2), Duration::from_secs(120));
        assert_eq!(Interval::new(1, TimeUnit::Days).duration(), Duration::from_secs(86_400));
    }

    #[test]
    fn truncate_keeps_whole_units_only() {
        assert_eq!(
            TimeUnit::Seconds.truncate(Duration::from_millis(2_999)),
            Duration::from_secs(2)
        );
        assert_eq!(TimeUnit::Minutes.truncate(Duration::from_secs(59)), Duration::ZERO);
        assert_eq!(
            TimeUnit::Milliseconds.truncate(Duration::from_millis(7)),
            Duration::from_millis(7)
        );
    }

    #[test]
    fn zero_length_is_continuous() {
        assert!(Interval::continuous().is_continuous());
        assert!(!Interval::seconds(5).is_continuous());
    }

    #[test]
    fn interval_json_shape() {
        let interval: Interval =
            serde_json::from_str(r#"{ "length": 30, "unit": "minutes" }"#).unwrap();
        assert_eq!(interval, Interval::new(30, TimeUnit::Minutes));
    }
}
