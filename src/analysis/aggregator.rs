//! Time-windowed aggregation of logger readings.
//!
//! This module turns a raw reading set, an entity group and a window
//! policy into an ordered sequence of per-bucket statistics. It is a pure
//! transform: no I/O, no logging, no state kept between calls.

use super::summary::{mean, sample_std};
use crate::models::{
    BucketKey, BucketStats, BucketWidth, DataAvailabilityWarning, EntityGroup, Period,
    RangeStrategy, Reading, WindowPolicy,
};
use chrono::{NaiveDateTime, Timelike};
use std::collections::BTreeMap;
use thiserror::Error;

/// Smallest half-width of a synthesized single-logger band.
const MIN_MARGIN: f64 = 0.1;
/// Relative half-width of a synthesized band when the spread is too small.
const RELATIVE_MARGIN: f64 = 0.1;

const SECONDS_PER_HOUR: i64 = 3600;

/// Configuration problems that make an aggregation impossible.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AggregateError {
    #[error("elapsed-time bucketing requires a reference start instant")]
    MissingReferenceStart,
    #[error("elapsed-time buckets must be at least one hour wide")]
    ZeroBucketWidth,
    #[error("entity group '{0}' has no members")]
    EmptyGroup(String),
}

pub type Result<T> = std::result::Result<T, AggregateError>;

/// Output of one aggregation call.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    /// Non-empty buckets in plotting order.
    pub buckets: Vec<BucketStats>,
    /// Set when no bucket qualified.
    pub warning: Option<DataAvailabilityWarning>,
}

impl Aggregation {
    fn unavailable(warning: DataAvailabilityWarning) -> Self {
        Self {
            buckets: Vec::new(),
            warning: Some(warning),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

/// Resolved bucketing rule for one call.
#[derive(Debug, Clone, Copy)]
enum Bucketing {
    HourOfDay(Period),
    Elapsed { start: NaiveDateTime, hours: u32 },
}

impl Bucketing {
    fn key(&self, timestamp: NaiveDateTime) -> BucketKey {
        match *self {
            Bucketing::HourOfDay(period) => BucketKey::hour_of_day(timestamp.hour(), period),
            Bucketing::Elapsed { start, hours } => {
                let width = i64::from(hours) * SECONDS_PER_HOUR;
                let index = (timestamp - start).num_seconds().div_euclid(width);
                BucketKey::elapsed(index, hours)
            }
        }
    }
}

/// Samples collected for one bucket.
#[derive(Debug)]
struct BucketAccumulator {
    key: BucketKey,
    /// Cross-logger mean per timestamp.
    reduced: Vec<f64>,
    /// Cross-logger max per timestamp.
    highs: Vec<f64>,
    /// Cross-logger min per timestamp.
    lows: Vec<f64>,
}

impl BucketAccumulator {
    fn new(key: BucketKey) -> Self {
        Self {
            key,
            reduced: Vec::new(),
            highs: Vec::new(),
            lows: Vec::new(),
        }
    }

    /// Adds the valid values of every logger at one timestamp.
    fn push(&mut self, values: &[f64]) {
        let Some(avg) = mean(values) else {
            return;
        };
        let high = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let low = values.iter().copied().fold(f64::INFINITY, f64::min);

        // Keep min <= mean <= max exact despite rounding in the division.
        self.reduced.push(avg.clamp(low, high));
        self.highs.push(high);
        self.lows.push(low);
    }

    fn finish(self, range: RangeStrategy, single_logger: bool) -> Option<BucketStats> {
        let avg = mean(&self.reduced)?;
        let std = sample_std(&self.reduced, avg);

        let (max, min) = if single_logger {
            let margin = match std {
                Some(s) if s >= MIN_MARGIN => s,
                _ => (avg.abs() * RELATIVE_MARGIN).max(MIN_MARGIN),
            };
            (avg + margin, avg - margin)
        } else {
            match range {
                RangeStrategy::AverageSpread => (mean(&self.highs)?, mean(&self.lows)?),
                RangeStrategy::GlobalExtent => (
                    self.reduced.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                    self.reduced.iter().copied().fold(f64::INFINITY, f64::min),
                ),
            }
        };

        if !(max.is_finite() && min.is_finite() && avg.is_finite()) {
            return None;
        }

        Some(BucketStats {
            key: self.key,
            max,
            min,
            mean: avg,
            std: std.filter(|s| s.is_finite()).unwrap_or(0.0),
            count: self.reduced.len(),
            values: self.reduced,
        })
    }
}

/// Buckets per-logger readings in time and summarises each bucket.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeWindowAggregator {
    policy: WindowPolicy,
}

impl TimeWindowAggregator {
    /// Create an aggregator for the given window policy.
    pub fn new(policy: WindowPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &WindowPolicy {
        &self.policy
    }

    /// Aggregate the readings of `group` into per-bucket statistics.
    ///
    /// `reference_start` is required for elapsed-time buckets and ignored
    /// for hour-of-day buckets. An empty result is not an error: it comes
    /// back with a [`DataAvailabilityWarning`] explaining why.
    pub fn aggregate<'a, I>(
        &self,
        readings: I,
        group: &EntityGroup,
        reference_start: Option<NaiveDateTime>,
    ) -> Result<Aggregation>
    where
        I: IntoIterator<Item = &'a Reading>,
    {
        if group.is_empty() {
            return Err(AggregateError::EmptyGroup(group.name.clone()));
        }

        let bucketing = match self.policy.width {
            BucketWidth::HourOfDay => Bucketing::HourOfDay(self.policy.period),
            BucketWidth::Elapsed { hours: 0 } => return Err(AggregateError::ZeroBucketWidth),
            BucketWidth::Elapsed { hours } => Bucketing::Elapsed {
                start: reference_start.ok_or(AggregateError::MissingReferenceStart)?,
                hours,
            },
        };

        let members: Vec<&Reading> = readings
            .into_iter()
            .filter(|r| group.contains(&r.logger))
            .collect();
        if members.is_empty() {
            return Ok(Aggregation::unavailable(
                DataAvailabilityWarning::NoGroupMembers {
                    group: group.name.clone(),
                },
            ));
        }

        // Only a one-member group gets a synthesized band. Callers drop
        // inactive loggers before building the group.
        let single_logger = group.len() == 1;

        let mut by_timestamp: BTreeMap<NaiveDateTime, Vec<f64>> = BTreeMap::new();
        for reading in members {
            if !self.policy.period.contains(reading.hour()) {
                continue;
            }
            if let Some(value) = reading.valid_value() {
                by_timestamp.entry(reading.timestamp).or_default().push(value);
            }
        }

        let mut buckets: BTreeMap<i64, BucketAccumulator> = BTreeMap::new();
        for (timestamp, values) in &by_timestamp {
            let key = bucketing.key(*timestamp);
            buckets
                .entry(key.sort_key())
                .or_insert_with(|| BucketAccumulator::new(key))
                .push(values);
        }

        let stats: Vec<BucketStats> = buckets
            .into_values()
            .filter_map(|acc| acc.finish(self.policy.range, single_logger))
            .collect();

        if stats.is_empty() {
            return Ok(Aggregation::unavailable(
                DataAvailabilityWarning::NoQualifyingSamples {
                    group: group.name.clone(),
                },
            ));
        }

        Ok(Aggregation {
            buckets: stats,
            warning: None,
        })
    }
}

/// Aggregate with a one-off aggregator for `policy`.
pub fn aggregate<'a, I>(
    readings: I,
    group: &EntityGroup,
    policy: WindowPolicy,
    reference_start: Option<NaiveDateTime>,
) -> Result<Aggregation>
where
    I: IntoIterator<Item = &'a Reading>,
{
    TimeWindowAggregator::new(policy).aggregate(readings, group, reference_start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn reading(day: u32, hour: u32, logger: &str, value: f64) -> Reading {
        Reading::new(at(day, hour), logger, Some(value))
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {}, got {}",
            expected,
            actual
        );
    }

    #[test]
    fn test_two_loggers_single_timestamp() {
        let readings = vec![reading(1, 0, "A", 20.0), reading(1, 0, "B", 22.0)];
        let group = EntityGroup::new("control", ["A", "B"]);

        // Band over the bucket's averaged samples: one sample, no spread.
        let policy = WindowPolicy::hour_of_day(Period::Full).with_range(RangeStrategy::GlobalExtent);
        let result = aggregate(&readings, &group, policy, None).unwrap();

        assert_eq!(result.buckets.len(), 1);
        let bucket = &result.buckets[0];
        assert_eq!(bucket.key, BucketKey::hour_of_day(0, Period::Full));
        assert_close(bucket.mean, 21.0);
        assert_close(bucket.max, 21.0);
        assert_close(bucket.min, 21.0);
        assert_eq!(bucket.values, vec![21.0]);
        assert!(result.warning.is_none());
    }

    #[test]
    fn test_average_spread_uses_per_timestamp_extremes() {
        let readings = vec![
            reading(1, 0, "A", 20.0),
            reading(1, 0, "B", 22.0),
            reading(2, 0, "A", 18.0),
            reading(2, 0, "B", 26.0),
        ];
        let group = EntityGroup::new("control", ["A", "B"]);
        let policy = WindowPolicy::hour_of_day(Period::Full);

        let result = aggregate(&readings, &group, policy, None).unwrap();
        let bucket = &result.buckets[0];

        assert_eq!(bucket.count, 2);
        assert_close(bucket.mean, 21.5);
        assert_close(bucket.max, 24.0);
        assert_close(bucket.min, 19.0);
        assert_close(bucket.std, 0.7071067811865476);

        let global = aggregate(
            &readings,
            &group,
            policy.with_range(RangeStrategy::GlobalExtent),
            None,
        )
        .unwrap();
        assert_close(global.buckets[0].max, 22.0);
        assert_close(global.buckets[0].min, 21.0);
    }

    #[test]
    fn test_single_logger_constant_band() {
        let readings: Vec<Reading> = (1..=5).map(|d| reading(d, 12, "A", 15.0)).collect();
        let group = EntityGroup::new("intervention", ["A"]);

        let result = aggregate(&readings, &group, WindowPolicy::default(), None).unwrap();
        let bucket = &result.buckets[0];

        assert_close(bucket.mean, 15.0);
        assert_close(bucket.std, 0.0);
        assert_close(bucket.min, 13.5);
        assert_close(bucket.max, 16.5);
    }

    #[test]
    fn test_single_logger_uses_std_when_large_enough() {
        let readings = vec![
            reading(1, 3, "A", 10.0),
            reading(2, 3, "A", 12.0),
            reading(3, 3, "A", 14.0),
        ];
        let group = EntityGroup::new("intervention", ["A"]);

        let result = aggregate(&readings, &group, WindowPolicy::default(), None).unwrap();
        let bucket = &result.buckets[0];

        assert_close(bucket.mean, 12.0);
        assert_close(bucket.std, 2.0);
        assert_close(bucket.max, 14.0);
        assert_close(bucket.min, 10.0);
    }

    #[test]
    fn test_single_logger_margin_floor_near_zero() {
        let readings = vec![reading(1, 3, "A", 0.2)];
        let group = EntityGroup::new("intervention", ["A"]);

        let bucket = &aggregate(&readings, &group, WindowPolicy::default(), None)
            .unwrap()
            .buckets[0];

        // |0.2| * 0.1 is below the floor, so the band is mean +/- 0.1.
        assert_close(bucket.max, 0.3);
        assert_close(bucket.min, 0.1);
        assert_close(bucket.std, 0.0);
    }

    #[test]
    fn test_silent_member_keeps_measured_band() {
        // B contributes nothing here, but the group still has two members.
        let readings = vec![
            reading(1, 5, "A", 15.0),
            reading(1, 5, "B", 0.0),
            reading(2, 5, "A", 15.0),
        ];
        let group = EntityGroup::new("control", ["A", "B"]);

        let bucket = &aggregate(&readings, &group, WindowPolicy::default(), None)
            .unwrap()
            .buckets[0];
        assert_close(bucket.mean, 15.0);
        assert_close(bucket.max, 15.0);
        assert_close(bucket.min, 15.0);
    }

    #[test]
    fn test_all_zero_readings_yield_warning() {
        let readings = vec![reading(1, 0, "A", 0.0), reading(1, 1, "A", 0.0)];
        let group = EntityGroup::new("intervention", ["A"]);

        let result = aggregate(&readings, &group, WindowPolicy::default(), None).unwrap();

        assert!(result.is_empty());
        assert_eq!(
            result.warning,
            Some(DataAvailabilityWarning::NoQualifyingSamples {
                group: "intervention".to_string()
            })
        );
    }

    #[test]
    fn test_zero_values_are_masked_not_averaged() {
        let readings = vec![
            reading(1, 0, "A", 0.0),
            reading(1, 0, "B", 10.0),
            reading(1, 1, "A", 0.0),
            reading(1, 1, "B", 0.0),
        ];
        let group = EntityGroup::new("control", ["A", "B"]);

        let result = aggregate(&readings, &group, WindowPolicy::default(), None).unwrap();

        // Hour 1 has no valid logger and contributes nothing.
        assert_eq!(result.buckets.len(), 1);
        assert_close(result.buckets[0].mean, 10.0);
    }

    #[test]
    fn test_unknown_group_yields_warning() {
        let readings = vec![reading(1, 0, "A", 1.0)];
        let group = EntityGroup::new("control", ["X"]);

        let result = aggregate(&readings, &group, WindowPolicy::default(), None).unwrap();
        assert_eq!(
            result.warning,
            Some(DataAvailabilityWarning::NoGroupMembers {
                group: "control".to_string()
            })
        );
    }

    #[test]
    fn test_elapsed_bucket_index() {
        let readings = vec![reading(3, 5, "A", 1.0)];
        let group = EntityGroup::new("intervention", ["A"]);
        let policy = WindowPolicy::elapsed(Period::Full, 24);

        let result = aggregate(&readings, &group, policy, Some(at(1, 0))).unwrap();
        assert_eq!(
            result.buckets[0].key,
            BucketKey::Elapsed {
                index: 2,
                start_hour: 48,
                end_hour: 72
            }
        );
    }

    #[test]
    fn test_elapsed_before_reference_is_negative() {
        let readings = vec![reading(1, 23, "A", 1.0), reading(2, 0, "A", 2.0)];
        let group = EntityGroup::new("control", ["A"]);
        let policy = WindowPolicy::elapsed(Period::Full, 24);

        let result = aggregate(&readings, &group, policy, Some(at(2, 0))).unwrap();
        let keys: Vec<i64> = result.buckets.iter().map(|b| b.key.sort_key()).collect();
        assert_eq!(keys, vec![-1, 0]);
    }

    #[test]
    fn test_elapsed_requires_reference_start() {
        let readings = vec![reading(1, 0, "A", 1.0)];
        let group = EntityGroup::new("intervention", ["A"]);

        let err = aggregate(
            &readings,
            &group,
            WindowPolicy::elapsed(Period::Full, 24),
            None,
        )
        .unwrap_err();
        assert_eq!(err, AggregateError::MissingReferenceStart);

        let err = aggregate(
            &readings,
            &group,
            WindowPolicy::elapsed(Period::Full, 0),
            Some(at(1, 0)),
        )
        .unwrap_err();
        assert_eq!(err, AggregateError::ZeroBucketWidth);
    }

    #[test]
    fn test_hour_of_day_ignores_reference_start() {
        let readings = vec![reading(1, 4, "A", 1.0)];
        let group = EntityGroup::new("intervention", ["A"]);

        let with = aggregate(&readings, &group, WindowPolicy::default(), Some(at(9, 0))).unwrap();
        let without = aggregate(&readings, &group, WindowPolicy::default(), None).unwrap();
        assert_eq!(with, without);
    }

    #[test]
    fn test_empty_group_is_configuration_error() {
        let readings = vec![reading(1, 0, "A", 1.0)];
        let group = EntityGroup::new("control", Vec::<String>::new());

        let err = aggregate(&readings, &group, WindowPolicy::default(), None).unwrap_err();
        assert_eq!(err, AggregateError::EmptyGroup("control".to_string()));
    }

    #[test]
    fn test_night_period_wraps_midnight() {
        let readings = vec![
            reading(1, 23, "A", 5.0),
            reading(2, 1, "A", 6.0),
            reading(2, 12, "A", 9.0),
        ];
        let group = EntityGroup::new("control", ["A"]);

        let hourly = aggregate(
            &readings,
            &group,
            WindowPolicy::hour_of_day(Period::Night),
            None,
        )
        .unwrap();
        let keys: Vec<BucketKey> = hourly.buckets.iter().map(|b| b.key).collect();
        assert_eq!(
            keys,
            vec![
                BucketKey::HourOfDay {
                    hour: 23,
                    plot_hour: 23
                },
                BucketKey::HourOfDay {
                    hour: 1,
                    plot_hour: 25
                },
            ]
        );

        let elapsed = aggregate(
            &readings,
            &group,
            WindowPolicy::elapsed(Period::Night, 24),
            Some(at(1, 0)),
        )
        .unwrap();
        let indices: Vec<i64> = elapsed.buckets.iter().map(|b| b.key.sort_key()).collect();
        assert_eq!(indices, vec![0, 1]);
    }

    #[test]
    fn test_day_period_filters_hours() {
        let readings = vec![
            reading(1, 5, "A", 1.0),
            reading(1, 6, "A", 2.0),
            reading(1, 18, "A", 3.0),
            reading(1, 19, "A", 4.0),
        ];
        let group = EntityGroup::new("control", ["A"]);

        let result = aggregate(&readings, &group, WindowPolicy::hour_of_day(Period::Day), None)
            .unwrap();
        let hours: Vec<i64> = result.buckets.iter().map(|b| b.key.sort_key()).collect();
        assert_eq!(hours, vec![6, 18]);
    }

    #[test]
    fn test_min_mean_max_ordering_holds() {
        let readings: Vec<Reading> = (1..=6)
            .flat_map(|d| {
                vec![
                    reading(d, d, "A", 0.1 * d as f64),
                    reading(d, d, "B", 0.1 * d as f64),
                    reading(d, d, "C", 0.1 * d as f64),
                    reading(d, 7, "A", d as f64 * 1.7),
                    reading(d, 7, "B", -(d as f64)),
                ]
            })
            .collect();
        let group = EntityGroup::new("control", ["A", "B", "C"]);

        for range in [RangeStrategy::AverageSpread, RangeStrategy::GlobalExtent] {
            let policy = WindowPolicy::default().with_range(range);
            let result = aggregate(&readings, &group, policy, None).unwrap();
            assert!(!result.is_empty());
            for bucket in &result.buckets {
                assert!(bucket.min <= bucket.mean, "{:?}", bucket);
                assert!(bucket.mean <= bucket.max, "{:?}", bucket);
            }
        }
    }

    #[test]
    fn test_aggregate_is_idempotent() {
        let readings = vec![
            reading(1, 0, "A", 20.0),
            reading(1, 0, "B", 22.0),
            reading(1, 13, "A", 25.0),
            reading(2, 13, "B", 27.0),
        ];
        let group = EntityGroup::new("control", ["A", "B"]);
        let aggregator = TimeWindowAggregator::new(WindowPolicy::default());

        let first = aggregator.aggregate(&readings, &group, None).unwrap();
        let second = aggregator.aggregate(&readings, &group, None).unwrap();
        assert_eq!(first, second);
    }
}
