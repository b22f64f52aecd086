//! Control-vs-intervention comparisons.
//!
//! Enumerates the configured comparisons and, for each one, derives the
//! logger groups and intervention window from the metadata table before
//! handing the readings to the aggregator.

use super::aggregator::{AggregateError, Aggregation, TimeWindowAggregator};
use crate::config::AnalysisConfig;
use crate::models::{
    BucketWidth, ComparisonResult, ComparisonSpec, ComparisonStatus, ComparisonWarning,
    EntityGroup, GroupRole, InterventionWindow, LoggerInfo, RangeStrategy, Reading, WindowPolicy,
};
use std::collections::HashSet;
use thiserror::Error;

/// Errors that abort a single comparison.
#[derive(Debug, Error)]
pub enum ComparisonError {
    #[error("no intervention start recorded for {intervention} in {settlement}")]
    MissingInterventionWindow {
        settlement: String,
        intervention: String,
    },
    #[error(transparent)]
    Aggregate(#[from] AggregateError),
}

/// Enumerate every comparison in configuration order.
///
/// Nesting is settlement, then intervention type, then period, then shading.
pub fn plan(config: &AnalysisConfig) -> Vec<ComparisonSpec> {
    let mut specs = Vec::new();

    for settlement in &config.settlements {
        for intervention in &config.interventions {
            for period in &config.periods {
                for shaded in &config.shading {
                    specs.push(ComparisonSpec {
                        settlement: settlement.clone(),
                        intervention: intervention.clone(),
                        period: *period,
                        shaded: *shaded,
                    });
                }
            }
        }
    }

    specs
}

/// Runs comparisons against one loaded dataset.
pub struct ComparisonRunner<'a> {
    readings: &'a [Reading],
    loggers: &'a [LoggerInfo],
    control_label: String,
    width: BucketWidth,
    range: RangeStrategy,
}

impl<'a> ComparisonRunner<'a> {
    /// Create a runner over the loaded readings and logger metadata.
    pub fn new(readings: &'a [Reading], loggers: &'a [LoggerInfo], config: &AnalysisConfig) -> Self {
        Self {
            readings,
            loggers,
            control_label: config.control_label.clone(),
            width: config.bucket_width(),
            range: config.range_strategy,
        }
    }

    /// Loggers of the settlement/shading in `spec` carrying `label`.
    pub fn loggers_for(&self, spec: &ComparisonSpec, label: &str) -> Vec<String> {
        self.loggers
            .iter()
            .filter(|l| l.settlement == spec.settlement)
            .filter(|l| l.has_intervention(label))
            .filter(|l| l.shaded == spec.shaded)
            .map(|l| l.logger.clone())
            .collect()
    }

    /// Intervention window of the settlement/intervention in `spec`.
    ///
    /// Taken from the first metadata row with a start, regardless of shading.
    pub fn intervention_window(
        &self,
        spec: &ComparisonSpec,
    ) -> Result<InterventionWindow, ComparisonError> {
        self.loggers
            .iter()
            .filter(|l| l.settlement == spec.settlement)
            .filter(|l| l.has_intervention(&spec.intervention))
            .find_map(|l| {
                l.intervention_start.map(|start| InterventionWindow {
                    start,
                    end: l.post_intervention_end,
                })
            })
            .ok_or_else(|| ComparisonError::MissingInterventionWindow {
                settlement: spec.settlement.clone(),
                intervention: spec.intervention.clone(),
            })
    }

    /// Run one comparison; failures are captured in the result.
    pub fn run(&self, spec: &ComparisonSpec) -> ComparisonResult {
        match self.try_run(spec) {
            Ok(result) => result,
            Err(e) => ComparisonResult::failed(spec.clone(), e.to_string()),
        }
    }

    /// Run every comparison independently.
    pub fn run_all(&self, specs: &[ComparisonSpec]) -> Vec<ComparisonResult> {
        specs.iter().map(|spec| self.run(spec)).collect()
    }

    fn try_run(&self, spec: &ComparisonSpec) -> Result<ComparisonResult, ComparisonError> {
        let mut result = ComparisonResult::new(spec.clone());

        let control_ids = self.loggers_for(spec, &self.control_label);
        let intervention_ids = self.loggers_for(spec, &spec.intervention);
        let window = self.intervention_window(spec)?;
        result.window = Some(window);

        let relevant: HashSet<&str> = control_ids
            .iter()
            .chain(intervention_ids.iter())
            .map(String::as_str)
            .collect();

        let (pre, post): (Vec<&Reading>, Vec<&Reading>) = self
            .readings
            .iter()
            .filter(|r| relevant.contains(r.logger.as_str()))
            .filter(|r| window.is_pre(r.timestamp) || window.is_post(r.timestamp))
            .partition(|r| window.is_pre(r.timestamp));

        let active_control =
            filter_active(&control_ids, &pre, &post, GroupRole::Control, &mut result);
        let active_intervention = filter_active(
            &intervention_ids,
            &pre,
            &post,
            GroupRole::Intervention,
            &mut result,
        );
        result.control_loggers = active_control.clone();
        result.intervention_loggers = active_intervention.clone();

        if active_control.is_empty() || active_intervention.is_empty() {
            result.warnings.push(ComparisonWarning::InsufficientLoggers {
                control: active_control.len(),
                intervention: active_intervention.len(),
            });
            result.status = ComparisonStatus::NoData;
            return Ok(result);
        }

        let control_group = EntityGroup::new(
            "control",
            active_control.iter().chain(active_intervention.iter()).cloned(),
        );
        let intervention_group = EntityGroup::new("intervention", active_intervention.iter().cloned());

        // Before the intervention, intervention loggers count as controls.
        let control_readings = pre
            .iter()
            .chain(post.iter().filter(|r| !intervention_group.contains(&r.logger)))
            .copied();
        let intervention_readings = post.iter().copied();

        let aggregator = TimeWindowAggregator::new(WindowPolicy {
            period: spec.period,
            width: self.width,
            range: self.range,
        });
        let control = aggregator.aggregate(control_readings, &control_group, Some(window.start))?;
        let intervention =
            aggregator.aggregate(intervention_readings, &intervention_group, Some(window.start))?;

        record_warning(&control, GroupRole::Control, &mut result);
        record_warning(&intervention, GroupRole::Intervention, &mut result);

        result.control = control.buckets;
        result.intervention = intervention.buckets;
        result.status = if result.has_data() {
            ComparisonStatus::Complete
        } else {
            ComparisonStatus::NoData
        };

        Ok(result)
    }
}

/// Keep loggers with any valid value before or after the intervention.
fn filter_active(
    loggers: &[String],
    pre: &[&Reading],
    post: &[&Reading],
    role: GroupRole,
    result: &mut ComparisonResult,
) -> Vec<String> {
    let mut active = Vec::new();

    for logger in loggers {
        let has_data = pre
            .iter()
            .chain(post.iter())
            .any(|r| r.logger == *logger && r.valid_value().is_some());

        if has_data {
            active.push(logger.clone());
        } else {
            result.warnings.push(ComparisonWarning::InactiveLogger {
                logger: logger.clone(),
                role,
            });
        }
    }

    active
}

fn record_warning(aggregation: &Aggregation, role: GroupRole, result: &mut ComparisonResult) {
    if let Some(cause) = &aggregation.warning {
        result.warnings.push(ComparisonWarning::NoData {
            role,
            cause: cause.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BucketKey, DataAvailabilityWarning, Period};
    use chrono::{NaiveDate, NaiveDateTime};

    fn at(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn logger(id: &str, intervention: &str, shaded: bool, window: bool) -> LoggerInfo {
        LoggerInfo {
            logger: id.to_string(),
            settlement: "Rainbow Field".to_string(),
            intervention: intervention.to_string(),
            shaded,
            intervention_start: window.then(|| at(2, 0)),
            post_intervention_end: window.then(|| at(3, 23)),
        }
    }

    fn loggers() -> Vec<LoggerInfo> {
        vec![
            logger("C1", "CONTROL", true, false),
            logger("C2", "CONTROL", true, false),
            logger("M1", "MEB", true, true),
            logger("M2", "MEB", true, true),
            logger("R1", "RBF", false, true),
            logger("C3", "CONTROL", false, false),
        ]
    }

    fn readings() -> Vec<Reading> {
        let rows: [(u32, u32, [f64; 6]); 5] = [
            (1, 0, [1.0, 2.0, 1.5, 2.5, 0.5, 1.0]),
            (1, 12, [4.0, 5.0, 4.5, 5.5, 0.0, 3.0]),
            (2, 0, [1.0, 2.0, -1.0, -0.5, 0.5, 1.0]),
            (2, 12, [4.0, 5.0, 2.0, 3.0, 1.2, 3.0]),
            (5, 12, [9.0, 9.0, 9.0, 9.0, 9.0, 9.0]),
        ];
        let ids = ["C1", "C2", "M1", "M2", "R1", "C3"];

        rows.iter()
            .flat_map(|(day, hour, values)| {
                ids.iter()
                    .zip(values.iter())
                    .map(move |(id, v)| Reading::new(at(*day, *hour), *id, Some(*v)))
            })
            .collect()
    }

    fn config() -> AnalysisConfig {
        AnalysisConfig {
            settlements: vec!["Rainbow Field".to_string()],
            interventions: vec!["MEB".to_string(), "RBF".to_string()],
            periods: vec![Period::Full],
            shading: vec![true, false],
            ..AnalysisConfig::default()
        }
    }

    fn spec(intervention: &str, shaded: bool) -> ComparisonSpec {
        ComparisonSpec {
            settlement: "Rainbow Field".to_string(),
            intervention: intervention.to_string(),
            period: Period::Full,
            shaded,
        }
    }

    #[test]
    fn test_plan_order() {
        let mut cfg = config();
        cfg.settlements.push("Sports Complex".to_string());
        let specs = plan(&cfg);

        assert_eq!(specs.len(), 8);
        assert_eq!(specs[0].label(), "Rainbow Field - MEB - Shaded - Full");
        assert_eq!(specs[1].label(), "Rainbow Field - MEB - Unshaded - Full");
        assert_eq!(specs[2].label(), "Rainbow Field - RBF - Shaded - Full");
        assert_eq!(specs[4].settlement, "Sports Complex");
    }

    #[test]
    fn test_loggers_for_spec() {
        let (readings, loggers, cfg) = (readings(), loggers(), config());
        let runner = ComparisonRunner::new(&readings, &loggers, &cfg);

        assert_eq!(runner.loggers_for(&spec("MEB", true), "CONTROL"), vec!["C1", "C2"]);
        assert_eq!(runner.loggers_for(&spec("MEB", true), "MEB"), vec!["M1", "M2"]);
        assert_eq!(runner.loggers_for(&spec("RBF", false), "control"), vec!["C3"]);
    }

    #[test]
    fn test_shaded_meb_comparison() {
        let (readings, loggers, cfg) = (readings(), loggers(), config());
        let runner = ComparisonRunner::new(&readings, &loggers, &cfg);

        let result = runner.run(&spec("MEB", true));

        assert_eq!(result.status, ComparisonStatus::Complete);
        assert_eq!(result.control_loggers, vec!["C1", "C2"]);
        assert_eq!(result.intervention_loggers, vec!["M1", "M2"]);
        assert!(result.warnings.is_empty());

        // Control hour 0: day 1 (all four loggers) and day 2 (controls only).
        let hour0 = &result.control[0];
        assert_eq!(hour0.key, BucketKey::hour_of_day(0, Period::Full));
        assert_eq!(hour0.values, vec![1.75, 1.5]);
        assert!((hour0.mean - 1.625).abs() < 1e-12);

        // Intervention hour 0: post-intervention MEB loggers only.
        let hour0 = &result.intervention[0];
        assert_eq!(hour0.values, vec![-0.75]);
        assert!((hour0.max + 0.5).abs() < 1e-12);
        assert!((hour0.min + 1.0).abs() < 1e-12);

        // Day 5 is after the post-intervention end and is ignored.
        assert!(result
            .control
            .iter()
            .chain(result.intervention.iter())
            .all(|b| b.values.iter().all(|v| *v != 9.0)));
    }

    #[test]
    fn test_single_intervention_logger_band() {
        let (readings, loggers, cfg) = (readings(), loggers(), config());
        let runner = ComparisonRunner::new(&readings, &loggers, &cfg);

        let result = runner.run(&spec("RBF", false));
        assert_eq!(result.status, ComparisonStatus::Complete);

        let noon = result
            .intervention
            .iter()
            .find(|b| b.key == BucketKey::hour_of_day(12, Period::Full))
            .unwrap();
        assert!((noon.mean - 1.2).abs() < 1e-12);
        assert!((noon.max - 1.32).abs() < 1e-9);
        assert!((noon.min - 1.08).abs() < 1e-9);
    }

    #[test]
    fn test_insufficient_loggers() {
        let (readings, loggers, cfg) = (readings(), loggers(), config());
        let runner = ComparisonRunner::new(&readings, &loggers, &cfg);

        let result = runner.run(&spec("MEB", false));
        assert_eq!(result.status, ComparisonStatus::NoData);
        assert!(result.control.is_empty());
        assert_eq!(
            result.warnings,
            vec![ComparisonWarning::InsufficientLoggers {
                control: 1,
                intervention: 0
            }]
        );
    }

    #[test]
    fn test_inactive_logger_is_dropped() {
        let mut readings = readings();
        for r in readings.iter_mut().filter(|r| r.logger == "M2") {
            r.value = Some(0.0);
        }
        let (loggers, cfg) = (loggers(), config());
        let runner = ComparisonRunner::new(&readings, &loggers, &cfg);

        let result = runner.run(&spec("MEB", true));
        assert_eq!(result.intervention_loggers, vec!["M1"]);
        assert_eq!(
            result.warnings,
            vec![ComparisonWarning::InactiveLogger {
                logger: "M2".to_string(),
                role: GroupRole::Intervention
            }]
        );
    }

    #[test]
    fn test_missing_window_fails_only_that_comparison() {
        let (readings, loggers, mut cfg) = (readings(), loggers(), config());
        cfg.settlements.push("Sports Complex".to_string());
        let runner = ComparisonRunner::new(&readings, &loggers, &cfg);

        let results = runner.run_all(&plan(&cfg));
        assert_eq!(results.len(), 8);

        let failed: Vec<_> = results
            .iter()
            .filter(|r| r.status == ComparisonStatus::Failed)
            .collect();
        assert_eq!(failed.len(), 4);
        assert!(failed.iter().all(|r| r.spec.settlement == "Sports Complex"));
        assert!(failed[0]
            .error
            .as_deref()
            .unwrap()
            .contains("no intervention start"));
        assert_eq!(results[0].status, ComparisonStatus::Complete);
    }

    #[test]
    fn test_elapsed_buckets_use_intervention_start() {
        let (readings, loggers, mut cfg) = (readings(), loggers(), config());
        cfg.bucket_hours = Some(24);
        let runner = ComparisonRunner::new(&readings, &loggers, &cfg);

        let result = runner.run(&spec("MEB", true));
        let control: Vec<i64> = result.control.iter().map(|b| b.key.sort_key()).collect();
        let intervention: Vec<i64> = result
            .intervention
            .iter()
            .map(|b| b.key.sort_key())
            .collect();

        assert_eq!(control, vec![-1, 0]);
        assert_eq!(intervention, vec![0]);
    }

    #[test]
    fn test_period_without_samples_warns() {
        let (readings, loggers, cfg) = (readings(), loggers(), config());
        let runner = ComparisonRunner::new(&readings, &loggers, &cfg);

        let mut daytime = spec("MEB", true);
        daytime.period = Period::Day;
        assert_eq!(runner.run(&daytime).status, ComparisonStatus::Complete);

        let only_midnight: Vec<Reading> = readings
            .iter()
            .filter(|r| r.hour() == 0)
            .cloned()
            .collect();
        let runner = ComparisonRunner::new(&only_midnight, &loggers, &cfg);
        let result = runner.run(&daytime);

        assert_eq!(result.status, ComparisonStatus::NoData);
        assert!(result.warnings.contains(&ComparisonWarning::NoData {
            role: GroupRole::Intervention,
            cause: DataAvailabilityWarning::NoQualifyingSamples {
                group: "intervention".to_string()
            },
        }));
    }

    #[test]
    fn test_control_band_with_post_only_intervention_logger() {
        let loggers = vec![
            logger("C1", "CONTROL", true, false),
            logger("M1", "MEB", true, true),
        ];
        let readings = vec![
            Reading::new(at(1, 12), "C1", Some(20.0)),
            Reading::new(at(2, 12), "C1", Some(20.0)),
            Reading::new(at(2, 12), "M1", Some(25.0)),
        ];
        let cfg = config();
        let runner = ComparisonRunner::new(&readings, &loggers, &cfg);

        let result = runner.run(&spec("MEB", true));
        assert_eq!(result.status, ComparisonStatus::Complete);
        assert_eq!(result.control_loggers, vec!["C1"]);
        assert_eq!(result.intervention_loggers, vec!["M1"]);

        // Only C1 reaches the control side, but the control group holds
        // both loggers, so the band comes from the measured values.
        let noon = &result.control[0];
        assert_eq!(noon.values, vec![20.0, 20.0]);
        assert!((noon.mean - 20.0).abs() < 1e-12);
        assert!((noon.max - 20.0).abs() < 1e-12);
        assert!((noon.min - 20.0).abs() < 1e-12);
    }
}
