//! Descriptive statistics and group summaries.
//!
//! Helpers shared by the aggregator (mean, standard deviation) and the
//! whole-dataset summaries printed alongside the comparisons.

use crate::models::{
    BucketStats, Describe, Dimension, DimensionSummary, GroupSummary, LoggerInfo, Reading,
    TTestResult,
};
use statrs::distribution::{ContinuousCDF, StudentsT};
use std::collections::{BTreeMap, HashMap};

/// Arithmetic mean, `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation (n - 1 denominator) around `mean`.
///
/// Undefined for fewer than two values.
pub fn sample_std(values: &[f64], mean: f64) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(variance.sqrt())
}

/// Quantile of an already sorted slice using linear interpolation.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let position = q * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    sorted[lower] + (sorted[upper] - sorted[lower]) * (position - lower as f64)
}

/// Count, mean, std, min, quartiles and max of `values`.
pub fn describe(values: &[f64]) -> Option<Describe> {
    let mean = mean(values)?;

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    Some(Describe {
        count: sorted.len(),
        mean,
        std: sample_std(values, mean),
        min: sorted[0],
        q1: quantile(&sorted, 0.25),
        median: quantile(&sorted, 0.5),
        q3: quantile(&sorted, 0.75),
        max: sorted[sorted.len() - 1],
    })
}

/// Box-plot quartiles of a bucket's samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quartiles {
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
}

impl BucketStats {
    /// Quartiles of the bucket's per-timestamp samples, if they were kept.
    pub fn quartiles(&self) -> Option<Quartiles> {
        describe(&self.values).map(|d| Quartiles {
            q1: d.q1,
            median: d.median,
            q3: d.q3,
        })
    }
}

/// Student two-sample t statistic with pooled variance.
///
/// Returns `(t, degrees_of_freedom)`, or `None` when either sample has
/// fewer than two values or both samples are constant.
pub fn t_statistic(a: &[f64], b: &[f64]) -> Option<(f64, usize)> {
    let (n1, n2) = (a.len(), b.len());
    if n1 < 2 || n2 < 2 {
        return None;
    }

    let (m1, m2) = (mean(a)?, mean(b)?);
    let (s1, s2) = (sample_std(a, m1)?, sample_std(b, m2)?);
    let dof = n1 + n2 - 2;
    let pooled = ((n1 - 1) as f64 * s1 * s1 + (n2 - 1) as f64 * s2 * s2) / dof as f64;
    if pooled <= 0.0 {
        return None;
    }

    let standard_error = (pooled * (1.0 / n1 as f64 + 1.0 / n2 as f64)).sqrt();
    Some(((m1 - m2) / standard_error, dof))
}

/// Two-sided p-value of `t` under a Student t distribution.
pub fn p_value(t: f64, degrees_of_freedom: usize) -> Option<f64> {
    let dist = StudentsT::new(0.0, 1.0, degrees_of_freedom as f64).ok()?;
    let p = 2.0 * (1.0 - dist.cdf(t.abs()));
    p.is_finite().then(|| p.clamp(0.0, 1.0))
}

/// Time-of-day bin used in whole-dataset summaries.
pub fn time_of_day(hour: u32) -> &'static str {
    match hour {
        0..=5 => "Night",
        6..=11 => "Morning",
        12..=17 => "Afternoon",
        _ => "Evening",
    }
}

fn dimension_label(dimension: Dimension, info: &LoggerInfo, reading: &Reading) -> String {
    match dimension {
        Dimension::Intervention => info.intervention.to_uppercase(),
        Dimension::Settlement => info.settlement.clone(),
        Dimension::Shading => crate::models::shading_label(info.shaded).to_string(),
        Dimension::TimeOfDay => time_of_day(reading.hour()).to_string(),
    }
}

/// Summarise every valid reading grouped by `dimension`.
///
/// Readings from loggers missing in the metadata table are ignored.
pub fn summarize_by(
    readings: &[Reading],
    loggers: &[LoggerInfo],
    dimension: Dimension,
) -> DimensionSummary {
    let lookup: HashMap<&str, &LoggerInfo> =
        loggers.iter().map(|l| (l.logger.as_str(), l)).collect();

    let mut grouped: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for reading in readings {
        let (Some(value), Some(info)) = (reading.valid_value(), lookup.get(reading.logger.as_str()))
        else {
            continue;
        };
        grouped
            .entry(dimension_label(dimension, info, reading))
            .or_default()
            .push(value);
    }

    let groups = grouped
        .into_iter()
        .filter_map(|(label, values)| describe(&values).map(|stats| GroupSummary { label, stats }))
        .collect();

    DimensionSummary { dimension, groups }
}

/// Summaries for every dimension.
pub fn summarize_all(readings: &[Reading], loggers: &[LoggerInfo]) -> Vec<DimensionSummary> {
    Dimension::ALL
        .iter()
        .map(|d| summarize_by(readings, loggers, *d))
        .collect()
}

/// t statistics of each intervention type against control, and shaded
/// against unshaded.
pub fn t_tests(
    readings: &[Reading],
    loggers: &[LoggerInfo],
    control_label: &str,
) -> Vec<TTestResult> {
    let lookup: HashMap<&str, &LoggerInfo> =
        loggers.iter().map(|l| (l.logger.as_str(), l)).collect();

    let mut by_intervention: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    let mut shaded = Vec::new();
    let mut unshaded = Vec::new();

    for reading in readings {
        let (Some(value), Some(info)) = (reading.valid_value(), lookup.get(reading.logger.as_str()))
        else {
            continue;
        };
        by_intervention
            .entry(info.intervention.to_uppercase())
            .or_default()
            .push(value);
        if info.shaded {
            shaded.push(value);
        } else {
            unshaded.push(value);
        }
    }

    let control_key = control_label.to_uppercase();
    let control = by_intervention.get(&control_key).cloned().unwrap_or_default();

    let mut results: Vec<TTestResult> = by_intervention
        .iter()
        .filter(|(label, _)| **label != control_key)
        .filter_map(|(label, values)| {
            t_statistic(values, &control).map(|(t, dof)| TTestResult {
                label: format!("{} vs {}", label, control_key),
                t_statistic: t,
                degrees_of_freedom: dof,
                p_value: p_value(t, dof),
            })
        })
        .collect();

    if let Some((t, dof)) = t_statistic(&shaded, &unshaded) {
        results.push(TTestResult {
            label: "Shaded vs Unshaded".to_string(),
            t_statistic: t,
            degrees_of_freedom: dof,
            p_value: p_value(t, dof),
        });
    }

    results
}
