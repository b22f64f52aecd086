//! Data models for logger statistics.
//!
//! This module contains the core data structures used throughout the
//! application for representing readings, logger metadata, window
//! policies, bucket statistics and reports.

use chrono::{DateTime, NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single observation from one logger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// When the value was recorded (second resolution, site-local time).
    pub timestamp: NaiveDateTime,
    /// Logger identifier, e.g. `U12` or `T3`.
    pub logger: String,
    /// Recorded value; `None` when the cell was blank or unparseable.
    pub value: Option<f64>,
}

impl Reading {
    /// Creates a new reading.
    pub fn new(timestamp: NaiveDateTime, logger: impl Into<String>, value: Option<f64>) -> Self {
        Self {
            timestamp,
            logger: logger.into(),
            value,
        }
    }

    /// Returns the value if it can be used as a sample.
    ///
    /// Faulty loggers write exactly `0` instead of leaving the cell empty,
    /// so zero is treated as missing along with NaN and infinities.
    pub fn valid_value(&self) -> Option<f64> {
        self.value.filter(|v| v.is_finite() && *v != 0.0)
    }

    /// Hour of day (0-23) of the reading.
    pub fn hour(&self) -> u32 {
        self.timestamp.hour()
    }
}

/// Part of the day a comparison is restricted to.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    /// All 24 hours.
    #[default]
    Full,
    /// 06:00 up to (not including) 19:00.
    Day,
    /// 19:00 up to (not including) 06:00, wrapping across midnight.
    Night,
}

impl Period {
    /// Returns true if readings taken at `hour` belong to this period.
    pub fn contains(&self, hour: u32) -> bool {
        match self {
            Period::Full => hour < 24,
            Period::Day => (6..19).contains(&hour),
            Period::Night => hour < 6 || (19..24).contains(&hour),
        }
    }

    /// Hours of the period in plotting order.
    pub fn hours(&self) -> Vec<u32> {
        match self {
            Period::Full => (0..24).collect(),
            Period::Day => (6..19).collect(),
            Period::Night => (19..24).chain(0..6).collect(),
        }
    }

    /// Position of `hour` on the plotting axis.
    ///
    /// Night hours after midnight continue the evening axis (00:00 -> 24,
    /// 05:00 -> 29) so the period reads as one continuous stretch.
    pub fn plot_hour(&self, hour: u32) -> u32 {
        match self {
            Period::Night if hour < 6 => hour + 24,
            _ => hour,
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Period::Full => write!(f, "Full"),
            Period::Day => write!(f, "Day"),
            Period::Night => write!(f, "Night"),
        }
    }
}

/// How the min/max band of a multi-logger bucket is computed.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum RangeStrategy {
    /// Mean over the bucket's timestamps of the per-timestamp max and min
    /// across loggers.
    #[default]
    AverageSpread,
    /// Max and min of the bucket's per-timestamp averaged samples.
    GlobalExtent,
}

impl fmt::Display for RangeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeStrategy::AverageSpread => write!(f, "Average spread"),
            RangeStrategy::GlobalExtent => write!(f, "Global extent"),
        }
    }
}

/// Width of the time buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BucketWidth {
    /// 24 fixed buckets, one per hour of day (average-day profiles).
    #[default]
    HourOfDay,
    /// Fixed-width buckets of `hours` measured from a reference start.
    Elapsed { hours: u32 },
}

impl fmt::Display for BucketWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BucketWidth::HourOfDay => write!(f, "Hour of day"),
            BucketWidth::Elapsed { hours } => write!(f, "{}h elapsed", hours),
        }
    }
}

/// Configuration describing how readings are bucketed in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WindowPolicy {
    /// Hour-of-day filter applied before bucketing.
    pub period: Period,
    /// Bucket width.
    pub width: BucketWidth,
    /// Band strategy for multi-logger groups.
    pub range: RangeStrategy,
}

impl WindowPolicy {
    /// Average-day policy with one bucket per hour.
    pub fn hour_of_day(period: Period) -> Self {
        Self {
            period,
            width: BucketWidth::HourOfDay,
            range: RangeStrategy::default(),
        }
    }

    /// Longitudinal policy with `hours`-wide buckets from a reference start.
    pub fn elapsed(period: Period, hours: u32) -> Self {
        Self {
            period,
            width: BucketWidth::Elapsed { hours },
            range: RangeStrategy::default(),
        }
    }

    /// Returns the same policy with a different range strategy.
    pub fn with_range(mut self, range: RangeStrategy) -> Self {
        self.range = range;
        self
    }
}

/// A named set of loggers aggregated together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityGroup {
    /// Human-readable name, e.g. `control`.
    pub name: String,
    /// Logger identifiers, de-duplicated, in insertion order.
    pub members: Vec<String>,
}

impl EntityGroup {
    /// Creates a group, dropping duplicate identifiers.
    pub fn new<I, S>(name: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut unique: Vec<String> = Vec::new();
        for member in members {
            let member = member.into();
            if !unique.contains(&member) {
                unique.push(member);
            }
        }

        Self {
            name: name.into(),
            members: unique,
        }
    }

    /// Returns true if `logger` belongs to the group.
    pub fn contains(&self, logger: &str) -> bool {
        self.members.iter().any(|m| m == logger)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Identifies the time bucket a set of samples was aggregated into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BucketKey {
    /// One hour of the average day.
    HourOfDay {
        /// Hour of day, 0-23.
        hour: u32,
        /// Position on the plotting axis (19-29 for the night period).
        plot_hour: u32,
    },
    /// Hours `[start_hour, end_hour)` elapsed since the reference start.
    Elapsed {
        index: i64,
        start_hour: i64,
        end_hour: i64,
    },
}

impl BucketKey {
    /// Hour-of-day bucket, positioned for `period`.
    pub fn hour_of_day(hour: u32, period: Period) -> Self {
        BucketKey::HourOfDay {
            hour,
            plot_hour: period.plot_hour(hour),
        }
    }

    /// Elapsed bucket `index` for buckets of `hours` width.
    pub fn elapsed(index: i64, hours: u32) -> Self {
        let width = i64::from(hours);
        BucketKey::Elapsed {
            index,
            start_hour: index * width,
            end_hour: (index + 1) * width,
        }
    }

    /// Value used to order buckets of the same kind.
    pub fn sort_key(&self) -> i64 {
        match self {
            BucketKey::HourOfDay { plot_hour, .. } => i64::from(*plot_hour),
            BucketKey::Elapsed { index, .. } => *index,
        }
    }

    /// Short label for tables and axis ticks.
    pub fn label(&self) -> String {
        match self {
            BucketKey::HourOfDay { hour, .. } => format!("{:02}:00", hour),
            BucketKey::Elapsed {
                start_hour,
                end_hour,
                ..
            } => format!("{}h to {}h", start_hour, end_hour),
        }
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Summary statistics for one non-empty bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketStats {
    /// Bucket identity.
    pub key: BucketKey,
    /// Upper edge of the range band.
    pub max: f64,
    /// Lower edge of the range band.
    pub min: f64,
    /// Mean of the per-timestamp averaged samples.
    pub mean: f64,
    /// Sample standard deviation of the averaged samples (0 when undefined).
    pub std: f64,
    /// Number of contributing timestamps.
    pub count: usize,
    /// Per-timestamp averaged samples, for distribution plots.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<f64>,
}

/// Why an aggregation produced no buckets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataAvailabilityWarning {
    /// None of the group's loggers appear in the readings.
    NoGroupMembers { group: String },
    /// Readings exist but none are valid inside the requested window.
    NoQualifyingSamples { group: String },
}

impl fmt::Display for DataAvailabilityWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataAvailabilityWarning::NoGroupMembers { group } => {
                write!(f, "no readings found for any logger in group '{}'", group)
            }
            DataAvailabilityWarning::NoQualifyingSamples { group } => {
                write!(f, "group '{}' has no valid samples in the window", group)
            }
        }
    }
}

/// Metadata row describing one logger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggerInfo {
    /// Logger identifier, matching a readings column.
    pub logger: String,
    /// Site the logger is installed at.
    pub settlement: String,
    /// `CONTROL` or the intervention type, e.g. `MEB`.
    pub intervention: String,
    /// Whether the structure is shaded.
    pub shaded: bool,
    /// When the intervention started.
    pub intervention_start: Option<NaiveDateTime>,
    /// End of the post-intervention observation window.
    pub post_intervention_end: Option<NaiveDateTime>,
}

impl LoggerInfo {
    /// Returns true if the logger carries the given intervention label.
    pub fn has_intervention(&self, label: &str) -> bool {
        self.intervention.eq_ignore_ascii_case(label)
    }
}

/// Returns "Shaded" or "Unshaded".
pub fn shading_label(shaded: bool) -> &'static str {
    if shaded {
        "Shaded"
    } else {
        "Unshaded"
    }
}

/// One control-vs-intervention comparison to compute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparisonSpec {
    pub settlement: String,
    /// Intervention type compared against the control loggers.
    pub intervention: String,
    pub period: Period,
    pub shaded: bool,
}

impl ComparisonSpec {
    /// Label such as `Rainbow Field - MEB - Shaded - Full`.
    pub fn label(&self) -> String {
        format!(
            "{} - {} - {} - {}",
            self.settlement,
            self.intervention,
            shading_label(self.shaded),
            self.period
        )
    }
}

impl fmt::Display for ComparisonSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Start and end of an intervention's observation window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterventionWindow {
    pub start: NaiveDateTime,
    /// Open-ended when the metadata has no post-intervention end.
    pub end: Option<NaiveDateTime>,
}

impl InterventionWindow {
    /// Returns true for instants before the intervention started.
    pub fn is_pre(&self, timestamp: NaiveDateTime) -> bool {
        timestamp < self.start
    }

    /// Returns true for instants inside the post-intervention window.
    pub fn is_post(&self, timestamp: NaiveDateTime) -> bool {
        timestamp >= self.start && self.end.map_or(true, |end| timestamp <= end)
    }
}

/// Which side of a comparison a warning refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupRole {
    Control,
    Intervention,
}

impl fmt::Display for GroupRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupRole::Control => write!(f, "Control"),
            GroupRole::Intervention => write!(f, "Intervention"),
        }
    }
}

/// Non-fatal conditions noticed while running a comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ComparisonWarning {
    /// A logger has no valid value before or after the intervention.
    InactiveLogger { logger: String, role: GroupRole },
    /// One side of the comparison has no active loggers.
    InsufficientLoggers { control: usize, intervention: usize },
    /// One side produced no buckets.
    NoData {
        role: GroupRole,
        cause: DataAvailabilityWarning,
    },
}

impl fmt::Display for ComparisonWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComparisonWarning::InactiveLogger { logger, role } => {
                write!(f, "{} logger {} has no valid data", role, logger)
            }
            ComparisonWarning::InsufficientLoggers {
                control,
                intervention,
            } => write!(
                f,
                "insufficient active loggers ({} control, {} intervention)",
                control, intervention
            ),
            ComparisonWarning::NoData { role, cause } => write!(f, "{}: {}", role, cause),
        }
    }
}

/// Outcome of a comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonStatus {
    /// Both sides produced statistics.
    Complete,
    /// At least one side had nothing to show.
    NoData,
    /// The comparison could not be configured.
    Failed,
}

impl fmt::Display for ComparisonStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComparisonStatus::Complete => write!(f, "Complete"),
            ComparisonStatus::NoData => write!(f, "No data"),
            ComparisonStatus::Failed => write!(f, "Failed"),
        }
    }
}

/// Statistics for one comparison, ready for plotting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub spec: ComparisonSpec,
    pub status: ComparisonStatus,
    /// Active control loggers.
    pub control_loggers: Vec<String>,
    /// Active intervention loggers.
    pub intervention_loggers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window: Option<InterventionWindow>,
    /// Control buckets (control loggers plus pre-intervention data).
    pub control: Vec<BucketStats>,
    /// Intervention buckets (post-intervention data only).
    pub intervention: Vec<BucketStats>,
    pub warnings: Vec<ComparisonWarning>,
    /// Error message if the comparison failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ComparisonResult {
    /// Creates a result with no statistics yet.
    pub fn new(spec: ComparisonSpec) -> Self {
        Self {
            spec,
            status: ComparisonStatus::NoData,
            control_loggers: Vec::new(),
            intervention_loggers: Vec::new(),
            window: None,
            control: Vec::new(),
            intervention: Vec::new(),
            warnings: Vec::new(),
            error: None,
        }
    }

    /// Creates a failed comparison result.
    pub fn failed(spec: ComparisonSpec, error: String) -> Self {
        Self {
            status: ComparisonStatus::Failed,
            error: Some(error),
            ..Self::new(spec)
        }
    }

    /// Returns true when both sides have at least one bucket.
    pub fn has_data(&self) -> bool {
        !self.control.is_empty() && !self.intervention.is_empty()
    }

    /// Drops the per-bucket sample arrays.
    pub fn strip_samples(&mut self) {
        for bucket in self.control.iter_mut().chain(self.intervention.iter_mut()) {
            bucket.values.clear();
        }
    }
}

/// `describe`-style summary of a sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Describe {
    pub count: usize,
    pub mean: f64,
    /// Sample standard deviation; `None` for fewer than two values.
    pub std: Option<f64>,
    pub min: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub max: f64,
}

/// Grouping dimension for whole-dataset summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Intervention,
    Settlement,
    Shading,
    TimeOfDay,
}

impl Dimension {
    pub const ALL: [Dimension; 4] = [
        Dimension::Intervention,
        Dimension::Settlement,
        Dimension::Shading,
        Dimension::TimeOfDay,
    ];
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::Intervention => write!(f, "Intervention"),
            Dimension::Settlement => write!(f, "Settlement"),
            Dimension::Shading => write!(f, "Shading"),
            Dimension::TimeOfDay => write!(f, "Time of Day"),
        }
    }
}

/// Summary of one label within a dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub label: String,
    pub stats: Describe,
}

/// Summaries of every label of a dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionSummary {
    pub dimension: Dimension,
    pub groups: Vec<GroupSummary>,
}

/// Two-sample Student t statistic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TTestResult {
    /// Label such as `MEB vs CONTROL`.
    pub label: String,
    pub t_statistic: f64,
    pub degrees_of_freedom: usize,
    /// Two-sided p-value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p_value: Option<f64>,
}

/// Metadata about the analysis report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    /// Readings CSV the analysis was run on.
    pub readings_source: String,
    /// Logger metadata CSV.
    pub loggers_source: String,
    /// Date and time of the analysis.
    pub analysis_date: DateTime<Utc>,
    /// Number of readings loaded.
    pub readings_loaded: usize,
    /// Rows skipped because of unparseable timestamps.
    pub rows_skipped: usize,
    /// Number of loggers in the metadata table.
    pub loggers: usize,
    /// Bucket width used.
    pub bucket_width: BucketWidth,
    /// Range strategy used.
    pub range_strategy: RangeStrategy,
    /// Number of comparisons run.
    pub comparisons_run: usize,
    /// Number of comparisons with statistics on both sides.
    pub comparisons_with_data: usize,
    /// Number of comparisons that failed.
    pub comparisons_failed: usize,
    /// Duration of the analysis in seconds.
    pub duration_seconds: f64,
}

/// The complete analysis report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub metadata: ReportMetadata,
    pub comparisons: Vec<ComparisonResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub summaries: Vec<DimensionSummary>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub t_tests: Vec<TTestResult>,
}
