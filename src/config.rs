//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.loggerstats.toml` files.

use crate::models::{BucketWidth, Period, RangeStrategy};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = ".loggerstats.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Input data settings.
    #[serde(default)]
    pub data: DataConfig,

    /// Comparison and bucketing settings.
    #[serde(default)]
    pub analysis: AnalysisConfig,

    /// Report settings.
    #[serde(default)]
    pub report: ReportConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Default output file path.
    #[serde(default = "default_output")]
    pub output: PathBuf,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            verbose: false,
        }
    }
}

fn default_output() -> PathBuf {
    PathBuf::from("logger_report.md")
}

/// Input file locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Wide readings CSV.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readings: Option<PathBuf>,

    /// Logger metadata CSV.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loggers: Option<PathBuf>,

    /// Header of the timestamp column in the readings file.
    #[serde(default = "default_timestamp_column")]
    pub timestamp_column: String,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            readings: None,
            loggers: None,
            timestamp_column: default_timestamp_column(),
        }
    }
}

fn default_timestamp_column() -> String {
    "DateTime".to_string()
}

/// Which comparisons to run and how to bucket them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Settlements to compare.
    #[serde(default = "default_settlements")]
    pub settlements: Vec<String>,

    /// Intervention types compared against control.
    #[serde(default = "default_interventions")]
    pub interventions: Vec<String>,

    /// Periods of the day to analyse.
    #[serde(default = "default_periods")]
    pub periods: Vec<Period>,

    /// Shading conditions to compare.
    #[serde(default = "default_shading")]
    pub shading: Vec<bool>,

    /// Intervention label marking control loggers.
    #[serde(default = "default_control_label")]
    pub control_label: String,

    /// How the max/min band is derived.
    #[serde(default)]
    pub range_strategy: RangeStrategy,

    /// Elapsed bucket width in hours; hour-of-day buckets when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_hours: Option<u32>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            settlements: default_settlements(),
            interventions: default_interventions(),
            periods: default_periods(),
            shading: default_shading(),
            control_label: default_control_label(),
            range_strategy: RangeStrategy::default(),
            bucket_hours: None,
        }
    }
}

impl AnalysisConfig {
    /// Bucket width selected by `bucket_hours`.
    pub fn bucket_width(&self) -> BucketWidth {
        match self.bucket_hours {
            Some(hours) => BucketWidth::Elapsed { hours },
            None => BucketWidth::HourOfDay,
        }
    }
}

fn default_settlements() -> Vec<String> {
    vec!["Rainbow Field".to_string(), "Sports Complex".to_string()]
}

fn default_interventions() -> Vec<String> {
    vec!["MEB".to_string(), "RBF".to_string()]
}

fn default_periods() -> Vec<Period> {
    vec![Period::Full]
}

fn default_shading() -> Vec<bool> {
    vec![true, false]
}

fn default_control_label() -> String {
    "CONTROL".to_string()
}

/// Report generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Keep per-bucket sample arrays in JSON output.
    #[serde(default)]
    pub include_samples: bool,

    /// Add whole-dataset summaries and t statistics.
    #[serde(default)]
    pub include_summaries: bool,

    /// Decimal places in Markdown tables.
    #[serde(default = "default_decimals")]
    pub decimals: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            include_samples: false,
            include_summaries: false,
            decimals: default_decimals(),
        }
    }
}

fn default_decimals() -> usize {
    2
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(DEFAULT_CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings.
    /// Only values given on the command line override the file.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref output) = args.output {
            self.general.output = output.clone();
        }
        if let Some(ref readings) = args.readings {
            self.data.readings = Some(readings.clone());
        }
        if let Some(ref loggers) = args.loggers {
            self.data.loggers = Some(loggers.clone());
        }

        if let Some(ref settlements) = args.settlements {
            self.analysis.settlements = settlements.clone();
        }
        if let Some(ref interventions) = args.interventions {
            self.analysis.interventions = interventions.clone();
        }
        if let Some(ref periods) = args.periods {
            self.analysis.periods = periods.clone();
        }
        if let Some(hours) = args.bucket_hours {
            self.analysis.bucket_hours = Some(hours);
        }
        if let Some(range) = args.range {
            self.analysis.range_strategy = range;
        }

        // Flags only ever switch features on
        if args.verbose {
            self.general.verbose = true;
        }
        if args.summary {
            self.report.include_summaries = true;
        }
        if args.include_samples {
            self.report.include_samples = true;
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::tests::make_args;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.general.output, PathBuf::from("logger_report.md"));
        assert_eq!(config.data.timestamp_column, "DateTime");
        assert_eq!(config.analysis.settlements.len(), 2);
        assert_eq!(config.analysis.shading, vec![true, false]);
        assert_eq!(config.analysis.bucket_width(), BucketWidth::HourOfDay);
        assert_eq!(config.report.decimals, 2);
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[general]
output = "custom_report.json"

[data]
readings = "data/readings.csv"
timestamp_column = "Time"

[analysis]
settlements = ["Rainbow Field"]
periods = ["day", "night"]
range_strategy = "global_extent"
bucket_hours = 24
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.general.output, PathBuf::from("custom_report.json"));
        assert_eq!(config.data.readings, Some(PathBuf::from("data/readings.csv")));
        assert_eq!(config.data.loggers, None);
        assert_eq!(config.data.timestamp_column, "Time");
        assert_eq!(config.analysis.settlements, vec!["Rainbow Field"]);
        assert_eq!(config.analysis.interventions, vec!["MEB", "RBF"]);
        assert_eq!(config.analysis.periods, vec![Period::Day, Period::Night]);
        assert_eq!(config.analysis.range_strategy, RangeStrategy::GlobalExtent);
        assert_eq!(
            config.analysis.bucket_width(),
            BucketWidth::Elapsed { hours: 24 }
        );
    }

    #[test]
    fn test_merge_with_args() {
        let mut config = Config::default();
        config.analysis.bucket_hours = Some(12);

        let mut args = make_args();
        args.output = Some(PathBuf::from("out.csv"));
        args.interventions = Some(vec!["MEB".to_string()]);
        args.range = Some(RangeStrategy::GlobalExtent);
        args.summary = true;

        config.merge_with_args(&args);
        assert_eq!(config.general.output, PathBuf::from("out.csv"));
        assert_eq!(config.data.readings, args.readings);
        assert_eq!(config.analysis.interventions, vec!["MEB"]);
        assert_eq!(config.analysis.settlements.len(), 2);
        assert_eq!(config.analysis.bucket_hours, Some(12));
        assert_eq!(config.analysis.range_strategy, RangeStrategy::GlobalExtent);
        assert!(config.report.include_summaries);
        assert!(!config.report.include_samples);
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(toml_str.contains("[general]"));
        assert!(toml_str.contains("[analysis]"));
        assert!(toml_str.contains("[report]"));

        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.analysis.periods, vec![Period::Full]);
    }
}
