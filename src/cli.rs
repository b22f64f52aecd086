//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::models::{Period, RangeStrategy};
use clap::Parser;
use std::path::PathBuf;

/// Loggerstats - hourly statistics for environmental sensor loggers
///
/// Compares control and intervention loggers before and after an
/// intervention, bucketed by hour of day or by time elapsed since the
/// intervention. Markdown/JSON/CSV reports.
///
/// Examples:
///   loggerstats --readings readings.csv --loggers logger_flags.csv
///   loggerstats --readings readings.csv --loggers logger_flags.csv --periods day,night
///   loggerstats --readings readings.csv --loggers logger_flags.csv --bucket-hours 24 --format csv
///   loggerstats --readings readings.csv --loggers logger_flags.csv --dry-run
///   loggerstats --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Wide readings CSV (timestamp column plus one column per logger)
    #[arg(short, long, value_name = "FILE", env = "LOGGERSTATS_READINGS")]
    pub readings: Option<PathBuf>,

    /// Logger metadata CSV
    ///
    /// Columns: Loggers, Settlement, Intervention, Shaded,
    /// Intervention_Start, Post_Intervention_End.
    #[arg(short, long, value_name = "FILE", env = "LOGGERSTATS_LOGGERS")]
    pub loggers: Option<PathBuf>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .loggerstats.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Output file path for the report
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output format (markdown, json, csv)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Settlements to compare (comma-separated)
    #[arg(long, value_name = "NAMES", value_delimiter = ',')]
    pub settlements: Option<Vec<String>>,

    /// Intervention types to compare against control (comma-separated)
    ///
    /// Example: --interventions MEB,RBF
    #[arg(long, value_name = "TYPES", value_delimiter = ',')]
    pub interventions: Option<Vec<String>>,

    /// Periods of the day to analyse (comma-separated: full, day, night)
    #[arg(long, value_name = "PERIODS", value_delimiter = ',')]
    pub periods: Option<Vec<Period>>,

    /// Bucket by hours elapsed since the intervention start
    ///
    /// Without this flag readings are bucketed by hour of day.
    #[arg(long, value_name = "HOURS")]
    pub bucket_hours: Option<u32>,

    /// How the max/min band is computed (average-spread, global-extent)
    #[arg(long, value_name = "STRATEGY")]
    pub range: Option<RangeStrategy>,

    /// Add whole-dataset summaries and t statistics to the report
    #[arg(long)]
    pub summary: bool,

    /// Keep per-bucket sample arrays in JSON output
    #[arg(long)]
    pub include_samples: bool,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Dry run: load the data and list the planned comparisons
    #[arg(long)]
    pub dry_run: bool,

    /// Exit with code 2 when any comparison produced no data
    ///
    /// Useful for scheduled runs that should flag missing logger data.
    #[arg(long)]
    pub fail_on_empty: bool,

    /// Generate a default .loggerstats.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
    /// Flat CSV, one row per bucket
    Csv,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if self.bucket_hours == Some(0) {
            return Err("Bucket width must be at least 1 hour".to_string());
        }

        if let Some(ref list) = self.settlements {
            if list.iter().all(|s| s.trim().is_empty()) {
                return Err("At least one settlement is required".to_string());
            }
        }
        if let Some(ref list) = self.interventions {
            if list.iter().all(|s| s.trim().is_empty()) {
                return Err("At least one intervention type is required".to_string());
            }
        }

        // Input files may also come from the config file, so only check
        // the ones given here
        for path in [&self.readings, &self.loggers].into_iter().flatten() {
            if !path.is_file() {
                return Err(format!("Input file does not exist: {}", path.display()));
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    ///
    /// `config_verbose` comes from the config file; `--quiet` still wins.
    pub fn log_level(&self, config_verbose: bool) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose || config_verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn make_args() -> Args {
        Args {
            readings: None,
            loggers: None,
            config: None,
            output: None,
            format: OutputFormat::Markdown,
            settlements: None,
            interventions: None,
            periods: None,
            bucket_hours: None,
            range: None,
            summary: false,
            include_samples: false,
            verbose: false,
            quiet: false,
            dry_run: false,
            fail_on_empty: false,
            init_config: false,
        }
    }

    #[test]
    fn test_parse_flags() {
        let args = Args::try_parse_from([
            "loggerstats",
            "--periods",
            "day,night",
            "--interventions",
            "MEB,RBF",
            "--bucket-hours",
            "24",
            "--range",
            "global-extent",
            "--format",
            "csv",
        ])
        .unwrap();

        assert_eq!(args.periods, Some(vec![Period::Day, Period::Night]));
        assert_eq!(
            args.interventions,
            Some(vec!["MEB".to_string(), "RBF".to_string()])
        );
        assert_eq!(args.bucket_hours, Some(24));
        assert_eq!(args.range, Some(RangeStrategy::GlobalExtent));
        assert_eq!(args.format, OutputFormat::Csv);
    }

    #[test]
    fn test_validation_conflicting_options() {
        let mut args = make_args();
        args.verbose = true;
        args.quiet = true;
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_zero_bucket_width() {
        let mut args = make_args();
        args.bucket_hours = Some(0);
        assert!(args.validate().is_err());

        args.bucket_hours = Some(1);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_validation_missing_input() {
        let mut args = make_args();
        args.readings = Some(PathBuf::from("no/such/readings.csv"));
        assert!(args.validate().unwrap_err().contains("does not exist"));

        args.readings = Some(
            PathBuf::from(env!("CARGO_MANIFEST_DIR"))
                .join("fixtures")
                .join("readings.csv"),
        );
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_validation_empty_lists() {
        let mut args = make_args();
        args.settlements = Some(vec![String::new()]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_log_level() {
        let mut args = make_args();
        assert_eq!(args.log_level(false), tracing::Level::INFO);

        args.verbose = true;
        assert_eq!(args.log_level(false), tracing::Level::DEBUG);

        args.verbose = false;
        args.quiet = true;
        assert_eq!(args.log_level(false), tracing::Level::ERROR);
    }

    #[test]
    fn test_log_level_from_config() {
        let mut args = make_args();
        assert_eq!(args.log_level(true), tracing::Level::DEBUG);

        args.quiet = true;
        assert_eq!(args.log_level(true), tracing::Level::ERROR);
    }
}
