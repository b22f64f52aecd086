//! Loggerstats - time-windowed statistics for environmental sensor loggers
//!
//! A CLI tool that compares control and intervention temperature loggers
//! before and after an intervention and writes per-bucket statistics
//! ready for plotting.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Runtime error (missing input, unreadable CSV, bad config, etc.)
//!   2 - A comparison produced no data and --fail-on-empty was set

mod analysis;
mod cli;
mod config;
mod loader;
mod models;
mod report;

use analysis::{summarize_all, t_tests, ComparisonRunner};
use anyhow::{Context, Result};
use chrono::Utc;
use cli::{Args, OutputFormat};
use config::{Config, DEFAULT_CONFIG_FILE};
use indicatif::{ProgressBar, ProgressStyle};
use models::{ComparisonStatus, Report, ReportMetadata};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Load configuration first so the file can raise verbosity
    let (mut config, source) = match load_config(&args) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    };
    config.merge_with_args(&args);

    // Initialize logging
    init_logging(args.log_level(config.general.verbose))?;

    info!("Loggerstats v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);
    source.log();

    match run_analysis(args, config) {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Analysis failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .loggerstats.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(DEFAULT_CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            DEFAULT_CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", DEFAULT_CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", DEFAULT_CONFIG_FILE);
    println!("   Edit it to set input files, settlements, interventions, and periods.");
    Ok(())
}

/// Initialize logging at the given level.
fn init_logging(level: tracing::Level) -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

/// Run the complete analysis workflow. Returns the exit code (0 or 2).
fn run_analysis(args: Args, config: Config) -> Result<i32> {
    let start_time = Instant::now();

    let readings_path = required_path(config.data.readings.as_ref(), "--readings")?;
    let loggers_path = required_path(config.data.loggers.as_ref(), "--loggers")?;

    // Step 1: Load the data
    println!("📥 Loading readings: {}", readings_path.display());
    let reading_set = loader::load_readings(&readings_path, &config.data.timestamp_column)
        .with_context(|| format!("Failed to load readings from {}", readings_path.display()))?;
    if reading_set.skipped_rows > 0 {
        warn!(
            "Skipped {} of {} rows with malformed timestamps",
            reading_set.skipped_rows, reading_set.rows
        );
    }

    let loggers = loader::load_loggers(&loggers_path)
        .with_context(|| format!("Failed to load logger table from {}", loggers_path.display()))?;
    info!(
        "Loaded {} readings from {} loggers, {} logger records",
        reading_set.readings.len(),
        reading_set.loggers.len(),
        loggers.len()
    );

    for record in &loggers {
        if !reading_set.loggers.contains(&record.logger) {
            debug!("Logger {} has no readings column", record.logger);
        }
    }

    // Step 2: Plan the comparisons
    let specs = analysis::plan(&config.analysis);

    // Handle --dry-run: list comparisons and exit
    if args.dry_run {
        return handle_dry_run(&specs);
    }

    // Step 3: Run every comparison
    println!(
        "\n🔬 Running {} comparisons ({}, {})...",
        specs.len(),
        config.analysis.bucket_width(),
        config.analysis.range_strategy
    );

    let runner = ComparisonRunner::new(&reading_set.readings, &loggers, &config.analysis);
    let progress = comparison_progress(specs.len() as u64, args.quiet);

    let mut comparisons = Vec::with_capacity(specs.len());
    for spec in &specs {
        progress.set_message(spec.label());
        let result = runner.run(spec);

        match result.status {
            ComparisonStatus::Failed => {
                warn!(
                    "{}: {}",
                    spec,
                    result.error.as_deref().unwrap_or("unknown error")
                );
            }
            _ => {
                for warning in &result.warnings {
                    warn!("{}: {}", spec, warning);
                }
            }
        }

        comparisons.push(result);
        progress.inc(1);
    }
    progress.finish_and_clear();

    // Step 4: Whole-dataset statistics
    let (summaries, tests) = if config.report.include_summaries {
        info!("Computing summary statistics");
        (
            summarize_all(&reading_set.readings, &loggers),
            t_tests(
                &reading_set.readings,
                &loggers,
                &config.analysis.control_label,
            ),
        )
    } else {
        (Vec::new(), Vec::new())
    };

    // Step 5: Build the report
    println!("\n📝 Generating report...");

    let with_data = comparisons.iter().filter(|c| c.has_data()).count();
    let failed = comparisons
        .iter()
        .filter(|c| c.status == ComparisonStatus::Failed)
        .count();
    let empty = comparisons.len() - with_data;

    let metadata = ReportMetadata {
        readings_source: readings_path.display().to_string(),
        loggers_source: loggers_path.display().to_string(),
        analysis_date: Utc::now(),
        readings_loaded: reading_set.readings.len(),
        rows_skipped: reading_set.skipped_rows,
        loggers: loggers.len(),
        bucket_width: config.analysis.bucket_width(),
        range_strategy: config.analysis.range_strategy,
        comparisons_run: comparisons.len(),
        comparisons_with_data: with_data,
        comparisons_failed: failed,
        duration_seconds: start_time.elapsed().as_secs_f64(),
    };

    let report = Report {
        metadata,
        comparisons,
        summaries,
        t_tests: tests,
    };

    // Step 6: Render and save
    let output = match args.format {
        OutputFormat::Markdown => {
            report::generate_markdown_report(&report, config.report.decimals)
        }
        OutputFormat::Json => {
            report::generate_json_report(&report, config.report.include_samples)?
        }
        OutputFormat::Csv => report::generate_csv_report(&report)?,
    };

    let output_path = &config.general.output;
    std::fs::write(output_path, &output)
        .with_context(|| format!("Failed to write report to {}", output_path.display()))?;

    // Print summary
    println!("\n📊 Analysis Summary:");
    println!("   Readings: {}", report.metadata.readings_loaded);
    println!("   Comparisons: {}", report.metadata.comparisons_run);
    println!(
        "   - ✅ With data: {} | ⚠️  Empty: {} | ❌ Failed: {}",
        with_data,
        empty - failed,
        failed
    );
    println!("   Duration: {:.1}s", report.metadata.duration_seconds);
    println!(
        "\n✅ Analysis complete! Report saved to: {}",
        output_path.display()
    );

    if args.fail_on_empty && empty > 0 {
        eprintln!(
            "\n⛔ {} comparison(s) produced no data. Failing (exit code 2).",
            empty
        );
        return Ok(2);
    }

    Ok(0)
}

/// Handle --dry-run: print the planned comparisons and exit.
fn handle_dry_run(specs: &[models::ComparisonSpec]) -> Result<i32> {
    println!("\n🔍 Dry run: planned comparisons (nothing computed)...\n");

    if specs.is_empty() {
        println!("   No comparisons configured.");
    } else {
        for spec in specs {
            println!("     📄 {}", spec);
        }
        println!("\n   Total: {} comparisons", specs.len());
    }

    println!("\n✅ Dry run complete.");
    Ok(0)
}

fn comparison_progress(len: u64, quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb
}

fn required_path(path: Option<&PathBuf>, flag: &str) -> Result<PathBuf> {
    path.cloned().with_context(|| {
        format!(
            "No input given: pass {} or set it in {}",
            flag, DEFAULT_CONFIG_FILE
        )
    })
}

/// Where the configuration came from, reported once logging is up.
enum ConfigSource {
    File(PathBuf),
    Defaults,
    Unreadable(String),
}

impl ConfigSource {
    fn log(&self) {
        match self {
            ConfigSource::File(path) => info!("Loaded config from: {}", path.display()),
            ConfigSource::Defaults => debug!("No config file found, using defaults"),
            ConfigSource::Unreadable(e) => warn!("Failed to load config: {}", e),
        }
    }
}

/// Load configuration from file or use defaults.
///
/// An explicit `--config` path must load; a broken default file falls
/// back to defaults.
fn load_config(args: &Args) -> Result<(Config, ConfigSource)> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        let config = Config::load(config_path)?;
        return Ok((config, ConfigSource::File(config_path.clone())));
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => Ok((config, ConfigSource::File(PathBuf::from(DEFAULT_CONFIG_FILE)))),
        Ok(None) => Ok((Config::default(), ConfigSource::Defaults)),
        Err(e) => Ok((Config::default(), ConfigSource::Unreadable(format!("{:#}", e)))),
    }
}
