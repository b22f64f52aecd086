//! Report generation.
//!
//! Renders comparison results as Markdown for reading, JSON for archiving,
//! or a flat CSV that plotting tools can consume directly.

use crate::models::{
    BucketStats, ComparisonResult, ComparisonStatus, DimensionSummary, GroupRole, Report,
    ReportMetadata, TTestResult,
};
use anyhow::{Context, Result};
use serde::Serialize;

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &Report, decimals: usize) -> String {
    let mut output = String::new();

    // Title
    output.push_str("# Logger Statistics Report\n\n");

    // Metadata section
    output.push_str(&generate_metadata_section(&report.metadata));

    // Table of contents
    output.push_str(&generate_table_of_contents(report));

    // One section per comparison
    output.push_str("## Comparisons\n\n");
    for comparison in &report.comparisons {
        output.push_str(&generate_comparison_section(comparison, decimals));
    }

    // Whole-dataset summaries
    output.push_str(&generate_summaries_section(&report.summaries, decimals));
    output.push_str(&generate_t_test_section(&report.t_tests, decimals));

    // Footer
    output.push_str(&generate_footer());

    output
}

/// Generate the metadata section.
fn generate_metadata_section(metadata: &ReportMetadata) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Readings:** `{}`\n", metadata.readings_source));
    section.push_str(&format!("- **Logger Table:** `{}`\n", metadata.loggers_source));
    section.push_str(&format!(
        "- **Analysis Date:** {}\n",
        metadata.analysis_date.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!(
        "- **Readings Loaded:** {} ({} loggers)\n",
        metadata.readings_loaded, metadata.loggers
    ));
    if metadata.rows_skipped > 0 {
        section.push_str(&format!("- **Rows Skipped:** {}\n", metadata.rows_skipped));
    }
    section.push_str(&format!("- **Buckets:** {}\n", metadata.bucket_width));
    section.push_str(&format!("- **Range:** {}\n", metadata.range_strategy));
    section.push_str(&format!(
        "- **Comparisons:** {} run, {} with data",
        metadata.comparisons_run, metadata.comparisons_with_data
    ));
    if metadata.comparisons_failed > 0 {
        section.push_str(&format!(", {} failed", metadata.comparisons_failed));
    }
    section.push('\n');
    section.push_str(&format!(
        "- **Analysis Duration:** {:.1}s\n",
        metadata.duration_seconds
    ));
    section.push('\n');

    section
}

fn anchor(label: &str) -> String {
    label
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == ' ' || *c == '-')
        .map(|c| if c == ' ' { '-' } else { c })
        .collect()
}

/// Generate the table of contents.
fn generate_table_of_contents(report: &Report) -> String {
    let mut toc = String::new();

    toc.push_str("## Table of Contents\n\n");
    toc.push_str("- [Metadata](#metadata)\n");
    toc.push_str("- [Comparisons](#comparisons)\n");

    for comparison in &report.comparisons {
        let label = comparison.spec.label();
        toc.push_str(&format!("  - [{}](#{})\n", label, anchor(&label)));
    }

    if !report.summaries.is_empty() {
        toc.push_str("- [Summary Statistics](#summary-statistics)\n");
    }
    if !report.t_tests.is_empty() {
        toc.push_str("- [t Statistics](#t-statistics)\n");
    }

    toc.push('\n');

    toc
}

/// Generate the section for a single comparison.
fn generate_comparison_section(comparison: &ComparisonResult, decimals: usize) -> String {
    let mut section = String::new();

    section.push_str(&format!("### {}\n\n", comparison.spec.label()));
    section.push_str(&format!("*Status: {}*\n\n", comparison.status));

    if let Some(ref error) = comparison.error {
        section.push_str(&format!("> **Error:** {}\n\n", error));
    }

    if let Some(window) = comparison.window {
        let end = window
            .end
            .map(|e| e.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "open".to_string());
        section.push_str(&format!(
            "- **Intervention:** {} to {}\n",
            window.start.format("%Y-%m-%d %H:%M"),
            end
        ));
    }
    if comparison.status != ComparisonStatus::Failed {
        section.push_str(&format!(
            "- **Control loggers:** {}\n",
            logger_list(&comparison.control_loggers)
        ));
        section.push_str(&format!(
            "- **Intervention loggers:** {}\n\n",
            logger_list(&comparison.intervention_loggers)
        ));
    }

    if !comparison.warnings.is_empty() {
        section.push_str("**Warnings:**\n\n");
        for warning in &comparison.warnings {
            section.push_str(&format!("- {}\n", warning));
        }
        section.push('\n');
    }

    if !comparison.control.is_empty() {
        section.push_str("#### Control\n\n");
        section.push_str(&generate_bucket_table(&comparison.control, decimals));
    }
    if !comparison.intervention.is_empty() {
        section.push_str("#### Intervention\n\n");
        section.push_str(&generate_bucket_table(&comparison.intervention, decimals));
    }

    section.push_str("---\n\n");

    section
}

fn logger_list(loggers: &[String]) -> String {
    if loggers.is_empty() {
        "none".to_string()
    } else {
        loggers.join(", ")
    }
}

/// Generate a statistics table for a list of buckets.
fn generate_bucket_table(buckets: &[BucketStats], decimals: usize) -> String {
    let mut table = String::new();

    table.push_str("| Bucket | Samples | Mean | Min | Max | Std | Q1 | Median | Q3 |\n");
    table.push_str("|:---|:---:|---:|---:|---:|---:|---:|---:|---:|\n");

    for bucket in buckets {
        let quartiles = match bucket.quartiles() {
            Some(q) => format!(
                "{:.p$} | {:.p$} | {:.p$}",
                q.q1,
                q.median,
                q.q3,
                p = decimals
            ),
            None => "- | - | -".to_string(),
        };
        table.push_str(&format!(
            "| {} | {} | {:.p$} | {:.p$} | {:.p$} | {:.p$} | {} |\n",
            bucket.key.label(),
            bucket.count,
            bucket.mean,
            bucket.min,
            bucket.max,
            bucket.std,
            quartiles,
            p = decimals
        ));
    }
    table.push('\n');

    table
}

/// Generate the whole-dataset summaries.
fn generate_summaries_section(summaries: &[DimensionSummary], decimals: usize) -> String {
    if summaries.is_empty() {
        return String::new();
    }

    let mut section = String::new();

    section.push_str("## Summary Statistics\n\n");

    for summary in summaries {
        section.push_str(&format!("### By {}\n\n", summary.dimension));
        section.push_str("| Group | Count | Mean | Std | Min | Q1 | Median | Q3 | Max |\n");
        section.push_str("|:---|:---:|---:|---:|---:|---:|---:|---:|---:|\n");

        for group in &summary.groups {
            let s = &group.stats;
            let std = s
                .std
                .map(|v| format!("{:.p$}", v, p = decimals))
                .unwrap_or_else(|| "-".to_string());
            section.push_str(&format!(
                "| {} | {} | {:.p$} | {} | {:.p$} | {:.p$} | {:.p$} | {:.p$} | {:.p$} |\n",
                group.label,
                s.count,
                s.mean,
                std,
                s.min,
                s.q1,
                s.median,
                s.q3,
                s.max,
                p = decimals
            ));
        }
        section.push('\n');
    }

    section
}

/// Generate the t statistic table.
fn generate_t_test_section(t_tests: &[TTestResult], decimals: usize) -> String {
    if t_tests.is_empty() {
        return String::new();
    }

    let mut section = String::new();

    section.push_str("## t Statistics\n\n");
    section.push_str("| Comparison | t | Degrees of Freedom | p-value |\n");
    section.push_str("|:---|---:|---:|---:|\n");
    for test in t_tests {
        let p_value = test
            .p_value
            .map(|p| format!("{:.4}", p))
            .unwrap_or_else(|| "-".to_string());
        section.push_str(&format!(
            "| {} | {:.p$} | {} | {} |\n",
            test.label,
            test.t_statistic,
            test.degrees_of_freedom,
            p_value,
            p = decimals
        ));
    }
    section.push('\n');

    section
}

/// Generate the report footer.
fn generate_footer() -> String {
    let mut footer = String::new();

    footer.push_str("---\n\n");
    footer.push_str(&format!(
        "*Report generated by loggerstats v{}*\n",
        env!("CARGO_PKG_VERSION")
    ));

    footer
}

/// Generate a JSON report.
///
/// Per-bucket sample arrays are dropped unless `include_samples` is set.
pub fn generate_json_report(report: &Report, include_samples: bool) -> Result<String> {
    if include_samples {
        return serde_json::to_string_pretty(report).map_err(Into::into);
    }

    let mut stripped = report.clone();
    for comparison in &mut stripped.comparisons {
        comparison.strip_samples();
    }
    serde_json::to_string_pretty(&stripped).map_err(Into::into)
}

/// One CSV row per (comparison, group, bucket).
#[derive(Debug, Serialize)]
struct BucketRow<'a> {
    comparison: String,
    settlement: &'a str,
    intervention: &'a str,
    shading: &'static str,
    period: String,
    group: GroupRole,
    bucket: String,
    position: i64,
    samples: usize,
    mean: f64,
    min: f64,
    max: f64,
    std: f64,
    q1: Option<f64>,
    median: Option<f64>,
    q3: Option<f64>,
}

impl<'a> BucketRow<'a> {
    fn new(comparison: &'a ComparisonResult, group: GroupRole, bucket: &BucketStats) -> Self {
        let spec = &comparison.spec;
        let quartiles = bucket.quartiles();
        Self {
            comparison: spec.label(),
            settlement: &spec.settlement,
            intervention: &spec.intervention,
            shading: crate::models::shading_label(spec.shaded),
            period: spec.period.to_string(),
            group,
            bucket: bucket.key.label(),
            position: bucket.key.sort_key(),
            samples: bucket.count,
            mean: bucket.mean,
            min: bucket.min,
            max: bucket.max,
            std: bucket.std,
            q1: quartiles.map(|q| q.q1),
            median: quartiles.map(|q| q.median),
            q3: quartiles.map(|q| q.q3),
        }
    }
}

/// Generate a flat CSV report of every bucket.
///
/// Quartile columns are left empty for buckets without samples.
pub fn generate_csv_report(report: &Report) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(Vec::new());

    for comparison in &report.comparisons {
        let sides = [
            (GroupRole::Control, &comparison.control),
            (GroupRole::Intervention, &comparison.intervention),
        ];
        for (role, buckets) in sides {
            for bucket in buckets {
                wtr.serialize(BucketRow::new(comparison, role, bucket))?;
            }
        }
    }

    let bytes = wtr.into_inner().context("Failed to flush CSV report")?;
    String::from_utf8(bytes).context("CSV report is not valid UTF-8")
}
