//! CSV loading for logger readings and logger metadata.
//!
//! Readings come in wide layout: one timestamp column followed by one
//! column per logger. They are flattened into long-format [`Reading`]s.

use crate::models::{LoggerInfo, Reading};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::Deserialize;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Failed to open {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to read the CSV file")]
    Csv(#[from] csv::Error),
    #[error("Missing column: {0}")]
    MissingColumn(String),
    #[error("Invalid timestamp for logger {logger}: {value}")]
    InvalidTimestamp { logger: String, value: String },
    #[error("Invalid shading flag for logger {logger}: {value}")]
    InvalidFlag { logger: String, value: String },
}
pub type Result<T> = std::result::Result<T, LoadError>;

const TIMESTAMP_FORMATS: [&str; 6] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%d/%m/%Y %H:%M",
    "%d/%m/%Y %H:%M:%S",
];

/// Readings flattened from a wide CSV file.
#[derive(Debug, Clone, Default)]
pub struct ReadingSet {
    pub readings: Vec<Reading>,
    /// Logger columns in file order.
    pub loggers: Vec<String>,
    /// Data rows read, including skipped ones.
    pub rows: usize,
    /// Rows dropped because their timestamp did not parse.
    pub skipped_rows: usize,
}

/// Parse a timestamp in any of the accepted layouts.
///
/// A bare date maps to midnight. RFC 3339 values keep their local clock time.
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .or_else(|| {
            DateTime::parse_from_rfc3339(value)
                .ok()
                .map(|dt| dt.naive_local())
        })
}

/// Blank, `NaN` and non-numeric cells have no value.
fn parse_value(cell: &str) -> Option<f64> {
    cell.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

fn open(path: &Path) -> Result<File> {
    File::open(path).map_err(|source| LoadError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// Short rows are accepted; their missing cells read as no value.
fn reader<R: Read>(rdr: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(rdr)
}

/// Load a wide readings CSV from disk.
pub fn load_readings(path: &Path, timestamp_column: &str) -> Result<ReadingSet> {
    let set = read_readings(reader(open(path)?), timestamp_column)?;
    debug!(
        "Loaded {} readings for {} loggers from {}",
        set.readings.len(),
        set.loggers.len(),
        path.display()
    );
    Ok(set)
}

/// Flatten wide readings from any CSV reader.
pub fn read_readings<R: Read>(
    mut rdr: csv::Reader<R>,
    timestamp_column: &str,
) -> Result<ReadingSet> {
    let headers = rdr.headers()?.clone();
    let ts_index = headers
        .iter()
        .position(|h| h == timestamp_column)
        .ok_or_else(|| LoadError::MissingColumn(timestamp_column.to_string()))?;

    let columns: Vec<(usize, String)> = headers
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != ts_index)
        .map(|(i, h)| (i, h.to_string()))
        .collect();

    let mut set = ReadingSet {
        loggers: columns.iter().map(|(_, name)| name.clone()).collect(),
        ..ReadingSet::default()
    };

    for record in rdr.records() {
        let record = record?;
        set.rows += 1;

        let raw = record.get(ts_index).unwrap_or_default();
        let Some(timestamp) = parse_timestamp(raw) else {
            warn!("Skipping row {} with malformed timestamp {:?}", set.rows, raw);
            set.skipped_rows += 1;
            continue;
        };

        for (index, logger) in &columns {
            let value = record.get(*index).and_then(parse_value);
            set.readings.push(Reading::new(timestamp, logger.clone(), value));
        }
    }

    Ok(set)
}

#[derive(Debug, Deserialize)]
struct LoggerRecord {
    #[serde(rename = "Loggers")]
    logger: String,
    #[serde(rename = "Settlement")]
    settlement: String,
    #[serde(rename = "Intervention")]
    intervention: String,
    #[serde(rename = "Shaded")]
    shaded: String,
    #[serde(rename = "Intervention_Start", default)]
    intervention_start: String,
    #[serde(rename = "Post_Intervention_End", default)]
    post_intervention_end: String,
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

fn optional_timestamp(logger: &str, value: &str) -> Result<Option<NaiveDateTime>> {
    if value.trim().is_empty() {
        return Ok(None);
    }
    parse_timestamp(value)
        .map(Some)
        .ok_or_else(|| LoadError::InvalidTimestamp {
            logger: logger.to_string(),
            value: value.to_string(),
        })
}

impl TryFrom<LoggerRecord> for LoggerInfo {
    type Error = LoadError;

    fn try_from(record: LoggerRecord) -> Result<Self> {
        let shaded = parse_flag(&record.shaded).ok_or_else(|| LoadError::InvalidFlag {
            logger: record.logger.clone(),
            value: record.shaded.clone(),
        })?;
        let intervention_start = optional_timestamp(&record.logger, &record.intervention_start)?;
        let post_intervention_end =
            optional_timestamp(&record.logger, &record.post_intervention_end)?;

        Ok(LoggerInfo {
            logger: record.logger,
            settlement: record.settlement,
            intervention: record.intervention,
            shaded,
            intervention_start,
            post_intervention_end,
        })
    }
}

/// Load the logger metadata table from disk.
pub fn load_loggers(path: &Path) -> Result<Vec<LoggerInfo>> {
    let loggers = read_loggers(reader(open(path)?))?;
    debug!("Loaded {} logger records from {}", loggers.len(), path.display());
    Ok(loggers)
}

/// Parse logger metadata from any CSV reader.
pub fn read_loggers<R: Read>(mut rdr: csv::Reader<R>) -> Result<Vec<LoggerInfo>> {
    let mut loggers = Vec::new();
    for result in rdr.deserialize() {
        let record: LoggerRecord = result?;
        loggers.push(LoggerInfo::try_from(record)?);
    }
    Ok(loggers)
}
