//! Output module for scrape results
//!
//! This module handles:
//! - Writing scrape outcomes as JSON result files
//! - Writing streamed records as JSON lines
//! - Printing scrape statistics

pub mod stats;

pub use stats::{print_statistics, write_statistics, ScrapeStatistics};

use crate::extract::Record;
use crate::pagination::PageCaps;
use crate::scrape::ScrapeOutcome;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Everything written to a result file
#[derive(Debug, Clone, Serialize)]
pub struct ResultFile<'a> {
    pub seed_url: &'a str,
    pub target: &'a str,
    pub caps: PageCaps,
    pub scraped_at: DateTime<Utc>,

    /// SHA-256 of the configuration file used for the run
    pub config_hash: &'a str,

    pub outcome: &'a ScrapeOutcome,
}

/// Writes a result file as pretty-printed JSON
///
/// # Arguments
///
/// * `path` - Destination file; created or truncated
/// * `result` - The result to write
pub fn write_results(path: &Path, result: &ResultFile<'_>) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, result)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

/// Writes one record as a single JSON line
pub fn write_record_line<W: Write>(writer: &mut W, record: &Record) -> Result<()> {
    serde_json::to_writer(&mut *writer, record)?;
    writer.write_all(b"\n")?;
    Ok(())
}
