//! CSV output formatter for match results.
//!
//! One row per probe, columns in [`MatchRecord`] order:
//!
//! - `probe_id`, `probe_path`
//! - `best_template_id` (empty when the catalog is empty)
//! - `composite_score`, `pattern_score` (0-100)
//! - `color_score`, `histogram_similarity` (0-1, empty when not computed)
//! - `matched_by`: `pattern_only`, `pattern_and_color` or `descriptor_geometric`
//! - `accepted`, `low_confidence`
//!
//! Failed probes are not written; they are reported in the log and the exit code.

use std::io;

use thiserror::Error;

use super::MatchRecord;
use crate::matching::MatchResult;

/// Errors that can occur during CSV output generation.
#[derive(Debug, Error)]
pub enum CsvOutputError {
    /// I/O error during writing.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Error during CSV serialization.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// CSV output formatter.
pub struct CsvOutput<'a> {
    results: &'a [MatchResult],
}

impl<'a> CsvOutput<'a> {
    /// Create a new CSV output formatter.
    #[must_use]
    pub fn new(results: &'a [MatchResult]) -> Self {
        Self { results }
    }

    /// Write the CSV output to the given writer.
    ///
    /// # Errors
    ///
    /// Returns `CsvOutputError` if writing or serialization fails.
    pub fn write_to<W: io::Write>(&self, writer: W) -> Result<(), CsvOutputError> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        if self.results.is_empty() {
            // serialize() writes the header with the first row; write it explicitly here.
            csv_writer.write_record(HEADER)?;
        }
        for result in self.results {
            csv_writer.serialize(MatchRecord::from_result(result))?;
        }
        csv_writer.flush()?;
        Ok(())
    }

    /// Generate CSV output as a string.
    ///
    /// # Errors
    ///
    /// Returns `CsvOutputError` if serialization fails.
    pub fn to_string(&self) -> Result<String, CsvOutputError> {
        let mut buffer = Vec::new();
        self.write_to(&mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).to_string())
    }
}

/// Column names, in [`MatchRecord`] order.
pub const HEADER: [&str; 10] = [
    "probe_id",
    "probe_path",
    "best_template_id",
    "composite_score",
    "pattern_score",
    "color_score",
    "histogram_similarity",
    "matched_by",
    "accepted",
    "low_confidence",
];
