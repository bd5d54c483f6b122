//! JSON output formatter for match results.
//!
//! # Output Schema
//!
//! ```json
//! {
//!   "matches": [
//!     {
//!       "probe_id": "slot_03",
//!       "probe_path": "probes/slot_03.png",
//!       "best_template_id": "iron_sword",
//!       "composite_score": 91.4,
//!       "pattern_score": 93.1,
//!       "color_score": 0.8823,
//!       "histogram_similarity": 0.7411,
//!       "matched_by": "pattern_and_color",
//!       "accepted": true,
//!       "low_confidence": false
//!     }
//!   ],
//!   "failures": [{ "path": "probes/broken.png", "error": "..." }],
//!   "summary": {
//!     "probes": 1,
//!     "accepted": 1,
//!     "rejected": 0,
//!     "failed": 1,
//!     "templates": 240,
//!     "duration_ms": 812,
//!     "exit_code": 3,
//!     "exit_code_name": "EM003"
//!   }
//! }
//! ```
//!
//! In diagnostics mode each match also carries `candidates` (every template's
//! scores) and, on the descriptor path, the winning attempt's `descriptor`
//! evidence.

use std::io::Write;

use serde::Serialize;

use super::MatchRecord;
use crate::catalog::LoadFailure;
use crate::matching::descriptor::GeometricEvidence;
use crate::matching::{BatchReport, BatchSummary, MatchCandidate, MatchResult};

/// One probe in JSON form.
#[derive(Debug, Clone, Serialize)]
pub struct JsonMatch {
    #[serde(flatten)]
    pub record: MatchRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidates: Option<Vec<MatchCandidate>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub descriptor: Option<GeometricEvidence>,
}

impl JsonMatch {
    #[must_use]
    pub fn from_result(result: &MatchResult, diagnostics: bool) -> Self {
        Self {
            record: MatchRecord::from_result(result),
            candidates: diagnostics.then(|| result.candidates.clone()),
            descriptor: if diagnostics {
                result.descriptor.clone()
            } else {
                None
            },
        }
    }
}

/// Summary statistics in JSON format.
#[derive(Debug, Clone, Serialize)]
pub struct JsonSummary {
    /// Probes that produced a result
    pub probes: usize,
    /// Results at or above the acceptance threshold
    pub accepted: usize,
    /// Results below the acceptance threshold
    pub rejected: usize,
    /// Probes that could not be loaded
    pub failed: usize,
    /// Templates in the catalog
    pub templates: usize,
    /// Duration of the batch in milliseconds
    pub duration_ms: u64,
    /// The exit code number
    pub exit_code: i32,
    /// The machine-readable exit code name (e.g., "EM000")
    pub exit_code_name: String,
}

impl JsonSummary {
    /// Create a JSON summary from a batch summary and an exit code.
    #[must_use]
    pub fn from_batch_summary(summary: &BatchSummary, exit_code: crate::error::ExitCode) -> Self {
        Self {
            probes: summary.probes,
            accepted: summary.accepted,
            rejected: summary.rejected,
            failed: summary.failed,
            templates: summary.templates,
            duration_ms: summary.duration.as_millis() as u64,
            exit_code: exit_code.as_i32(),
            exit_code_name: exit_code.code_prefix().to_string(),
        }
    }
}

/// Complete JSON output structure.
#[derive(Debug, Clone, Serialize)]
pub struct JsonOutput {
    /// One entry per matched probe
    pub matches: Vec<JsonMatch>,
    /// Probes that could not be loaded
    pub failures: Vec<LoadFailure>,
    /// Batch statistics
    pub summary: JsonSummary,
}

impl JsonOutput {
    /// Create the JSON output for a batch.
    ///
    /// # Arguments
    ///
    /// * `report` - The finished batch
    /// * `diagnostics` - Include per-template scores and descriptor evidence
    #[must_use]
    pub fn new(report: &BatchReport, diagnostics: bool) -> Self {
        Self {
            matches: report
                .results
                .iter()
                .map(|r| JsonMatch::from_result(r, diagnostics))
                .collect(),
            failures: report.failures.clone(),
            summary: JsonSummary::from_batch_summary(&report.summary, report.exit_code()),
        }
    }

    /// Serialize to compact JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails (unlikely for valid data).
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Serialize to pretty-printed JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails (unlikely for valid data).
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Write pretty JSON followed by a newline.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn write_to<W: Write>(&self, mut writer: W) -> std::io::Result<()> {
        serde_json::to_writer_pretty(&mut writer, self)?;
        writeln!(writer)?;
        writer.flush()
    }
}
