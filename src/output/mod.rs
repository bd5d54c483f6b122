//! Output formatters for match results.
//!
//! Every probe becomes one [`MatchRecord`]; the formatters write records as:
//! - JSON (pretty, with a summary block) for automation
//! - CSV (one row per probe) for spreadsheet import
//!
//! # Example
//!
//! ```no_run
//! use equipmatch::cache::TemplateCache;
//! use equipmatch::catalog::Catalog;
//! use equipmatch::matching::{MatchEngine, Matcher};
//! use equipmatch::output::json::JsonOutput;
//! use std::path::Path;
//!
//! let cache = TemplateCache::open("cache").unwrap();
//! let catalog = Catalog::load(Path::new("catalog"), &cache).unwrap();
//! let report = MatchEngine::new(Matcher::default())
//!     .match_directory(Path::new("probes"), &catalog, Some(&cache))
//!     .unwrap();
//!
//! let output = JsonOutput::new(&report, false);
//! println!("{}", output.to_json_pretty().unwrap());
//! ```

pub mod csv;
pub mod json;

use serde::Serialize;

use crate::matching::{MatchResult, MatchedBy};

// Re-export main types
pub use self::csv::CsvOutput;
pub use self::json::JsonOutput;

/// The flat per-probe record written by every formatter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchRecord {
    pub probe_id: String,
    pub probe_path: String,
    pub best_template_id: Option<String>,
    /// Composite score, 0-100, two decimals.
    pub composite_score: f64,
    /// Pattern score, 0-100, two decimals.
    pub pattern_score: f64,
    /// Color similarity, 0-1, four decimals.
    pub color_score: Option<f64>,
    /// Histogram similarity, 0-1, four decimals.
    pub histogram_similarity: Option<f64>,
    pub matched_by: MatchedBy,
    pub accepted: bool,
    pub low_confidence: bool,
}

impl MatchRecord {
    #[must_use]
    pub fn from_result(result: &MatchResult) -> Self {
        let best = result.best.as_ref();
        Self {
            probe_id: result.probe_id.clone(),
            probe_path: result.probe_path.to_string_lossy().into_owned(),
            best_template_id: best.map(|c| c.template_id.clone()),
            composite_score: round_to(best.map_or(0.0, |c| c.composite_score), 2),
            pattern_score: round_to(best.map_or(0.0, |c| c.pattern_score), 2),
            color_score: best.and_then(|c| c.color_score).map(|v| round_to(v, 4)),
            histogram_similarity: best
                .and_then(|c| c.histogram_similarity)
                .map(|v| round_to(v, 4)),
            matched_by: result.matched_by,
            accepted: result.accepted,
            low_confidence: result.low_confidence,
        }
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
