//! Structured error handling and exit codes.

use serde::Serialize;

/// Exit codes for the equipmatch application.
///
/// - 0: Success (cache built, or at least one probe accepted)
/// - 1: General error (unexpected failure or fatal configuration problem)
/// - 2: No accepted matches (every probe fell below the acceptance threshold)
/// - 3: Partial success (completed, but some files could not be decoded)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitCode {
    /// Success: the command completed normally.
    Success = 0,
    /// General error: an unexpected error occurred.
    GeneralError = 1,
    /// No accepted matches: matching completed but nothing cleared the acceptance threshold.
    NoAcceptedMatches = 2,
    /// Partial success: completed, but some probes or templates failed to load.
    PartialSuccess = 3,
}

impl ExitCode {
    /// Get the numeric exit code.
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Get the machine-readable code prefix.
    #[must_use]
    pub fn code_prefix(self) -> &'static str {
        match self {
            Self::Success => "EM000",
            Self::GeneralError => "EM001",
            Self::NoAcceptedMatches => "EM002",
            Self::PartialSuccess => "EM003",
        }
    }

    /// Pick the exit code for a finished batch.
    ///
    /// Failed files take precedence over the acceptance outcome so callers
    /// notice skipped inputs.
    #[must_use]
    pub fn for_batch(accepted: usize, failed: usize) -> Self {
        if failed > 0 {
            Self::PartialSuccess
        } else if accepted == 0 {
            Self::NoAcceptedMatches
        } else {
            Self::Success
        }
    }
}

/// Structured error information for JSON output.
#[derive(Debug, Serialize)]
pub struct StructuredError {
    /// The error code (e.g., "EM001")
    pub code: String,
    /// The exit code number
    pub exit_code: i32,
    /// Human-readable error message
    pub message: String,
    /// Chain of underlying causes, outermost first
    pub causes: Vec<String>,
}

impl StructuredError {
    /// Create a new structured error from an anyhow error and an exit code.
    #[must_use]
    pub fn new(err: &anyhow::Error, exit_code: ExitCode) -> Self {
        Self {
            code: exit_code.code_prefix().to_string(),
            exit_code: exit_code.as_i32(),
            message: err.to_string(),
            causes: err.chain().skip(1).map(ToString::to_string).collect(),
        }
    }
}
