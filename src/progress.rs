//! Progress reporting using indicatif.
//!
//! [`Progress`] implements [`ProgressCallback`] and draws one bar per batch
//! phase: loading the catalog into the cache, preparing descriptor sets and
//! matching probes.

use std::sync::{Mutex, PoisonError};

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// Phase name for loading and caching the reference catalog.
pub const PHASE_CATALOG: &str = "catalog";
/// Phase name for extracting template descriptor sets.
pub const PHASE_DESCRIPTORS: &str = "descriptors";
/// Phase name for matching probes.
pub const PHASE_MATCH: &str = "match";

/// Progress callback for the batch phases.
///
/// Implement this trait to receive progress updates while the catalog is
/// cached and probes are matched. Calls may arrive from rayon workers.
pub trait ProgressCallback: Send + Sync {
    /// Called when a phase starts.
    ///
    /// # Arguments
    ///
    /// * `phase` - Name of the phase (e.g., "catalog", "match")
    /// * `total` - Total number of items to process
    fn on_phase_start(&self, phase: &str, total: usize);

    /// Called for each item processed.
    ///
    /// # Arguments
    ///
    /// * `current` - Number of items finished so far
    /// * `path` - Path being processed
    fn on_progress(&self, current: usize, path: &str);

    /// Called when a phase completes.
    fn on_phase_end(&self, phase: &str);
}

/// Progress reporter using indicatif.
pub struct Progress {
    multi: MultiProgress,
    catalog: Mutex<Option<ProgressBar>>,
    descriptors: Mutex<Option<ProgressBar>>,
    matching: Mutex<Option<ProgressBar>>,
    quiet: bool,
}

impl Progress {
    /// Create a new progress reporter.
    ///
    /// # Arguments
    ///
    /// * `quiet` - If true, no progress bars will be displayed.
    ///
    /// # Examples
    ///
    /// ```
    /// use equipmatch::progress::Progress;
    ///
    /// let progress = Progress::new(false);
    /// ```
    #[must_use]
    pub fn new(quiet: bool) -> Self {
        Self {
            multi: MultiProgress::new(),
            catalog: Mutex::new(None),
            descriptors: Mutex::new(None),
            matching: Mutex::new(None),
            quiet,
        }
    }

    fn slot(&self, phase: &str) -> Option<&Mutex<Option<ProgressBar>>> {
        match phase {
            PHASE_CATALOG => Some(&self.catalog),
            PHASE_DESCRIPTORS => Some(&self.descriptors),
            PHASE_MATCH => Some(&self.matching),
            _ => None,
        }
    }

    /// The bar of the most recently started phase still running.
    fn active(&self) -> Option<ProgressBar> {
        [&self.matching, &self.descriptors, &self.catalog]
            .into_iter()
            .find_map(|slot| slot.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn bar_style(phase: &str) -> ProgressStyle {
        let color = if phase == PHASE_MATCH {
            "green/blue"
        } else {
            "cyan/blue"
        };
        ProgressStyle::with_template(&format!(
            "[{{elapsed_precise}}] [{{bar:40.{color}}}] {{pos}}/{{len}} ({{percent}}%) {{msg}} (ETA: {{eta}})"
        ))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█>-")
    }
}

fn phase_label(phase: &str) -> &'static str {
    match phase {
        PHASE_CATALOG => "Caching templates",
        PHASE_DESCRIPTORS => "Extracting descriptors",
        PHASE_MATCH => "Matching probes",
        _ => "Working",
    }
}

impl ProgressCallback for Progress {
    fn on_phase_start(&self, phase: &str, total: usize) {
        if self.quiet {
            return;
        }

        let pb = self.multi.add(ProgressBar::new(total as u64));
        pb.set_style(Self::bar_style(phase));
        pb.set_message(phase_label(phase));
        match self.slot(phase) {
            Some(slot) => *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(pb),
            None => log::debug!("Untracked progress phase {}", phase),
        }
    }

    fn on_progress(&self, current: usize, path: &str) {
        if self.quiet {
            return;
        }

        if let Some(pb) = self.active() {
            pb.set_position(current as u64);
            pb.set_message(truncate_path(path, 30));
        }
    }

    fn on_phase_end(&self, phase: &str) {
        if self.quiet {
            return;
        }

        if let Some(slot) = self.slot(phase) {
            if let Some(pb) = slot.lock().unwrap_or_else(PoisonError::into_inner).take() {
                pb.finish_with_message(format!("{} complete", phase_label(phase)));
            }
        }
    }
}

/// Truncate a path for display in the progress bar.
fn truncate_path(path: &str, max_len: usize) -> String {
    if path.len() <= max_len {
        return path.to_string();
    }

    let file_name = std::path::Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    if file_name.len() >= max_len {
        let tail: String = file_name
            .chars()
            .rev()
            .take(max_len.saturating_sub(3))
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        return format!("...{tail}");
    }

    format!(".../{}", file_name)
}
