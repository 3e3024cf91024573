//! CLI-specific progress handling for squirrel-dl
//!
//! Renders one progress bar per download, fed by the manager's observer
//! callback.

use std::collections::HashMap;
use std::sync::Mutex;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use squirrel_dl::{DownloadObserver, DownloadStatus, Error};

/// Creates a percent-based progress bar for one download
pub fn create_progress_bar(identifier: &str) -> ProgressBar {
    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg:>16} [{wide_bar:.cyan/blue}] {pos:>3}% ({elapsed})")
            .expect("Failed to create progress style")
            .progress_chars("#>-"),
    );
    pb.set_message(identifier.to_string());
    pb
}

/// Tracks the outcome of one download as seen by the progress display.
#[derive(Clone, Copy, PartialEq)]
enum Outcome {
    Running,
    Done,
    Failed,
}

/// Progress display for concurrent downloads, driven by status updates.
pub struct ProgressManager {
    multi: MultiProgress,
    bars: Mutex<HashMap<String, (ProgressBar, Outcome)>>,
}

impl Default for ProgressManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressManager {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a bar for a download before its first byte arrives.
    pub fn track(&self, identifier: &str) {
        let mut bars = self.bars.lock().unwrap();
        bars.entry(identifier.to_string()).or_insert_with(|| {
            (
                self.multi.add(create_progress_bar(identifier)),
                Outcome::Running,
            )
        });
    }

    /// True once the download completed or failed for good.
    pub fn finished(&self, identifier: &str) -> bool {
        let bars = self.bars.lock().unwrap();
        matches!(
            bars.get(identifier),
            Some((_, Outcome::Done)) | Some((_, Outcome::Failed))
        )
    }

    /// Identifiers whose downloads failed.
    pub fn failures(&self) -> Vec<String> {
        let bars = self.bars.lock().unwrap();
        bars.iter()
            .filter(|(_, (_, outcome))| *outcome == Outcome::Failed)
            .map(|(identifier, _)| identifier.clone())
            .collect()
    }
}

impl DownloadObserver for ProgressManager {
    fn on_status_update(
        &self,
        identifier: &str,
        progress: f32,
        status: DownloadStatus,
        error: Option<&Error>,
    ) {
        let mut bars = self.bars.lock().unwrap();
        let (bar, outcome) = bars.entry(identifier.to_string()).or_insert_with(|| {
            (
                self.multi.add(create_progress_bar(identifier)),
                Outcome::Running,
            )
        });

        bar.set_position(progress.clamp(0.0, 100.0) as u64);

        if status == DownloadStatus::Downloaded {
            *outcome = Outcome::Done;
            bar.finish();
        } else if let Some(error) = error {
            *outcome = Outcome::Failed;
            bar.abandon_with_message(format!("{identifier}: {error}"));
        }
    }
}
