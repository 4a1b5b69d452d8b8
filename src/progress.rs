//! Terminal progress for long-running jobs
//!
//! The bar position always tracks the job cursor, so a resumed run starts
//! where the previous one stopped; the message carries the result count.

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

const TEMPLATE: &str = "{spinner:.green} {msg} {pos}/{len} [{bar:.cyan/blue}] {percent:>3}%  \
                        elapsed: {elapsed_precise}  eta: {eta_precise}";

/// Count-style progress bar for one job
#[derive(Clone)]
pub struct CrawlProgress {
    pb: ProgressBar,
    label: String,
}

impl CrawlProgress {
    /// Creates a bar over `total` cursor units; `quiet` hides it entirely
    pub fn new(label: impl Into<String>, total: u64, quiet: bool) -> Self {
        let label = label.into();

        let pb = if quiet {
            ProgressBar::hidden()
        } else {
            let pb = ProgressBar::new(total);
            if let Ok(style) = ProgressStyle::with_template(TEMPLATE) {
                pb.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
            }
            pb.enable_steady_tick(Duration::from_millis(100));
            pb
        };
        pb.set_message(label.clone());

        Self { pb, label }
    }

    /// A bar that never draws
    pub fn hidden() -> Self {
        Self::new("", 0, true)
    }

    /// Moves the bar to the job cursor
    pub fn set_position(&self, position: u64) {
        self.pb.set_position(position);
    }

    /// Updates the result count shown next to the label
    pub fn set_results(&self, results: usize) {
        self.pb
            .set_message(format!("{} ({} results)", self.label, results));
    }

    pub fn position(&self) -> u64 {
        self.pb.position()
    }

    pub fn finish(&self, message: impl Into<String>) {
        self.pb.finish_with_message(message.into());
    }
}
