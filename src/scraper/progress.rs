//! Progress reporting abstraction
//!
//! Decouples the scraper from UI concerns (indicatif).

use indicatif::{ProgressBar, ProgressStyle};

/// Receives one notification per finished source.
///
/// Called concurrently from scraping tasks.
pub trait ProgressSink: Send + Sync {
    fn source_done(&self, completed: usize, total: usize, name: &str);
}

impl<F> ProgressSink for F
where
    F: Fn(usize, usize, &str) + Send + Sync,
{
    fn source_done(&self, completed: usize, total: usize, name: &str) {
        self(completed, total, name)
    }
}

/// Indicatif-based progress bar for CLI usage
pub struct IndicatifProgress {
    bar: ProgressBar,
}

impl IndicatifProgress {
    pub fn new(total: usize) -> Self {
        let bar = ProgressBar::new(total as u64);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} Syncing: [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        Self { bar }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressSink for IndicatifProgress {
    fn source_done(&self, completed: usize, _total: usize, name: &str) {
        self.bar.set_position(completed as u64);
        self.bar.set_message(name.to_string());
    }
}

/// No-op progress sink for benchmarks and quiet mode
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn source_done(&self, _completed: usize, _total: usize, _name: &str) {}
}
