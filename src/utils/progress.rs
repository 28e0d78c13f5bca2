//! Progress indicators for long-running upgrade steps.
//!
//! Thin wrapper around `indicatif`. Every indicator is hidden when the
//! `HARVEST_NO_PROGRESS` environment variable is set (the `--no-progress` flag
//! sets it), so scripted runs and tests never draw to the terminal.
//!
//! # Environment Variables
//!
//! - `HARVEST_NO_PROGRESS`: Set to any value to disable all progress indicators

use indicatif::{ProgressBar as IndicatifBar, ProgressStyle};
use std::time::Duration;

/// Environment variable that hides all progress output.
pub const NO_PROGRESS_ENV: &str = "HARVEST_NO_PROGRESS";

fn is_progress_disabled() -> bool {
    std::env::var(NO_PROGRESS_ENV).is_ok()
}

/// A progress bar or spinner that respects [`NO_PROGRESS_ENV`].
#[derive(Clone)]
pub struct ProgressBar {
    inner: IndicatifBar,
}

impl ProgressBar {
    /// Byte-counting bar for a download of `total` bytes.
    ///
    /// An unknown length (`None`) shows a spinner with a running byte count.
    pub fn download(total: Option<u64>) -> Self {
        let bar = if is_progress_disabled() {
            IndicatifBar::hidden()
        } else {
            match total {
                Some(len) => {
                    let bar = IndicatifBar::new(len);
                    bar.set_style(download_style());
                    bar
                }
                None => {
                    let bar = IndicatifBar::new_spinner();
                    bar.set_style(spinner_style());
                    bar.enable_steady_tick(Duration::from_millis(100));
                    bar
                }
            }
        };
        Self {
            inner: bar,
        }
    }

    pub fn set_prefix(&self, prefix: impl Into<String>) {
        self.inner.set_prefix(prefix.into());
    }

    pub fn inc(&self, delta: u64) {
        self.inner.inc(delta);
    }

    #[cfg(test)]
    fn position(&self) -> u64 {
        self.inner.position()
    }

    pub fn finish_and_clear(&self) {
        self.inner.finish_and_clear();
    }
}

fn download_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{prefix:.bold.cyan} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("━╸━")
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{prefix:.bold} {spinner:.cyan} {bytes}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_bytes() {
        let bar = ProgressBar::download(Some(100));
        bar.set_prefix("Downloading");
        bar.inc(40);
        bar.inc(2);
        assert_eq!(bar.position(), 42);
        bar.finish_and_clear();
    }

    #[test]
    fn test_spinner_for_unknown_length() {
        let bar = ProgressBar::download(None);
        bar.inc(7);
        assert_eq!(bar.position(), 7);
        bar.finish_and_clear();
    }
}
