//! Terminal rendering of transfer progress.

use console::style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use gitbin_cas::ProgressReporter;

/// Percentage bar on stderr. Hidden automatically when stderr is not a
/// terminal, which is the usual case when git runs the filters.
pub struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    pub fn new(label: &'static str) -> Self {
        let bar = ProgressBar::with_draw_target(Some(100), ProgressDrawTarget::stderr());
        bar.set_style(
            ProgressStyle::with_template("{msg} [{bar:30.cyan/blue}] {pos:>3}%")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        bar.set_message(format!("{}", style(label).bold()));
        Self { bar }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressReporter for BarProgress {
    fn on_progress(&self, percent: u32) {
        self.bar.set_position(u64::from(percent));
    }
}
