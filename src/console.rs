//! Terminal progress sink.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use kwapi_core::ProgressSink;

/// Draws flashed status lines on a single spinner line and prints logged
/// lines above it. Hidden when stderr is not a terminal.
pub(crate) struct ConsoleSink {
    line: ProgressBar,
}

impl ConsoleSink {
    pub(crate) fn new(quiet: bool) -> Self {
        let line = ProgressBar::new_spinner();
        if quiet {
            line.set_draw_target(ProgressDrawTarget::hidden());
        }
        line.set_style(
            ProgressStyle::with_template("{msg}").unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        Self { line }
    }
}

impl ProgressSink for ConsoleSink {
    fn flash(&self, line: &str) {
        self.line.set_message(line.to_string());
    }

    fn log(&self, line: &str) {
        self.line.println(line);
        self.line.set_message(String::new());
    }
}

impl Drop for ConsoleSink {
    fn drop(&mut self) {
        self.line.finish_and_clear();
    }
}
