//! Output sinks for transfer progress.

use tracing::{info, trace};

/// Receives progress lines from the [`super::TransferMonitor`].
pub trait ProgressSink: Send + Sync {
    /// Shows an ephemeral status line that the next line may overwrite.
    fn flash(&self, line: &str);

    /// Records a persistent line.
    fn log(&self, line: &str);
}

/// Sends flashes to `trace` and persistent lines to `info`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn flash(&self, line: &str) {
        trace!(target: "kwapi::progress", "{line}");
    }

    fn log(&self, line: &str) {
        info!(target: "kwapi::progress", "{line}");
    }
}
