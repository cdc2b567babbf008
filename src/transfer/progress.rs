//! Git-style transfer progress on stderr:
//! `\rWriting objects:  42% (3/7)` ... `, done.`

use crate::utils::trace_raw;

/// Carriage-return progress meter for one pipeline run.
pub struct Progress {
    label: &'static str,
    enabled: bool,
}

impl Progress {
    pub fn new(label: &'static str, enabled: bool) -> Progress {
        Progress { label, enabled }
    }

    /// Redraw the meter for the current counts.
    pub fn update(&self, done: usize, total: usize) {
        if !self.enabled || total == 0 {
            return;
        }
        let pct = done * 100 / total;
        trace_raw(&format!("\r{}: {pct:3}% ({done}/{total})", self.label));
    }

    /// Final redraw with the closing `, done.` marker.
    pub fn finish(&self, done: usize, total: usize) {
        if !self.enabled || total == 0 {
            return;
        }
        let pct = done * 100 / total;
        trace_raw(&format!(
            "\r{}: {pct:3}% ({done}/{total}), done.\n",
            self.label
        ));
    }
}
