//! Clipboard seam for bulk multi-selection entry.
//!
//! The lookup transaction's multi-selection dialog has no scripting call
//! for bulk input; the reliable path is pasting a multi-line payload from
//! the system clipboard. The clipboard is process-wide shared state with
//! no locking, which is why at most one run may be in flight at a time.

use tracing::debug;

use crate::errors::AutomationError;

/// Line ending understood by the paste-from-clipboard control.
const LINE_ENDING: &str = "\r\n";

/// Places multi-line payloads on the shared system clipboard.
pub trait ClipboardInjector: Send + Sync {
    /// Replaces the clipboard content with one identifier per line.
    fn write_lines(&self, values: &[String]) -> Result<(), AutomationError>;
}

/// System clipboard backed by `arboard`.
#[derive(Debug, Default)]
pub struct SystemClipboard;

impl SystemClipboard {
    pub fn new() -> Self {
        Self
    }
}

impl ClipboardInjector for SystemClipboard {
    fn write_lines(&self, values: &[String]) -> Result<(), AutomationError> {
        let payload = join_lines(values);
        let mut clipboard = arboard::Clipboard::new()
            .map_err(|err| AutomationError::ClipboardUnavailable(err.to_string()))?;
        clipboard
            .set_text(payload)
            .map_err(|err| AutomationError::ClipboardUnavailable(err.to_string()))?;
        debug!(lines = values.len(), "clipboard payload written");
        Ok(())
    }
}

pub(crate) fn join_lines(values: &[String]) -> String {
    values.join(LINE_ENDING)
}
