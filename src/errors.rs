use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Closed error taxonomy for the automation domain.
///
/// Every failure that crosses the crate boundary is one of these variants,
/// with enough structured context to diagnose a layout or timing change
/// without reproducing the external session.
#[derive(Error, Debug)]
pub enum AutomationError {
    /// No viable session could be established for the configured target.
    #[error("connection entry not found: {0}")]
    ConnectionNotFound(String),

    /// A required screen element could not be located or interacted with.
    #[error("control not resolved: {control_id}")]
    ControlNotFound { control_id: String },

    /// The expected export artifact never appeared in the watched directory.
    #[error("no export matching `{pattern}` appeared in {} within {timeout:?}", .dir.display())]
    ExportTimeout {
        dir: PathBuf,
        pattern: String,
        timeout: Duration,
    },

    /// Malformed run parameters or incomplete configuration.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The system clipboard could not be written.
    #[error("clipboard unavailable: {0}")]
    ClipboardUnavailable(String),

    /// An exported artifact was unreadable, empty, or missing the
    /// expected identifier column.
    #[error("export artifact error: {0}")]
    ArtifactError(String),

    /// OS-level failure outside the scripted session itself.
    #[error("platform error: {0}")]
    PlatformError(String),
}

impl AutomationError {
    /// Shorthand for the control-resolution variant.
    pub fn control(control_id: impl Into<String>) -> Self {
        AutomationError::ControlNotFound {
            control_id: control_id.into(),
        }
    }
}
