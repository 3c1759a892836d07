//! The control-level seam against the live scripted session.

use crate::errors::AutomationError;
use crate::wait::Poll;

/// Scripting surface of one live session window.
///
/// Controls are addressed by the stable identifiers the remote
/// application's control tree exposes (e.g. `wnd[0]/tbar[0]/okcd`).
/// Implementations wrap the external scripting object; tests script
/// screens in memory. Every method that touches a control fails with
/// [`AutomationError::ControlNotFound`] carrying the identifier, so a
/// layout change is diagnosable from the error alone.
///
/// The handle is owned exclusively by the connector that produced it and
/// passed by reference for the lifetime of one run; it is never persisted.
/// A vanished external process shows up only as failing operations.
pub trait ScriptedSession: Send + Sync {
    /// True when `control_id` resolves in the current control tree.
    fn exists(&self, control_id: &str) -> bool;

    fn set_text(&self, control_id: &str, value: &str) -> Result<(), AutomationError>;

    fn read_text(&self, control_id: &str) -> Result<String, AutomationError>;

    /// Presses a button control.
    fn press(&self, control_id: &str) -> Result<(), AutomationError>;

    /// Selects a menu entry or radio option.
    fn select(&self, control_id: &str) -> Result<(), AutomationError>;

    fn set_focus(&self, control_id: &str) -> Result<(), AutomationError>;

    fn set_caret_position(&self, control_id: &str, position: usize)
        -> Result<(), AutomationError>;

    /// Injects a virtual key event into the main window.
    fn send_vkey(&self, key: u16) -> Result<(), AutomationError>;

    /// Maximizes the main session window.
    fn maximize(&self) -> Result<(), AutomationError>;
}

/// Owned session handle as produced by the connector.
pub type Session = Box<dyn ScriptedSession>;

/// Virtual key code for Enter.
pub const VKEY_ENTER: u16 = 0;

/// Polls until `control_id` resolves, failing with `ControlNotFound` at
/// the deadline. Screens settle at their own pace after a transaction
/// switch, so a single `exists` probe is not reliable.
pub async fn wait_for_control(
    session: &dyn ScriptedSession,
    control_id: &str,
    poll: Poll,
) -> Result<(), AutomationError> {
    if poll.until(|| session.exists(control_id)).await {
        Ok(())
    } else {
        Err(AutomationError::control(control_id))
    }
}
