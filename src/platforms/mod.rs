//! Platform bindings for the launcher scripting surface.
//!
//! The scripting object model and the launcher window only exist on
//! Windows; every other platform gets the trait seams plus fakes, which is
//! all the engine needs outside production.

use std::sync::Arc;

use crate::config::AutomationConfig;
use crate::connector::{LauncherWindow, ScriptingShell};
use crate::errors::AutomationError;

#[cfg(target_os = "windows")]
pub mod windows;

/// Creates the scripting shell for the current platform, starting the
/// launcher process when no scripting object is reachable.
pub fn create_shell(
    config: &AutomationConfig,
) -> Result<Arc<dyn ScriptingShell>, AutomationError> {
    #[cfg(target_os = "windows")]
    {
        Ok(Arc::new(windows::WindowsScriptingShell::new(config)?))
    }
    #[cfg(not(target_os = "windows"))]
    {
        let _ = config;
        Err(AutomationError::PlatformError(
            "launcher scripting is only available on Windows".to_string(),
        ))
    }
}

/// Creates the launcher-window fallback driver for the current platform.
pub fn create_launcher_window(
    config: &AutomationConfig,
) -> Result<Arc<dyn LauncherWindow>, AutomationError> {
    #[cfg(target_os = "windows")]
    {
        Ok(Arc::new(windows::WindowsLauncherWindow::new(config)?))
    }
    #[cfg(not(target_os = "windows"))]
    {
        let _ = config;
        Err(AutomationError::PlatformError(
            "launcher window automation is only available on Windows".to_string(),
        ))
    }
}
