//! Windows bindings: the launcher's COM scripting object and the
//! launcher-window fallback via UI Automation.

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, info, warn};
use uiautomation::controls::ControlType;
use uiautomation::inputs::Mouse;
use uiautomation::UIAutomation;
use windows::core::{BSTR, GUID, PCWSTR, VARIANT};
use windows::Win32::System::Com::{
    CLSIDFromProgID, CoInitializeEx, IDispatch, COINIT_APARTMENTTHREADED, DISPATCH_FLAGS,
    DISPATCH_METHOD, DISPATCH_PROPERTYGET, DISPATCH_PROPERTYPUT, DISPPARAMS,
};
use windows::Win32::System::Ole::GetActiveObject;

use crate::config::AutomationConfig;
use crate::connector::{LauncherWindow, ScriptingShell};
use crate::errors::AutomationError;
use crate::matching;
use crate::session::{ScriptedSession, Session};
use crate::wait::Poll;

/// ProgID under which the launcher registers its running scripting object.
const LAUNCHER_PROG_ID: &str = "SAPGUI";
/// Id of the main session window inside the control tree.
const MAIN_WINDOW: &str = "wnd[0]";

const DISPID_PROPERTYPUT: i32 = -3;

fn platform_err(context: &str, err: impl std::fmt::Display) -> AutomationError {
    AutomationError::PlatformError(format!("{context}: {err}"))
}

/// Late-bound COM dispatch wrapper: everything the scripting object model
/// exposes is driven by name.
#[derive(Clone)]
struct DispatchObject(IDispatch);

impl DispatchObject {
    fn dispid(&self, name: &str) -> Result<i32, AutomationError> {
        let wide: Vec<u16> = name.encode_utf16().chain(std::iter::once(0)).collect();
        let names = [PCWSTR(wide.as_ptr())];
        let mut dispid = 0i32;
        unsafe {
            self.0
                .GetIDsOfNames(&GUID::zeroed(), names.as_ptr(), 1, 0, &mut dispid)
                .map_err(|err| platform_err(name, err))?;
        }
        Ok(dispid)
    }

    fn invoke(
        &self,
        flags: DISPATCH_FLAGS,
        name: &str,
        args: &[VARIANT],
    ) -> Result<VARIANT, AutomationError> {
        let dispid = self.dispid(name)?;
        // COM expects call arguments in reverse order.
        let mut reversed: Vec<VARIANT> = args.iter().rev().cloned().collect();
        let mut named_arg = DISPID_PROPERTYPUT;
        let mut params = DISPPARAMS {
            rgvarg: reversed.as_mut_ptr(),
            cArgs: reversed.len() as u32,
            ..Default::default()
        };
        if flags == DISPATCH_PROPERTYPUT {
            params.rgdispidNamedArgs = &mut named_arg;
            params.cNamedArgs = 1;
        }
        let mut result = VARIANT::default();
        unsafe {
            self.0
                .Invoke(
                    dispid,
                    &GUID::zeroed(),
                    0,
                    flags,
                    &params,
                    Some(&mut result),
                    None,
                    None,
                )
                .map_err(|err| platform_err(name, err))?;
        }
        Ok(result)
    }

    fn get(&self, name: &str) -> Result<VARIANT, AutomationError> {
        self.invoke(DISPATCH_PROPERTYGET, name, &[])
    }

    fn call(&self, name: &str, args: &[VARIANT]) -> Result<VARIANT, AutomationError> {
        self.invoke(DISPATCH_METHOD | DISPATCH_PROPERTYGET, name, args)
    }

    fn put(&self, name: &str, value: VARIANT) -> Result<(), AutomationError> {
        self.invoke(DISPATCH_PROPERTYPUT, name, &[value])?;
        Ok(())
    }

    fn get_object(&self, name: &str) -> Result<DispatchObject, AutomationError> {
        as_dispatch(&self.get(name)?, name)
    }

    fn call_object(&self, name: &str, args: &[VARIANT]) -> Result<DispatchObject, AutomationError> {
        as_dispatch(&self.call(name, args)?, name)
    }
}

fn as_dispatch(variant: &VARIANT, context: &str) -> Result<DispatchObject, AutomationError> {
    IDispatch::try_from(variant)
        .map(DispatchObject)
        .map_err(|err| platform_err(context, err))
}

fn as_i32(variant: &VARIANT, context: &str) -> Result<i32, AutomationError> {
    i32::try_from(variant).map_err(|err| platform_err(context, err))
}

fn as_string(variant: &VARIANT, context: &str) -> Result<String, AutomationError> {
    BSTR::try_from(variant)
        .map(|text| text.to_string())
        .map_err(|err| platform_err(context, err))
}

/// A named collection in the object model (`Children` and friends).
struct Collection(DispatchObject);

impl Collection {
    fn count(&self) -> Result<i32, AutomationError> {
        as_i32(&self.0.get("Count")?, "Count")
    }

    fn item(&self, index: i32) -> Result<DispatchObject, AutomationError> {
        self.0.call_object("Item", &[VARIANT::from(index)])
    }
}

/// Scripting shell over the running launcher process.
///
/// Construction attaches to the registered scripting object, starting the
/// launcher executable first when nothing is registered yet.
pub struct WindowsScriptingShell {
    engine: DispatchObject,
    poll_interval: Duration,
    startup_timeout: Duration,
}

impl WindowsScriptingShell {
    pub fn new(config: &AutomationConfig) -> Result<Self, AutomationError> {
        unsafe {
            // A prior initialization with another model is fine.
            let _ = CoInitializeEx(None, COINIT_APARTMENTTHREADED);
        }

        let gui = match attach_scripting_object() {
            Ok(gui) => gui,
            Err(first_err) => {
                info!(%first_err, "scripting object not running, starting launcher");
                spawn_launcher(&config.launcher_executable)?;
                wait_for_scripting_object(config.startup_timeout(), config.poll_interval())?
            }
        };
        let engine = gui
            .get_object("GetScriptingEngine")
            .map_err(|_| {
                AutomationError::PlatformError(
                    "scripting engine unavailable; enable scripting on client and server"
                        .to_string(),
                )
            })?;

        Ok(Self {
            engine,
            poll_interval: config.poll_interval(),
            startup_timeout: config.startup_timeout(),
        })
    }

    fn connections(&self) -> Result<Collection, AutomationError> {
        Ok(Collection(self.engine.get_object("Children")?))
    }

    /// First session of `connection`, waiting for the launcher to finish
    /// building it.
    async fn first_session(&self, connection: DispatchObject) -> Result<Session, AutomationError> {
        let poll = Poll::new(self.poll_interval, self.startup_timeout);
        let sessions = Collection(connection.get_object("Children")?);
        let session = poll
            .until_some(|| {
                let count = sessions.count().ok()?;
                if count > 0 {
                    sessions.item(0).ok()
                } else {
                    None
                }
            })
            .await
            .ok_or_else(|| {
                AutomationError::PlatformError(
                    "timed out waiting for the connection's first session".to_string(),
                )
            })?;
        Ok(Box::new(WindowsScriptedSession { session }))
    }
}

#[async_trait]
impl ScriptingShell for WindowsScriptingShell {
    fn open_connections(&self) -> Result<Vec<String>, AutomationError> {
        let collection = self.connections()?;
        let total = collection.count()?;
        let mut descriptions = Vec::with_capacity(total as usize);
        for index in 0..total {
            let Ok(connection) = collection.item(index) else {
                continue;
            };
            let description = connection
                .get("Description")
                .and_then(|value| as_string(&value, "Description"))
                .unwrap_or_default();
            descriptions.push(description);
        }
        Ok(descriptions)
    }

    async fn attach(&self, index: usize) -> Result<Session, AutomationError> {
        let connection = self.connections()?.item(index as i32)?;
        self.first_session(connection).await
    }

    async fn open_connection(&self, description: &str) -> Result<Session, AutomationError> {
        debug!(%description, "opening connection via scripting");
        let connection = self.engine.call_object(
            "OpenConnection",
            &[
                VARIANT::from(BSTR::from(description)),
                VARIANT::from(true),
            ],
        )?;
        self.first_session(connection).await
    }
}

fn attach_scripting_object() -> Result<DispatchObject, AutomationError> {
    let wide: Vec<u16> = LAUNCHER_PROG_ID
        .encode_utf16()
        .chain(std::iter::once(0))
        .collect();
    unsafe {
        let clsid = CLSIDFromProgID(PCWSTR(wide.as_ptr()))
            .map_err(|err| platform_err(LAUNCHER_PROG_ID, err))?;
        let mut unknown = None;
        GetActiveObject(&clsid, None, &mut unknown)
            .map_err(|err| platform_err("GetActiveObject", err))?;
        let unknown = unknown.ok_or_else(|| {
            AutomationError::PlatformError("scripting object not registered".to_string())
        })?;
        let dispatch: IDispatch = unknown
            .cast()
            .map_err(|err| platform_err("IDispatch cast", err))?;
        Ok(DispatchObject(dispatch))
    }
}

fn wait_for_scripting_object(
    timeout: Duration,
    interval: Duration,
) -> Result<DispatchObject, AutomationError> {
    let deadline = Instant::now() + timeout;
    loop {
        match attach_scripting_object() {
            Ok(gui) => return Ok(gui),
            Err(err) if Instant::now() >= deadline => {
                return Err(platform_err("launcher did not register its scripting object", err))
            }
            Err(_) => std::thread::sleep(interval),
        }
    }
}

fn spawn_launcher(executable: &Path) -> Result<(), AutomationError> {
    if !executable.exists() {
        return Err(AutomationError::PlatformError(format!(
            "launcher executable not found: {}",
            executable.display()
        )));
    }
    if launcher_process_running(executable) {
        debug!("launcher process already running");
        return Ok(());
    }
    std::process::Command::new(executable)
        .spawn()
        .map_err(|err| platform_err("failed to start launcher", err))?;
    Ok(())
}

fn launcher_process_running(executable: &Path) -> bool {
    let Some(name) = executable.file_name() else {
        return false;
    };
    let mut system = sysinfo::System::new();
    system.refresh_processes(sysinfo::ProcessesToUpdate::All, true);
    system
        .processes()
        .values()
        .any(|process| process.name().eq_ignore_ascii_case(name))
}

/// One live session window, driven through the scripting object model.
pub struct WindowsScriptedSession {
    session: DispatchObject,
}

impl WindowsScriptedSession {
    fn find(&self, control_id: &str) -> Result<DispatchObject, AutomationError> {
        self.session
            .call_object("findById", &[VARIANT::from(BSTR::from(control_id))])
            .map_err(|_| AutomationError::control(control_id))
    }
}

impl ScriptedSession for WindowsScriptedSession {
    fn exists(&self, control_id: &str) -> bool {
        self.find(control_id).is_ok()
    }

    fn set_text(&self, control_id: &str, value: &str) -> Result<(), AutomationError> {
        self.find(control_id)?
            .put("text", VARIANT::from(BSTR::from(value)))
            .map_err(|_| AutomationError::control(control_id))
    }

    fn read_text(&self, control_id: &str) -> Result<String, AutomationError> {
        let value = self
            .find(control_id)?
            .get("text")
            .map_err(|_| AutomationError::control(control_id))?;
        as_string(&value, control_id)
    }

    fn press(&self, control_id: &str) -> Result<(), AutomationError> {
        self.find(control_id)?
            .call("press", &[])
            .map(|_| ())
            .map_err(|_| AutomationError::control(control_id))
    }

    fn select(&self, control_id: &str) -> Result<(), AutomationError> {
        self.find(control_id)?
            .call("select", &[])
            .map(|_| ())
            .map_err(|_| AutomationError::control(control_id))
    }

    fn set_focus(&self, control_id: &str) -> Result<(), AutomationError> {
        self.find(control_id)?
            .call("setFocus", &[])
            .map(|_| ())
            .map_err(|_| AutomationError::control(control_id))
    }

    fn set_caret_position(
        &self,
        control_id: &str,
        position: usize,
    ) -> Result<(), AutomationError> {
        self.find(control_id)?
            .put("caretPosition", VARIANT::from(position as i32))
            .map_err(|_| AutomationError::control(control_id))
    }

    fn send_vkey(&self, key: u16) -> Result<(), AutomationError> {
        self.find(MAIN_WINDOW)?
            .call("sendVKey", &[VARIANT::from(key as i32)])
            .map(|_| ())
            .map_err(|_| AutomationError::control(MAIN_WINDOW))
    }

    fn maximize(&self) -> Result<(), AutomationError> {
        self.find(MAIN_WINDOW)?
            .call("maximize", &[])
            .map(|_| ())
            .map_err(|_| AutomationError::control(MAIN_WINDOW))
    }
}

/// Fallback driver over the launcher window itself, for when the
/// scripting path cannot open the target connection.
pub struct WindowsLauncherWindow {
    title_pattern: Regex,
    search_timeout: Duration,
}

impl WindowsLauncherWindow {
    pub fn new(config: &AutomationConfig) -> Result<Self, AutomationError> {
        let title_pattern = Regex::new(&config.launcher_window_pattern).map_err(|err| {
            AutomationError::PlatformError(format!(
                "invalid launcher window pattern `{}`: {err}",
                config.launcher_window_pattern
            ))
        })?;
        Ok(Self {
            title_pattern,
            search_timeout: config.startup_timeout(),
        })
    }

    fn find_window(&self) -> Result<(UIAutomation, uiautomation::UIElement), AutomationError> {
        let automation =
            UIAutomation::new().map_err(|err| platform_err("UIAutomation init", err))?;
        let root = automation
            .get_root_element()
            .map_err(|err| platform_err("desktop root", err))?;
        let pattern = self.title_pattern.clone();
        let window = automation
            .create_matcher()
            .from(root)
            .control_type(ControlType::Window)
            .filter_fn(Box::new(move |element: &uiautomation::UIElement| {
                Ok(pattern.is_match(&element.get_name().unwrap_or_default()))
            }))
            .timeout(self.search_timeout.as_millis() as u64)
            .find_first()
            .map_err(|err| platform_err("launcher window not found", err))?;
        let _ = window.set_focus();
        Ok((automation, window))
    }

    fn descendants(
        automation: &UIAutomation,
        window: &uiautomation::UIElement,
        control_type: ControlType,
    ) -> Result<Vec<uiautomation::UIElement>, AutomationError> {
        automation
            .create_matcher()
            .from(window.clone())
            .control_type(control_type)
            .depth(10)
            .timeout(1_000)
            .find_all()
            .or_else(|_| Ok(Vec::new()))
    }

    fn double_activate(element: &uiautomation::UIElement) -> Result<(), AutomationError> {
        let point = element
            .get_clickable_point()
            .map_err(|err| platform_err("clickable point", err))?
            .ok_or_else(|| {
                AutomationError::PlatformError("no clickable point on connection row".to_string())
            })?;
        Mouse::default()
            .double_click(point)
            .map_err(|err| platform_err("double click", err))
    }
}

#[async_trait]
impl LauncherWindow for WindowsLauncherWindow {
    async fn select_server(&self, server_label: &str) -> Result<(), AutomationError> {
        let target = matching::normalize(server_label);
        if target.is_empty() {
            return Ok(());
        }
        let (automation, window) = self.find_window()?;
        let nodes = Self::descendants(&automation, &window, ControlType::TreeItem)?;
        let labels: Vec<String> = nodes
            .iter()
            .map(|node| node.get_name().unwrap_or_default())
            .collect();
        match matching::best_index(&labels, &target) {
            Some((index, score)) => {
                info!(label = %labels[index], score, "selecting server node");
                nodes[index]
                    .click()
                    .map_err(|err| platform_err("server node click", err))
            }
            None => {
                // The grid may already show the target rows without the
                // server node being visible.
                warn!(%server_label, "server node not found in launcher tree");
                Ok(())
            }
        }
    }

    async fn activate_connection(&self, connection_label: &str) -> Result<(), AutomationError> {
        let target = matching::normalize(connection_label);
        if target.is_empty() {
            return Err(AutomationError::ConnectionNotFound(
                "connection label is empty".to_string(),
            ));
        }
        let (automation, window) = self.find_window()?;

        let mut rows = Vec::new();
        let mut labels: Vec<String> = Vec::new();
        for control_type in [ControlType::DataItem, ControlType::ListItem] {
            for row in Self::descendants(&automation, &window, control_type)? {
                let text = row.get_name().unwrap_or_default().trim().to_string();
                if text.is_empty() || labels.contains(&text) {
                    continue;
                }
                labels.push(text);
                rows.push(row);
            }
        }
        if rows.is_empty() {
            return Err(AutomationError::ConnectionNotFound(
                "no connection rows visible in the launcher grid".to_string(),
            ));
        }

        let (index, score) = matching::best_index(&labels, &target).ok_or_else(|| {
            AutomationError::ConnectionNotFound(format!(
                "no launcher row matched `{connection_label}`; first rows: {}",
                labels
                    .iter()
                    .take(10)
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })?;
        info!(label = %labels[index], score, "activating connection row");
        Self::double_activate(&rows[index])
    }
}
