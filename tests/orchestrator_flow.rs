//! End-to-end runs against scripted in-memory fakes: a fake scripting
//! shell handing out fake sessions whose export dialogs actually write
//! files, plus a recording clipboard.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::NaiveDate;
use sapflow::clipboard::ClipboardInjector;
use sapflow::connector::{LauncherWindow, ScriptingShell};
use sapflow::session::{ScriptedSession, Session};
use sapflow::{AutomationConfig, AutomationError, Orchestrator, RunCommand};

// Control ids of the remote screens, as the fake application exposes them.
const COMMAND_FIELD: &str = "wnd[0]/tbar[0]/okcd";
const BACK_BUTTON: &str = "wnd[0]/tbar[0]/btn[3]";
const EXECUTE_BUTTON: &str = "wnd[0]/tbar[1]/btn[8]";
const DIALOG_PATH_FIELD: &str = "wnd[1]/usr/ctxtDY_PATH";
const DIALOG_SAVE_BUTTON: &str = "wnd[1]/tbar[0]/btn[11]";
const DIALOG_OK_BUTTON: &str = "wnd[1]/tbar[0]/btn[0]";
const MULTI_SELECT_BUTTON: &str = "wnd[0]/usr/btn%_QMNUM_%_APP_%-VALU_PUSH";
const PASTE_BUTTON: &str = "wnd[1]/tbar[0]/btn[24]";
const FORMAT_OPTION: &str =
    "wnd[1]/usr/subSUBSCREEN_STEPLOOP:SAPLSPO5:0150/sub:SAPLSPO5:0150/radSPOPLI-SELFLAG[0,0]";

const LISTING_CODE: &str = "zlst_039";
const LOOKUP_CODE: &str = "iw59";

const LISTING_FIXTURE: &str = "\
Status;Record no.;City
open;0042;Lisbon
open;7/000;Lisbon
closed;42;Porto
closed;91;Porto
open;012;Faro
open;12;Faro
";

/// Deduplicated valid identifiers in the fixture above.
const FIXTURE_RECORDS: [&str; 3] = ["42", "91", "12"];

struct SessionState {
    current_transaction: String,
    lookup_entered: bool,
    back_presses: u32,
    export_serial: u32,
}

struct FakeSession {
    controls: HashSet<String>,
    state: Mutex<SessionState>,
    listing_dir: PathBuf,
    lookup_dir: PathBuf,
    write_listing_export: bool,
}

impl FakeSession {
    fn new(listing_dir: &Path, lookup_dir: &Path, write_listing_export: bool) -> Self {
        let controls = [
            COMMAND_FIELD,
            BACK_BUTTON,
            EXECUTE_BUTTON,
            DIALOG_PATH_FIELD,
            DIALOG_SAVE_BUTTON,
            DIALOG_OK_BUTTON,
            MULTI_SELECT_BUTTON,
            PASTE_BUTTON,
            "wnd[1]/tbar[0]/btn[8]",
            FORMAT_OPTION,
            "wnd[0]/usr/ctxtPC_QMART",
            "wnd[0]/usr/ctxtSD_QMDAT-LOW",
            "wnd[0]/usr/ctxtSD_QMDAT-HIGH",
            "wnd[0]/usr/ctxtSC_QMCOD-LOW",
            "wnd[0]/usr/ctxtPC_VARIA",
            "wnd[0]/mbar/menu[0]/menu[4]/menu[1]",
            "wnd[0]/mbar/menu[0]/menu[6]",
        ]
        .into_iter()
        .map(str::to_string)
        .collect();
        Self {
            controls,
            state: Mutex::new(SessionState {
                current_transaction: String::new(),
                lookup_entered: false,
                back_presses: 0,
                export_serial: 0,
            }),
            listing_dir: listing_dir.to_path_buf(),
            lookup_dir: lookup_dir.to_path_buf(),
            write_listing_export,
        }
    }

    fn lookup_entered(&self) -> bool {
        self.state.lock().unwrap().lookup_entered
    }

    fn back_presses(&self) -> u32 {
        self.state.lock().unwrap().back_presses
    }

    fn write_export(&self, state: &mut SessionState) {
        state.export_serial += 1;
        match state.current_transaction.as_str() {
            LISTING_CODE => {
                if self.write_listing_export {
                    let path = self
                        .listing_dir
                        .join(format!("export_{:04}.txt", state.export_serial));
                    std::fs::write(path, LISTING_FIXTURE).unwrap();
                }
            }
            LOOKUP_CODE => {
                let path = self
                    .lookup_dir
                    .join(format!("worklist_{:04}.txt", state.export_serial));
                std::fs::write(path, "Record\n42\n91\n12\n").unwrap();
            }
            other => panic!("export triggered outside a transaction: {other:?}"),
        }
    }

    fn require(&self, control_id: &str) -> Result<(), AutomationError> {
        if self.controls.contains(control_id) {
            Ok(())
        } else {
            Err(AutomationError::ControlNotFound {
                control_id: control_id.to_string(),
            })
        }
    }
}

impl ScriptedSession for FakeSession {
    fn exists(&self, control_id: &str) -> bool {
        self.controls.contains(control_id)
    }

    fn set_text(&self, control_id: &str, value: &str) -> Result<(), AutomationError> {
        self.require(control_id)?;
        if control_id == COMMAND_FIELD {
            let mut state = self.state.lock().unwrap();
            state.current_transaction = value.to_string();
            if value == LOOKUP_CODE {
                state.lookup_entered = true;
            }
        }
        Ok(())
    }

    fn read_text(&self, control_id: &str) -> Result<String, AutomationError> {
        self.require(control_id)?;
        Ok(String::new())
    }

    fn press(&self, control_id: &str) -> Result<(), AutomationError> {
        self.require(control_id)?;
        let mut state = self.state.lock().unwrap();
        match control_id {
            DIALOG_SAVE_BUTTON => self.write_export(&mut state),
            BACK_BUTTON => state.back_presses += 1,
            _ => {}
        }
        Ok(())
    }

    fn select(&self, control_id: &str) -> Result<(), AutomationError> {
        self.require(control_id)
    }

    fn set_focus(&self, control_id: &str) -> Result<(), AutomationError> {
        self.require(control_id)
    }

    fn set_caret_position(
        &self,
        control_id: &str,
        _position: usize,
    ) -> Result<(), AutomationError> {
        self.require(control_id)
    }

    fn send_vkey(&self, _key: u16) -> Result<(), AutomationError> {
        Ok(())
    }

    fn maximize(&self) -> Result<(), AutomationError> {
        Ok(())
    }
}

/// Shell with one open connection handing out a shared fake session.
struct FakeShell {
    session: Arc<FakeSession>,
    connection: String,
}

struct SharedSession(Arc<FakeSession>);

impl ScriptedSession for SharedSession {
    fn exists(&self, control_id: &str) -> bool {
        self.0.exists(control_id)
    }
    fn set_text(&self, control_id: &str, value: &str) -> Result<(), AutomationError> {
        self.0.set_text(control_id, value)
    }
    fn read_text(&self, control_id: &str) -> Result<String, AutomationError> {
        self.0.read_text(control_id)
    }
    fn press(&self, control_id: &str) -> Result<(), AutomationError> {
        self.0.press(control_id)
    }
    fn select(&self, control_id: &str) -> Result<(), AutomationError> {
        self.0.select(control_id)
    }
    fn set_focus(&self, control_id: &str) -> Result<(), AutomationError> {
        self.0.set_focus(control_id)
    }
    fn set_caret_position(
        &self,
        control_id: &str,
        position: usize,
    ) -> Result<(), AutomationError> {
        self.0.set_caret_position(control_id, position)
    }
    fn send_vkey(&self, key: u16) -> Result<(), AutomationError> {
        self.0.send_vkey(key)
    }
    fn maximize(&self) -> Result<(), AutomationError> {
        self.0.maximize()
    }
}

#[async_trait]
impl ScriptingShell for FakeShell {
    fn open_connections(&self) -> Result<Vec<String>, AutomationError> {
        Ok(vec![self.connection.clone()])
    }

    async fn attach(&self, _index: usize) -> Result<Session, AutomationError> {
        Ok(Box::new(SharedSession(self.session.clone())))
    }

    async fn open_connection(&self, _description: &str) -> Result<Session, AutomationError> {
        Err(AutomationError::PlatformError(
            "direct open disabled in fake shell".to_string(),
        ))
    }
}

/// Shell with nothing open and a rejecting open call.
struct EmptyShell;

#[async_trait]
impl ScriptingShell for EmptyShell {
    fn open_connections(&self) -> Result<Vec<String>, AutomationError> {
        Ok(Vec::new())
    }

    async fn attach(&self, index: usize) -> Result<Session, AutomationError> {
        Err(AutomationError::ConnectionNotFound(format!(
            "no connection at index {index}"
        )))
    }

    async fn open_connection(&self, description: &str) -> Result<Session, AutomationError> {
        Err(AutomationError::PlatformError(format!(
            "cannot open `{description}`"
        )))
    }
}

struct NoopLauncher {
    fail_activation: bool,
}

#[async_trait]
impl LauncherWindow for NoopLauncher {
    async fn select_server(&self, _server_label: &str) -> Result<(), AutomationError> {
        Ok(())
    }

    async fn activate_connection(&self, connection_label: &str) -> Result<(), AutomationError> {
        if self.fail_activation {
            Err(AutomationError::ConnectionNotFound(format!(
                "no row matched `{connection_label}`"
            )))
        } else {
            Ok(())
        }
    }
}

#[derive(Default)]
struct RecordingClipboard {
    payloads: Mutex<Vec<Vec<String>>>,
}

impl ClipboardInjector for RecordingClipboard {
    fn write_lines(&self, values: &[String]) -> Result<(), AutomationError> {
        self.payloads.lock().unwrap().push(values.to_vec());
        Ok(())
    }
}

fn test_config(listing_dir: &Path, lookup_dir: &Path) -> AutomationConfig {
    let mut config: AutomationConfig = serde_json::from_value(serde_json::json!({
        "credentials": {"username": "bot", "password": "pw"},
        "target": {"server_label": "00 ERP", "connection_label": "H181 Production"},
        "launcher_executable": "/opt/launcher/launcher",
        "listing_transaction": LISTING_CODE,
        "lookup_transaction": LOOKUP_CODE,
        "category_marker": "ov",
        "report_variant": "/layout ov2",
        "listing_export_dir": listing_dir,
        "lookup_export_dir": lookup_dir,
        "listing_export_glob": "export*.txt",
        "listing_fallback_glob": "*.txt",
        "lookup_export_glob": "worklist*.txt"
    }))
    .unwrap();
    config.export_timeout_seconds = 5;
    config.poll_interval_ms = 10;
    config.back_settle_ms = 1;
    config
}

fn command() -> RunCommand {
    RunCommand::new(
        NaiveDate::from_ymd_opt(2026, 1, 19).unwrap(),
        NaiveDate::from_ymd_opt(2026, 2, 19).unwrap(),
    )
    .unwrap()
}

#[tokio::test]
async fn full_run_produces_both_exports_and_the_record_count() {
    let listing_dir = tempfile::tempdir().unwrap();
    let lookup_dir = tempfile::tempdir().unwrap();
    let session = Arc::new(FakeSession::new(listing_dir.path(), lookup_dir.path(), true));
    let shell = Arc::new(FakeShell {
        session: session.clone(),
        connection: "H181 Production (no SSO)".to_string(),
    });
    let clipboard = Arc::new(RecordingClipboard::default());

    let orchestrator = Orchestrator::new(
        test_config(listing_dir.path(), lookup_dir.path()),
        shell,
        Arc::new(NoopLauncher {
            fail_activation: false,
        }),
        clipboard.clone(),
    );

    let result = orchestrator.run(command()).await.unwrap();

    assert_eq!(result.record_count, FIXTURE_RECORDS.len());
    assert!(result.listing_export.starts_with(listing_dir.path()));
    assert!(result.lookup_export.starts_with(lookup_dir.path()));
    assert!(result.lookup_export.exists());

    // Clipboard payload: first-seen order, one write for the whole run.
    let payloads = clipboard.payloads.lock().unwrap();
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0], FIXTURE_RECORDS);

    // Navigation reset ran between the transactions, within its bounds.
    assert!((3..=4).contains(&session.back_presses()));

    // The audit copy landed next to the lookup export.
    let audit_copies: Vec<_> = std::fs::read_dir(lookup_dir.path())
        .unwrap()
        .flatten()
        .filter(|entry| {
            entry
                .file_name()
                .to_string_lossy()
                .starts_with("lookup_full_")
        })
        .collect();
    assert_eq!(audit_copies.len(), 1);
}

#[tokio::test]
async fn listing_export_timeout_fails_the_run_before_the_lookup() {
    let listing_dir = tempfile::tempdir().unwrap();
    let lookup_dir = tempfile::tempdir().unwrap();
    let session = Arc::new(FakeSession::new(
        listing_dir.path(),
        lookup_dir.path(),
        false,
    ));
    let shell = Arc::new(FakeShell {
        session: session.clone(),
        connection: "H181 Production".to_string(),
    });

    let mut config = test_config(listing_dir.path(), lookup_dir.path());
    config.export_timeout_seconds = 0;
    let orchestrator = Orchestrator::new(
        config,
        shell,
        Arc::new(NoopLauncher {
            fail_activation: false,
        }),
        Arc::new(RecordingClipboard::default()),
    );

    let err = orchestrator.run(command()).await.unwrap_err();
    match err {
        AutomationError::ExportTimeout { dir, pattern, .. } => {
            assert_eq!(dir, listing_dir.path());
            assert_eq!(pattern, "export*.txt");
        }
        other => panic!("expected ExportTimeout, got {other:?}"),
    }
    assert!(!session.lookup_entered());
}

#[tokio::test]
async fn unknown_target_surfaces_connection_not_found() {
    let listing_dir = tempfile::tempdir().unwrap();
    let lookup_dir = tempfile::tempdir().unwrap();
    let mut config = test_config(listing_dir.path(), lookup_dir.path());
    config.startup_timeout_seconds = 0;

    let orchestrator = Orchestrator::new(
        config,
        Arc::new(EmptyShell),
        Arc::new(NoopLauncher {
            fail_activation: true,
        }),
        Arc::new(RecordingClipboard::default()),
    );

    let err = orchestrator.run(command()).await.unwrap_err();
    assert!(matches!(err, AutomationError::ConnectionNotFound(_)));
}

#[tokio::test]
async fn inverted_dates_never_touch_the_session() {
    let listing_dir = tempfile::tempdir().unwrap();
    let lookup_dir = tempfile::tempdir().unwrap();

    let orchestrator = Orchestrator::new(
        test_config(listing_dir.path(), lookup_dir.path()),
        Arc::new(EmptyShell),
        Arc::new(NoopLauncher {
            fail_activation: true,
        }),
        Arc::new(RecordingClipboard::default()),
    );

    let command = RunCommand {
        start_date: NaiveDate::from_ymd_opt(2026, 2, 19).unwrap(),
        end_date: NaiveDate::from_ymd_opt(2026, 1, 19).unwrap(),
    };
    let err = orchestrator.run(command).await.unwrap_err();
    assert!(matches!(err, AutomationError::InvalidArgument(_)));
}
