//! Session establishment.
//!
//! Three strategies are tried in a fixed priority order, first success
//! wins: attach to an already-open connection, ask the launcher's
//! scripting surface to open one, or fall back to driving the launcher
//! window itself. Once a session exists, the logon screen is filled only
//! if it is actually shown.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use tracing::{debug, info, instrument, warn};

use crate::config::AutomationConfig;
use crate::errors::AutomationError;
use crate::matching;
use crate::session::{ScriptedSession, Session, VKEY_ENTER};
use crate::types::ConnectionTarget;
use crate::wait::Poll;

// Logon screen control ids.
const USER_FIELD: &str = "wnd[0]/usr/txtRSYST-BNAME";
const PASSWORD_FIELD: &str = "wnd[0]/usr/pwdRSYST-BCODE";
const CLIENT_FIELD: &str = "wnd[0]/usr/txtRSYST-MANDT";
const LANGUAGE_FIELD: &str = "wnd[0]/usr/txtRSYST-LANGU";

/// Scripting surface of the launcher process (the program that manages
/// named connections to the remote session).
#[async_trait]
pub trait ScriptingShell: Send + Sync {
    /// Descriptions of the connections currently open in the launcher,
    /// in launcher order.
    fn open_connections(&self) -> Result<Vec<String>, AutomationError>;

    /// Attaches to the first session of the already-open connection at
    /// `index` (an index into [`open_connections`](Self::open_connections)).
    async fn attach(&self, index: usize) -> Result<Session, AutomationError>;

    /// Asks the launcher to open the named connection and waits for its
    /// first session.
    async fn open_connection(&self, description: &str) -> Result<Session, AutomationError>;
}

/// Drives the launcher window itself when the scripting path cannot open
/// the target connection.
#[async_trait]
pub trait LauncherWindow: Send + Sync {
    /// Best-effort click on the server node in the navigation tree.
    /// A missing node is not fatal; the connection grid may already show
    /// the target rows.
    async fn select_server(&self, server_label: &str) -> Result<(), AutomationError>;

    /// Double-activates the best-matching connection row. Fails when no
    /// row scores above the match threshold.
    async fn activate_connection(&self, connection_label: &str) -> Result<(), AutomationError>;
}

/// Ordered connection strategies; first success wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectStrategy {
    ReuseExisting,
    DirectOpen,
    LauncherUi,
}

const STRATEGIES: [ConnectStrategy; 3] = [
    ConnectStrategy::ReuseExisting,
    ConnectStrategy::DirectOpen,
    ConnectStrategy::LauncherUi,
];

/// Establishes or reuses exactly one session per run.
pub struct SessionConnector {
    shell: Arc<dyn ScriptingShell>,
    launcher: Arc<dyn LauncherWindow>,
    config: Arc<AutomationConfig>,
}

impl SessionConnector {
    pub fn new(
        shell: Arc<dyn ScriptingShell>,
        launcher: Arc<dyn LauncherWindow>,
        config: Arc<AutomationConfig>,
    ) -> Self {
        Self {
            shell,
            launcher,
            config,
        }
    }

    /// Establishes a session for the configured target and logs on when a
    /// credential screen is shown. Strategy failures are recovered locally
    /// by moving on to the next strategy; only full exhaustion surfaces.
    #[instrument(skip(self))]
    pub async fn connect(&self) -> Result<Session, AutomationError> {
        let target = &self.config.target;
        for strategy in STRATEGIES {
            match self.try_strategy(strategy, target).await {
                Ok(session) => {
                    info!(?strategy, connection = %target.connection_label, "session established");
                    self.login_if_required(session.as_ref())?;
                    return Ok(session);
                }
                Err(err) => {
                    warn!(?strategy, %err, "connection strategy failed");
                }
            }
        }
        Err(AutomationError::ConnectionNotFound(format!(
            "connection entry not found for `{}`",
            target.connection_label
        )))
    }

    async fn try_strategy(
        &self,
        strategy: ConnectStrategy,
        target: &ConnectionTarget,
    ) -> Result<Session, AutomationError> {
        match strategy {
            ConnectStrategy::ReuseExisting => self.reuse_existing(target).await,
            ConnectStrategy::DirectOpen => self.direct_open(target).await,
            ConnectStrategy::LauncherUi => self.launcher_fallback(target).await,
        }
    }

    /// Attaches to an already-open connection whose description contains
    /// the normalized connection label. No logon happens on this path
    /// unless the reused session still sits on its credential screen.
    async fn reuse_existing(&self, target: &ConnectionTarget) -> Result<Session, AutomationError> {
        let index = self
            .find_open(target)?
            .ok_or_else(|| {
                AutomationError::ConnectionNotFound(format!(
                    "no open connection matches `{}`",
                    target.connection_label
                ))
            })?;
        info!(index, "reusing open connection");
        self.shell.attach(index).await
    }

    /// Opens the connection programmatically, preferring the full
    /// connection label over the server/group label.
    async fn direct_open(&self, target: &ConnectionTarget) -> Result<Session, AutomationError> {
        let mut last_err: Option<AutomationError> = None;
        for candidate in [&target.connection_label, &target.server_label] {
            if candidate.trim().is_empty() {
                continue;
            }
            match self.shell.open_connection(candidate).await {
                Ok(session) => {
                    info!(%candidate, "connection opened");
                    return Ok(session);
                }
                Err(err) => {
                    debug!(%candidate, %err, "direct open failed");
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            AutomationError::ConnectionNotFound("no usable connection candidate".to_string())
        }))
    }

    /// Double-clicks the target row in the launcher window, then polls
    /// the scripting surface until the connection materializes.
    async fn launcher_fallback(
        &self,
        target: &ConnectionTarget,
    ) -> Result<Session, AutomationError> {
        self.launcher.select_server(&target.server_label).await?;
        self.launcher
            .activate_connection(&target.connection_label)
            .await?;

        let poll = Poll::new(self.config.poll_interval(), self.config.startup_timeout());
        let index = poll
            .until_some(|| self.find_open(target).ok().flatten())
            .await
            .ok_or_else(|| {
                AutomationError::ConnectionNotFound(format!(
                    "connection `{}` did not appear after launcher activation",
                    target.connection_label
                ))
            })?;
        self.shell.attach(index).await
    }

    fn find_open(&self, target: &ConnectionTarget) -> Result<Option<usize>, AutomationError> {
        let needle = matching::normalize(&target.connection_label);
        if needle.is_empty() {
            return Err(AutomationError::ConnectionNotFound(
                "connection label is empty".to_string(),
            ));
        }
        let open = self.shell.open_connections()?;
        Ok(open
            .iter()
            .position(|description| matching::normalize(description).contains(&needle)))
    }

    /// Writes credentials when the logon screen is present; silently
    /// skips when the session is already authenticated.
    fn login_if_required(&self, session: &dyn ScriptedSession) -> Result<(), AutomationError> {
        if !session.exists(USER_FIELD) {
            debug!("session already authenticated");
            return Ok(());
        }
        info!("credential screen detected, logging on");
        let credentials = &self.config.credentials;
        session.set_text(USER_FIELD, &credentials.username)?;
        session.set_text(PASSWORD_FIELD, credentials.password.expose_secret())?;
        if let Some(client) = &credentials.client {
            if session.exists(CLIENT_FIELD) {
                session.set_text(CLIENT_FIELD, client)?;
            }
        }
        if let Some(language) = &credentials.language {
            if session.exists(LANGUAGE_FIELD) {
                session.set_text(LANGUAGE_FIELD, language)?;
            }
        }
        session.send_vkey(VKEY_ENTER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct ScreenState {
        controls: HashMap<String, String>,
        log: Vec<String>,
    }

    /// Scripted in-memory session: a set of resolvable controls plus an
    /// interaction log.
    #[derive(Default)]
    struct FakeSession {
        state: Mutex<ScreenState>,
    }

    impl FakeSession {
        fn with_controls(ids: &[&str]) -> Self {
            let session = Self::default();
            {
                let mut state = session.state.lock().unwrap();
                for id in ids {
                    state.controls.insert(id.to_string(), String::new());
                }
            }
            session
        }

        fn log(&self) -> Vec<String> {
            self.state.lock().unwrap().log.clone()
        }

        fn text(&self, id: &str) -> Option<String> {
            self.state.lock().unwrap().controls.get(id).cloned()
        }
    }

    impl ScriptedSession for FakeSession {
        fn exists(&self, control_id: &str) -> bool {
            self.state.lock().unwrap().controls.contains_key(control_id)
        }

        fn set_text(&self, control_id: &str, value: &str) -> Result<(), AutomationError> {
            let mut state = self.state.lock().unwrap();
            match state.controls.get_mut(control_id) {
                Some(slot) => {
                    *slot = value.to_string();
                    Ok(())
                }
                None => Err(AutomationError::control(control_id)),
            }
        }

        fn read_text(&self, control_id: &str) -> Result<String, AutomationError> {
            self.state
                .lock()
                .unwrap()
                .controls
                .get(control_id)
                .cloned()
                .ok_or_else(|| AutomationError::control(control_id))
        }

        fn press(&self, control_id: &str) -> Result<(), AutomationError> {
            let mut state = self.state.lock().unwrap();
            if !state.controls.contains_key(control_id) {
                return Err(AutomationError::control(control_id));
            }
            state.log.push(format!("press {control_id}"));
            Ok(())
        }

        fn select(&self, control_id: &str) -> Result<(), AutomationError> {
            let mut state = self.state.lock().unwrap();
            if !state.controls.contains_key(control_id) {
                return Err(AutomationError::control(control_id));
            }
            state.log.push(format!("select {control_id}"));
            Ok(())
        }

        fn set_focus(&self, _control_id: &str) -> Result<(), AutomationError> {
            Ok(())
        }

        fn set_caret_position(
            &self,
            _control_id: &str,
            _position: usize,
        ) -> Result<(), AutomationError> {
            Ok(())
        }

        fn send_vkey(&self, key: u16) -> Result<(), AutomationError> {
            self.state.lock().unwrap().log.push(format!("vkey {key}"));
            Ok(())
        }

        fn maximize(&self) -> Result<(), AutomationError> {
            Ok(())
        }
    }

    struct FakeShell {
        connections: Mutex<Vec<String>>,
        direct_open_works: bool,
        logon_screen: bool,
        attached: Mutex<Vec<Arc<FakeSession>>>,
    }

    impl FakeShell {
        fn new(connections: &[&str]) -> Self {
            Self {
                connections: Mutex::new(connections.iter().map(|s| s.to_string()).collect()),
                direct_open_works: false,
                logon_screen: false,
                attached: Mutex::new(Vec::new()),
            }
        }

        fn make_session(&self) -> Session {
            let controls: &[&str] = if self.logon_screen {
                &[USER_FIELD, PASSWORD_FIELD, CLIENT_FIELD, LANGUAGE_FIELD]
            } else {
                &[]
            };
            let session = Arc::new(FakeSession::with_controls(controls));
            self.attached.lock().unwrap().push(session.clone());
            Box::new(SharedSession(session))
        }
    }

    /// Box-able view over a shared fake session so tests can inspect it
    /// after the connector consumed the box.
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
            Ok(self.connections.lock().unwrap().clone())
        }

        async fn attach(&self, index: usize) -> Result<Session, AutomationError> {
            let known = self.connections.lock().unwrap().len();
            if index >= known {
                return Err(AutomationError::ConnectionNotFound(format!(
                    "no connection at index {index}"
                )));
            }
            Ok(self.make_session())
        }

        async fn open_connection(&self, description: &str) -> Result<Session, AutomationError> {
            if !self.direct_open_works {
                return Err(AutomationError::PlatformError(
                    "scripting open rejected".to_string(),
                ));
            }
            self.connections
                .lock()
                .unwrap()
                .push(description.to_string());
            Ok(self.make_session())
        }
    }

    #[derive(Default)]
    struct FakeLauncher {
        activation_adds: Option<(Arc<FakeShell>, String)>,
        fail_activation: bool,
        activated: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LauncherWindow for FakeLauncher {
        async fn select_server(&self, _server_label: &str) -> Result<(), AutomationError> {
            Ok(())
        }

        async fn activate_connection(
            &self,
            connection_label: &str,
        ) -> Result<(), AutomationError> {
            if self.fail_activation {
                return Err(AutomationError::ConnectionNotFound(format!(
                    "no row matched `{connection_label}`"
                )));
            }
            self.activated
                .lock()
                .unwrap()
                .push(connection_label.to_string());
            if let Some((shell, description)) = &self.activation_adds {
                shell.connections.lock().unwrap().push(description.clone());
            }
            Ok(())
        }
    }

    fn test_config() -> AutomationConfig {
        let mut config: AutomationConfig = serde_json::from_value(serde_json::json!({
            "credentials": {
                "username": "bot",
                "password": "hunter2",
                "client": "100",
                "language": "EN"
            },
            "target": {
                "server_label": "00 ERP",
                "connection_label": "H181 Produção"
            },
            "launcher_executable": "/opt/launcher/launcher",
            "listing_transaction": "zlst_039",
            "lookup_transaction": "iw59",
            "category_marker": "ov",
            "report_variant": "/layout ov2",
            "listing_export_dir": "/tmp/exports/listing",
            "lookup_export_dir": "/tmp/exports/lookup"
        }))
        .unwrap();
        config.poll_interval_ms = 10;
        config.startup_timeout_seconds = 1;
        config
    }

    fn connector(shell: Arc<FakeShell>, launcher: Arc<FakeLauncher>) -> SessionConnector {
        SessionConnector::new(shell, launcher, Arc::new(test_config()))
    }

    #[tokio::test]
    async fn reuses_an_open_connection_without_logon() {
        let shell = Arc::new(FakeShell::new(&[
            "QAS sandbox",
            "H181 Producao (without SSO)",
        ]));
        let launcher = Arc::new(FakeLauncher::default());
        let session = connector(shell.clone(), launcher).connect().await.unwrap();

        assert!(!session.exists(USER_FIELD));
        let attached = shell.attached.lock().unwrap();
        assert_eq!(attached.len(), 1);
        assert!(attached[0].log().is_empty());
    }

    #[tokio::test]
    async fn falls_through_to_direct_open_and_logs_on() {
        let mut shell = FakeShell::new(&[]);
        shell.direct_open_works = true;
        shell.logon_screen = true;
        let shell = Arc::new(shell);
        let launcher = Arc::new(FakeLauncher::default());

        connector(shell.clone(), launcher).connect().await.unwrap();

        let attached = shell.attached.lock().unwrap();
        let session = &attached[0];
        assert_eq!(session.text(USER_FIELD).unwrap(), "bot");
        assert_eq!(session.text(PASSWORD_FIELD).unwrap(), "hunter2");
        assert_eq!(session.text(CLIENT_FIELD).unwrap(), "100");
        assert_eq!(session.text(LANGUAGE_FIELD).unwrap(), "EN");
        assert_eq!(session.log(), vec!["vkey 0"]);
    }

    #[tokio::test]
    async fn launcher_fallback_waits_for_the_connection() {
        let shell = Arc::new(FakeShell::new(&[]));
        let launcher = Arc::new(FakeLauncher {
            activation_adds: Some((shell.clone(), "H181 Producao".to_string())),
            ..Default::default()
        });

        connector(shell.clone(), launcher.clone())
            .connect()
            .await
            .unwrap();

        assert_eq!(
            launcher.activated.lock().unwrap().as_slice(),
            ["H181 Produção"]
        );
        assert_eq!(shell.attached.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn exhausting_every_strategy_is_connection_not_found() {
        let shell = Arc::new(FakeShell::new(&["QAS sandbox"]));
        let launcher = Arc::new(FakeLauncher {
            fail_activation: true,
            ..Default::default()
        });

        let err = match connector(shell, launcher).connect().await {
            Ok(_) => panic!("expected connection to fail"),
            Err(e) => e,
        };
        assert!(matches!(err, AutomationError::ConnectionNotFound(_)));
    }
}
