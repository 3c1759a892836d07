//! End-to-end sequencing of the two-transaction export workflow.
//!
//! The orchestrator is the only component with cross-cutting sequencing
//! knowledge: everything below it is a leaf it wires together. A run
//! either fully succeeds with both export paths populated, or fails as a
//! whole with a domain error; no partial result is ever returned.

use std::sync::Arc;

use tracing::{info, instrument};

use crate::clipboard::{ClipboardInjector, SystemClipboard};
use crate::config::AutomationConfig;
use crate::connector::{LauncherWindow, ScriptingShell, SessionConnector};
use crate::errors::AutomationError;
use crate::platforms;
use crate::records::RecordRules;
use crate::transactions::{ListingExportRunner, LookupExportRunner, Navigator};
use crate::types::{RunCommand, RunResult};

pub struct Orchestrator {
    connector: SessionConnector,
    listing: ListingExportRunner,
    lookup: LookupExportRunner,
    navigator: Navigator,
    rules: RecordRules,
}

impl Orchestrator {
    /// Wires the engine from configuration and the three platform seams.
    pub fn new(
        config: AutomationConfig,
        shell: Arc<dyn ScriptingShell>,
        launcher: Arc<dyn LauncherWindow>,
        clipboard: Arc<dyn ClipboardInjector>,
    ) -> Self {
        let config = Arc::new(config);
        Self {
            connector: SessionConnector::new(shell, launcher, config.clone()),
            listing: ListingExportRunner::new(config.clone()),
            lookup: LookupExportRunner::new(config.clone(), clipboard),
            navigator: Navigator::new(&config),
            rules: RecordRules::new(&config.record_headers, &config.measure_marker),
        }
    }

    /// Wires the engine against the real launcher scripting surface and
    /// system clipboard of the current platform.
    pub fn native(config: AutomationConfig) -> Result<Self, AutomationError> {
        let shell = platforms::create_shell(&config)?;
        let launcher = platforms::create_launcher_window(&config)?;
        Ok(Self::new(
            config,
            shell,
            launcher,
            Arc::new(SystemClipboard::new()),
        ))
    }

    /// Runs the whole workflow once.
    ///
    /// The session handle is owned by this call and released on every exit
    /// path; waits are all bounded; a second concurrent run would race on
    /// the shared clipboard and session, so callers must serialize runs.
    #[instrument(
        skip(self, command),
        fields(start = %command.start_date, end = %command.end_date)
    )]
    pub async fn run(&self, command: RunCommand) -> Result<RunResult, AutomationError> {
        command.validate()?;
        info!("automation run started");

        let session = self.connector.connect().await?;

        let listing_export = self
            .listing
            .run(session.as_ref(), command.start_date, command.end_date)
            .await?;

        let records = self.rules.extract(&listing_export)?;
        if records.is_empty() {
            return Err(AutomationError::ArtifactError(format!(
                "no valid record identifiers in {}",
                listing_export.display()
            )));
        }

        self.navigator.back_to_command_field(session.as_ref()).await?;

        let artifacts = self.lookup.run(session.as_ref(), &records).await?;

        info!(
            listing = %listing_export.display(),
            lookup = %artifacts.export.display(),
            audit_copy = %artifacts.audit_copy.display(),
            records = records.len(),
            "automation run finished"
        );

        Ok(RunResult {
            listing_export,
            lookup_export: artifacts.export,
            record_count: records.len(),
        })
    }
}
