//! Transaction runners.
//!
//! Both business transactions share one screen choreography: enter the
//! transaction code, fill the selection screen, execute, walk the export
//! dialog, then wait for the artifact to land on disk. The steps of that
//! state machine are traced via [`TransactionStep`] so a stuck run can be
//! located from logs alone.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Local, NaiveDate};
use tracing::{debug, info, instrument, warn};

use crate::clipboard::ClipboardInjector;
use crate::config::AutomationConfig;
use crate::errors::AutomationError;
use crate::session::{self, ScriptedSession, VKEY_ENTER};
use crate::types::TransactionStep;
use crate::wait::Poll;
use crate::watcher::ExportWatcher;

// Main-window chrome shared by every transaction.
const COMMAND_FIELD: &str = "wnd[0]/tbar[0]/okcd";
const BACK_BUTTON: &str = "wnd[0]/tbar[0]/btn[3]";
const EXECUTE_BUTTON: &str = "wnd[0]/tbar[1]/btn[8]";

// Export dialog (modal window 1).
const DIALOG_PATH_FIELD: &str = "wnd[1]/usr/ctxtDY_PATH";
const DIALOG_SAVE_BUTTON: &str = "wnd[1]/tbar[0]/btn[11]";
const DIALOG_OK_BUTTON: &str = "wnd[1]/tbar[0]/btn[0]";
const DIALOG_OVERWRITE_YES: &str = "wnd[1]/usr/btnSPOP-OPTION1";

// Listing transaction selection screen.
const LISTING_CATEGORY_FIELD: &str = "wnd[0]/usr/ctxtPC_QMART";
const LISTING_DATE_LOW_FIELD: &str = "wnd[0]/usr/ctxtSD_QMDAT-LOW";
const LISTING_DATE_HIGH_FIELD: &str = "wnd[0]/usr/ctxtSD_QMDAT-HIGH";
const LISTING_CODE_FILTER_FIELD: &str = "wnd[0]/usr/ctxtSC_QMCOD-LOW";
const LISTING_VARIANT_FIELD: &str = "wnd[0]/usr/ctxtPC_VARIA";
const LISTING_EXPORT_MENU: &str = "wnd[0]/mbar/menu[0]/menu[4]/menu[1]";

// Lookup transaction screens.
const LOOKUP_MULTI_SELECT_BUTTON: &str = "wnd[0]/usr/btn%_QMNUM_%_APP_%-VALU_PUSH";
const LOOKUP_PASTE_BUTTON: &str = "wnd[1]/tbar[0]/btn[24]";
const LOOKUP_APPLY_BUTTON: &str = "wnd[1]/tbar[0]/btn[8]";
const LOOKUP_EXPORT_MENU: &str = "wnd[0]/mbar/menu[0]/menu[6]";
const LOOKUP_FORMAT_OPTION: &str =
    "wnd[1]/usr/subSUBSCREEN_STEPLOOP:SAPLSPO5:0150/sub:SAPLSPO5:0150/radSPOPLI-SELFLAG[0,0]";

// The variant field re-validates against its saved prefix; the caret must
// not sit past column 9 when focus leaves the field.
const VARIANT_CARET_LIMIT: usize = 9;

const MIN_BACK_PRESSES: u32 = 3;
/// Hard bound for the navigation reset, regardless of configuration.
const BACK_PRESS_CEILING: u32 = 4;

fn step(step: TransactionStep) {
    debug!(?step, "transaction step");
}

fn format_screen_date(date: NaiveDate) -> String {
    date.format("%d.%m.%Y").to_string()
}

/// The remote session expects backslash-separated paths.
fn to_remote_path(dir: &Path) -> String {
    dir.display().to_string().replace('/', "\\")
}

/// Drives the save-as dialog shared by both transactions.
struct ExportDialog<'a> {
    export_dir: &'a Path,
}

impl<'a> ExportDialog<'a> {
    fn new(export_dir: &'a Path) -> Self {
        Self { export_dir }
    }

    /// Confirms the export dialog, forcing the destination directory when
    /// the path field is shown, and accepts the overwrite confirmation if
    /// the destination file already exists.
    fn finalize(&self, session: &dyn ScriptedSession) -> Result<(), AutomationError> {
        // Some layouts show a bare confirmation before the path screen.
        if session.exists(DIALOG_OK_BUTTON) && !session.exists(DIALOG_PATH_FIELD) {
            session.press(DIALOG_OK_BUTTON)?;
        }

        if session.exists(DIALOG_PATH_FIELD) {
            let remote_dir = to_remote_path(self.export_dir);
            session.set_text(DIALOG_PATH_FIELD, &remote_dir)?;
            debug!(dir = %remote_dir, "export directory set");
        }

        if session.exists(DIALOG_SAVE_BUTTON) {
            session.press(DIALOG_SAVE_BUTTON)?;
        } else if session.exists(DIALOG_OK_BUTTON) {
            session.press(DIALOG_OK_BUTTON)?;
        } else {
            return Err(AutomationError::control(DIALOG_SAVE_BUTTON));
        }

        if session.exists(DIALOG_OVERWRITE_YES) {
            session.press(DIALOG_OVERWRITE_YES)?;
        }
        Ok(())
    }
}

/// Runs the date-range listing transaction and captures its export.
pub struct ListingExportRunner {
    config: Arc<AutomationConfig>,
    watcher: ExportWatcher,
}

impl ListingExportRunner {
    pub fn new(config: Arc<AutomationConfig>) -> Self {
        let watcher = ExportWatcher::new(
            config.listing_export_dir.clone(),
            config.listing_export_glob.clone(),
            config.export_timeout(),
        )
        .with_interval(config.poll_interval());
        Self { config, watcher }
    }

    #[instrument(skip(self, session))]
    pub async fn run(
        &self,
        session: &dyn ScriptedSession,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<PathBuf, AutomationError> {
        info!(transaction = %self.config.listing_transaction, "running listing export");
        let baseline = self.watcher.snapshot();

        step(TransactionStep::EnterTransaction);
        session.maximize()?;
        session.set_text(COMMAND_FIELD, &self.config.listing_transaction)?;
        session.send_vkey(VKEY_ENTER)?;

        step(TransactionStep::FillFields);
        session.set_text(LISTING_CATEGORY_FIELD, &self.config.category_marker)?;
        session.set_text(LISTING_DATE_LOW_FIELD, &format_screen_date(start_date))?;
        session.set_text(LISTING_DATE_HIGH_FIELD, &format_screen_date(end_date))?;
        session.set_text(LISTING_CODE_FILTER_FIELD, "*")?;
        let variant = &self.config.report_variant;
        session.set_text(LISTING_VARIANT_FIELD, variant)?;
        session.set_focus(LISTING_VARIANT_FIELD)?;
        session.set_caret_position(
            LISTING_VARIANT_FIELD,
            variant.chars().count().min(VARIANT_CARET_LIMIT),
        )?;

        step(TransactionStep::Execute);
        session.press(EXECUTE_BUTTON)?;

        step(TransactionStep::OpenExportDialog);
        session.select(LISTING_EXPORT_MENU)?;

        step(TransactionStep::ConfirmSave);
        ExportDialog::new(&self.config.listing_export_dir).finalize(session)?;

        step(TransactionStep::AwaitExport);
        let exported = match self.watcher.await_export(&baseline).await {
            Ok(path) => path,
            Err(timeout_err @ AutomationError::ExportTimeout { .. }) => {
                // One shot with the looser pattern before giving up; the
                // remote side occasionally exports under its default name.
                match self
                    .watcher
                    .scan(&baseline, &self.config.listing_fallback_glob)?
                {
                    Some(path) => {
                        warn!(path = %path.display(), "export found via fallback pattern");
                        path
                    }
                    None => return Err(timeout_err),
                }
            }
            Err(err) => return Err(err),
        };

        step(TransactionStep::Done);
        info!(path = %exported.display(), "listing export detected");
        Ok(exported)
    }
}

/// Artifacts produced by the lookup transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupArtifacts {
    pub export: PathBuf,
    /// Timestamped full copy kept for audit retention.
    pub audit_copy: PathBuf,
}

/// Runs the bulk identifier lookup and captures its export plus an audit
/// copy.
pub struct LookupExportRunner {
    config: Arc<AutomationConfig>,
    watcher: ExportWatcher,
    clipboard: Arc<dyn ClipboardInjector>,
}

impl LookupExportRunner {
    pub fn new(config: Arc<AutomationConfig>, clipboard: Arc<dyn ClipboardInjector>) -> Self {
        let watcher = ExportWatcher::new(
            config.lookup_export_dir.clone(),
            config.lookup_export_glob.clone(),
            config.export_timeout(),
        )
        .with_interval(config.poll_interval());
        Self {
            config,
            watcher,
            clipboard,
        }
    }

    #[instrument(skip(self, session, records), fields(records = records.len()))]
    pub async fn run(
        &self,
        session: &dyn ScriptedSession,
        records: &[String],
    ) -> Result<LookupArtifacts, AutomationError> {
        info!(
            transaction = %self.config.lookup_transaction,
            records = records.len(),
            "running lookup export"
        );
        let baseline = self.watcher.snapshot();

        step(TransactionStep::EnterTransaction);
        session.maximize()?;
        session.set_text(COMMAND_FIELD, &self.config.lookup_transaction)?;
        session.send_vkey(VKEY_ENTER)?;

        step(TransactionStep::FillFields);
        // The selection screen builds its controls lazily after the
        // transaction switch.
        let poll = Poll::new(self.config.poll_interval(), self.config.control_timeout());
        session::wait_for_control(session, LOOKUP_MULTI_SELECT_BUTTON, poll).await?;
        session.press(LOOKUP_MULTI_SELECT_BUTTON)?;
        self.clipboard.write_lines(records)?;
        session.press(LOOKUP_PASTE_BUTTON)?;
        session.press(LOOKUP_APPLY_BUTTON)?;

        step(TransactionStep::Execute);
        session.press(EXECUTE_BUTTON)?;

        step(TransactionStep::OpenExportDialog);
        session.select(LOOKUP_EXPORT_MENU)?;
        session.press(DIALOG_OK_BUTTON)?;
        session.select(LOOKUP_FORMAT_OPTION)?;
        session.set_focus(LOOKUP_FORMAT_OPTION)?;
        session.press(DIALOG_OK_BUTTON)?;

        step(TransactionStep::ConfirmSave);
        ExportDialog::new(&self.config.lookup_export_dir).finalize(session)?;

        step(TransactionStep::AwaitExport);
        let export = self.watcher.await_export(&baseline).await?;
        let audit_copy = self.write_audit_copy(&export)?;

        step(TransactionStep::Done);
        info!(
            export = %export.display(),
            audit_copy = %audit_copy.display(),
            "lookup export detected"
        );
        Ok(LookupArtifacts { export, audit_copy })
    }

    /// Full timestamped copy of the export, kept alongside it.
    fn write_audit_copy(&self, export: &Path) -> Result<PathBuf, AutomationError> {
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let extension = export
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("xlsx");
        let target = self.config.lookup_export_dir.join(format!(
            "{}_{timestamp}.{extension}",
            self.config.audit_copy_prefix
        ));
        fs::copy(export, &target).map_err(|err| {
            AutomationError::ArtifactError(format!(
                "audit copy failed for {}: {err}",
                export.display()
            ))
        })?;
        Ok(target)
    }
}

/// Returns the screen stack to the command field between transactions.
///
/// The stack depth after a report is not deterministic, so a single back
/// press is unreliable; presses stay within `[3, min(configured_max, 4)]`.
pub struct Navigator {
    max_presses: u32,
    settle: std::time::Duration,
}

impl Navigator {
    pub fn new(config: &AutomationConfig) -> Self {
        Self {
            max_presses: MIN_BACK_PRESSES.max(config.max_back_presses.min(BACK_PRESS_CEILING)),
            settle: config.back_settle(),
        }
    }

    /// Presses back until the command field is reachable again. A missing
    /// back button ends the reset silently; the next transaction entry
    /// will surface a real navigation problem.
    #[instrument(skip(self, session))]
    pub async fn back_to_command_field(
        &self,
        session: &dyn ScriptedSession,
    ) -> Result<(), AutomationError> {
        let mut pressed = 0u32;
        for _ in 0..self.max_presses {
            if !session.exists(BACK_BUTTON) {
                debug!(pressed, "back button unavailable, reset finished");
                return Ok(());
            }
            session.press(BACK_BUTTON)?;
            pressed += 1;
            tokio::time::sleep(self.settle).await;

            if pressed >= MIN_BACK_PRESSES && session.exists(COMMAND_FIELD) {
                break;
            }
        }
        debug!(pressed, "navigation reset finished");
        Ok(())
    }
}
