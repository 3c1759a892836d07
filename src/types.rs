use std::path::PathBuf;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::errors::AutomationError;

/// Input command for one automation run.
///
/// Created from validated external input and consumed once by the
/// orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCommand {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl RunCommand {
    pub fn new(start_date: NaiveDate, end_date: NaiveDate) -> Result<Self, AutomationError> {
        let command = Self {
            start_date,
            end_date,
        };
        command.validate()?;
        Ok(command)
    }

    pub(crate) fn validate(&self) -> Result<(), AutomationError> {
        if self.end_date < self.start_date {
            return Err(AutomationError::InvalidArgument(format!(
                "end date {} precedes start date {}",
                self.end_date, self.start_date
            )));
        }
        Ok(())
    }
}

/// Output of a fully successful run. Never produced partially: either both
/// export paths are populated or the run failed as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    pub listing_export: PathBuf,
    pub lookup_export: PathBuf,
    pub record_count: usize,
}

/// Named connection target inside the launcher application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionTarget {
    /// Label of the server/group node in the launcher tree.
    pub server_label: String,
    /// Label of the connection entry itself.
    pub connection_label: String,
}

/// Steps of the transaction state machine shared by both runners, used for
/// step-level tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStep {
    EnterTransaction,
    FillFields,
    Execute,
    OpenExportDialog,
    ConfirmSave,
    AwaitExport,
    Done,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn command_accepts_ordered_dates() {
        let command = RunCommand::new(date(2026, 1, 19), date(2026, 2, 19)).unwrap();
        assert_eq!(command.start_date, date(2026, 1, 19));
    }

    #[test]
    fn command_accepts_single_day_window() {
        assert!(RunCommand::new(date(2026, 1, 19), date(2026, 1, 19)).is_ok());
    }

    #[test]
    fn command_rejects_inverted_dates() {
        let err = RunCommand::new(date(2026, 2, 19), date(2026, 1, 19)).unwrap_err();
        assert!(matches!(err, AutomationError::InvalidArgument(_)));
    }
}
