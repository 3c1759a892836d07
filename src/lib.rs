//! Automation engine for scripted ERP GUI export workflows.
//!
//! The engine drives an external, stateful desktop application through its
//! scripting surface: it opens (or reuses) a session, runs a date-range
//! listing transaction that exports a spreadsheet, normalizes the
//! identifier column of that artifact, feeds the identifiers into a bulk
//! lookup transaction via clipboard injection, and exports a second
//! artifact plus a timestamped audit copy. A run yields both export paths
//! and the processed identifier count, or fails as a whole with a
//! [`AutomationError`] the caller can branch on.
//!
//! The external session is non-deterministic and latency-variable, so
//! every wait is a bounded poll, connection strategies fall back in a
//! fixed order, and errors carry the failing control id, directory, or
//! pattern.
//!
//! ```no_run
//! use sapflow::{AutomationConfig, Orchestrator, RunCommand};
//!
//! # async fn demo() -> Result<(), sapflow::AutomationError> {
//! let config = AutomationConfig::from_env()?;
//! let orchestrator = Orchestrator::native(config)?;
//! let command = RunCommand::new(
//!     chrono::NaiveDate::from_ymd_opt(2026, 1, 19).unwrap(),
//!     chrono::NaiveDate::from_ymd_opt(2026, 2, 19).unwrap(),
//! )?;
//! let result = orchestrator.run(command).await?;
//! println!("{} records processed", result.record_count);
//! # Ok(())
//! # }
//! ```

pub mod clipboard;
pub mod config;
pub mod connector;
pub mod errors;
pub mod logging;
pub mod matching;
pub mod orchestrator;
pub mod platforms;
pub mod records;
pub mod session;
pub mod transactions;
pub mod types;
pub mod wait;
pub mod watcher;

pub use clipboard::{ClipboardInjector, SystemClipboard};
pub use config::AutomationConfig;
pub use connector::{LauncherWindow, ScriptingShell, SessionConnector};
pub use errors::AutomationError;
pub use orchestrator::Orchestrator;
pub use records::RecordRules;
pub use session::{ScriptedSession, Session};
pub use types::{ConnectionTarget, RunCommand, RunResult};
pub use watcher::{DirectorySnapshot, ExportWatcher};
