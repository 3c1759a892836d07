//! Runtime configuration for the automation engine.
//!
//! The engine consumes configuration, it does not own a format: values
//! come from the process environment (optionally seeded from a `.env`
//! file), the same way the service embedding this crate configures
//! everything else. All environment variables share the `SAPFLOW_`
//! prefix.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::errors::AutomationError;
use crate::types::ConnectionTarget;

pub const DEFAULT_LISTING_GLOB: &str = "export*.xlsx";
pub const DEFAULT_LISTING_FALLBACK_GLOB: &str = "*.xlsx";
pub const DEFAULT_LOOKUP_GLOB: &str = "worklist*.xlsx";
pub const DEFAULT_AUDIT_COPY_PREFIX: &str = "lookup_full";
pub const DEFAULT_LAUNCHER_WINDOW_PATTERN: &str = "SAP Logon.*";

const DEFAULT_EXPORT_TIMEOUT_SECONDS: u64 = 180;
const DEFAULT_STARTUP_TIMEOUT_SECONDS: u64 = 40;
const DEFAULT_CONTROL_TIMEOUT_SECONDS: u64 = 8;
const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
const DEFAULT_BACK_SETTLE_MS: u64 = 300;
const DEFAULT_MAX_BACK_PRESSES: u32 = 4;

fn default_listing_glob() -> String {
    DEFAULT_LISTING_GLOB.to_string()
}

fn default_listing_fallback_glob() -> String {
    DEFAULT_LISTING_FALLBACK_GLOB.to_string()
}

fn default_lookup_glob() -> String {
    DEFAULT_LOOKUP_GLOB.to_string()
}

fn default_audit_copy_prefix() -> String {
    DEFAULT_AUDIT_COPY_PREFIX.to_string()
}

fn default_launcher_window_pattern() -> String {
    DEFAULT_LAUNCHER_WINDOW_PATTERN.to_string()
}

fn default_export_timeout_seconds() -> u64 {
    DEFAULT_EXPORT_TIMEOUT_SECONDS
}

fn default_startup_timeout_seconds() -> u64 {
    DEFAULT_STARTUP_TIMEOUT_SECONDS
}

fn default_control_timeout_seconds() -> u64 {
    DEFAULT_CONTROL_TIMEOUT_SECONDS
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_back_settle_ms() -> u64 {
    DEFAULT_BACK_SETTLE_MS
}

fn default_max_back_presses() -> u32 {
    DEFAULT_MAX_BACK_PRESSES
}

fn default_record_headers() -> Vec<String> {
    vec![
        "Record no.".to_string(),
        "Nº record/measure".to_string(),
        "N record/measure".to_string(),
    ]
}

fn default_measure_marker() -> String {
    "/000".to_string()
}

/// Credentials for the logon screen.
#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
    #[serde(default)]
    pub client: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

/// Everything the engine needs for one run. Owned by the embedding
/// service, consumed here.
#[derive(Debug, Clone, Deserialize)]
pub struct AutomationConfig {
    pub credentials: Credentials,
    pub target: ConnectionTarget,

    /// Launcher executable, started when no scripting object is running.
    pub launcher_executable: PathBuf,
    #[serde(default = "default_launcher_window_pattern")]
    pub launcher_window_pattern: String,

    /// Transaction code of the date-range listing export.
    pub listing_transaction: String,
    /// Transaction code of the bulk identifier lookup.
    pub lookup_transaction: String,
    /// Category marker written into the listing selection screen.
    pub category_marker: String,
    /// Report variant code for the listing transaction.
    pub report_variant: String,

    pub listing_export_dir: PathBuf,
    pub lookup_export_dir: PathBuf,
    #[serde(default = "default_listing_glob")]
    pub listing_export_glob: String,
    #[serde(default = "default_listing_fallback_glob")]
    pub listing_fallback_glob: String,
    #[serde(default = "default_lookup_glob")]
    pub lookup_export_glob: String,
    #[serde(default = "default_audit_copy_prefix")]
    pub audit_copy_prefix: String,

    #[serde(default = "default_export_timeout_seconds")]
    pub export_timeout_seconds: u64,
    #[serde(default = "default_startup_timeout_seconds")]
    pub startup_timeout_seconds: u64,
    #[serde(default = "default_control_timeout_seconds")]
    pub control_timeout_seconds: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_back_settle_ms")]
    pub back_settle_ms: u64,
    /// Configured ceiling for the navigation reset; clamped further by the
    /// engine's own hard bound.
    #[serde(default = "default_max_back_presses")]
    pub max_back_presses: u32,

    #[serde(default = "default_record_headers")]
    pub record_headers: Vec<String>,
    #[serde(default = "default_measure_marker")]
    pub measure_marker: String,
}

impl AutomationConfig {
    /// Loads configuration from the process environment, honoring an
    /// optional `.env` file. Missing required variables are reported
    /// together.
    pub fn from_env() -> Result<Self, AutomationError> {
        let _ = dotenvy::dotenv();

        let mut missing = Vec::new();
        let mut required = |key: &'static str| -> String {
            match trimmed_var(key) {
                Some(value) => value,
                None => {
                    missing.push(key);
                    String::new()
                }
            }
        };

        let username = required("SAPFLOW_USERNAME");
        let password = required("SAPFLOW_PASSWORD");
        let server_label = required("SAPFLOW_SERVER_LABEL");
        let connection_label = required("SAPFLOW_CONNECTION_LABEL");
        let launcher_executable = required("SAPFLOW_LAUNCHER_EXECUTABLE");
        let listing_transaction = required("SAPFLOW_LISTING_TRANSACTION");
        let lookup_transaction = required("SAPFLOW_LOOKUP_TRANSACTION");
        let category_marker = required("SAPFLOW_CATEGORY_MARKER");
        let report_variant = required("SAPFLOW_REPORT_VARIANT");
        let listing_export_dir = required("SAPFLOW_LISTING_EXPORT_DIR");
        let lookup_export_dir = required("SAPFLOW_LOOKUP_EXPORT_DIR");

        if !missing.is_empty() {
            return Err(AutomationError::InvalidArgument(format!(
                "missing required configuration: {}",
                missing.join(", ")
            )));
        }

        Ok(Self {
            credentials: Credentials {
                username,
                password: SecretString::new(password),
                client: trimmed_var("SAPFLOW_CLIENT"),
                language: trimmed_var("SAPFLOW_LANGUAGE"),
            },
            target: ConnectionTarget {
                server_label,
                connection_label,
            },
            launcher_executable: PathBuf::from(launcher_executable),
            launcher_window_pattern: trimmed_var("SAPFLOW_LAUNCHER_WINDOW_PATTERN")
                .unwrap_or_else(default_launcher_window_pattern),
            listing_transaction,
            lookup_transaction,
            category_marker,
            report_variant,
            listing_export_dir: PathBuf::from(listing_export_dir),
            lookup_export_dir: PathBuf::from(lookup_export_dir),
            listing_export_glob: trimmed_var("SAPFLOW_LISTING_EXPORT_GLOB")
                .unwrap_or_else(default_listing_glob),
            listing_fallback_glob: trimmed_var("SAPFLOW_LISTING_FALLBACK_GLOB")
                .unwrap_or_else(default_listing_fallback_glob),
            lookup_export_glob: trimmed_var("SAPFLOW_LOOKUP_EXPORT_GLOB")
                .unwrap_or_else(default_lookup_glob),
            audit_copy_prefix: trimmed_var("SAPFLOW_AUDIT_COPY_PREFIX")
                .unwrap_or_else(default_audit_copy_prefix),
            export_timeout_seconds: parsed_var(
                "SAPFLOW_EXPORT_TIMEOUT_SECONDS",
                DEFAULT_EXPORT_TIMEOUT_SECONDS,
            ),
            startup_timeout_seconds: parsed_var(
                "SAPFLOW_STARTUP_TIMEOUT_SECONDS",
                DEFAULT_STARTUP_TIMEOUT_SECONDS,
            ),
            control_timeout_seconds: parsed_var(
                "SAPFLOW_CONTROL_TIMEOUT_SECONDS",
                DEFAULT_CONTROL_TIMEOUT_SECONDS,
            ),
            poll_interval_ms: parsed_var("SAPFLOW_POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS),
            back_settle_ms: parsed_var("SAPFLOW_BACK_SETTLE_MS", DEFAULT_BACK_SETTLE_MS),
            max_back_presses: parsed_var(
                "SAPFLOW_MAX_BACK_PRESSES",
                DEFAULT_MAX_BACK_PRESSES,
            ),
            record_headers: trimmed_var("SAPFLOW_RECORD_HEADERS")
                .map(|raw| {
                    raw.split('|')
                        .map(str::trim)
                        .filter(|spelling| !spelling.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_else(default_record_headers),
            measure_marker: trimmed_var("SAPFLOW_MEASURE_MARKER")
                .unwrap_or_else(default_measure_marker),
        })
    }

    pub fn export_timeout(&self) -> Duration {
        Duration::from_secs(self.export_timeout_seconds)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_seconds)
    }

    pub fn control_timeout(&self) -> Duration {
        Duration::from_secs(self.control_timeout_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn back_settle(&self) -> Duration {
        Duration::from_millis(self.back_settle_ms)
    }
}

fn trimmed_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parsed_var<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    trimmed_var(key)
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}
