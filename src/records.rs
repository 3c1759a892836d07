//! Identifier extraction rules over the listing export artifact.
//!
//! The listing transaction exports a spreadsheet whose identifier column
//! feeds the lookup transaction. Header spellings drift between report
//! variants and localizations, the column mixes real identifiers with
//! measure rows, and values arrive zero-padded or decorated, so the
//! cleanup pipeline is strict about order: filter rows first, then reduce
//! the survivors to canonical decimal strings, then deduplicate.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader};
use tracing::{debug, info};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::errors::AutomationError;

/// Column-resolution and cleanup rules for the identifier column.
#[derive(Debug, Clone)]
pub struct RecordRules {
    accepted_headers: Vec<String>,
    measure_marker: String,
}

impl RecordRules {
    /// `accepted_headers` are the tolerated spellings of the identifier
    /// column; `measure_marker` is the substring that marks a row as a
    /// measure entry rather than a record.
    pub fn new<S: AsRef<str>>(accepted_headers: &[S], measure_marker: &str) -> Self {
        Self {
            accepted_headers: accepted_headers
                .iter()
                .map(|header| fold_header(header.as_ref()))
                .filter(|folded| !folded.is_empty())
                .collect(),
            measure_marker: measure_marker.to_string(),
        }
    }

    /// Index of the identifier column among `headers`, matched
    /// case/diacritic/punctuation-insensitively.
    pub fn resolve_column<S: AsRef<str>>(&self, headers: &[S]) -> Option<usize> {
        headers.iter().position(|header| {
            let folded = fold_header(header.as_ref());
            !folded.is_empty() && self.accepted_headers.iter().any(|accepted| *accepted == folded)
        })
    }

    /// Raw column values → ordered, duplicate-free canonical identifiers.
    ///
    /// Rows containing the measure marker are dropped; surviving values
    /// are reduced to their decimal digits and canonicalized through an
    /// integer round-trip, which removes leading zeros. Pure and total:
    /// empty input yields empty output.
    pub fn normalize<S: AsRef<str>>(&self, raw: &[S]) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut records = Vec::new();
        for value in raw {
            let value = value.as_ref().trim();
            if value.is_empty() {
                continue;
            }
            if !self.measure_marker.is_empty() && value.contains(&self.measure_marker) {
                continue;
            }
            let digits: String = value.chars().filter(char::is_ascii_digit).collect();
            if digits.is_empty() {
                continue;
            }
            let canonical = canonical_decimal(&digits);
            if seen.insert(canonical.clone()) {
                records.push(canonical);
            }
        }
        records
    }

    /// Loads the identifier column from an exported artifact and applies
    /// the normalization rules.
    pub fn extract(&self, path: &Path) -> Result<Vec<String>, AutomationError> {
        if !path.exists() {
            return Err(AutomationError::ArtifactError(format!(
                "artifact not found: {}",
                path.display()
            )));
        }

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let (headers, rows) = match extension.as_str() {
            "xlsx" | "xlsm" | "xls" | "ods" => load_workbook(path)?,
            _ => load_delimited(path)?,
        };

        let column = self.resolve_column(&headers).ok_or_else(|| {
            AutomationError::ArtifactError(format!(
                "identifier column not found in {} (headers: {})",
                path.display(),
                headers.join(", ")
            ))
        })?;
        debug!(column, header = %headers[column], "identifier column resolved");

        let raw: Vec<String> = rows
            .into_iter()
            .filter_map(|mut row| {
                if column < row.len() {
                    Some(row.swap_remove(column))
                } else {
                    None
                }
            })
            .collect();
        let records = self.normalize(&raw);
        info!(
            rows = raw.len(),
            unique = records.len(),
            "records extracted from listing export"
        );
        Ok(records)
    }
}

/// Integer round-trip over a digit string, tolerant of values wider than
/// any machine integer.
fn canonical_decimal(digits: &str) -> String {
    match digits.parse::<u128>() {
        Ok(value) => value.to_string(),
        Err(_) => {
            let stripped = digits.trim_start_matches('0');
            if stripped.is_empty() {
                "0".to_string()
            } else {
                stripped.to_string()
            }
        }
    }
}

/// Header folding: NFKD, combining marks stripped, only alphanumerics
/// kept, lowercased. Unlike label matching this keeps no spaces at all,
/// so `Record no.` and `RecordNo` fold identically.
fn fold_header(text: &str) -> String {
    text.nfkd()
        .filter(|ch| !is_combining_mark(*ch))
        .filter(|ch| ch.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

type Table = (Vec<String>, Vec<Vec<String>>);

fn load_workbook(path: &Path) -> Result<Table, AutomationError> {
    let mut workbook = open_workbook_auto(path).map_err(|err| {
        AutomationError::ArtifactError(format!("unreadable workbook {}: {err}", path.display()))
    })?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| {
            AutomationError::ArtifactError(format!("workbook has no sheets: {}", path.display()))
        })?
        .map_err(|err| {
            AutomationError::ArtifactError(format!(
                "unreadable sheet in {}: {err}",
                path.display()
            ))
        })?;

    let mut rows = range
        .rows()
        .map(|row| row.iter().map(cell_to_string).collect::<Vec<_>>());
    let headers = rows.next().ok_or_else(|| {
        AutomationError::ArtifactError(format!("exported artifact is empty: {}", path.display()))
    })?;
    Ok((headers, rows.collect()))
}

/// The remote side can also export delimited text; the delimiter is
/// sniffed from the header line.
fn load_delimited(path: &Path) -> Result<Table, AutomationError> {
    let text = fs::read_to_string(path).map_err(|err| {
        AutomationError::ArtifactError(format!("unreadable artifact {}: {err}", path.display()))
    })?;
    let delimiter = sniff_delimiter(text.lines().next().unwrap_or_default());

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut rows: Vec<Vec<String>> = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|err| {
            AutomationError::ArtifactError(format!(
                "malformed row in {}: {err}",
                path.display()
            ))
        })?;
        rows.push(record.iter().map(str::to_string).collect());
    }
    if rows.is_empty() {
        return Err(AutomationError::ArtifactError(format!(
            "exported artifact is empty: {}",
            path.display()
        )));
    }
    let headers = rows.remove(0);
    Ok((headers, rows))
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::String(text) => text.clone(),
        // Spreadsheet engines store identifier columns as floats.
        Data::Float(value) if value.fract() == 0.0 => format!("{}", *value as i64),
        Data::Empty => String::new(),
        other => other.to_string(),
    }
}

fn sniff_delimiter(header_line: &str) -> u8 {
    if header_line.contains('\t') {
        b'\t'
    } else if header_line.contains(';') {
        b';'
    } else {
        b','
    }
}
