//! Export detection by directory watching.
//!
//! The remote application writes export artifacts on its own schedule, so
//! runners snapshot the export directory before triggering the save and
//! then poll for a file that is new or modified relative to that baseline.
//! The watcher is strictly read-only against the filesystem.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use glob::{MatchOptions, Pattern};
use tracing::debug;

use crate::errors::AutomationError;
use crate::wait::Poll;

/// Export filenames come from the remote side with inconsistent casing.
const GLOB_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Point-in-time view of an export directory: path → modification time.
#[derive(Debug, Clone, Default)]
pub struct DirectorySnapshot {
    entries: HashMap<PathBuf, SystemTime>,
}

impl DirectorySnapshot {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn mtime(&self, path: &Path) -> Option<SystemTime> {
        self.entries.get(path).copied()
    }
}

/// Watches one export directory for artifacts appearing after a baseline.
#[derive(Debug, Clone)]
pub struct ExportWatcher {
    dir: PathBuf,
    pattern: String,
    timeout: Duration,
    interval: Duration,
}

impl ExportWatcher {
    pub fn new(dir: impl Into<PathBuf>, pattern: impl Into<String>, timeout: Duration) -> Self {
        Self {
            dir: dir.into(),
            pattern: pattern.into(),
            timeout,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Captures the current directory state. A directory that does not
    /// exist yet snapshots as empty.
    pub fn snapshot(&self) -> DirectorySnapshot {
        let mut entries = HashMap::new();
        if let Ok(read) = fs::read_dir(&self.dir) {
            for entry in read.flatten() {
                let Ok(meta) = entry.metadata() else { continue };
                if !meta.is_file() {
                    continue;
                }
                if let Ok(modified) = meta.modified() {
                    entries.insert(entry.path(), modified);
                }
            }
        }
        DirectorySnapshot { entries }
    }

    /// Waits for a file matching the configured pattern to appear or
    /// change relative to `baseline`.
    pub async fn await_export(
        &self,
        baseline: &DirectorySnapshot,
    ) -> Result<PathBuf, AutomationError> {
        let pattern = self.pattern.clone();
        self.await_export_with(baseline, &pattern).await
    }

    /// Same as [`await_export`](Self::await_export) with an explicit
    /// pattern.
    pub async fn await_export_with(
        &self,
        baseline: &DirectorySnapshot,
        pattern: &str,
    ) -> Result<PathBuf, AutomationError> {
        let matcher = compile(pattern)?;
        let poll = Poll::new(self.interval, self.timeout);
        match poll
            .until_some(|| self.find_candidate(baseline, &matcher))
            .await
        {
            Some(path) => {
                debug!(path = %path.display(), pattern, "export detected");
                Ok(path)
            }
            None => Err(AutomationError::ExportTimeout {
                dir: self.dir.clone(),
                pattern: pattern.to_string(),
                timeout: self.timeout,
            }),
        }
    }

    /// Single pass with an alternate pattern against the same baseline.
    /// Used for the one-shot secondary-pattern fallback after a timeout.
    pub fn scan(
        &self,
        baseline: &DirectorySnapshot,
        pattern: &str,
    ) -> Result<Option<PathBuf>, AutomationError> {
        let matcher = compile(pattern)?;
        Ok(self.find_candidate(baseline, &matcher))
    }

    /// Newest file matching `matcher` that is absent from the baseline or
    /// strictly newer than its baseline entry.
    fn find_candidate(&self, baseline: &DirectorySnapshot, matcher: &Pattern) -> Option<PathBuf> {
        let mut best: Option<(PathBuf, SystemTime)> = None;
        let read = fs::read_dir(&self.dir).ok()?;
        for entry in read.flatten() {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !matcher.matches_with(name, GLOB_OPTIONS) {
                continue;
            }
            let Ok(meta) = entry.metadata() else { continue };
            if !meta.is_file() {
                continue;
            }
            let Ok(modified) = meta.modified() else { continue };
            let qualifies = match baseline.mtime(&path) {
                None => true,
                Some(previous) => modified > previous,
            };
            if !qualifies {
                continue;
            }
            match &best {
                Some((_, newest)) if modified <= *newest => {}
                _ => best = Some((path, modified)),
            }
        }
        best.map(|(path, _)| path)
    }
}

fn compile(pattern: &str) -> Result<Pattern, AutomationError> {
    Pattern::new(pattern).map_err(|err| {
        AutomationError::PlatformError(format!("invalid export pattern `{pattern}`: {err}"))
    })
}
