use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use vigil_core::CommitId;

use crate::format::{decode_entry, encode_entry};
use crate::{LedgerError, TimingEstimator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
    /// Recorded in memory by callers but never written to disk.
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub timestamp: DateTime<Utc>,
    pub commit: CommitId,
    pub message: String,
    pub outcome: Outcome,
    pub duration: Duration,
    pub test_count: u64,
}

impl LedgerEntry {
    pub fn now(
        commit: CommitId,
        message: impl Into<String>,
        outcome: Outcome,
        duration: Duration,
        test_count: u64,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            commit,
            message: message.into(),
            outcome,
            duration,
            test_count,
        }
    }
}

/// Append-only record of finished runs, one line per entry.
///
/// Only one handle per file may exist in a process; a second `open` of the
/// same path fails with [`LedgerError::AlreadyOpen`] until the first handle
/// is dropped.
#[derive(Debug)]
pub struct ResultsLedger {
    path: Utf8PathBuf,
    file: File,
    entries: Vec<LedgerEntry>,
}

impl ResultsLedger {
    fn open_paths() -> &'static Mutex<HashSet<Utf8PathBuf>> {
        static OPEN: OnceLock<Mutex<HashSet<Utf8PathBuf>>> = OnceLock::new();
        OPEN.get_or_init(|| Mutex::new(HashSet::new()))
    }

    pub fn open(path: &Utf8Path) -> Result<Self, LedgerError> {
        if let Some(parent) = path.parent() {
            if !parent.as_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let canonical = path
            .canonicalize_utf8()
            .map_err(|e| LedgerError::InvalidPath(format!("{path}: {e}")))?;

        {
            let mut open = Self::open_paths().lock().expect("ledger registry poisoned");
            if !open.insert(canonical.clone()) {
                return Err(LedgerError::AlreadyOpen(canonical.to_string()));
            }
        }

        let entries = match Self::read_entries(&canonical) {
            Ok(entries) => entries,
            Err(e) => {
                Self::release(&canonical);
                return Err(e);
            }
        };
        tracing::debug!("opened ledger {} with {} entries", canonical, entries.len());

        Ok(Self {
            path: canonical,
            file,
            entries,
        })
    }

    fn read_entries(path: &Utf8Path) -> Result<Vec<LedgerEntry>, LedgerError> {
        let text = std::fs::read_to_string(path)?;
        text.lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(ix, line)| decode_entry(ix + 1, line))
            .collect()
    }

    fn release(path: &Utf8Path) {
        if let Ok(mut open) = Self::open_paths().lock() {
            open.remove(path);
        }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    /// Appends an entry and flushes it. Returns `false` for `Ignored` entries,
    /// which are not persisted.
    pub fn append(&mut self, entry: LedgerEntry) -> Result<bool, LedgerError> {
        let Some(line) = encode_entry(&entry) else {
            return Ok(false);
        };
        writeln!(self.file, "{line}")?;
        self.file.flush()?;
        tracing::info!(
            "ledger: {} {:?} in {}s ({} tests)",
            entry.commit.short(),
            entry.outcome,
            entry.duration.as_secs(),
            entry.test_count
        );
        self.entries.push(entry);
        Ok(true)
    }

    /// Latest recorded outcome for a commit.
    pub fn outcome_of(&self, commit: &CommitId) -> Option<Outcome> {
        self.entries
            .iter()
            .rev()
            .find(|e| &e.commit == commit)
            .map(|e| e.outcome)
    }

    pub fn contains(&self, commit: &CommitId) -> bool {
        self.outcome_of(commit).is_some()
    }

    /// Estimator seeded with every successful run on record.
    pub fn estimator(&self) -> TimingEstimator {
        let mut estimator = TimingEstimator::default();
        for entry in self.entries.iter().filter(|e| e.outcome == Outcome::Success) {
            estimator.record(entry.duration);
        }
        estimator
    }
}

impl Drop for ResultsLedger {
    fn drop(&mut self) {
        Self::release(&self.path);
    }
}
