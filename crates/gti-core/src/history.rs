//! Phase-gap history: an ordered log of `(UTC time, degrees)` samples.
//!
//! On disk the log is `{"history": [{"as_of_utc": "...Z", "phase_deg": f}, ...]}`.
//! Live appends keep the most recent `max_entries`; backfill merges keep at
//! most one sample per UTC calendar day, first seen wins, and are not capped.

use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GtiError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseGapSample {
    pub as_of_utc: DateTime<Utc>,
    pub phase_deg: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl PhaseGapSample {
    pub fn new(as_of_utc: DateTime<Utc>, phase_deg: f64) -> Self {
        Self {
            as_of_utc,
            phase_deg,
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn day(&self) -> NaiveDate {
        self.as_of_utc.date_naive()
    }
}

/// Parse an ISO-8601 timestamp. Offsets are honoured; a timestamp without one
/// is taken as UTC.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(text) {
        return Some(t.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|t| t.and_utc())
}

/// Counts from a per-day merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub existing: usize,
    pub added: usize,
    pub skipped: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseHistory {
    history: Vec<PhaseGapSample>,
}

impl PhaseHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_samples(samples: Vec<PhaseGapSample>) -> Self {
        Self { history: samples }
    }

    pub fn samples(&self) -> &[PhaseGapSample] {
        &self.history
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Insert in chronological order and drop the oldest entries beyond
    /// `max_entries`.
    ///
    /// A sample sharing a timestamp goes after the existing ones. An
    /// out-of-order log is sorted first.
    pub fn push_bounded(&mut self, sample: PhaseGapSample, max_entries: usize) {
        if !self.history.is_sorted_by_key(|s| s.as_of_utc) {
            self.history.sort_by_key(|s| s.as_of_utc);
        }
        let at = self
            .history
            .partition_point(|s| s.as_of_utc <= sample.as_of_utc);
        self.history.insert(at, sample);
        if self.history.len() > max_entries {
            let excess = self.history.len() - max_entries;
            self.history.drain(..excess);
        }
    }

    /// Samples in chronological order (stable for equal timestamps).
    pub fn sorted(&self) -> Vec<PhaseGapSample> {
        let mut out = self.history.clone();
        out.sort_by_key(|s| s.as_of_utc);
        out
    }

    /// Merge `incoming` keeping one sample per UTC day.
    ///
    /// Existing samples are considered first, in chronological order, then
    /// incoming ones; the first sample seen for a day is kept. The result is
    /// sorted chronologically.
    pub fn merge_by_day(&mut self, incoming: &PhaseHistory) -> MergeReport {
        let existing = self.sorted();
        let mut seen = BTreeSet::new();
        let mut merged = Vec::with_capacity(existing.len() + incoming.len());

        let mut kept_existing = 0;
        for s in existing {
            if seen.insert(s.day()) {
                merged.push(s);
                kept_existing += 1;
            }
        }
        let mut added = 0;
        let mut skipped = 0;
        for s in incoming.sorted() {
            if seen.insert(s.day()) {
                merged.push(s);
                added += 1;
            } else {
                skipped += 1;
            }
        }

        merged.sort_by_key(|s| s.as_of_utc);
        self.history = merged;
        MergeReport {
            existing: kept_existing,
            added,
            skipped,
            total: self.history.len(),
        }
    }

    /// Parse the on-disk shape. Individual malformed records are skipped
    /// with a warning; a document that is not `{"history": [...]}` is an
    /// error.
    pub fn from_json_value(value: &Value) -> Result<Self, GtiError> {
        let Some(records) = value.get("history").and_then(Value::as_array) else {
            return Err(GtiError::InvalidHistory(
                "expected an object with a `history` array".to_string(),
            ));
        };
        let mut history = Vec::with_capacity(records.len());
        for (i, rec) in records.iter().enumerate() {
            match parse_record(rec) {
                Some(s) => history.push(s),
                None => warn!("phase history record {i} is malformed; skipped"),
            }
        }
        Ok(Self { history })
    }

    pub fn from_json_str(text: &str) -> Result<Self, GtiError> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_json_value(&value)
    }
}

fn parse_record(rec: &Value) -> Option<PhaseGapSample> {
    let as_of_utc = parse_timestamp(rec.get("as_of_utc")?.as_str()?)?;
    let phase_deg = rec.get("phase_deg")?.as_f64()?;
    if !phase_deg.is_finite() {
        return None;
    }
    let source = rec
        .get("source")
        .and_then(Value::as_str)
        .map(str::to_string);
    Some(PhaseGapSample {
        as_of_utc,
        phase_deg,
        source,
    })
}

/// File-backed history with serialised writers.
///
/// Every mutation is load → modify → atomic rewrite under one lock, so
/// concurrent appends and merges from the same process never interleave.
#[derive(Debug)]
pub struct HistoryStore {
    path: PathBuf,
    max_entries: usize,
    write_lock: Mutex<()>,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>, max_entries: usize) -> Self {
        Self {
            path: path.into(),
            max_entries,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the log. A missing file is an empty history.
    pub fn load(&self) -> Result<PhaseHistory, GtiError> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => PhaseHistory::from_json_str(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(PhaseHistory::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Append one sample, keeping the newest `max_entries`.
    pub fn append(&self, sample: PhaseGapSample) -> Result<PhaseHistory, GtiError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut history = self.load()?;
        history.push_bounded(sample, self.max_entries);
        self.save(&history)?;
        Ok(history)
    }

    /// Merge a backfill into the log, existing samples winning per day.
    /// With `dry_run` the file is left untouched.
    pub fn merge(&self, incoming: &PhaseHistory, dry_run: bool) -> Result<MergeReport, GtiError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut history = self.load()?;
        let report = history.merge_by_day(incoming);
        if dry_run {
            info!(
                "dry run: would write {} sample(s) to {}",
                report.total,
                self.path.display()
            );
        } else {
            self.save(&history)?;
        }
        Ok(report)
    }

    fn save(&self, history: &PhaseHistory) -> Result<(), GtiError> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer(&mut tmp, history)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| GtiError::Io(e.error))?;
        Ok(())
    }
}
