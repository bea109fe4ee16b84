//! The per-round accuracy log.
//!
//! One JSON object per line, appended after every train/eval round:
//!
//! ```text
//! {"step":150,"time":1700000000.5,"accuracy":0.81,"recall_5":0.97,"training":{"accuracy":0.9,"recall_5":0.99}}
//! ```

use crate::error::TrainingResult;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::Write;
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SplitAccuracy {
    #[serde(default)]
    pub accuracy: Option<f32>,
    #[serde(default)]
    pub recall_5: Option<f32>,
}

/// Validation metrics at the top level, training-split metrics nested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccuracyRecord {
    pub step: u64,
    /// Seconds since the Unix epoch.
    pub time: f64,
    #[serde(default)]
    pub accuracy: Option<f32>,
    #[serde(default)]
    pub recall_5: Option<f32>,
    #[serde(default)]
    pub training: Option<SplitAccuracy>,
}

impl AccuracyRecord {
    #[must_use]
    pub fn training_accuracy(&self) -> Option<f32> {
        self.training.and_then(|t| t.accuracy)
    }

    #[must_use]
    pub fn training_recall_5(&self) -> Option<f32> {
        self.training.and_then(|t| t.recall_5)
    }
}

pub fn append_record(path: &Path, record: &AccuracyRecord) -> TrainingResult<()> {
    let mut line = serde_json::to_string(record)?;
    line.push('\n');
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())?;
    Ok(())
}

/// All well-formed records in file order. A missing log reads as empty.
pub fn read_records(path: &Path) -> TrainingResult<Vec<AccuracyRecord>> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut records = Vec::new();
    for (index, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<AccuracyRecord>(line) {
            Ok(record) => records.push(record),
            Err(e) => warn!(path = %path.display(), line = index + 1, error = %e, "skipping malformed accuracy record"),
        }
    }
    Ok(records)
}

/// Keep the first record seen for each step.
#[must_use]
pub fn dedup_by_step(records: Vec<AccuracyRecord>) -> Vec<AccuracyRecord> {
    let mut seen = HashSet::new();
    records.into_iter().filter(|r| seen.insert(r.step)).collect()
}

/// Highest validation accuracy so far and when it was reached.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BestRecord {
    pub accuracy: f32,
    pub step: u64,
    pub time: f64,
}

impl BestRecord {
    /// The first best, if `record` carries a validation accuracy.
    #[must_use]
    pub fn from_record(record: &AccuracyRecord) -> Option<Self> {
        record.accuracy.map(|accuracy| Self { accuracy, step: record.step, time: record.time })
    }

    /// Fold `record` into `best`. Returns true when it became the new best.
    pub fn track(best: &mut Option<Self>, record: &AccuracyRecord) -> bool {
        match best {
            Some(current) => current.update(record),
            None => {
                *best = Self::from_record(record);
                best.is_some()
            }
        }
    }

    /// Returns true when `record` improves on the best accuracy.
    pub fn update(&mut self, record: &AccuracyRecord) -> bool {
        match record.accuracy {
            Some(accuracy) if accuracy > self.accuracy => {
                *self = Self { accuracy, step: record.step, time: record.time };
                true
            }
            _ => false,
        }
    }

    /// Plateaued above `min_accuracy` for longer than `patience_secs`.
    #[must_use]
    pub fn plateaued(&self, min_accuracy: f32, patience_secs: u64, now: f64) -> bool {
        self.accuracy >= min_accuracy && now - self.time >= patience_secs as f64
    }
}
