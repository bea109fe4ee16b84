//! Scraping accuracy metrics out of evaluator event logs.

use crate::error::{TrainingError, TrainingResult};
use crate::split::SplitName;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use verdant_records::read_events;

pub const ACCURACY_TAG: &str = "eval/Accuracy";
pub const RECALL_5_TAG: &str = "eval/Recall_5";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvalSummary {
    pub step: i64,
    pub accuracy: f32,
    pub recall_5: Option<f32>,
}

/// Newest event in `path` that carries an accuracy value.
pub fn read_eval_summary(path: &Path) -> TrainingResult<EvalSummary> {
    let events = read_events(path)?;
    for event in events.iter().rev() {
        let values = event.simple_values();
        if let Some(accuracy) = values.get(ACCURACY_TAG) {
            let summary = EvalSummary {
                step: event.step,
                accuracy: *accuracy,
                recall_5: values.get(RECALL_5_TAG).copied(),
            };
            tracing::debug!(path = %path.display(), ?summary, "read eval summary");
            return Ok(summary);
        }
    }
    Err(TrainingError::MissingSummary(format!("no {ACCURACY_TAG} value in {}", path.display())))
}

/// Lexicographically last entry of `dir` accepted by `filter`.
pub fn last_entry(dir: &Path, filter: impl Fn(&str) -> bool) -> TrainingResult<Option<PathBuf>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut best: Option<String> = None;
    for entry in entries {
        let name = entry?.file_name().to_string_lossy().into_owned();
        if filter(&name) && best.as_ref().is_none_or(|b| name > *b) {
            best = Some(name);
        }
    }
    Ok(best.map(|name| dir.join(name)))
}

/// Summary from the most recent evaluation of `split` under `eval_events_dir`.
pub fn read_latest_summary(eval_events_dir: &Path, split: SplitName) -> TrainingResult<EvalSummary> {
    let suffix = format!("_{}", split.as_str());
    let run_dir = last_entry(eval_events_dir, |name| name.ends_with(&suffix))?.ok_or_else(|| {
        TrainingError::MissingSummary(format!(
            "no {split} evaluation directory in {}",
            eval_events_dir.display()
        ))
    })?;
    read_run_summary(&run_dir)
}

/// Summary from the newest event file written into one evaluation directory.
pub fn read_run_summary(run_dir: &Path) -> TrainingResult<EvalSummary> {
    let event_file = last_entry(run_dir, |_| true)?.ok_or_else(|| {
        TrainingError::MissingSummary(format!("no event file in {}", run_dir.display()))
    })?;
    read_eval_summary(&event_file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use verdant_records::{Event, EventWriter};

    fn write_events(path: &Path, events: &[Event]) {
        let mut writer = EventWriter::create(path, 0.0).unwrap();
        for event in events {
            writer.write_event(event).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn test_newest_accuracy_event_wins() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("events.out.tfevents.1");
        write_events(
            &path,
            &[
                Event::scalars(1.0, 100, &[(ACCURACY_TAG, 0.5), (RECALL_5_TAG, 0.8)]),
                Event::scalars(2.0, 200, &[(ACCURACY_TAG, 0.7), (RECALL_5_TAG, 0.9)]),
                Event::scalars(3.0, 200, &[("global_step/sec", 3.0)]),
            ],
        );

        let summary = read_eval_summary(&path).unwrap();
        assert_eq!(summary.step, 200);
        assert!((summary.accuracy - 0.7).abs() < f32::EPSILON);
        assert_eq!(summary.recall_5, Some(0.9));
    }

    #[test]
    fn test_missing_accuracy_is_an_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("events.out.tfevents.1");
        write_events(&path, &[Event::scalars(1.0, 1, &[("loss", 2.0)])]);
        assert!(matches!(read_eval_summary(&path), Err(TrainingError::MissingSummary(_))));
    }

    #[test]
    fn test_read_latest_summary_picks_newest_run_for_split() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();

        for (dir, accuracy) in [
            ("1700000000_100_validation", 0.4),
            ("1700000100_200_validation", 0.6),
            ("1700000200_200_train", 0.9),
        ] {
            std::fs::create_dir_all(root.join(dir)).unwrap();
            write_events(
                &root.join(dir).join("events.out.tfevents.1"),
                &[Event::scalars(1.0, 1, &[(ACCURACY_TAG, accuracy)])],
            );
        }

        let validation = read_latest_summary(root, SplitName::Validation).unwrap();
        assert!((validation.accuracy - 0.6).abs() < f32::EPSILON);
        let train = read_latest_summary(root, SplitName::Train).unwrap();
        assert!((train.accuracy - 0.9).abs() < f32::EPSILON);
        assert_eq!(train.recall_5, None);
    }

    #[test]
    fn test_missing_eval_dir_is_missing_summary() {
        let temp = TempDir::new().unwrap();
        let err = read_latest_summary(&temp.path().join("eval_events"), SplitName::Validation).unwrap_err();
        assert!(matches!(err, TrainingError::MissingSummary(_)));
    }
}
