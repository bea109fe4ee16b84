//! Locating the trainer's latest checkpoint.
//!
//! The trainer maintains a `checkpoint` index file next to its checkpoints:
//!
//! ```text
//! model_checkpoint_path: "model.ckpt-1200"
//! all_model_checkpoint_paths: "model.ckpt-1000"
//! all_model_checkpoint_paths: "model.ckpt-1200"
//! ```

use crate::error::TrainingResult;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};

pub const CHECKPOINT_INDEX_FILENAME: &str = "checkpoint";

static MODEL_CHECKPOINT_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^\s*model_checkpoint_path:\s*"((?:[^"\\]|\\.)*)"\s*$"#).expect("checkpoint regex should be valid")
});

static STEP_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"-(\d+)$").expect("checkpoint regex should be valid"));

/// Prefix of the most recent checkpoint in `dir`, if one exists on disk.
pub fn latest_checkpoint(dir: &Path) -> TrainingResult<Option<PathBuf>> {
    let index = dir.join(CHECKPOINT_INDEX_FILENAME);
    let contents = match std::fs::read_to_string(&index) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let Some(captures) = MODEL_CHECKPOINT_PATH.captures(&contents) else {
        tracing::warn!(index = %index.display(), "checkpoint index has no model_checkpoint_path");
        return Ok(None);
    };
    let raw = captures[1].replace("\\\"", "\"").replace("\\\\", "\\");
    let prefix = PathBuf::from(raw);
    let prefix = if prefix.is_absolute() { prefix } else { dir.join(prefix) };

    if checkpoint_exists(&prefix) {
        Ok(Some(prefix))
    } else {
        tracing::debug!(prefix = %prefix.display(), "checkpoint listed in index is missing");
        Ok(None)
    }
}

fn checkpoint_exists(prefix: &Path) -> bool {
    let mut index = prefix.as_os_str().to_owned();
    index.push(".index");
    Path::new(&index).exists() || prefix.exists()
}

/// Global step encoded in a checkpoint prefix (`model.ckpt-1200` -> 1200).
#[must_use]
pub fn step_from_path(prefix: &Path) -> Option<u64> {
    let s = prefix.to_string_lossy();
    STEP_SUFFIX.captures(&s)?[1].parse().ok()
}

/// Step of the latest checkpoint in `dir`, or 0 before the first one is written.
pub fn checkpoint_step(dir: &Path) -> TrainingResult<u64> {
    Ok(latest_checkpoint(dir)?.as_deref().and_then(step_from_path).unwrap_or(0))
}

/// Write a checkpoint index pointing at `model.ckpt-<step>`.
///
/// Used by tooling and tests that stand in for the trainer.
pub fn write_checkpoint_index(dir: &Path, step: u64) -> TrainingResult<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let name = format!("model.ckpt-{step}");
    std::fs::write(dir.join(format!("{name}.index")), b"")?;
    std::fs::write(
        dir.join(CHECKPOINT_INDEX_FILENAME),
        format!("model_checkpoint_path: \"{name}\"\nall_model_checkpoint_paths: \"{name}\"\n"),
    )?;
    Ok(dir.join(name))
}
