use crate::error::TrainingResult;
use crate::split::SplitName;
use std::path::{Path, PathBuf};

pub const MANIFEST_FILENAME: &str = "result.csv";
pub const LABELS_FILENAME: &str = "labels.txt";
pub const DATASET_INFO_FILENAME: &str = "dataset_info.json";
pub const FILENAMES_BY_SPLIT_FILENAME: &str = "filenames_by_split.json";

/// Filesystem layout of a converted dataset directory.
///
/// The source manifest and image folders live in the same directory the
/// shards and sidecar files are written to.
#[derive(Debug, Clone)]
pub struct DatasetLayout {
    root: PathBuf,
    dataset_name: String,
    num_shards: usize,
}

impl DatasetLayout {
    #[must_use]
    pub fn new(root: PathBuf, dataset_name: impl Into<String>, num_shards: usize) -> Self {
        Self { root, dataset_name: dataset_name.into(), num_shards }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn num_shards(&self) -> usize {
        self.num_shards
    }

    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILENAME)
    }

    #[must_use]
    pub fn labels_path(&self) -> PathBuf {
        self.root.join(LABELS_FILENAME)
    }

    #[must_use]
    pub fn dataset_info_path(&self) -> PathBuf {
        self.root.join(DATASET_INFO_FILENAME)
    }

    #[must_use]
    pub fn filenames_by_split_path(&self) -> PathBuf {
        self.root.join(FILENAMES_BY_SPLIT_FILENAME)
    }

    /// `<name>_<split>_<shard:05>-of-<num_shards:05>.tfrecord`
    #[must_use]
    pub fn shard_path(&self, split: SplitName, shard_id: usize) -> PathBuf {
        self.root.join(format!(
            "{}_{}_{:05}-of-{:05}.tfrecord",
            self.dataset_name,
            split.as_str(),
            shard_id,
            self.num_shards
        ))
    }

    #[must_use]
    pub fn shards_exist(&self) -> bool {
        SplitName::ALL
            .iter()
            .all(|split| (0..self.num_shards).all(|shard| self.shard_path(*split, shard).exists()))
    }
}

/// Filesystem layout of a training run, rooted at the trainer's checkpoint directory.
#[derive(Debug, Clone)]
pub struct CheckpointLayout {
    root: PathBuf,
}

impl CheckpointLayout {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn accuracy_log_path(&self) -> PathBuf {
        self.root.join("accuracy.log")
    }

    #[must_use]
    pub fn chart_path(&self) -> PathBuf {
        self.root.join("accuracy.svg")
    }

    #[must_use]
    pub fn eval_events_dir(&self) -> PathBuf {
        self.root.join("eval_events")
    }

    /// `eval_events/<unix_secs>_<step>_<split>`
    #[must_use]
    pub fn eval_dir(&self, unix_secs: i64, step: u64, split: SplitName) -> PathBuf {
        self.eval_events_dir().join(format!("{unix_secs}_{step}_{}", split.as_str()))
    }

    #[must_use]
    pub fn inference_graph_path(&self) -> PathBuf {
        self.root.join("inference_graph.pb")
    }

    #[must_use]
    pub fn frozen_graph_path(&self) -> PathBuf {
        self.root.join("frozen_graph.pb")
    }

    #[must_use]
    pub fn coreml_path(&self) -> PathBuf {
        self.root.join("plant.mlmodel")
    }

    #[must_use]
    pub fn tflite_path(&self) -> PathBuf {
        self.root.join("plant.tflite")
    }

    #[must_use]
    pub fn export_manifest_path(&self) -> PathBuf {
        self.root.join("export_manifest.json")
    }

    pub fn ensure_eval_events_dir(&self) -> TrainingResult<()> {
        std::fs::create_dir_all(self.eval_events_dir())?;
        Ok(())
    }
}
