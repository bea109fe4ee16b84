use std::path::PathBuf;
use thiserror::Error;

pub type TrainingResult<T> = std::result::Result<T, TrainingError>;

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("invalid pipeline config: {0}")]
    InvalidConfig(String),

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("failed to decode image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{program}` exited with {}", .code.map_or_else(|| "a signal".to_string(), |c| format!("code {c}")))]
    CommandFailed { program: String, code: Option<i32> },

    #[error("trainer exited without advancing past step {step}")]
    TrainingStalled { step: u64 },

    #[error("no checkpoint found in {0}")]
    MissingCheckpoint(PathBuf),

    #[error("missing evaluation summary: {0}")]
    MissingSummary(String),

    #[error("export error: {0}")]
    Export(String),

    #[error("chart error: {0}")]
    Plot(String),

    #[error(transparent)]
    Records(#[from] verdant_records::RecordError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
