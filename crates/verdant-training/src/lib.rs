//! Verdant Training
//!
//! Orchestration around an external image-classification training framework:
//! - Converting a labeled image folder tree into sharded record files
//! - Running the framework's trainer and evaluator as supervised subprocesses
//! - Scraping evaluation summaries into an accuracy log and chart
//! - Exporting trained checkpoints to mobile / vendor inference formats

pub mod artifacts;
pub mod checkpoint;
pub mod config;
pub mod convert;
pub mod error;
pub mod export;
pub mod labels;
pub mod layout;
pub mod metrics;
pub mod pipeline;
pub mod plot;
pub mod process;
pub mod progress;
pub mod runner;
pub mod split;
pub mod summary;

pub use artifacts::{ArtifactKind, ExportArtifact, ExportManifest};
pub use checkpoint::{checkpoint_step, latest_checkpoint};
pub use config::{EarlyStop, ModelName, ModelProfile, PipelineConfig};
pub use convert::{convert_dataset, ConversionReport, ConvertOptions};
pub use error::{TrainingError, TrainingResult};
pub use export::{export_models, ExportOptions};
pub use layout::{CheckpointLayout, DatasetLayout};
pub use metrics::{AccuracyRecord, BestRecord, SplitAccuracy};
pub use pipeline::{LoopOutcome, TrainEvalLoop};
pub use plot::{open_in_viewer, render_chart, render_chart_from_log};
pub use process::{run_command, CommandOutcome, CommandParams, CommandSpec, ParamValue};
pub use progress::{ProgressEvent, ProgressSink, StdoutProgressSink};
pub use runner::{ProcessRunner, ScriptRunner};
pub use split::{split_by_directory, SplitName};
pub use summary::{read_eval_summary, read_latest_summary, read_run_summary, EvalSummary};
