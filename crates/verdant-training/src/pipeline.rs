//! The alternating train/eval loop.
//!
//! Each round trains for `eval_every_n_step` more steps, evaluates the new
//! checkpoint on the validation and training splits, appends the result to
//! the accuracy log and re-renders the chart.

use crate::checkpoint::{checkpoint_step, latest_checkpoint};
use crate::config::PipelineConfig;
use crate::error::{TrainingError, TrainingResult};
use crate::layout::CheckpointLayout;
use crate::metrics::{append_record, AccuracyRecord, BestRecord, SplitAccuracy};
use crate::plot::render_chart_from_log;
use crate::process::{CommandParams, CommandSpec};
use crate::progress::{ProgressEvent, ProgressSink};
use crate::runner::ScriptRunner;
use crate::split::SplitName;
use crate::summary::read_run_summary;
use chrono::Utc;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const TRAIN_LABEL: &str = "T";
const EVAL_LABEL: &str = "E";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoopOutcome {
    /// The trainer reached `max_number_of_steps`.
    BudgetReached { step: u64 },
    EarlyStopped(BestRecord),
    Cancelled,
}

pub struct TrainEvalLoop<'a> {
    config: &'a PipelineConfig,
    runner: &'a dyn ScriptRunner,
    sink: &'a dyn ProgressSink,
    cancel: CancellationToken,
    layout: CheckpointLayout,
    best: Option<BestRecord>,
}

impl<'a> TrainEvalLoop<'a> {
    #[must_use]
    pub fn new(
        config: &'a PipelineConfig,
        runner: &'a dyn ScriptRunner,
        sink: &'a dyn ProgressSink,
        cancel: CancellationToken,
    ) -> Self {
        Self { config, runner, sink, cancel, layout: config.layout(), best: None }
    }

    /// Best validation accuracy so far, once one has been measured.
    #[must_use]
    pub fn best(&self) -> Option<BestRecord> {
        self.best
    }

    /// Trainer flags for a round starting at `step`.
    #[must_use]
    pub fn train_params(&self, step: u64) -> CommandParams {
        let config = self.config;
        let scopes = config.profile().trainable_scopes;
        let mut target = step + config.eval_every_n_step;
        if let Some(budget) = config.max_number_of_steps {
            target = target.min(budget);
        }

        let mut params = CommandParams::new()
            .with("train_dir", config.checkpoint_path.as_path())
            .with("dataset_name", config.dataset_name.as_str())
            .with("dataset_split_name", SplitName::Train.as_str())
            .with("dataset_dir", config.dataset_dir.as_path())
            .with("model_name", config.model_name.as_str())
            .with("clone_on_cpu", true)
            .with("checkpoint_path", config.pretrained_checkpoint_path.as_path())
            .with("checkpoint_exclude_scopes", scopes)
            .with("save_summaries_secs", "120")
            .with("save_interval_secs", "120")
            .with("num_preprocessing_threads", "4")
            .with("trainable_scopes", scopes)
            .with("max_number_of_steps", target);
        params.extend_yaml(&config.extra_train_params);
        params
    }

    #[must_use]
    pub fn eval_params(&self, split: SplitName, checkpoint: &Path, eval_dir: &Path) -> CommandParams {
        let config = self.config;
        CommandParams::new()
            .with("alsologtostderr", true)
            .with("checkpoint_path", checkpoint)
            .with("dataset_dir", config.dataset_dir.as_path())
            .with("dataset_name", config.dataset_name.as_str())
            .with("dataset_split_name", split.as_str())
            .with("model_name", config.model_name.as_str())
            .with("eval_dir", eval_dir)
    }

    fn script(&self, label: &str, script: &Path, params: CommandParams) -> CommandSpec {
        CommandSpec::new(label, self.config.python.as_str()).arg(script.display().to_string()).params(params)
    }

    /// Evaluate `checkpoint` on `split`. Failures are logged and yield `None`.
    async fn evaluate(&self, split: SplitName, checkpoint: &Path, step: u64) -> TrainingResult<Option<SplitAccuracy>> {
        let eval_dir = self.layout.eval_dir(Utc::now().timestamp(), step, split);
        std::fs::create_dir_all(&eval_dir)?;

        let spec = self.script(EVAL_LABEL, &self.config.eval_script, self.eval_params(split, checkpoint, &eval_dir));
        let outcome = self.runner.run(&spec, &self.cancel).await?;
        if outcome.cancelled {
            return Ok(None);
        }
        if let Err(e) = outcome.check(&spec.program) {
            warn!(%split, error = %e, "evaluation failed");
            return Ok(None);
        }

        match read_run_summary(&eval_dir) {
            Ok(summary) => {
                info!(%split, step, accuracy = summary.accuracy, recall_5 = ?summary.recall_5, "evaluated");
                Ok(Some(SplitAccuracy { accuracy: Some(summary.accuracy), recall_5: summary.recall_5 }))
            }
            Err(TrainingError::MissingSummary(reason)) => {
                warn!(%split, %reason, "no accuracy in evaluation output");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// One train + evaluate round. Returns `None` when cancelled.
    pub async fn run_round(&mut self) -> TrainingResult<Option<AccuracyRecord>> {
        let checkpoint_dir = self.config.checkpoint_path.as_path();
        let start_step = checkpoint_step(checkpoint_dir)?;

        let train = self.script(TRAIN_LABEL, &self.config.train_script, self.train_params(start_step));
        let outcome = self.runner.run(&train, &self.cancel).await?;
        if outcome.cancelled {
            return Ok(None);
        }
        outcome.check(&train.program)?;

        let checkpoint = latest_checkpoint(checkpoint_dir)?
            .ok_or_else(|| TrainingError::MissingCheckpoint(checkpoint_dir.to_path_buf()))?;
        let step = checkpoint_step(checkpoint_dir)?;
        if step <= start_step {
            return Err(TrainingError::TrainingStalled { step });
        }

        self.layout.ensure_eval_events_dir()?;
        let validation = self.evaluate(SplitName::Validation, &checkpoint, step).await?;
        let training = self.evaluate(SplitName::Train, &checkpoint, step).await?;
        if self.cancel.is_cancelled() {
            return Ok(None);
        }

        let validation = validation.unwrap_or_default();
        let record = AccuracyRecord {
            step,
            time: Utc::now().timestamp_millis() as f64 / 1000.0,
            accuracy: validation.accuracy,
            recall_5: validation.recall_5,
            training,
        };
        append_record(&self.layout.accuracy_log_path(), &record)?;
        if let Err(e) = render_chart_from_log(&self.layout) {
            warn!(error = %e, "failed to render accuracy chart");
        }

        if BestRecord::track(&mut self.best, &record) {
            info!(accuracy = ?record.accuracy, step, "new best validation accuracy");
        }
        self.sink.on_event(ProgressEvent::Round { step, accuracy: record.accuracy });
        Ok(Some(record))
    }

    /// Run rounds until the step budget, early stop or cancellation.
    pub async fn run(&mut self) -> TrainingResult<LoopOutcome> {
        info!(
            checkpoint_path = %self.config.checkpoint_path.display(),
            model = %self.config.model_name,
            runner = self.runner.id(),
            "starting train/eval loop"
        );
        std::fs::create_dir_all(&self.config.checkpoint_path)?;

        loop {
            if self.cancel.is_cancelled() {
                return Ok(LoopOutcome::Cancelled);
            }
            if let Some(budget) = self.config.max_number_of_steps {
                let step = checkpoint_step(&self.config.checkpoint_path)?;
                if step >= budget {
                    info!(step, budget, "step budget reached");
                    return Ok(LoopOutcome::BudgetReached { step });
                }
            }

            let Some(record) = self.run_round().await? else {
                return Ok(LoopOutcome::Cancelled);
            };

            if let (Some(early_stop), Some(best)) = (self.config.early_stop, self.best) {
                if best.plateaued(early_stop.min_accuracy, early_stop.patience_secs, record.time) {
                    info!(?best, "validation accuracy plateaued; stopping");
                    return Ok(LoopOutcome::EarlyStopped(best));
                }
            }

            if self.config.eval_interval_secs > 0 {
                tokio::select! {
                    () = self.cancel.cancelled() => return Ok(LoopOutcome::Cancelled),
                    () = tokio::time::sleep(Duration::from_secs(self.config.eval_interval_secs)) => {}
                }
            }
        }
    }
}
