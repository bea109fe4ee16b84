use crate::error::TrainingResult;
use crate::process::{run_command, CommandOutcome, CommandSpec};
use crate::progress::ProgressSink;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Executes framework scripts on behalf of the train/eval loop and exporter.
#[async_trait]
pub trait ScriptRunner: Send + Sync {
    fn id(&self) -> &'static str;

    async fn run(&self, spec: &CommandSpec, cancel: &CancellationToken) -> TrainingResult<CommandOutcome>;
}

/// Runs scripts as real subprocesses.
#[derive(Clone)]
pub struct ProcessRunner {
    sink: Arc<dyn ProgressSink>,
}

impl ProcessRunner {
    #[must_use]
    pub fn new(sink: Arc<dyn ProgressSink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl ScriptRunner for ProcessRunner {
    fn id(&self) -> &'static str {
        "process"
    }

    async fn run(&self, spec: &CommandSpec, cancel: &CancellationToken) -> TrainingResult<CommandOutcome> {
        run_command(spec, self.sink.as_ref(), cancel).await
    }
}
