//! Subprocess supervision.
//!
//! Scripts are launched with stdout and stderr piped into a single line
//! stream. Each line is forwarded to a [`ProgressSink`] under the command's
//! label as soon as it arrives. The supervisor wakes at least once per
//! [`POLL_INTERVAL`] to notice process exit, and kills the child when the
//! cancellation token fires.

use crate::error::{TrainingError, TrainingResult};
use crate::progress::{ProgressEvent, ProgressSink};
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// A single `--key[=value]` flag value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    /// Bare `--key`.
    Flag,
    Value(String),
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Value(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self::Value(value)
    }
}

impl From<&Path> for ParamValue {
    fn from(value: &Path) -> Self {
        Self::Value(value.display().to_string())
    }
}

impl From<u64> for ParamValue {
    fn from(value: u64) -> Self {
        Self::Value(value.to_string())
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        if value { Self::Flag } else { Self::Value("false".to_string()) }
    }
}

impl From<&serde_yaml::Value> for ParamValue {
    fn from(value: &serde_yaml::Value) -> Self {
        match value {
            serde_yaml::Value::Bool(b) => Self::from(*b),
            serde_yaml::Value::Number(n) => Self::Value(n.to_string()),
            serde_yaml::Value::String(s) => Self::Value(s.clone()),
            serde_yaml::Value::Null => Self::Value(String::new()),
            other => Self::Value(serde_json::to_string(other).unwrap_or_default()),
        }
    }
}

/// Ordered script parameters. Setting an existing key replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandParams {
    entries: Vec<(String, ParamValue)>,
}

impl CommandParams {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> &mut Self {
        let key = key.into();
        let value = value.into();
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.entries.push((key, value));
        }
        self
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.set(key, value);
        self
    }

    /// Overlay string-keyed YAML entries; other keys are ignored.
    pub fn extend_yaml(&mut self, mapping: &serde_yaml::Mapping) -> &mut Self {
        for (key, value) in mapping {
            if let Some(key) = key.as_str() {
                self.set(key, ParamValue::from(value));
            }
        }
        self
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// The value of a non-flag parameter.
    #[must_use]
    pub fn value(&self, key: &str) -> Option<&str> {
        match self.get(key)? {
            ParamValue::Value(v) => Some(v.as_str()),
            ParamValue::Flag => None,
        }
    }

    #[must_use]
    pub fn to_args(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|(k, v)| match v {
                ParamValue::Flag => format!("--{k}"),
                ParamValue::Value(v) => format!("--{k}={v}"),
            })
            .collect()
    }
}

/// A script invocation: program, leading arguments and flag parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Short prefix for forwarded output lines.
    pub label: String,
    pub program: String,
    pub args: Vec<String>,
    pub params: CommandParams,
}

impl CommandSpec {
    #[must_use]
    pub fn new(label: impl Into<String>, program: impl Into<String>) -> Self {
        Self { label: label.into(), program: program.into(), args: Vec::new(), params: CommandParams::new() }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn params(mut self, params: CommandParams) -> Self {
        self.params = params;
        self
    }

    #[must_use]
    pub fn argv(&self) -> Vec<String> {
        let mut argv = self.args.clone();
        argv.extend(self.params.to_args());
        argv
    }

    #[must_use]
    pub fn display(&self) -> String {
        std::iter::once(self.program.clone()).chain(self.argv()).collect::<Vec<_>>().join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    pub success: bool,
    pub lines: usize,
    pub cancelled: bool,
}

impl CommandOutcome {
    /// Turn a non-zero exit into [`TrainingError::CommandFailed`].
    pub fn check(&self, program: &str) -> TrainingResult<()> {
        if self.success {
            Ok(())
        } else {
            Err(TrainingError::CommandFailed { program: program.to_string(), code: self.code })
        }
    }
}

/// Run `spec` to completion, streaming its output to `sink`.
///
/// stdout and stderr are separate pipes merged line by line. Lines keep their
/// order within a stream; across streams they arrive in read order.
pub async fn run_command(
    spec: &CommandSpec,
    sink: &dyn ProgressSink,
    cancel: &CancellationToken,
) -> TrainingResult<CommandOutcome> {
    info!(label = %spec.label, command = %spec.display(), "run_command");
    let started = Instant::now();

    let mut child = Command::new(&spec.program)
        .args(spec.argv())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| TrainingError::Spawn { program: spec.program.clone(), source })?;

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_lines(stdout, tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_lines(stderr, tx.clone()));
    }
    drop(tx);

    let emit = |line: String| {
        sink.on_event(ProgressEvent::Output { label: spec.label.clone(), line });
    };

    let mut lines = 0usize;
    let mut cancelled = false;
    let status = loop {
        tokio::select! {
            line = rx.recv() => match line {
                Some(line) => {
                    lines += 1;
                    emit(line);
                }
                // Both pipes closed.
                None => break child.wait().await?,
            },
            () = cancel.cancelled(), if !cancelled => {
                warn!(label = %spec.label, "terminating {}", spec.program);
                cancelled = true;
                if let Err(e) = child.start_kill() {
                    debug!(error = %e, "kill after exit");
                }
            }
            () = tokio::time::sleep(POLL_INTERVAL) => {
                if let Some(status) = child.try_wait()? {
                    while let Ok(line) = rx.try_recv() {
                        lines += 1;
                        emit(line);
                    }
                    break status;
                }
            }
        }
    };

    let outcome = CommandOutcome { code: status.code(), success: status.success(), lines, cancelled };
    info!(
        label = %spec.label,
        rc = ?outcome.code,
        lines,
        cancelled,
        elapsed_secs = started.elapsed().as_secs_f64(),
        "command finished"
    );
    Ok(outcome)
}

async fn forward_lines<R: AsyncRead + Unpin>(reader: R, tx: mpsc::UnboundedSender<String>) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf).trim_end().to_string();
                if tx.send(line).is_err() {
                    break;
                }
            }
        }
    }
}
