use crate::split::SplitName;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// One line of output from a supervised subprocess.
    Output { label: String, line: String },
    Message { message: String },
    /// One image written to a shard.
    Converted { split: SplitName, index: usize, total: usize, shard: usize },
    /// A train/eval round finished.
    Round { step: u64, accuracy: Option<f32> },
}

pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: ProgressEvent);
}

#[derive(Debug, Default)]
pub struct StdoutProgressSink;

impl ProgressSink for StdoutProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Output { label, line } => println!("{label}| {line}"),
            ProgressEvent::Message { message } => println!("{message}"),
            ProgressEvent::Converted { split, index, total, shard } => {
                println!(">> Converting {split} image {}/{total} shard {shard}", index + 1);
            }
            ProgressEvent::Round { step, accuracy } => match accuracy {
                Some(accuracy) => println!("step {step}: validation accuracy {accuracy:.4}"),
                None => println!("step {step}: no validation accuracy"),
            },
        }
    }
}

/// Collects events in memory.
#[derive(Debug, Default)]
pub struct RecordingProgressSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgressSink {
    #[must_use]
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Output lines emitted under `label`.
    #[must_use]
    pub fn lines(&self, label: &str) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ProgressEvent::Output { label: l, line } if l == label => Some(line),
                _ => None,
            })
            .collect()
    }
}

impl ProgressSink for RecordingProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
