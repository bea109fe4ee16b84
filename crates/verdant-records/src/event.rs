//! Summary events written by the evaluator.
//!
//! Only the fields needed to scrape scalar metrics are modeled; other summary
//! payloads (images, histograms, tensors) are skipped while decoding.

use crate::error::RecordResult;
use crate::framing::{RecordReader, RecordWriter};
use prost::Message;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

pub const FILE_VERSION: &str = "brain.Event:2";

#[derive(Clone, PartialEq, prost::Message)]
pub struct Event {
    #[prost(double, tag = "1")]
    pub wall_time: f64,
    #[prost(int64, tag = "2")]
    pub step: i64,
    #[prost(oneof = "event::What", tags = "3, 4, 5")]
    pub what: Option<event::What>,
}

pub mod event {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum What {
        #[prost(string, tag = "3")]
        FileVersion(String),
        #[prost(bytes = "vec", tag = "4")]
        GraphDef(Vec<u8>),
        #[prost(message, tag = "5")]
        Summary(super::Summary),
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Summary {
    #[prost(message, repeated, tag = "1")]
    pub value: Vec<SummaryValue>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SummaryValue {
    #[prost(string, tag = "7")]
    pub node_name: String,
    #[prost(string, tag = "1")]
    pub tag: String,
    #[prost(oneof = "summary_value::Value", tags = "2")]
    pub value: Option<summary_value::Value>,
}

pub mod summary_value {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Value {
        #[prost(float, tag = "2")]
        SimpleValue(f32),
    }
}

impl SummaryValue {
    #[must_use]
    pub fn simple(tag: &str, value: f32) -> Self {
        Self {
            node_name: String::new(),
            tag: tag.to_string(),
            value: Some(summary_value::Value::SimpleValue(value)),
        }
    }
}

impl Event {
    #[must_use]
    pub fn scalars(wall_time: f64, step: i64, values: &[(&str, f32)]) -> Self {
        Self {
            wall_time,
            step,
            what: Some(event::What::Summary(Summary {
                value: values.iter().map(|(tag, v)| SummaryValue::simple(tag, *v)).collect(),
            })),
        }
    }

    /// Scalar summary values keyed by tag. Empty for non-summary events.
    #[must_use]
    pub fn simple_values(&self) -> HashMap<&str, f32> {
        let Some(event::What::Summary(summary)) = &self.what else {
            return HashMap::new();
        };
        summary
            .value
            .iter()
            .filter_map(|v| match v.value {
                Some(summary_value::Value::SimpleValue(x)) => Some((v.tag.as_str(), x)),
                None => None,
            })
            .collect()
    }
}

/// Decode every event stored in an events file, in file order.
pub fn read_events(path: &Path) -> RecordResult<Vec<Event>> {
    let mut events = Vec::new();
    for record in RecordReader::open(path)? {
        events.push(Event::decode(record?.as_slice())?);
    }
    Ok(events)
}

/// Writes an events file: a version header followed by events.
#[derive(Debug)]
pub struct EventWriter<W: Write> {
    records: RecordWriter<W>,
}

impl EventWriter<BufWriter<File>> {
    pub fn create(path: &Path, wall_time: f64) -> RecordResult<Self> {
        let file = File::create(path)?;
        Self::new(BufWriter::new(file), wall_time)
    }
}

impl<W: Write> EventWriter<W> {
    pub fn new(inner: W, wall_time: f64) -> RecordResult<Self> {
        let mut records = RecordWriter::new(inner);
        let header = Event {
            wall_time,
            step: 0,
            what: Some(event::What::FileVersion(FILE_VERSION.to_string())),
        };
        records.write_record(&header.encode_to_vec())?;
        Ok(Self { records })
    }

    pub fn write_event(&mut self, event: &Event) -> RecordResult<()> {
        self.records.write_record(&event.encode_to_vec())
    }

    pub fn finish(self) -> RecordResult<W> {
        self.records.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_read_events_skips_nothing() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("events.out.tfevents.1.host");

        let mut writer = EventWriter::create(&path, 1.0).unwrap();
        writer.write_event(&Event::scalars(2.0, 10, &[("eval/Accuracy", 0.5)])).unwrap();
        writer.write_event(&Event::scalars(3.0, 20, &[("loss", 1.25)])).unwrap();
        writer.finish().unwrap();

        let events = read_events(&path).unwrap();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0].what, Some(event::What::FileVersion(_))));
        assert_eq!(events[1].step, 10);
        assert_eq!(events[1].simple_values().get("eval/Accuracy"), Some(&0.5));
        assert_eq!(events[2].simple_values().get("loss"), Some(&1.25));
    }

    #[test]
    fn test_header_has_no_simple_values() {
        let header = Event {
            wall_time: 0.0,
            step: 0,
            what: Some(event::What::FileVersion(FILE_VERSION.to_string())),
        };
        assert!(header.simple_values().is_empty());
    }
}
