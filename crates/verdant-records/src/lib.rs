//! Verdant Records
//!
//! Length-delimited, checksummed record files as consumed by the training
//! framework's input pipeline, plus the two message types that travel in them:
//! - `Example`: one encoded image with its label and dimensions
//! - `Event`: one entry of an evaluator's summary log

pub mod error;
pub mod event;
pub mod example;
pub mod framing;

pub use error::{RecordError, RecordResult};
pub use event::{read_events, Event, EventWriter, Summary, SummaryValue};
pub use example::{image_example, Example, Feature, Features};
pub use framing::{masked_crc32c, read_all_records, RecordReader, RecordWriter};
