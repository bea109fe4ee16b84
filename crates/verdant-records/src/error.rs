use thiserror::Error;

pub type RecordResult<T> = std::result::Result<T, RecordError>;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("record truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("length checksum mismatch (stored {stored:#010x}, computed {computed:#010x})")]
    LengthChecksum { stored: u32, computed: u32 },

    #[error("data checksum mismatch (stored {stored:#010x}, computed {computed:#010x})")]
    DataChecksum { stored: u32, computed: u32 },

    #[error("record of {0} bytes exceeds the addressable size")]
    TooLarge(u64),

    #[error("failed to decode message: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
