//! Record framing.
//!
//! Every record on disk is laid out as:
//!
//! ```text
//! u64 LE  length
//! u32 LE  masked crc32c of the length bytes
//! [u8]    payload (length bytes)
//! u32 LE  masked crc32c of the payload
//! ```

use crate::error::{RecordError, RecordResult};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

const MASK_DELTA: u32 = 0xa282_ead8;

/// Checksum used by the framework for both the length header and payload.
#[must_use]
pub fn masked_crc32c(bytes: &[u8]) -> u32 {
    let crc = crc32c::crc32c(bytes);
    crc.rotate_right(15).wrapping_add(MASK_DELTA)
}

/// Appends framed records to an underlying writer.
#[derive(Debug)]
pub struct RecordWriter<W: Write> {
    inner: W,
    written: usize,
}

impl RecordWriter<BufWriter<File>> {
    /// Create (or truncate) a record file at `path`.
    pub fn create(path: &Path) -> RecordResult<Self> {
        let file = File::create(path)?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> RecordWriter<W> {
    #[must_use]
    pub fn new(inner: W) -> Self {
        Self { inner, written: 0 }
    }

    pub fn write_record(&mut self, data: &[u8]) -> RecordResult<()> {
        let len = (data.len() as u64).to_le_bytes();
        self.inner.write_all(&len)?;
        self.inner.write_all(&masked_crc32c(&len).to_le_bytes())?;
        self.inner.write_all(data)?;
        self.inner.write_all(&masked_crc32c(data).to_le_bytes())?;
        self.written += 1;
        Ok(())
    }

    #[must_use]
    pub fn records_written(&self) -> usize {
        self.written
    }

    pub fn flush(&mut self) -> RecordResult<()> {
        self.inner.flush()?;
        Ok(())
    }

    /// Flush and hand back the underlying writer.
    pub fn into_inner(mut self) -> RecordResult<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}

/// Iterates over the payloads of a framed record stream.
///
/// A stream that ends exactly on a frame boundary finishes cleanly; anything
/// else (short header, short payload, bad checksum) yields one error and then
/// stops.
#[derive(Debug)]
pub struct RecordReader<R: Read> {
    inner: R,
    done: bool,
}

impl RecordReader<BufReader<File>> {
    pub fn open(path: &Path) -> RecordResult<Self> {
        let file = File::open(path)?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: Read> RecordReader<R> {
    #[must_use]
    pub fn new(inner: R) -> Self {
        Self { inner, done: false }
    }

    fn read_record(&mut self) -> RecordResult<Option<Vec<u8>>> {
        let mut header = [0u8; 12];
        let got = read_fully(&mut self.inner, &mut header)?;
        if got == 0 {
            return Ok(None);
        }
        if got < header.len() {
            return Err(RecordError::Truncated { expected: header.len(), actual: got });
        }

        let (len_bytes, crc_bytes) = header.split_at(8);
        let stored = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        let computed = masked_crc32c(len_bytes);
        if stored != computed {
            return Err(RecordError::LengthChecksum { stored, computed });
        }

        let mut len_arr = [0u8; 8];
        len_arr.copy_from_slice(len_bytes);
        let len = u64::from_le_bytes(len_arr);
        let len = usize::try_from(len).map_err(|_| RecordError::TooLarge(len))?;

        let mut data = vec![0u8; len];
        let got = read_fully(&mut self.inner, &mut data)?;
        if got < len {
            return Err(RecordError::Truncated { expected: len, actual: got });
        }

        let mut footer = [0u8; 4];
        let got = read_fully(&mut self.inner, &mut footer)?;
        if got < footer.len() {
            return Err(RecordError::Truncated { expected: footer.len(), actual: got });
        }
        let stored = u32::from_le_bytes(footer);
        let computed = masked_crc32c(&data);
        if stored != computed {
            return Err(RecordError::DataChecksum { stored, computed });
        }

        Ok(Some(data))
    }
}

impl<R: Read> Iterator for RecordReader<R> {
    type Item = RecordResult<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_record() {
            Ok(Some(data)) => Some(Ok(data)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Read every record payload in a file.
pub fn read_all_records(path: &Path) -> RecordResult<Vec<Vec<u8>>> {
    RecordReader::open(path)?.collect()
}

// Like `read_exact`, but reports how much was read instead of failing on EOF.
fn read_fully<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
