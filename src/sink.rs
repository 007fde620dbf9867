//! Record sinks - where encoded connection records go.
//!
//! A log is a flat tag stream in which every record is one top-level field
//! under [`RECORD_ENTRY`]. The field length makes the log self-delimiting, so
//! a reader can resume from partial reads and step over entries of other
//! kinds.

use std::io::Write;

use crate::error::Result;
use crate::tagging::{decode_record, marshal_record, ConnectionRecord, FieldBuffer, Tag, TagWriter};

/// Top-level tag of one record in a log stream.
pub const RECORD_ENTRY: Tag = 1;

/// Destination for connection records.
///
/// Implementations decide storage; rotation and retention are theirs too.
pub trait RecordSink {
    /// Store one record.
    fn write_record(&mut self, record: &ConnectionRecord) -> Result<()>;

    /// Flush buffered records to the backing store.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Sink that appends records to any [`Write`] implementation.
pub struct StreamSink<W: Write> {
    inner: W,
    scratch: TagWriter,
    written: u64,
}

impl<W: Write> StreamSink<W> {
    /// Wrap a writer.
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            scratch: TagWriter::with_capacity(256),
            written: 0,
        }
    }

    /// Number of records written so far.
    pub fn records_written(&self) -> u64 {
        self.written
    }

    /// Get a reference to the underlying writer.
    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Unwrap the underlying writer.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> RecordSink for StreamSink<W> {
    fn write_record(&mut self, record: &ConnectionRecord) -> Result<()> {
        self.scratch.clear();
        marshal_record(&mut self.scratch, RECORD_ENTRY, record);
        self.inner.write_all(self.scratch.as_slice())?;
        self.written += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }
}

/// Incremental reader of a record log.
///
/// # Example
///
/// ```
/// use honeypot_ipc::sink::{RecordLogReader, RecordSink, StreamSink};
/// use honeypot_ipc::tagging::ConnectionRecord;
///
/// let mut sink = StreamSink::new(Vec::new());
/// sink.write_record(&ConnectionRecord { dst_port: 25, ..Default::default() }).unwrap();
/// let log = sink.into_inner();
///
/// let mut reader = RecordLogReader::new();
/// let records = reader.push(&log).unwrap();
/// assert_eq!(records[0].dst_port, 25);
/// ```
pub struct RecordLogReader {
    buffer: FieldBuffer,
    skipped: u64,
}

impl RecordLogReader {
    /// Create a reader with the default field limit.
    pub fn new() -> Self {
        Self {
            buffer: FieldBuffer::new(),
            skipped: 0,
        }
    }

    /// Feed the next chunk of the log and return every record it completes.
    ///
    /// Entries with other top-level tags are skipped. A corrupt record aborts
    /// the call; the reader should not be used afterwards.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<ConnectionRecord>> {
        let mut records = Vec::new();
        for field in self.buffer.push(chunk)? {
            if field.tag != RECORD_ENTRY {
                tracing::debug!("Skipping log entry with tag {}", field.tag);
                self.skipped += 1;
                continue;
            }
            records.push(decode_record(&field.payload)?);
        }
        Ok(records)
    }

    /// Number of non-record entries stepped over.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Check if the reader stopped between entries.
    pub fn is_at_boundary(&self) -> bool {
        self.buffer.is_idle()
    }
}

impl Default for RecordLogReader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tagging::Timestamp;
    use std::net::Ipv4Addr;

    fn record(port: u16) -> ConnectionRecord {
        ConnectionRecord {
            start: Some(Timestamp::new(1_000, 0)),
            src: Ipv4Addr::new(198, 51, 100, 4).into(),
            dst: Ipv4Addr::new(203, 0, 113, 9).into(),
            src_port: 1025,
            dst_port: port,
            proto: 6,
            hashes: vec![[port as u8; crate::tagging::DIGEST_LEN]],
            ..Default::default()
        }
    }

    #[test]
    fn test_write_then_read_in_chunks() {
        let mut sink = StreamSink::new(Vec::new());
        for port in [21, 22, 23] {
            sink.write_record(&record(port)).unwrap();
        }
        sink.flush().unwrap();
        assert_eq!(sink.records_written(), 3);
        let log = sink.into_inner();

        let mut reader = RecordLogReader::new();
        let mut records = Vec::new();
        for chunk in log.chunks(7) {
            records.extend(reader.push(chunk).unwrap());
        }
        assert_eq!(records, vec![record(21), record(22), record(23)]);
        assert!(reader.is_at_boundary());
    }

    #[test]
    fn test_foreign_entries_skipped() {
        let mut log = TagWriter::new();
        log.put_string(99, "console banner");
        marshal_record(&mut log, RECORD_ENTRY, &record(80));

        let mut reader = RecordLogReader::new();
        let records = reader.push(log.as_slice()).unwrap();
        assert_eq!(records, vec![record(80)]);
        assert_eq!(reader.skipped(), 1);
    }

    #[test]
    fn test_corrupt_entry_aborts() {
        let mut inner = TagWriter::new();
        inner.put_u8(crate::tagging::tags::DST_PORT, 80);
        let mut log = TagWriter::new();
        log.put_buffer(RECORD_ENTRY, &inner);

        let mut reader = RecordLogReader::new();
        assert!(reader.push(log.as_slice()).is_err());
    }
}
