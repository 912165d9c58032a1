//! Lossless binary encoding of single records for spill files.
//!
//! Each record is written in the BAM record layout (`block_size` followed by the record
//! body) without BGZF framing; spill files apply their own compression around it. The
//! header is needed both ways since reference indices are validated against it.

use anyhow::{Context, Result, bail};
use noodles::bam;
use noodles::sam::Header;
use noodles::sam::alignment::io::Write as AlignmentWrite;
use noodles::sam::alignment::record_buf::RecordBuf;

/// Encodes and decodes individual [`RecordBuf`]s against a fixed header.
#[derive(Debug, Clone)]
pub struct BamRecordCodec {
    header: Header,
}

impl BamRecordCodec {
    /// Create a codec for records described by `header`.
    #[must_use]
    pub fn new(header: Header) -> Self {
        Self { header }
    }

    /// The header records are validated against.
    #[must_use]
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Encode `record` into a fresh buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be represented in BAM, for example when its
    /// reference index is not in the header.
    pub fn encode(&self, record: &RecordBuf) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.encode_into(record, &mut buf)?;
        Ok(buf)
    }

    /// Encode `record` into `buf`, replacing its contents.
    ///
    /// # Errors
    ///
    /// See [`BamRecordCodec::encode`].
    pub fn encode_into(&self, record: &RecordBuf, buf: &mut Vec<u8>) -> Result<()> {
        buf.clear();
        let mut writer = bam::io::Writer::from(buf);
        writer
            .write_alignment_record(&self.header, record)
            .context("Failed to encode record")?;
        Ok(())
    }

    /// Decode a record previously produced by [`BamRecordCodec::encode`].
    ///
    /// # Errors
    ///
    /// Returns an error if `bytes` is empty, truncated or otherwise not a BAM record.
    pub fn decode(&self, bytes: &[u8]) -> Result<RecordBuf> {
        let mut reader = bam::io::Reader::from(bytes);
        let mut record = RecordBuf::default();
        let n = reader
            .read_record_buf(&self.header, &mut record)
            .context("Failed to decode record")?;
        if n == 0 {
            bail!("Failed to decode record: no bytes");
        }
        Ok(record)
    }
}
