//! BAM file I/O.
//!
//! Readers and writers wrap either a single-threaded or a multi-threaded BGZF stream
//! behind one type so callers pick the thread count at run time:
//!
//! - **Single-threaded**: `threads=1` (lower overhead, good for small files)
//! - **Multi-threaded**: `threads>1` (higher throughput for large files)
//!
//! [`BamInput`] hands out independent record cursors over one file. The sort reads the
//! input twice at once, once to feed the sort engine and once ahead of it to find mates.

use anyhow::{Context, Result, bail};
use noodles::sam::Header;
use noodles::sam::alignment::io::Write as AlignmentWrite;
use noodles::sam::alignment::record_buf::RecordBuf;
use noodles_bgzf::io::{
    MultithreadedReader, MultithreadedWriter, Reader as BgzfReader, Writer as BgzfWriter,
    multithreaded_writer,
    writer::{self, CompressionLevel},
};
use std::fs::File;
use std::io::{self, BufRead, Read, Write};
use std::num::NonZero;
use std::path::{Path, PathBuf};

use crate::sort::RecordSink;

/// Enum wrapping single-threaded and multi-threaded BGZF readers.
pub enum BgzfReaderEnum {
    /// Single-threaded BGZF reader
    SingleThreaded(BgzfReader<File>),
    /// Multi-threaded BGZF reader
    MultiThreaded(MultithreadedReader<File>),
}

impl Read for BgzfReaderEnum {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            BgzfReaderEnum::SingleThreaded(r) => r.read(buf),
            BgzfReaderEnum::MultiThreaded(r) => r.read(buf),
        }
    }
}

impl BufRead for BgzfReaderEnum {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        match self {
            BgzfReaderEnum::SingleThreaded(r) => r.fill_buf(),
            BgzfReaderEnum::MultiThreaded(r) => r.fill_buf(),
        }
    }

    fn consume(&mut self, amt: usize) {
        match self {
            BgzfReaderEnum::SingleThreaded(r) => r.consume(amt),
            BgzfReaderEnum::MultiThreaded(r) => r.consume(amt),
        }
    }
}

/// Type alias for a BAM reader that supports both single and multi-threaded BGZF.
pub type BamReaderAuto = noodles::bam::io::Reader<BgzfReaderEnum>;

/// Enum wrapping single-threaded and multi-threaded BGZF writers
pub enum BgzfWriterEnum {
    /// Single-threaded BGZF writer
    SingleThreaded(BgzfWriter<File>),
    /// Multi-threaded BGZF writer
    MultiThreaded(MultithreadedWriter<File>),
}

impl Write for BgzfWriterEnum {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            BgzfWriterEnum::SingleThreaded(w) => w.write(buf),
            BgzfWriterEnum::MultiThreaded(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            BgzfWriterEnum::SingleThreaded(w) => w.flush(),
            BgzfWriterEnum::MultiThreaded(w) => w.flush(),
        }
    }
}

impl BgzfWriterEnum {
    /// Flush all blocks, write the EOF marker and sync the file.
    ///
    /// # Errors
    /// Returns an error if flushing or finalizing the writer fails.
    pub fn finish(self) -> io::Result<()> {
        let file = match self {
            BgzfWriterEnum::SingleThreaded(w) => w.finish()?,
            BgzfWriterEnum::MultiThreaded(mut w) => w.finish()?,
        };
        file.sync_all()
    }
}

/// Type alias for a BAM writer that supports both single and multi-threaded BGZF
pub type BamWriter = noodles::bam::io::Writer<BgzfWriterEnum>;

/// Open a BAM file and read its header.
///
/// # Errors
/// Returns an error if the file cannot be opened or the header cannot be read
///
/// # Example
/// ```no_run
/// use matesort_lib::bam_io::create_bam_reader;
/// use std::path::Path;
///
/// // Multi-threaded with 4 decompression threads
/// let (mut reader, header) = create_bam_reader(Path::new("input.bam"), 4).unwrap();
/// ```
pub fn create_bam_reader<P: AsRef<Path>>(
    path: P,
    threads: usize,
) -> Result<(BamReaderAuto, Header)> {
    let path_ref = path.as_ref();
    let file = File::open(path_ref)
        .with_context(|| format!("Failed to open input BAM: {}", path_ref.display()))?;

    let bgzf_reader = match NonZero::new(threads).filter(|_| threads > 1) {
        Some(workers) => {
            BgzfReaderEnum::MultiThreaded(MultithreadedReader::with_worker_count(workers, file))
        }
        None => BgzfReaderEnum::SingleThreaded(BgzfReader::new(file)),
    };

    let mut reader = noodles::bam::io::Reader::from(bgzf_reader);
    let header = reader
        .read_header()
        .with_context(|| format!("Failed to read header from: {}", path_ref.display()))?;

    Ok((reader, header))
}

/// Forward-only iterator of decoded records from one BAM reader.
///
/// Stops after the first error.
pub struct BamRecords {
    reader: BamReaderAuto,
    header: Header,
    path: PathBuf,
    records_read: u64,
    done: bool,
}

impl BamRecords {
    /// The header records are decoded against.
    #[must_use]
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Records yielded so far.
    #[must_use]
    pub fn records_read(&self) -> u64 {
        self.records_read
    }
}

impl Iterator for BamRecords {
    type Item = Result<RecordBuf>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut record = RecordBuf::default();
        match self.reader.read_record_buf(&self.header, &mut record) {
            Ok(0) => {
                self.done = true;
                None
            }
            Ok(_) => {
                self.records_read += 1;
                Some(Ok(record))
            }
            Err(e) => {
                self.done = true;
                Some(Err(anyhow::Error::new(e).context(format!(
                    "Failed to read record {} from {}",
                    self.records_read + 1,
                    self.path.display()
                ))))
            }
        }
    }
}

/// A BAM file that can be traversed more than once, concurrently.
#[derive(Debug, Clone)]
pub struct BamInput {
    path: PathBuf,
    threads: usize,
    header: Header,
}

impl BamInput {
    /// Open `path` and read its header. Standard input is rejected since it cannot be
    /// read twice.
    ///
    /// # Errors
    /// Returns an error for stdin, or if the file cannot be opened or is not BAM.
    pub fn open<P: AsRef<Path>>(path: P, threads: usize) -> Result<Self> {
        let path = path.as_ref();
        if is_stdin_path(path) {
            bail!("Input must be a file: the mate scan reads it a second time");
        }
        let (_, header) = create_bam_reader(path, 1)?;
        Ok(Self { path: path.to_path_buf(), threads: threads.max(1), header })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// The cursor feeding the sort engine.
    ///
    /// # Errors
    /// Returns an error if the file cannot be reopened.
    pub fn open_primary(&self) -> Result<BamRecords> {
        self.cursor(self.threads)
    }

    /// An independent cursor for the mate scan. It never shares state with the primary
    /// cursor, so the two may advance at different rates.
    ///
    /// # Errors
    /// Returns an error if the file cannot be reopened.
    pub fn open_secondary(&self) -> Result<BamRecords> {
        self.cursor(1)
    }

    fn cursor(&self, threads: usize) -> Result<BamRecords> {
        let (reader, header) = create_bam_reader(&self.path, threads)?;
        Ok(BamRecords { reader, header, path: self.path.clone(), records_read: 0, done: false })
    }
}

/// Create a BAM writer and write the header in one operation
///
/// `compression_level` is the BGZF level (0-12); levels outside that range fall back to
/// the BGZF default.
///
/// # Errors
/// Returns an error if the file cannot be created or the header cannot be written
///
/// # Example
/// ```no_run
/// use matesort_lib::bam_io::create_bam_writer;
/// use noodles::sam::Header;
/// use std::path::Path;
///
/// let header = Header::default();
/// // Multi-threaded with 4 compression threads
/// let mut writer = create_bam_writer(Path::new("output.bam"), &header, 4, 1).unwrap();
/// ```
pub fn create_bam_writer<P: AsRef<Path>>(
    path: P,
    header: &Header,
    threads: usize,
    compression_level: u32,
) -> Result<BamWriter> {
    let path_ref = path.as_ref();
    let output_file = File::create(path_ref)
        .with_context(|| format!("Failed to create output BAM: {}", path_ref.display()))?;

    let level = u8::try_from(compression_level).ok().and_then(CompressionLevel::new);
    let bgzf_writer = match NonZero::new(threads).filter(|_| threads > 1) {
        Some(worker_count) => {
            let mut builder =
                multithreaded_writer::Builder::default().set_worker_count(worker_count);
            if let Some(level) = level {
                builder = builder.set_compression_level(level);
            }
            BgzfWriterEnum::MultiThreaded(builder.build_from_writer(output_file))
        }
        None => {
            let mut builder = writer::Builder::default();
            if let Some(level) = level {
                builder = builder.set_compression_level(level);
            }
            BgzfWriterEnum::SingleThreaded(builder.build_from_writer(output_file))
        }
    };

    let mut writer = noodles::bam::io::Writer::from(bgzf_writer);
    writer
        .write_header(header)
        .with_context(|| format!("Failed to write header to: {}", path_ref.display()))?;
    Ok(writer)
}

/// [`RecordSink`] that writes BAM.
pub struct BamSink {
    writer: Option<BamWriter>,
    header: Header,
    path: PathBuf,
}

impl BamSink {
    /// Create the output file and write `header`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created or the header cannot be written.
    pub fn create<P: AsRef<Path>>(
        path: P,
        header: Header,
        threads: usize,
        compression_level: u32,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let writer = create_bam_writer(&path, &header, threads, compression_level)?;
        Ok(Self { writer: Some(writer), header, path })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordSink for BamSink {
    fn write_record(&mut self, record: RecordBuf) -> Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            bail!("BAM output {} is already finished", self.path.display());
        };
        writer
            .write_alignment_record(&self.header, &record)
            .with_context(|| format!("Failed to write record to {}", self.path.display()))
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer
                .into_inner()
                .finish()
                .with_context(|| format!("Failed to finish BAM output {}", self.path.display()))?;
        }
        Ok(())
    }
}

/// Check if a path refers to stdin.
///
/// Returns true if the path is "-" or "/dev/stdin".
///
/// # Example
/// ```
/// use matesort_lib::bam_io::is_stdin_path;
/// use std::path::Path;
///
/// assert!(is_stdin_path(Path::new("-")));
/// assert!(is_stdin_path(Path::new("/dev/stdin")));
/// assert!(!is_stdin_path(Path::new("input.bam")));
/// ```
pub fn is_stdin_path<P: AsRef<Path>>(path: P) -> bool {
    let path_str = path.as_ref().to_string_lossy();
    path_str == "-" || path_str == "/dev/stdin"
}
