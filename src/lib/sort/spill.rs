//! Keyed spill files.
//!
//! Each sorted batch the engine cannot keep in memory is written as a stream of
//! `[key][len: u32][record: len bytes]` entries, where the key is the record's
//! precomputed [`SpillKey`] and the record is its [`BamRecordCodec`] encoding.
//! The stream is BGZF-compressed unless the compression level is 0; readers detect
//! which by the gzip magic bytes.
//!
//! [`BamRecordCodec`]: crate::sort::codec::BamRecordCodec

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::marker::PhantomData;
use std::num::NonZero;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

use anyhow::{Result, bail};
use crossbeam_channel::{Receiver, Sender, bounded};
use noodles_bgzf::io::{
    MultithreadedWriter, Reader as BgzfReader, Writer as BgzfWriter, multithreaded_writer,
    writer::{self, CompressionLevel},
};

use crate::errors::MateSortError;
use crate::sort::keys::SpillKey;

/// I/O buffer size for spill files.
const SPILL_BUFFER_SIZE: usize = 256 * 1024;

/// Entries each reader thread may decode ahead of the merge.
const PREFETCH_SIZE: usize = 1024;

/// Leading bytes of a gzip (and therefore BGZF) stream.
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Raw or BGZF output behind one `Write`.
enum SpillWriterInner {
    /// Uncompressed.
    Raw(BufWriter<File>),
    /// Single-threaded BGZF.
    SingleThreaded(BgzfWriter<BufWriter<File>>),
    /// Multi-threaded BGZF.
    MultiThreaded(MultithreadedWriter<BufWriter<File>>),
}

impl Write for SpillWriterInner {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            SpillWriterInner::Raw(w) => w.write(buf),
            SpillWriterInner::SingleThreaded(w) => w.write(buf),
            SpillWriterInner::MultiThreaded(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            SpillWriterInner::Raw(w) => w.flush(),
            SpillWriterInner::SingleThreaded(w) => w.flush(),
            SpillWriterInner::MultiThreaded(w) => w.flush(),
        }
    }
}

impl SpillWriterInner {
    fn finish(self) -> io::Result<()> {
        match self {
            SpillWriterInner::Raw(mut w) => w.flush(),
            SpillWriterInner::SingleThreaded(w) => w.finish()?.flush(),
            SpillWriterInner::MultiThreaded(mut w) => w.finish()?.flush(),
        }
    }
}

/// Writes one sorted batch to disk.
pub struct SpillWriter<K: SpillKey> {
    path: PathBuf,
    writer: SpillWriterInner,
    records: u64,
    _marker: PhantomData<K>,
}

impl<K: SpillKey> SpillWriter<K> {
    /// Create a spill file at `path`.
    ///
    /// - `compression_level` 0 writes raw entries, 1-12 writes BGZF at that level.
    /// - `threads` > 1 compresses on that many worker threads.
    ///
    /// # Errors
    ///
    /// Returns [`MateSortError::SpillIo`] if the file cannot be created.
    pub fn create(path: &Path, compression_level: u32, threads: usize) -> Result<Self> {
        let file = File::create(path).map_err(|e| MateSortError::spill_io(path, "create", e))?;
        let buf = BufWriter::with_capacity(SPILL_BUFFER_SIZE, file);

        #[allow(clippy::cast_possible_truncation)]
        let level = CompressionLevel::new(compression_level.min(u32::from(u8::MAX)) as u8);
        let writer = if compression_level == 0 {
            SpillWriterInner::Raw(buf)
        } else if let Some(worker_count) = NonZero::new(threads).filter(|_| threads > 1) {
            let mut builder =
                multithreaded_writer::Builder::default().set_worker_count(worker_count);
            if let Some(level) = level {
                builder = builder.set_compression_level(level);
            }
            SpillWriterInner::MultiThreaded(builder.build_from_writer(buf))
        } else {
            let mut builder = writer::Builder::default();
            if let Some(level) = level {
                builder = builder.set_compression_level(level);
            }
            SpillWriterInner::SingleThreaded(builder.build_from_writer(buf))
        };

        Ok(Self { path: path.to_path_buf(), writer, records: 0, _marker: PhantomData })
    }

    /// Path of the file being written.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one keyed record.
    ///
    /// # Errors
    ///
    /// Returns [`MateSortError::SpillIo`] on write failure.
    pub fn write_record(&mut self, key: &K, record: &[u8]) -> Result<()> {
        self.write_entry(key, record)
            .map_err(|e| MateSortError::spill_io(&self.path, "write", e))?;
        self.records += 1;
        Ok(())
    }

    fn write_entry(&mut self, key: &K, record: &[u8]) -> io::Result<()> {
        let len = u32::try_from(record.len()).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "encoded record longer than u32::MAX")
        })?;
        key.write_to(&mut self.writer)?;
        self.writer.write_all(&len.to_le_bytes())?;
        self.writer.write_all(record)
    }

    /// Flush and close the file, returning the number of records written.
    ///
    /// # Errors
    ///
    /// Returns [`MateSortError::SpillIo`] if the final flush fails.
    pub fn finish(self) -> Result<u64> {
        let Self { path, writer, records, .. } = self;
        writer.finish().map_err(|e| MateSortError::spill_io(&path, "write", e))?;
        Ok(records)
    }
}

/// One decoded spill entry, or the I/O error that stopped the reader.
type SpillEntry<K> = io::Result<(K, Vec<u8>)>;

/// Reads a spill file back on a background thread.
pub struct SpillReader<K: SpillKey> {
    path: PathBuf,
    receiver: Receiver<SpillEntry<K>>,
    handle: Option<JoinHandle<()>>,
}

impl<K: SpillKey> SpillReader<K> {
    /// Open a spill file and start prefetching its entries.
    ///
    /// # Errors
    ///
    /// Returns [`MateSortError::SpillIo`] if the file cannot be opened.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| MateSortError::spill_io(path, "open", e))?;
        let mut reader = BufReader::with_capacity(SPILL_BUFFER_SIZE, file);
        let is_compressed = reader
            .fill_buf()
            .map_err(|e| MateSortError::spill_io(path, "read", e))?
            .starts_with(&GZIP_MAGIC);

        let (tx, rx) = bounded(PREFETCH_SIZE);
        let name = path.file_name().map_or_else(String::new, |n| n.to_string_lossy().into_owned());
        let handle = thread::Builder::new()
            .name(format!("spill-reader-{name}"))
            .spawn(move || {
                if is_compressed {
                    read_entries(BgzfReader::new(reader), &tx);
                } else {
                    read_entries(reader, &tx);
                }
            })
            .map_err(|e| MateSortError::spill_io(path, "open", e))?;

        Ok(Self { path: path.to_path_buf(), receiver: rx, handle: Some(handle) })
    }

    /// Path of the file being read.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The next keyed record, or `None` once the file is exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`MateSortError::SpillIo`] if the file is truncated or unreadable.
    pub fn next_record(&mut self) -> Result<Option<(K, Vec<u8>)>> {
        match self.receiver.recv() {
            Ok(Ok(entry)) => Ok(Some(entry)),
            Ok(Err(e)) => Err(MateSortError::spill_io(&self.path, "read", e).into()),
            Err(_) => {
                if let Some(handle) = self.handle.take() {
                    if handle.join().is_err() {
                        bail!("Reader thread for spill file {} panicked", self.path.display());
                    }
                }
                Ok(None)
            }
        }
    }
}

fn read_entries<K: SpillKey, R: Read>(mut reader: R, tx: &Sender<SpillEntry<K>>) {
    loop {
        let entry = match read_entry(&mut reader) {
            Ok(Some(entry)) => Ok(entry),
            Ok(None) => return,
            Err(e) => Err(e),
        };
        let failed = entry.is_err();
        // A closed channel means the merge no longer wants this file.
        if tx.send(entry).is_err() || failed {
            return;
        }
    }
}

fn read_entry<K: SpillKey, R: Read>(reader: &mut R) -> io::Result<Option<(K, Vec<u8>)>> {
    let Some(key) = K::read_from(reader)? else {
        return Ok(None);
    };
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let mut record = vec![0u8; u32::from_le_bytes(len_buf) as usize];
    reader.read_exact(&mut record)?;
    Ok(Some((key, record)))
}
