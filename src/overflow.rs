//! Byte sink that spills from memory to a temporary file.
//!
//! [`OverflowBuffer`] stages whole messages before slicing and accumulates
//! slices during reassembly. Small payloads stay in memory; once the
//! configured threshold would be exceeded, everything buffered so far plus
//! all later writes move to a temporary file. After writing finishes,
//! [`OverflowBuffer::to_stream_source`] closes the sink and exposes a
//! [`ByteSource`] that can be opened any number of times, each reader
//! starting at offset zero. That property is what lets the slicer restart a
//! transfer from the first slice without holding the payload in memory.

use std::{
    fs::File,
    io::{self, BufReader, BufWriter, Cursor, Read, Write},
    mem,
    path::{Path, PathBuf},
    sync::Arc,
};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tempfile::TempPath;
use tracing::{debug, warn};

use crate::error::StateError;

const DEFAULT_THRESHOLD: usize = 1024 * 1024;
const SPILL_PREFIX: &str = "message-slicing-";
const DEFAULT_LOG_CONTEXT: &str = "overflow";

/// Settings for [`OverflowBuffer`] instances.
///
/// # Examples
///
/// ```
/// use message_slicing::overflow::OverflowConfig;
///
/// let config = OverflowConfig::default().threshold(64);
/// let buffer = config.new_buffer();
/// assert!(buffer.is_empty());
/// assert!(!buffer.is_spilled());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverflowConfig {
    /// Bytes kept in memory before switching to a temporary file.
    ///
    /// Default: 1 MiB.
    pub threshold: usize,
    /// Directory for temporary files. `None` uses the system default.
    pub directory: Option<PathBuf>,
}

impl Default for OverflowConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            directory: None,
        }
    }
}

impl OverflowConfig {
    /// Set the in-memory threshold.
    #[must_use]
    pub fn threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold;
        self
    }

    /// Set the directory used for temporary files.
    #[must_use]
    pub fn directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = Some(directory.into());
        self
    }

    /// Create an empty buffer using these settings.
    #[must_use]
    pub fn new_buffer(&self) -> OverflowBuffer { OverflowBuffer::new(self.clone()) }

    /// Create an empty buffer whose log events carry `log_context`.
    pub(crate) fn buffer_for(&self, log_context: &Arc<str>) -> OverflowBuffer {
        let mut buffer = self.new_buffer();
        buffer.set_log_context(Arc::clone(log_context));
        buffer
    }
}

#[derive(Debug)]
enum Sink {
    Memory(Vec<u8>),
    File(BufWriter<File>),
    Closed,
}

/// Append-only byte sink with transparent spill to disk.
///
/// Mutation requires `&mut self`, so a single writer is enforced by the
/// borrow checker. Dropping the buffer deletes any backing file, so
/// [`cleanup`](Self::cleanup) is only needed to release it earlier.
#[derive(Debug)]
pub struct OverflowBuffer {
    config: OverflowConfig,
    len: u64,
    sink: Sink,
    spill: Option<TempPath>,
    source: Option<ByteSource>,
    log_context: Arc<str>,
}

impl OverflowBuffer {
    /// Create an empty buffer.
    #[must_use]
    pub fn new(config: OverflowConfig) -> Self {
        Self {
            config,
            len: 0,
            sink: Sink::Memory(Vec::new()),
            spill: None,
            source: None,
            log_context: Arc::from(DEFAULT_LOG_CONTEXT),
        }
    }

    /// Tag later log events with the owning slicer's or assembler's context.
    pub(crate) fn set_log_context(&mut self, log_context: Arc<str>) { self.log_context = log_context; }

    /// Total bytes written so far.
    #[must_use]
    pub const fn len(&self) -> u64 { self.len }

    /// Whether nothing has been written.
    #[must_use]
    pub const fn is_empty(&self) -> bool { self.len == 0 }

    /// Whether the contents moved to a temporary file.
    #[must_use]
    pub const fn is_spilled(&self) -> bool { self.spill.is_some() }

    /// Path of the backing temporary file, if any.
    #[must_use]
    pub fn spill_path(&self) -> Option<&Path> { self.spill.as_deref() }

    /// Close the sink and expose the contents for reading.
    ///
    /// Calling this again returns the same source. Further writes fail with
    /// [`StateError::WriteAfterClose`].
    ///
    /// # Errors
    ///
    /// Returns an I/O error if flushing the temporary file fails, or if the
    /// buffer was already cleaned up.
    pub fn to_stream_source(&mut self) -> io::Result<ByteSource> {
        if let Some(source) = &self.source {
            return Ok(source.clone());
        }

        let source = match mem::replace(&mut self.sink, Sink::Closed) {
            Sink::Memory(bytes) => ByteSource::from(Bytes::from(bytes)),
            Sink::File(mut writer) => {
                writer.flush()?;
                drop(writer);
                let path = self
                    .spill
                    .as_deref()
                    .ok_or_else(|| io::Error::other(StateError::Closed))?;
                ByteSource::file(Arc::from(path), self.len)
            }
            Sink::Closed => return Err(io::Error::other(StateError::Closed)),
        };
        self.source = Some(source.clone());
        Ok(source)
    }

    /// Close the sink and delete any backing file.
    ///
    /// Sources obtained earlier from a spilled buffer fail to open afterwards.
    pub fn cleanup(&mut self) {
        self.sink = Sink::Closed;
        self.source = None;
        if let Some(path) = self.spill.take() {
            let shown = path.display().to_string();
            match path.close() {
                Ok(()) => debug!(
                    log_context = %self.log_context,
                    path = %shown,
                    "deleted overflow file"
                ),
                Err(error) => warn!(
                    log_context = %self.log_context,
                    path = %shown,
                    %error,
                    "failed to delete overflow file"
                ),
            }
        }
    }

    fn spill_to_file(&mut self, memory: &[u8]) -> io::Result<BufWriter<File>> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(SPILL_PREFIX);
        let named = match &self.config.directory {
            Some(directory) => builder.tempfile_in(directory)?,
            None => builder.tempfile()?,
        };
        let (file, path) = named.into_parts();
        let mut writer = BufWriter::new(file);
        writer.write_all(memory)?;
        debug!(
            log_context = %self.log_context,
            path = %path.display(),
            buffered = memory.len(),
            threshold = self.config.threshold,
            "overflow buffer spilled to disk"
        );
        self.spill = Some(path);
        Ok(writer)
    }
}

impl Write for OverflowBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return match self.sink {
                Sink::Closed => Err(io::Error::other(StateError::WriteAfterClose)),
                _ => Ok(0),
            };
        }

        if let Sink::Memory(memory) = &mut self.sink {
            if memory.len().saturating_add(buf.len()) > self.config.threshold {
                let memory = mem::take(memory);
                match self.spill_to_file(&memory) {
                    Ok(writer) => self.sink = Sink::File(writer),
                    Err(error) => {
                        self.sink = Sink::Memory(memory);
                        return Err(error);
                    }
                }
            }
        }

        let written = match &mut self.sink {
            Sink::Memory(memory) => {
                memory.extend_from_slice(buf);
                buf.len()
            }
            Sink::File(writer) => writer.write(buf)?,
            Sink::Closed => return Err(io::Error::other(StateError::WriteAfterClose)),
        };
        self.len += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.sink {
            Sink::File(writer) => writer.flush(),
            Sink::Memory(_) | Sink::Closed => Ok(()),
        }
    }
}

#[derive(Clone, Debug)]
enum Backing {
    Memory(Bytes),
    File(Arc<Path>),
}

/// Read-only, re-openable view of an [`OverflowBuffer`]'s contents.
///
/// Clones are cheap and share the same backing storage.
#[derive(Clone, Debug)]
pub struct ByteSource {
    backing: Backing,
    len: u64,
}

impl ByteSource {
    fn file(path: Arc<Path>, len: u64) -> Self {
        Self {
            backing: Backing::File(path),
            len,
        }
    }

    /// Number of bytes available.
    #[must_use]
    pub const fn len(&self) -> u64 { self.len }

    /// Whether the source holds no bytes.
    #[must_use]
    pub const fn is_empty(&self) -> bool { self.len == 0 }

    /// Open an independent reader positioned at the start.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the backing file cannot be opened, for
    /// example after the owning buffer was cleaned up.
    pub fn open(&self) -> io::Result<SourceReader> {
        let inner = match &self.backing {
            Backing::Memory(bytes) => ReaderInner::Memory(Cursor::new(bytes.clone())),
            Backing::File(path) => ReaderInner::File(BufReader::new(File::open(path)?)),
        };
        Ok(SourceReader { inner })
    }

    /// Read the whole source into memory.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if opening or reading fails.
    pub fn read_all(&self) -> io::Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(usize::try_from(self.len).unwrap_or(0));
        self.open()?.read_to_end(&mut bytes)?;
        Ok(bytes)
    }
}

impl From<Bytes> for ByteSource {
    fn from(bytes: Bytes) -> Self {
        Self {
            len: bytes.len() as u64,
            backing: Backing::Memory(bytes),
        }
    }
}

#[derive(Debug)]
enum ReaderInner {
    Memory(Cursor<Bytes>),
    File(BufReader<File>),
}

/// Reader returned by [`ByteSource::open`].
#[derive(Debug)]
pub struct SourceReader {
    inner: ReaderInner,
}

impl Read for SourceReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.inner {
            ReaderInner::Memory(cursor) => cursor.read(buf),
            ReaderInner::File(reader) => reader.read(buf),
        }
    }
}

#[cfg(test)]
#[path = "overflow_tests.rs"]
mod tests;
