//! Byte-level audio sources and the loader that opens them.
//!
//! Decoders consume a [`SourceStream`]: random-access, immutable bytes with
//! a name for diagnostics. Two implementations are provided, one backed by
//! a file read into memory and one wrapping a caller-supplied byte buffer.
//! [`StreamAdapter`] bridges a stream into symphonia's `MediaSource` so the
//! probe/decode machinery can run on top of it.

use crate::error::{Error, Result};
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;
use symphonia::core::io::MediaSource;
use tracing::debug;

/// Random-access byte source shared between the audio thread and decoder
/// open tasks running on the worker pool.
pub trait SourceStream: Send + Sync {
    /// Copy up to `buf.len()` bytes starting at `offset` into `buf`.
    /// Returns the number of bytes copied (short only at end of stream).
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> usize;

    /// Total size of the stream in bytes.
    fn size(&self) -> u64;

    /// Human-readable identity for logs.
    fn name(&self) -> &str;
}

/// Stream over bytes held in memory.
pub struct MemoryStream {
    name: String,
    bytes: Arc<[u8]>,
}

impl MemoryStream {
    pub fn new(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

impl SourceStream for MemoryStream {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> usize {
        let offset = (offset as usize).min(self.bytes.len());
        let available = &self.bytes[offset..];
        let count = buf.len().min(available.len());
        buf[..count].copy_from_slice(&available[..count]);
        count
    }

    fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Stream over a file's contents.
///
/// The file is read once at open; subsequent access is pure memory reads,
/// which keeps the decode path free of filesystem stalls.
pub struct FileStream {
    inner: MemoryStream,
}

impl FileStream {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|_| Error::FileOpen {
            path: path.display().to_string(),
        })?;
        debug!("Opened audio file stream. [file='{}', bytes={}]", path.display(), bytes.len());
        Ok(Self {
            inner: MemoryStream::new(path.display().to_string(), bytes),
        })
    }
}

impl SourceStream for FileStream {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> usize {
        self.inner.read_at(offset, buf)
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

/// Resolves the URIs used by graph descriptions into byte streams.
pub trait Loader: Send + Sync {
    fn open_audio_stream(&self, uri: &str) -> Result<Arc<dyn SourceStream>>;
}

/// Loader resolving URIs directly against the filesystem.
#[derive(Debug, Default, Clone)]
pub struct FileLoader;

impl Loader for FileLoader {
    fn open_audio_stream(&self, uri: &str) -> Result<Arc<dyn SourceStream>> {
        Ok(Arc::new(FileStream::open(uri)?))
    }
}

/// `Read + Seek` cursor over a [`SourceStream`] for symphonia.
pub struct StreamAdapter {
    stream: Arc<dyn SourceStream>,
    position: u64,
}

impl StreamAdapter {
    pub fn new(stream: Arc<dyn SourceStream>) -> Self {
        Self { stream, position: 0 }
    }
}

impl Read for StreamAdapter {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let count = self.stream.read_at(self.position, buf);
        self.position += count as u64;
        Ok(count)
    }
}

impl Seek for StreamAdapter {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let size = self.stream.size() as i64;
        let target = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::End(offset) => size + offset,
            SeekFrom::Current(offset) => self.position as i64 + offset,
        };
        if target < 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "seek before start of stream",
            ));
        }
        self.position = target as u64;
        Ok(self.position)
    }
}

impl MediaSource for StreamAdapter {
    fn is_seekable(&self) -> bool {
        true
    }

    fn byte_len(&self) -> Option<u64> {
        Some(self.stream.size())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_stream_read_at() {
        let stream = MemoryStream::new("test", vec![1u8, 2, 3, 4, 5]);
        let mut buf = [0u8; 3];
        assert_eq!(stream.read_at(0, &mut buf), 3);
        assert_eq!(buf, [1, 2, 3]);
        assert_eq!(stream.read_at(3, &mut buf), 2);
        assert_eq!(&buf[..2], &[4, 5]);
        assert_eq!(stream.read_at(10, &mut buf), 0);
        assert_eq!(stream.size(), 5);
    }

    #[test]
    fn test_adapter_read_seek() {
        let stream: Arc<dyn SourceStream> =
            Arc::new(MemoryStream::new("test", (0u8..32).collect::<Vec<u8>>()));
        let mut adapter = StreamAdapter::new(stream);

        let mut buf = [0u8; 4];
        adapter.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [0, 1, 2, 3]);

        adapter.seek(SeekFrom::Start(30)).unwrap();
        assert_eq!(adapter.read(&mut buf).unwrap(), 2);

        adapter.seek(SeekFrom::End(-2)).unwrap();
        assert_eq!(adapter.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], &[30, 31]);

        assert!(adapter.seek(SeekFrom::Current(-1000)).is_err());
        assert_eq!(adapter.byte_len(), Some(32));
        assert!(adapter.is_seekable());
    }

    #[test]
    fn test_file_loader_missing_file() {
        let loader = FileLoader;
        let result = loader.open_audio_stream("/no/such/file.ogg");
        assert!(matches!(result, Err(Error::FileOpen { .. })));
    }
}
