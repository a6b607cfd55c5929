//! The sender's sequential byte source.
//!
//! The sender must not assume a filesystem — a memory-backed source lets the
//! test suite drive the full protocol without a physical link (loopback
//! mode). `ByteSource` mirrors the `Chip`/`Board` trait-over-hardware shape
//! used elsewhere in this codebase: a small async trait with one real
//! implementation per backing store.

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::error::LinkError;

/// A sequential reader handing the sender up to `MAX_PAYLOAD_SIZE` bytes at a time.
#[async_trait]
pub trait ByteSource: Send {
    /// Reads up to `max` bytes. Returns fewer than `max` only at EOF; an
    /// empty result means EOF has been reached.
    async fn read_chunk(&mut self, max: usize) -> Result<Vec<u8>, LinkError>;
}

/// An in-memory source, used by loopback tests and anywhere the payload is
/// already resident (e.g. piped stdin captured ahead of time).
pub struct MemorySource {
    data: Vec<u8>,
    position: usize,
}

impl MemorySource {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, position: 0 }
    }
}

#[async_trait]
impl ByteSource for MemorySource {
    async fn read_chunk(&mut self, max: usize) -> Result<Vec<u8>, LinkError> {
        let end = (self.position + max).min(self.data.len());
        let chunk = self.data[self.position..end].to_vec();
        self.position = end;
        Ok(chunk)
    }
}

/// A file-backed source, used by the `send` CLI command.
pub struct FileSource {
    file: File,
}

impl FileSource {
    pub async fn open(path: impl AsRef<std::path::Path>) -> Result<Self, LinkError> {
        let file = File::open(path).await.map_err(LinkError::SourceRead)?;
        Ok(Self { file })
    }
}

#[async_trait]
impl ByteSource for FileSource {
    async fn read_chunk(&mut self, max: usize) -> Result<Vec<u8>, LinkError> {
        let mut buf = vec![0u8; max];
        let mut total = 0;
        while total < max {
            let n = self
                .file
                .read(&mut buf[total..])
                .await
                .map_err(LinkError::SourceRead)?;
            if n == 0 {
                break;
            }
            total += n;
        }
        buf.truncate(total);
        Ok(buf)
    }
}
