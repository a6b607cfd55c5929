//! The receiver's random-access, positional writer.
//!
//! `write_at(seq, payload)` places bytes at byte offset `seq * MAX_PAYLOAD_SIZE`
//! — safe only because every payload but possibly the last is exactly
//! `MAX_PAYLOAD_SIZE` bytes, an invariant the sender's chunker guarantees.
//! `finalize` fills any unseen sequence in `[min_seq, max_seq]` with zeros and
//! truncates trailing zero padding from the very end of the file. This is a
//! documented-lossy heuristic (see the final-truncation open question): a
//! payload whose own last real byte is `0x00` will be clipped along with it.

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWriteExt, SeekFrom};

use crate::config::MAX_PAYLOAD_SIZE;
use crate::error::LinkError;

/// A random-access sink keyed by sequence number.
#[async_trait]
pub trait PositionalSink: Send {
    /// Writes `payload` at byte offset `seq as u64 * MAX_PAYLOAD_SIZE`.
    async fn write_at(&mut self, seq: u8, payload: &[u8]) -> Result<(), LinkError>;

    /// Fills any sequence in `[min_seq, max_seq]` not already written with
    /// `MAX_PAYLOAD_SIZE` zero bytes, then truncates trailing zero padding
    /// from the end of the file.
    async fn finalize(&mut self, min_seq: u8, max_seq: u8) -> Result<(), LinkError>;
}

fn offset(seq: u8) -> u64 {
    seq as u64 * MAX_PAYLOAD_SIZE as u64
}

/// An in-memory sink, used by loopback tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    buffer: Vec<u8>,
    written: std::collections::HashSet<u8>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buffer
    }

    fn ensure_len(&mut self, len: usize) {
        if self.buffer.len() < len {
            self.buffer.resize(len, 0);
        }
    }
}

#[async_trait]
impl PositionalSink for MemorySink {
    async fn write_at(&mut self, seq: u8, payload: &[u8]) -> Result<(), LinkError> {
        let start = offset(seq) as usize;
        self.ensure_len(start + payload.len());
        self.buffer[start..start + payload.len()].copy_from_slice(payload);
        self.written.insert(seq);
        Ok(())
    }

    async fn finalize(&mut self, min_seq: u8, max_seq: u8) -> Result<(), LinkError> {
        let mut missing = Vec::new();
        fill_missing(min_seq, max_seq, &self.written, |seq| missing.push(seq));
        for seq in missing {
            let start = offset(seq) as usize;
            self.ensure_len(start + MAX_PAYLOAD_SIZE);
        }
        truncate_trailing_zeros(&mut self.buffer);
        Ok(())
    }
}

/// Walks `[min_seq, max_seq]` (mod 256, so wrapped batches are handled) and
/// invokes `fill` for every sequence absent from `written`.
fn fill_missing(min_seq: u8, max_seq: u8, written: &std::collections::HashSet<u8>, mut fill: impl FnMut(u8)) {
    let mut seq = min_seq;
    loop {
        if !written.contains(&seq) {
            fill(seq);
        }
        if seq == max_seq {
            break;
        }
        seq = seq.wrapping_add(1);
    }
}

fn truncate_trailing_zeros(buffer: &mut Vec<u8>) {
    let last_nonzero = buffer.iter().rposition(|&b| b != 0);
    match last_nonzero {
        Some(idx) => buffer.truncate(idx + 1),
        None => buffer.clear(),
    }
}

/// A file-backed sink, used by the `recv` CLI command.
pub struct FileSink {
    file: File,
    written: std::collections::HashSet<u8>,
}

impl FileSink {
    pub async fn create(path: impl AsRef<std::path::Path>) -> Result<Self, LinkError> {
        let file = File::create(path).await.map_err(LinkError::SinkWrite)?;
        Ok(Self {
            file,
            written: std::collections::HashSet::new(),
        })
    }
}

#[async_trait]
impl PositionalSink for FileSink {
    async fn write_at(&mut self, seq: u8, payload: &[u8]) -> Result<(), LinkError> {
        self.file
            .seek(SeekFrom::Start(offset(seq)))
            .await
            .map_err(LinkError::SinkWrite)?;
        self.file
            .write_all(payload)
            .await
            .map_err(LinkError::SinkWrite)?;
        self.written.insert(seq);
        Ok(())
    }

    async fn finalize(&mut self, min_seq: u8, max_seq: u8) -> Result<(), LinkError> {
        let zeros = vec![0u8; MAX_PAYLOAD_SIZE];
        let written = self.written.clone();
        fill_missing_async(min_seq, max_seq, &written, &mut self.file, &zeros).await?;

        self.file.flush().await.map_err(LinkError::SinkWrite)?;
        let len = self.file.metadata().await.map_err(LinkError::SinkWrite)?.len();
        let new_len = trailing_zero_cutoff(&mut self.file, len).await?;
        self.file
            .set_len(new_len)
            .await
            .map_err(LinkError::SinkWrite)?;
        Ok(())
    }
}

async fn fill_missing_async(
    min_seq: u8,
    max_seq: u8,
    written: &std::collections::HashSet<u8>,
    file: &mut File,
    zeros: &[u8],
) -> Result<(), LinkError> {
    let mut seq = min_seq;
    loop {
        if !written.contains(&seq) {
            file.seek(SeekFrom::Start(offset(seq)))
                .await
                .map_err(LinkError::SinkWrite)?;
            file.write_all(zeros).await.map_err(LinkError::SinkWrite)?;
        }
        if seq == max_seq {
            break;
        }
        seq = seq.wrapping_add(1);
    }
    Ok(())
}

/// Scans backward from the end of the file for the last non-zero byte and
/// returns the length the file should be truncated to.
async fn trailing_zero_cutoff(file: &mut File, len: u64) -> Result<u64, LinkError> {
    use tokio::io::AsyncReadExt;

    const CHUNK: u64 = 4096;
    let mut pos = len;
    while pos > 0 {
        let read_len = CHUNK.min(pos);
        let start = pos - read_len;
        file.seek(SeekFrom::Start(start))
            .await
            .map_err(LinkError::SinkWrite)?;
        let mut buf = vec![0u8; read_len as usize];
        file.read_exact(&mut buf).await.map_err(LinkError::SinkWrite)?;
        if let Some(idx) = buf.iter().rposition(|&b| b != 0) {
            return Ok(start + idx as u64 + 1);
        }
        pos = start;
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_at_positional_offsets() {
        let mut sink = MemorySink::new();
        sink.write_at(0, &[0u8; 255]).await.unwrap();
        sink.write_at(1, &[1u8; 255]).await.unwrap();
        sink.write_at(2, b"hello").await.unwrap();
        sink.finalize(0, 2).await.unwrap();

        let bytes = sink.bytes();
        assert_eq!(bytes.len(), 255 + 255 + 5);
        assert!(bytes[..255].iter().all(|&b| b == 0));
        assert!(bytes[255..510].iter().all(|&b| b == 1));
        assert_eq!(&bytes[510..], b"hello");
    }

    #[tokio::test]
    async fn missing_packets_are_zero_filled() {
        let mut sink = MemorySink::new();
        sink.write_at(0, &[7u8; 255]).await.unwrap();
        sink.write_at(2, &[9u8; 255]).await.unwrap();
        sink.finalize(0, 2).await.unwrap();

        let bytes = sink.bytes();
        assert!(bytes[255..510].iter().all(|&b| b == 0));
    }

    #[tokio::test]
    async fn trailing_zero_padding_is_truncated() {
        let mut sink = MemorySink::new();
        sink.write_at(0, b"hi").await.unwrap();
        sink.finalize(0, 0).await.unwrap();

        assert_eq!(sink.bytes(), b"hi");
    }

    #[tokio::test]
    async fn empty_transfer_truncates_to_nothing() {
        let mut sink = MemorySink::new();
        sink.finalize(0, 0).await.unwrap();
        assert!(sink.bytes().is_empty());
    }
}
