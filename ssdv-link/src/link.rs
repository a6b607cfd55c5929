//! Opens the physical serial port: 8 data bits, no parity, 1 stop bit, no
//! flow control by default, 1 second read/write timeout.
//!
//! Sender and receiver loops are generic over anything that is
//! `AsyncRead + AsyncWrite + Unpin + Send` (see [`crate::sender`] and
//! [`crate::receiver`]) so tests can swap in a `tokio::io::duplex` half or a
//! PTY pair instead of real hardware; this module only supplies the
//! hardware-backed implementation, mirroring `scheduler.rs`'s
//! `tokio_serial::new(..).open_native_async()` call.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{ClearBuffer, DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};

use crate::error::LinkError;

const READ_TIMEOUT: Duration = Duration::from_secs(1);
const WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// A hardware serial connection configured per spec: 8N1, no flow control.
pub struct SerialLink {
    port: SerialStream,
}

impl SerialLink {
    pub fn open(path: &str, baud: u32) -> Result<Self, LinkError> {
        let port = tokio_serial::new(path, baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(READ_TIMEOUT)
            .open_native_async()
            .map_err(|e| LinkError::Io(e.into()))?;
        Ok(Self { port })
    }

    /// Unwraps the underlying stream so a role loop can wrap it in
    /// `tokio_util::codec::Framed` (data direction) or drive it with the
    /// control codec directly (reverse direction).
    pub fn into_inner(self) -> SerialStream {
        self.port
    }

    /// Reads whatever is immediately available, without blocking for more.
    pub async fn read_available(&mut self, max: usize) -> Result<Vec<u8>, LinkError> {
        let mut buf = vec![0u8; max];
        match tokio::time::timeout(READ_TIMEOUT, self.port.read(&mut buf)).await {
            Ok(Ok(n)) => {
                buf.truncate(n);
                Ok(buf)
            }
            Ok(Err(e)) => Err(LinkError::Io(e)),
            Err(_) => Ok(Vec::new()),
        }
    }

    /// Reads exactly `n` bytes, or times out after `deadline`.
    pub async fn read_exact(&mut self, n: usize, deadline: Duration) -> Result<Vec<u8>, LinkError> {
        let mut buf = vec![0u8; n];
        match tokio::time::timeout(deadline, self.port.read_exact(&mut buf)).await {
            Ok(Ok(_)) => Ok(buf),
            Ok(Err(e)) => Err(LinkError::Io(e)),
            Err(_) => Err(LinkError::Timeout { waited: deadline }),
        }
    }

    pub async fn write_all(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        tokio::time::timeout(WRITE_TIMEOUT, self.port.write_all(bytes))
            .await
            .map_err(|_| LinkError::Timeout { waited: WRITE_TIMEOUT })??;
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<(), LinkError> {
        self.port.flush().await?;
        Ok(())
    }

    /// Discards any buffered-but-unread input and unsent output.
    pub fn reset_buffers(&mut self) -> Result<(), LinkError> {
        tokio_serial::SerialPort::clear(&mut self.port, ClearBuffer::All)
            .map_err(|e| LinkError::Io(e.into()))?;
        Ok(())
    }
}
