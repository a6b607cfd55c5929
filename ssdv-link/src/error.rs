//! Error taxonomy for the link.
//!
//! `FrameCorrupt` is deliberately absent: a corrupt frame never reaches a
//! caller. It is an internal branch of the deframer (see `frame::DecodeOutcome`)
//! and a statistics counter, never a propagated error.

use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, LinkError>;

/// Errors that can terminate a sender or receiver session.
#[derive(Debug, Error)]
pub enum LinkError {
    /// The serial port could not be opened, written to, or read from.
    #[error("serial link error: {0}")]
    Io(#[from] std::io::Error),

    /// An inactivity or acknowledgement wait exceeded its deadline.
    #[error("timed out after waiting {waited:?}")]
    Timeout { waited: Duration },

    /// A source or caller asked to frame a payload larger than `MAX_PAYLOAD_SIZE`.
    #[error("payload of {len} bytes exceeds the {max} byte frame limit")]
    FrameTooLarge { len: usize, max: usize },

    /// The sender's input source failed.
    #[error("failed to read input source: {0}")]
    SourceRead(std::io::Error),

    /// The receiver's output sink failed.
    #[error("failed to write output sink: {0}")]
    SinkWrite(std::io::Error),

    /// A sender batch exhausted its retries without a verdict.
    #[error("batch [{batch_start}, {batch_end}] failed after {retries} retries")]
    BatchFailed {
        batch_start: u8,
        batch_end: u8,
        retries: u32,
    },

    /// An external helper (`ssdv`, `identify`, `convert`) failed to spawn or exited nonzero.
    #[error("command `{command}` failed: {detail}")]
    ExternalTool { command: String, detail: String },
}
