//! Point-to-point file transfer over a low-speed, possibly lossy serial link.
//!
//! The core of this crate is the framed, windowed, CRC-protected,
//! batch-acknowledged stop-and-go transport in [`sender`] and [`receiver`].
//! Everything else (the serial adapter, the wire codec, source/sink
//! abstractions, statistics) exists to support that transport.

pub mod config;
pub mod control;
pub mod crc;
pub mod error;
pub mod external;
pub mod frame;
pub mod link;
pub mod receiver;
pub mod sender;
pub mod sink;
pub mod source;
pub mod stats;
pub mod tracing;

pub use error::{LinkError, Result};
