//! Protocol constants and the overridable subset of them.
//!
//! These are protocol invariants, not deployment knobs, so most of them are
//! plain `const`s next to the code that interprets them (see spec table in
//! §6.3 of the design doc). [`LinkConfig`] bundles the handful that a test
//! harness or the CLI legitimately wants to vary: port path, baud rate, and
//! (for loopback tests) batch/payload sizes.

use std::time::Duration;

/// Maximum payload carried by a single data frame.
pub const MAX_PAYLOAD_SIZE: usize = 255;

/// Packets acknowledged as one unit.
pub const BATCH_SIZE: usize = 100;

/// Sender's wait for a batch verdict before retransmitting.
pub const ACK_TIMEOUT: Duration = Duration::from_secs(25);

/// Receiver's inactivity timeout; no bytes for this long finalises the session.
pub const RECEIVE_TIMEOUT: Duration = Duration::from_secs(30);

/// Receiver's wait for the first sync marker before aborting.
pub const SYNC_TIMEOUT: Duration = Duration::from_secs(10);

/// Sender's pacing delay between packets.
pub const INTER_PACKET_DELAY: Duration = Duration::from_millis(100);

/// Sender's retransmission attempts per batch before giving up.
pub const MAX_RETRIES: u32 = 5;

/// Recommended cap on the deframer's rolling resync buffer.
pub const MAX_DEFRAME_BUFFER: usize = 2048;

/// Default baud rate when none is given on the command line.
pub const DEFAULT_BAUD: u32 = 9600;

/// Runtime-configurable knobs layered over the protocol constants above.
///
/// Populated by the CLI from arguments; test harnesses construct one
/// directly to exercise smaller batches/payloads without waiting out the
/// full-size timeouts.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub port: String,
    pub baud: u32,
    pub max_payload_size: usize,
    pub batch_size: usize,
    pub ack_timeout: Duration,
    pub receive_timeout: Duration,
    pub sync_timeout: Duration,
    pub inter_packet_delay: Duration,
    pub max_retries: u32,
}

impl LinkConfig {
    /// A config using every protocol default except the port path.
    pub fn for_port(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud: DEFAULT_BAUD,
            max_payload_size: MAX_PAYLOAD_SIZE,
            batch_size: BATCH_SIZE,
            ack_timeout: ACK_TIMEOUT,
            receive_timeout: RECEIVE_TIMEOUT,
            sync_timeout: SYNC_TIMEOUT,
            inter_packet_delay: INTER_PACKET_DELAY,
            max_retries: MAX_RETRIES,
        }
    }

    pub fn with_baud(mut self, baud: u32) -> Self {
        self.baud = baud;
        self
    }
}
