//! Telemetry counters. No effect on protocol correctness — this module only
//! observes the role loops and reports what they did.
//!
//! Progress/rate reporting (bytes transferred, elapsed time, instantaneous
//! rate, ETA) mirrors the periodic status line the original Python sender
//! and receiver print; here it's an `info!` event instead of bespoke
//! printing, following the crate's tracing conventions.

use std::time::{Duration, Instant};

use crate::tracing::prelude::*;

/// Accumulates counters for one sender or receiver session.
#[derive(Debug)]
pub struct Statistics {
    started_at: Instant,
    bytes_transferred: u64,
    packets_sent: u64,
    packets_received: u64,
    duplicates: u64,
    corrupt_frames: u64,
    retries: u64,
    batches_acked: u64,
    batches_naked: u64,
    dropped_bytes: u64,
}

impl Default for Statistics {
    fn default() -> Self {
        Self {
            started_at: Instant::now(),
            bytes_transferred: 0,
            packets_sent: 0,
            packets_received: 0,
            duplicates: 0,
            corrupt_frames: 0,
            retries: 0,
            batches_acked: 0,
            batches_naked: 0,
            dropped_bytes: 0,
        }
    }
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_packet_sent(&mut self, payload_len: usize) {
        self.packets_sent += 1;
        self.bytes_transferred += payload_len as u64;
    }

    pub fn record_packet_received(&mut self, payload_len: usize) {
        self.packets_received += 1;
        self.bytes_transferred += payload_len as u64;
    }

    pub fn record_duplicate(&mut self) {
        self.duplicates += 1;
    }

    /// Reflects a frame the deframer rejected for bad length or CRC, grounded
    /// in the original's `corruption_count`/`max_corruption` ring-buffer bookkeeping.
    pub fn record_corrupt_frame(&mut self) {
        self.corrupt_frames += 1;
    }

    pub fn record_dropped_bytes(&mut self, n: u64) {
        self.dropped_bytes += n;
    }

    pub fn record_retry(&mut self) {
        self.retries += 1;
    }

    pub fn record_batch_acked(&mut self) {
        self.batches_acked += 1;
    }

    pub fn record_batch_naked(&mut self) {
        self.batches_naked += 1;
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred
    }

    pub fn duplicates(&self) -> u64 {
        self.duplicates
    }

    pub fn corrupt_frames(&self) -> u64 {
        self.corrupt_frames
    }

    pub fn retries(&self) -> u64 {
        self.retries
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Instantaneous average throughput in bytes/second since the session started.
    pub fn rate_bytes_per_sec(&self) -> f64 {
        let secs = self.elapsed().as_secs_f64();
        if secs <= 0.0 {
            0.0
        } else {
            self.bytes_transferred as f64 / secs
        }
    }

    /// Logs a single progress line; called by the role loop at each batch boundary.
    pub fn log_progress(&self) {
        info!(
            bytes = self.bytes_transferred,
            elapsed_secs = self.elapsed().as_secs_f64(),
            rate_bytes_per_sec = self.rate_bytes_per_sec(),
            duplicates = self.duplicates,
            corrupt_frames = self.corrupt_frames,
            retries = self.retries,
            "transfer progress"
        );
    }

    /// Logs the final session summary.
    pub fn log_summary(&self) {
        info!(
            bytes = self.bytes_transferred,
            elapsed_secs = self.elapsed().as_secs_f64(),
            batches_acked = self.batches_acked,
            batches_naked = self.batches_naked,
            duplicates = self.duplicates,
            corrupt_frames = self.corrupt_frames,
            retries = self.retries,
            dropped_bytes = self.dropped_bytes,
            "transfer complete"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_counter_increments_by_one_per_replay() {
        let mut stats = Statistics::new();
        stats.record_duplicate();
        assert_eq!(stats.duplicates(), 1);
        stats.record_duplicate();
        assert_eq!(stats.duplicates(), 2);
    }

    #[test]
    fn bytes_transferred_accumulates() {
        let mut stats = Statistics::new();
        stats.record_packet_sent(255);
        stats.record_packet_sent(100);
        assert_eq!(stats.bytes_transferred(), 355);
    }
}
