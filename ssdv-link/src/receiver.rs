//! The receiver side of the sequence/batch controller.
//!
//! # State Machine
//!
//! ```text
//!   Start
//!     │
//!     ▼
//! WaitingSync ──sync_start seen──► Receiving ──EOT or idle──► Finalising ──► Done
//!     │                                                                       ▲
//!     └────────────────────────── SYNC_TIMEOUT elapsed ──────────────────► Aborted
//! ```
//!
//! `Receiving` drives the deframer frame by frame: duplicates are dropped,
//! new payloads are written positionally, and a batch verdict (`ACK`/`NAK`)
//! is emitted exactly once per closing batch window, never re-emitted until
//! that window closes again.

use std::collections::HashSet;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::config::LinkConfig;
use crate::control::{ControlCodec, ControlMessage};
use crate::error::LinkError;
use crate::frame::{FrameCodec, Packet};
use crate::sink::PositionalSink;
use crate::stats::Statistics;
use crate::tracing::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    WaitingSync,
    Receiving,
    Finalising,
    Done,
    Aborted,
}

/// Tracks the currently-open batch: its starting sequence and which of its
/// `[start, start + batch_size - 1]` members (mod 256) have arrived.
struct BatchWindow {
    start: u8,
    members: HashSet<u8>,
}

impl BatchWindow {
    fn new(start: u8) -> Self {
        Self {
            start,
            members: HashSet::new(),
        }
    }
}

/// Runs the receiver role over `io`, writing payloads into `sink`.
///
/// Returns `Ok(true)` for a session that reached `Done` (EOT observed or a
/// clean idle finalisation with at least one frame received) and `Ok(false)`
/// for `Aborted` (no sync within `SYNC_TIMEOUT`). I/O or sink errors
/// propagate as `Err`.
pub async fn receive_stream<IO>(
    io: IO,
    mut sink: impl PositionalSink,
    config: &LinkConfig,
    stats: &mut Statistics,
) -> Result<bool, LinkError>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send,
{
    let (read_half, write_half) = tokio::io::split(io);
    let mut frames = FramedRead::new(read_half, FrameCodec::new());
    let mut control = FramedWrite::new(write_half, ControlCodec::new());

    let mut state = SessionState::WaitingSync;
    let mut received_seqs: HashSet<u8> = HashSet::new();
    let mut batch = BatchWindow::new(0);
    let mut min_seq: Option<u8> = None;
    let mut max_seq: Option<u8> = None;
    let mut expected_next: u8 = 0;

    info!("waiting for sync");
    let first = match tokio::time::timeout(config.sync_timeout, frames.next()).await {
        Ok(Some(Ok(packet))) => packet,
        Ok(Some(Err(e))) => return Err(e),
        Ok(None) => {
            state = SessionState::Aborted;
            warn!("link closed before sync");
            merge_deframer_counters(frames.decoder(), stats);
            return finish(state, &mut sink, min_seq, max_seq, stats).await;
        }
        Err(_) => {
            state = SessionState::Aborted;
            warn!(sync_timeout = ?config.sync_timeout, "no sync within timeout");
            merge_deframer_counters(frames.decoder(), stats);
            return finish(state, &mut sink, min_seq, max_seq, stats).await;
        }
    };
    state = SessionState::Receiving;
    info!("sync acquired");

    let mut done = handle_frame(
        first,
        &mut control,
        &mut sink,
        &mut received_seqs,
        &mut batch,
        &mut min_seq,
        &mut max_seq,
        &mut expected_next,
        config,
        stats,
    )
    .await?;

    while !done {
        match tokio::time::timeout(config.receive_timeout, frames.next()).await {
            Ok(Some(Ok(packet))) => {
                done = handle_frame(
                    packet,
                    &mut control,
                    &mut sink,
                    &mut received_seqs,
                    &mut batch,
                    &mut min_seq,
                    &mut max_seq,
                    &mut expected_next,
                    config,
                    stats,
                )
                .await?;
            }
            Ok(Some(Err(e))) => return Err(e),
            Ok(None) => break,
            Err(_) => {
                warn!(receive_timeout = ?config.receive_timeout, "inactivity timeout");
                break;
            }
        }
    }

    state = SessionState::Finalising;
    if !batch.members.is_empty() {
        if let Some(max) = max_seq {
            emit_verdict(&mut control, batch.start, max, &batch.members, stats).await?;
        }
    }
    state = SessionState::Done;

    merge_deframer_counters(frames.decoder(), stats);
    finish(state, &mut sink, min_seq, max_seq, stats).await
}

/// Folds the deframer's running corruption/drop counters into the session
/// statistics, so a lossy link is reflected in the final summary instead of
/// always reading `corrupt_frames=0, dropped_bytes=0`.
fn merge_deframer_counters(codec: &FrameCodec, stats: &mut Statistics) {
    for _ in 0..codec.corrupt_count() {
        stats.record_corrupt_frame();
    }
    stats.record_dropped_bytes(codec.dropped_bytes());
}

async fn finish(
    state: SessionState,
    sink: &mut impl PositionalSink,
    min_seq: Option<u8>,
    max_seq: Option<u8>,
    stats: &mut Statistics,
) -> Result<bool, LinkError> {
    match state {
        SessionState::Aborted => {
            stats.log_summary();
            Ok(false)
        }
        _ => {
            if let (Some(min), Some(max)) = (min_seq, max_seq) {
                sink.finalize(min, max).await?;
            }
            stats.log_summary();
            Ok(true)
        }
    }
}

/// Processes one accepted frame. Returns `true` once EOT has been handled
/// and the session should move to `Finalising`.
#[allow(clippy::too_many_arguments)]
async fn handle_frame<W>(
    packet: Packet,
    control: &mut FramedWrite<W, ControlCodec>,
    sink: &mut impl PositionalSink,
    received_seqs: &mut HashSet<u8>,
    batch: &mut BatchWindow,
    min_seq: &mut Option<u8>,
    max_seq: &mut Option<u8>,
    expected_next: &mut u8,
    config: &LinkConfig,
    stats: &mut Statistics,
) -> Result<bool, LinkError>
where
    W: AsyncWrite + Unpin,
{
    if packet.is_eot() {
        info!("eot received");
        return Ok(true);
    }

    let seq = packet.seq;

    if received_seqs.contains(&seq) {
        stats.record_duplicate();
        debug!(seq, "duplicate frame dropped");
        return Ok(false);
    }

    if seq != *expected_next {
        warn!(seq, expected = *expected_next, "sequence warning");
    }
    *expected_next = seq.wrapping_add(1);

    sink.write_at(seq, &packet.payload).await?;
    stats.record_packet_received(packet.payload.len());
    received_seqs.insert(seq);

    // Tracks arrival order, not numeric order, so a wrapped session (seq
    // 250 ... 255, 0 ... 10) still yields a correct `[first, last]` span
    // for the sink's wraparound-aware fill/truncate pass.
    if min_seq.is_none() {
        *min_seq = Some(seq);
    }
    *max_seq = Some(seq);

    // A seq past the current window's nominal span closes it (possibly
    // several windows at once, for a long gap) before this seq is recorded.
    while (seq.wrapping_sub(batch.start) as usize) >= config.batch_size {
        let nominal_end = nominal_batch_end(batch.start, config.batch_size);
        emit_verdict(control, batch.start, nominal_end, &batch.members, stats).await?;
        *batch = BatchWindow::new(nominal_end.wrapping_add(1));
    }

    batch.members.insert(seq);

    if batch.members.len() == config.batch_size {
        let nominal_end = nominal_batch_end(batch.start, config.batch_size);
        emit_verdict(control, batch.start, nominal_end, &batch.members, stats).await?;
        *batch = BatchWindow::new(nominal_end.wrapping_add(1));
    }

    Ok(false)
}

fn nominal_batch_end(start: u8, batch_size: usize) -> u8 {
    start.wrapping_add((batch_size - 1) as u8)
}

async fn emit_verdict<W>(
    control: &mut FramedWrite<W, ControlCodec>,
    batch_start: u8,
    batch_end: u8,
    members: &HashSet<u8>,
    stats: &mut Statistics,
) -> Result<(), LinkError>
where
    W: AsyncWrite + Unpin,
{
    let mut missing = Vec::new();
    let mut seq = batch_start;
    loop {
        if !members.contains(&seq) {
            missing.push(seq);
        }
        if seq == batch_end {
            break;
        }
        seq = seq.wrapping_add(1);
    }

    if missing.is_empty() {
        info!(batch_start, batch_end, "batch complete, sending ack");
        stats.record_batch_acked();
        control.send(ControlMessage::ack(batch_start, batch_end)).await?;
    } else {
        warn!(batch_start, batch_end, missing = ?missing, "batch incomplete, sending nak");
        stats.record_batch_naked();
        control
            .send(ControlMessage::nak(batch_start, batch_end, missing))
            .await?;
    }
    control.flush().await?;
    stats.log_progress();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use bytes::BytesMut;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio_util::codec::Encoder;

    fn test_config() -> LinkConfig {
        let mut cfg = LinkConfig::for_port("loopback");
        cfg.batch_size = 3;
        cfg.sync_timeout = std::time::Duration::from_millis(500);
        cfg.receive_timeout = std::time::Duration::from_millis(300);
        cfg
    }

    fn encode_frame(seq: u8, payload: &[u8]) -> BytesMut {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        codec
            .encode(Packet::new(seq, payload.to_vec()), &mut buf)
            .unwrap();
        buf
    }

    #[tokio::test]
    async fn perfect_link_three_packets_acks_then_eot() {
        let (receiver_io, mut peer) = tokio::io::duplex(8192);
        let config = test_config();
        let mut stats = Statistics::new();

        let feeder = tokio::spawn(async move {
            let mut wire = BytesMut::new();
            wire.extend_from_slice(&encode_frame(0, &[0u8; 255]));
            wire.extend_from_slice(&encode_frame(1, &[1u8; 255]));
            wire.extend_from_slice(&encode_frame(2, b"hello"));
            peer.write_all(&wire).await.unwrap();

            let mut ack = [0u8; 3];
            peer.read_exact(&mut ack).await.unwrap();
            assert_eq!(ack, [0x06, 0, 2]);

            peer.write_all(&encode_frame(255, b"EOT")).await.unwrap();
        });

        let sink = MemorySink::new();
        let ok = receive_stream(receiver_io, sink, &config, &mut stats)
            .await
            .unwrap();
        assert!(ok);
        feeder.await.unwrap();
    }

    #[tokio::test]
    async fn one_dropped_packet_yields_nak_with_missing_seq() {
        let (receiver_io, mut peer) = tokio::io::duplex(16384);
        let mut config = test_config();
        config.batch_size = 100;
        let mut stats = Statistics::new();

        let feeder = tokio::spawn(async move {
            let mut wire = BytesMut::new();
            for seq in 0u8..100 {
                if seq == 42 {
                    continue;
                }
                wire.extend_from_slice(&encode_frame(seq, &[seq; 10]));
            }
            peer.write_all(&wire).await.unwrap();

            let mut nak = vec![0u8; 4];
            peer.read_exact(&mut nak).await.unwrap();
            assert_eq!(&nak[..3], &[0x15, 0, 99]);
            assert_eq!(nak[3], 1);
            let mut missing = [0u8; 1];
            peer.read_exact(&mut missing).await.unwrap();
            assert_eq!(missing[0], 42);

            peer.write_all(&encode_frame(255, b"EOT")).await.unwrap();
        });

        let sink = MemorySink::new();
        let ok = receive_stream(receiver_io, sink, &config, &mut stats)
            .await
            .unwrap();
        assert!(ok);
        feeder.await.unwrap();
    }

    #[tokio::test]
    async fn duplicate_frame_does_not_grow_output_but_counts() {
        let (receiver_io, mut peer) = tokio::io::duplex(8192);
        let config = test_config();
        let mut stats = Statistics::new();

        let feeder = tokio::spawn(async move {
            let mut wire = BytesMut::new();
            wire.extend_from_slice(&encode_frame(0, b"hi"));
            wire.extend_from_slice(&encode_frame(0, b"hi"));
            peer.write_all(&wire).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(400)).await;
        });

        let sink = MemorySink::new();
        let ok = receive_stream(receiver_io, sink, &config, &mut stats)
            .await
            .unwrap();
        assert!(ok);
        feeder.await.unwrap();
        assert_eq!(stats.duplicates(), 1);
    }

    #[tokio::test]
    async fn no_sync_within_timeout_aborts() {
        let (receiver_io, _peer) = tokio::io::duplex(64);
        let mut config = test_config();
        config.sync_timeout = std::time::Duration::from_millis(50);
        let mut stats = Statistics::new();

        let sink = MemorySink::new();
        let ok = receive_stream(receiver_io, sink, &config, &mut stats)
            .await
            .unwrap();
        assert!(!ok);
    }
}
