//! The sender side of the sequence/batch controller.
//!
//! Drains a [`ByteSource`] into 255-byte packets, transmits them in batches
//! of `BATCH_SIZE`, and waits for a verdict on the reverse byte stream after
//! each batch. A `NAK` triggers a retransmission of only the missing
//! members; silence for `ACK_TIMEOUT` triggers a full batch resend. Gives up
//! after `MAX_RETRIES` rounds and reports failure.

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::config::LinkConfig;
use crate::control::{ControlCodec, ControlMessage};
use crate::error::LinkError;
use crate::frame::{FrameCodec, Packet};
use crate::source::ByteSource;
use crate::stats::Statistics;
use crate::tracing::prelude::*;

/// Drains `source` to EOF over `io`, running the full batch protocol.
///
/// Returns `Ok(true)` on a clean finish (every batch acknowledged, EOT sent)
/// and `Ok(false)` on a terminal batch failure after `MAX_RETRIES`. I/O or
/// source errors propagate as `Err`.
pub async fn send_stream<IO>(
    io: IO,
    mut source: impl ByteSource,
    config: &LinkConfig,
    stats: &mut Statistics,
) -> Result<bool, LinkError>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send,
{
    let (read_half, write_half) = tokio::io::split(io);
    let mut frames = FramedWrite::new(write_half, FrameCodec::new());
    let mut control = FramedRead::new(read_half, ControlCodec::new());

    let mut next_seq: u8 = 0;
    let mut in_flight: Vec<Packet> = Vec::new();
    let mut batch_start: u8 = 0;

    loop {
        let chunk = source.read_chunk(config.max_payload_size).await?;

        if chunk.is_empty() {
            break;
        }

        let packet = Packet::new(next_seq, chunk);
        send_packet(&mut frames, &packet).await?;
        stats.record_packet_sent(packet.payload.len());
        in_flight.push(packet);
        next_seq = next_seq.wrapping_add(1);

        tokio::time::sleep(config.inter_packet_delay).await;

        if in_flight.len() == config.batch_size {
            let batch_end = in_flight.last().expect("just pushed").seq;
            if !close_batch(
                &mut frames,
                &mut control,
                &in_flight,
                batch_start,
                batch_end,
                config,
                stats,
            )
            .await?
            {
                return Ok(false);
            }
            in_flight.clear();
            batch_start = next_seq;
        }
    }

    if !in_flight.is_empty() {
        let batch_end = in_flight.last().expect("non-empty").seq;
        if !close_batch(
            &mut frames,
            &mut control,
            &in_flight,
            batch_start,
            batch_end,
            config,
            stats,
        )
        .await?
        {
            return Ok(false);
        }
    }

    send_packet(&mut frames, &Packet::eot()).await?;
    info!("sent EOT, session complete");
    stats.log_summary();
    Ok(true)
}

async fn send_packet<W>(frames: &mut FramedWrite<W, FrameCodec>, packet: &Packet) -> Result<(), LinkError>
where
    W: AsyncWrite + Unpin,
{
    frames.send(packet.clone()).await
}

/// Waits for and reconciles the verdict on `[batch_start, batch_end]`,
/// retransmitting as needed. Once `MAX_RETRIES` rounds are exhausted without
/// an `ACK`, logs a [`LinkError::BatchFailed`] and returns `Ok(false)`.
async fn close_batch<R, W>(
    frames: &mut FramedWrite<W, FrameCodec>,
    control: &mut FramedRead<R, ControlCodec>,
    in_flight: &[Packet],
    batch_start: u8,
    batch_end: u8,
    config: &LinkConfig,
    stats: &mut Statistics,
) -> Result<bool, LinkError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut retries: u32 = 0;

    loop {
        let verdict = match tokio::time::timeout(config.ack_timeout, control.next()).await {
            Ok(Some(Ok(msg))) => msg,
            Ok(Some(Err(e))) => return Err(e),
            Ok(None) => {
                return Err(LinkError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "control stream closed while awaiting batch verdict",
                )));
            }
            Err(_) => {
                warn!(batch_start, batch_end, "ack timeout, resending batch");
                retries += 1;
                if retries > config.max_retries {
                    let err = LinkError::BatchFailed {
                        batch_start,
                        batch_end,
                        retries,
                    };
                    error!("{err}");
                    return Ok(false);
                }
                resend_all(frames, in_flight, config).await?;
                stats.record_retry();
                continue;
            }
        };

        if !verdict.matches(batch_start, batch_end) {
            debug!(
                batch_start,
                batch_end,
                got_start = verdict.batch_start(),
                got_end = verdict.batch_end(),
                "verdict for a different batch, ignoring"
            );
            continue;
        }

        match verdict {
            ControlMessage::Ack { .. } => {
                info!(batch_start, batch_end, "batch acknowledged");
                stats.record_batch_acked();
                stats.log_progress();
                return Ok(true);
            }
            ControlMessage::Nak { missing, .. } => {
                warn!(batch_start, batch_end, missing = ?missing, "batch nak, resending missing");
                stats.record_batch_naked();
                retries += 1;
                if retries > config.max_retries {
                    let err = LinkError::BatchFailed {
                        batch_start,
                        batch_end,
                        retries,
                    };
                    error!("{err}");
                    return Ok(false);
                }
                resend_missing(frames, in_flight, &missing, config).await?;
                stats.record_retry();
            }
        }
    }
}

async fn resend_all<W>(
    frames: &mut FramedWrite<W, FrameCodec>,
    in_flight: &[Packet],
    config: &LinkConfig,
) -> Result<(), LinkError>
where
    W: AsyncWrite + Unpin,
{
    for packet in in_flight {
        send_packet(frames, packet).await?;
        tokio::time::sleep(config.inter_packet_delay).await;
    }
    Ok(())
}

async fn resend_missing<W>(
    frames: &mut FramedWrite<W, FrameCodec>,
    in_flight: &[Packet],
    missing: &[u8],
    config: &LinkConfig,
) -> Result<(), LinkError>
where
    W: AsyncWrite + Unpin,
{
    for &seq in missing {
        if let Some(packet) = in_flight.iter().find(|p| p.seq == seq) {
            send_packet(frames, packet).await?;
            tokio::time::sleep(config.inter_packet_delay).await;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;
    use bytes::BytesMut;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio_util::codec::Decoder;

    fn test_config() -> LinkConfig {
        let mut cfg = LinkConfig::for_port("loopback");
        cfg.batch_size = 3;
        cfg.max_payload_size = 1;
        cfg.inter_packet_delay = std::time::Duration::from_millis(0);
        cfg.ack_timeout = std::time::Duration::from_millis(200);
        cfg
    }

    #[tokio::test]
    async fn perfect_link_three_packets() {
        let (sender_io, mut peer) = tokio::io::duplex(8192);
        let config = test_config();
        let mut stats = Statistics::new();

        let responder = tokio::spawn(async move {
            let mut decoder = FrameCodec::new();
            let mut buf = BytesMut::new();
            let mut scratch = [0u8; 1024];
            let mut seen = Vec::new();

            loop {
                let n = peer.read(&mut scratch).await.unwrap();
                buf.extend_from_slice(&scratch[..n]);
                while let Some(packet) = decoder.decode(&mut buf).unwrap() {
                    if packet.is_eot() {
                        return seen;
                    }
                    seen.push(packet);
                    if seen.len() == 3 {
                        peer.write_all(&[0x06, 0, 2]).await.unwrap();
                    }
                }
            }
        });

        let source = MemorySource::new(vec![b'A'; 2]
            .into_iter()
            .chain(std::iter::once(b'B'))
            .collect());
        let ok = send_stream(sender_io, source, &config, &mut stats)
            .await
            .unwrap();
        assert!(ok);

        let seen = responder.await.unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(stats.bytes_transferred(), 3);
    }
}
