//! Offline dissector for a raw byte capture of one direction of an
//! ssdv-link serial session.
//!
//! Feeds the captured bytes through the same [`ssdv_link::frame::FrameCodec`]
//! (or, with `--control`, [`ssdv_link::control::ControlCodec`]) the runtime
//! uses, so what this tool reports is exactly what the sender or receiver
//! would have seen — the same reuse-the-runtime-codec approach as the
//! driver's own capture dissector.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use bytes::BytesMut;
use clap::Parser;
use colored::Colorize;
use tokio_util::codec::Decoder;

use ssdv_link::control::{ControlCodec, ControlMessage};
use ssdv_link::frame::FrameCodec;

#[derive(Parser)]
#[command(about = "Dissect a captured ssdv-link byte stream")]
struct Cli {
    /// Path to a raw binary capture of one direction of the link.
    #[arg(long)]
    file: PathBuf,

    /// Decode the capture as the reverse (control) direction instead of data frames.
    #[arg(long)]
    control: bool,

    /// How many payload bytes to preview per frame.
    #[arg(long, default_value_t = 16)]
    preview: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_target(false).init();
    let cli = Cli::parse();

    let bytes = fs::read(&cli.file).with_context(|| format!("reading {}", cli.file.display()))?;
    if cli.control {
        dissect_control(&bytes);
    } else {
        dissect_frames(&bytes, cli.preview);
    }
    Ok(())
}

fn dissect_frames(bytes: &[u8], preview: usize) {
    let mut buf = BytesMut::from(bytes);
    let mut codec = FrameCodec::new();
    let mut count = 0;

    loop {
        match codec.decode(&mut buf) {
            Ok(Some(packet)) => {
                count += 1;
                let shown = &packet.payload[..packet.payload.len().min(preview)];
                println!(
                    "{} seq={:<3} len={:<3} {} {}",
                    "FRAME".green().bold(),
                    packet.seq,
                    packet.payload.len(),
                    hex::encode(shown),
                    if packet.is_eot() { "[EOT]".yellow().to_string() } else { String::new() }
                );
            }
            Ok(None) => break,
            Err(e) => {
                println!("{} {e}", "ERROR".red().bold());
                break;
            }
        }
    }

    println!();
    println!(
        "{} frames, {} corrupt, {} bytes dropped, {} bytes left unconsumed",
        count,
        codec.corrupt_count(),
        codec.dropped_bytes(),
        buf.len()
    );
}

fn dissect_control(bytes: &[u8]) {
    let mut buf = BytesMut::from(bytes);
    let mut codec = ControlCodec::new();
    let mut count = 0;

    loop {
        match codec.decode(&mut buf) {
            Ok(Some(msg)) => {
                count += 1;
                match msg {
                    ControlMessage::Ack { batch_start, batch_end } => {
                        println!("{} [{batch_start}, {batch_end}]", "ACK".green().bold());
                    }
                    ControlMessage::Nak {
                        batch_start,
                        batch_end,
                        missing,
                    } => {
                        println!(
                            "{} [{batch_start}, {batch_end}] missing={:?}",
                            "NAK".red().bold(),
                            missing
                        );
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                println!("{} {e}", "ERROR".red().bold());
                break;
            }
        }
    }

    println!();
    println!("{count} control messages, {} bytes left unconsumed", buf.len());
}
