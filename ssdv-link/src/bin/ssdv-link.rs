//! Command-line interface for ssdv-link.
//!
//! Dispatches on a subcommand the way `mujina-cli` dispatches on `args[1]`
//! with a manual `match` — no derive-macro CLI crate in this dependency
//! graph.

use std::env;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use ssdv_link::config::LinkConfig;
use ssdv_link::link::SerialLink;
use ssdv_link::receiver::receive_stream;
use ssdv_link::sender::send_stream;
use ssdv_link::sink::FileSink;
use ssdv_link::source::FileSource;
use ssdv_link::stats::Statistics;
use ssdv_link::{external, tracing as link_tracing};

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }

    let command = args[1].as_str();
    let rest = &args[2..];

    let result = match command {
        "encode" => cmd_encode(rest),
        "decode" => cmd_decode(rest),
        "convert" => cmd_convert(rest),
        "send" => cmd_send(rest).await,
        "recv" => cmd_recv(rest).await,
        _ => {
            eprintln!("Unknown command: {command}");
            print_usage();
            std::process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

fn print_usage() {
    eprintln!("Usage: ssdv-link <command> [options]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  encode  --image <in.jpg> --ssdv <out.ssdv>");
    eprintln!("  decode  --ssdv <in.ssdv> --output <out.jpg>");
    eprintln!("  convert --image <in.jpg> --output <out.jpg>");
    eprintln!("  send    --ssdv <file> --port <port> [--baud <n=9600>] [-v|--verbose]");
    eprintln!("  recv    --ssdv <file> --port <port> [--baud <n=9600>] [-v|--verbose]");
}

/// Parses `--flag value` pairs and bare `-v`/`--verbose` switches.
struct Flags {
    values: std::collections::HashMap<String, String>,
    verbose: bool,
}

fn parse_flags(args: &[String]) -> Result<Flags> {
    let mut values = std::collections::HashMap::new();
    let mut verbose = false;
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-v" | "--verbose" => {
                verbose = true;
                i += 1;
            }
            flag if flag.starts_with("--") => {
                let value = args
                    .get(i + 1)
                    .with_context(|| format!("missing value for {flag}"))?;
                values.insert(flag.trim_start_matches("--").to_string(), value.clone());
                i += 2;
            }
            other => bail!("unexpected argument: {other}"),
        }
    }
    Ok(Flags { values, verbose })
}

impl Flags {
    fn required(&self, name: &str) -> Result<PathBuf> {
        self.values
            .get(name)
            .map(PathBuf::from)
            .with_context(|| format!("missing required --{name}"))
    }

    fn required_string(&self, name: &str) -> Result<String> {
        self.values
            .get(name)
            .cloned()
            .with_context(|| format!("missing required --{name}"))
    }

    fn baud(&self) -> Result<u32> {
        match self.values.get("baud") {
            Some(v) => v.parse().context("--baud must be a number"),
            None => Ok(ssdv_link::config::DEFAULT_BAUD),
        }
    }
}

fn cmd_encode(args: &[String]) -> Result<()> {
    let flags = parse_flags(args)?;
    let image = flags.required("image")?;
    let ssdv = flags.required("ssdv")?;
    external::encode_image(&image, &ssdv)?;
    println!("Encoded {} to {}", image.display(), ssdv.display());
    Ok(())
}

fn cmd_decode(args: &[String]) -> Result<()> {
    let flags = parse_flags(args)?;
    let ssdv = flags.required("ssdv")?;
    let output = flags.required("output")?;
    external::decode_ssdv(&ssdv, &output)?;
    println!("Decoded {} to {}", ssdv.display(), output.display());
    Ok(())
}

fn cmd_convert(args: &[String]) -> Result<()> {
    let flags = parse_flags(args)?;
    let image = flags.required("image")?;
    let output = flags.required("output")?;
    external::convert_to_baseline(&image, &output)?;
    println!("Converted {} to baseline JPEG {}", image.display(), output.display());
    Ok(())
}

async fn cmd_send(args: &[String]) -> Result<()> {
    let flags = parse_flags(args)?;
    link_tracing::init(flags.verbose);

    let path = flags.required("ssdv")?;
    let port = flags.required_string("port")?;
    let baud = flags.baud()?;

    let config = LinkConfig::for_port(port.clone()).with_baud(baud);
    println!("Sending {} over {port} at {baud} baud", path.display());
    let source = FileSource::open(&path)
        .await
        .with_context(|| format!("opening {}", path.display()))?;
    let link = SerialLink::open(&port, baud).with_context(|| format!("opening serial port {port}"))?;
    let mut stats = Statistics::new();

    let ok = send_stream(link.into_inner(), source, &config, &mut stats).await?;
    if !ok {
        bail!("Failed to send {}", path.display());
    }
    println!("Successfully sent {}", path.display());
    Ok(())
}

async fn cmd_recv(args: &[String]) -> Result<()> {
    let flags = parse_flags(args)?;
    link_tracing::init(flags.verbose);

    let path = flags.required("ssdv")?;
    let port = flags.required_string("port")?;
    let baud = flags.baud()?;

    let config = LinkConfig::for_port(port.clone()).with_baud(baud);
    println!("Receiving SSDV file on {port} at {baud} baud");
    let sink = FileSink::create(&path)
        .await
        .with_context(|| format!("creating {}", path.display()))?;
    let link = SerialLink::open(&port, baud).with_context(|| format!("opening serial port {port}"))?;
    let mut stats = Statistics::new();

    let ok = receive_stream(link.into_inner(), sink, &config, &mut stats).await?;
    if !ok {
        bail!("Failed to receive SSDV file");
    }
    println!("Successfully received SSDV file");
    Ok(())
}
