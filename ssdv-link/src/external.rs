//! Thin wrappers over the external `ssdv` and ImageMagick tools.
//!
//! `encode`/`decode` shell out to the `ssdv` binary with the same flags the
//! original project used (`-c CUBESA -i 1 -q 7 -l 256`); `convert_to_baseline`
//! pads an image's dimensions to a multiple of 16 and re-encodes it at full
//! quality, non-interlaced, the way ImageMagick's `identify`/`convert` do it
//! in the original. None of this is link-protocol logic — no retries, a
//! nonzero exit or spawn failure is a single [`LinkError::ExternalTool`].

use std::path::Path;
use std::process::{Command, Output};

use crate::error::LinkError;
use crate::tracing::prelude::*;

const SSDV_CODEC: &str = "CUBESA";
const SSDV_IMAGE_ID: &str = "1";
const SSDV_QUALITY: &str = "7";
const SSDV_PACKET_SIZE: &str = "256";

/// Encodes a JPEG into an SSDV packet stream via `ssdv -e`.
pub fn encode_image(input_jpg: &Path, output_ssdv: &Path) -> Result<(), LinkError> {
    run(Command::new("ssdv").args([
        "-e",
        "-c",
        SSDV_CODEC,
        "-i",
        SSDV_IMAGE_ID,
        "-q",
        SSDV_QUALITY,
        "-l",
        SSDV_PACKET_SIZE,
    ])
    .arg(input_jpg)
    .arg(output_ssdv))
}

/// Decodes an SSDV packet stream back into a JPEG via `ssdv -d`.
pub fn decode_ssdv(input_ssdv: &Path, output_jpg: &Path) -> Result<(), LinkError> {
    run(Command::new("ssdv")
        .args(["-d", "-l", SSDV_PACKET_SIZE])
        .arg(input_ssdv)
        .arg(output_jpg))
}

/// Pads `input_jpg`'s dimensions up to a multiple of 16 and writes the
/// result to `output_jpg` at quality 100, non-interlaced. A no-op resize
/// (image already aligned) still re-encodes, matching the original's
/// unconditional `convert` call.
pub fn convert_to_baseline(input_jpg: &Path, output_jpg: &Path) -> Result<(), LinkError> {
    let (width, height) = identify_dimensions(input_jpg)?;
    let new_width = round_up_to_16(width);
    let new_height = round_up_to_16(height);

    let mut cmd = Command::new("convert");
    cmd.arg(input_jpg);
    if (new_width, new_height) != (width, height) {
        info!(width, height, new_width, new_height, "resizing image to aligned dimensions");
        cmd.arg("-resize").arg(format!("{new_width}x{new_height}!"));
    }
    cmd.args(["-quality", "100", "-interlace", "none"]).arg(output_jpg);
    run(&mut cmd)
}

fn round_up_to_16(n: u32) -> u32 {
    (n + 15) / 16 * 16
}

fn identify_dimensions(input_jpg: &Path) -> Result<(u32, u32), LinkError> {
    let output = Command::new("identify")
        .args(["-format", "%w %h"])
        .arg(input_jpg)
        .output()
        .map_err(|e| LinkError::ExternalTool {
            command: "identify".to_string(),
            detail: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(tool_failure("identify", &output));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut fields = stdout.split_whitespace();
    let width = fields.next().and_then(|s| s.parse().ok());
    let height = fields.next().and_then(|s| s.parse().ok());
    match (width, height) {
        (Some(w), Some(h)) => Ok((w, h)),
        _ => Err(LinkError::ExternalTool {
            command: "identify".to_string(),
            detail: format!("could not parse dimensions from output: {stdout:?}"),
        }),
    }
}

fn run(cmd: &mut Command) -> Result<(), LinkError> {
    let program = cmd.get_program().to_string_lossy().to_string();
    debug!(command = %program, "running external tool");
    let output = cmd.output().map_err(|e| LinkError::ExternalTool {
        command: program.clone(),
        detail: e.to_string(),
    })?;

    if !output.status.success() {
        return Err(tool_failure(&program, &output));
    }
    Ok(())
}

fn tool_failure(command: &str, output: &Output) -> LinkError {
    LinkError::ExternalTool {
        command: command.to_string(),
        detail: format!(
            "exit status {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_up_to_16_aligns_up() {
        assert_eq!(round_up_to_16(256), 256);
        assert_eq!(round_up_to_16(257), 272);
        assert_eq!(round_up_to_16(1), 16);
    }

    #[test]
    fn tool_failure_includes_stderr() {
        let output = Output {
            status: std::os::unix::process::ExitStatusExt::from_raw(256),
            stdout: Vec::new(),
            stderr: b"bad input".to_vec(),
        };
        let err = tool_failure("ssdv", &output);
        match err {
            LinkError::ExternalTool { command, detail } => {
                assert_eq!(command, "ssdv");
                assert!(detail.contains("bad input"));
            }
            _ => panic!("expected ExternalTool"),
        }
    }
}
