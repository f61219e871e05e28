//! Line-based command input, one [`ViewerCommand`] per line.
//!
//! ```text
//! tap 0.4 0.7        place            recenter
//! stabilize on|off   transparent on|off
//! controls <scale> <rotation> <offset-x> <offset-y>
//! reset              capture          permission
//! mode auto|immersive|camera          start            end
//! ```

use std::io::BufRead;

use anyhow::{Context, Result, anyhow, bail};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ViewMode;
use crate::events::ViewerCommand;
use crate::placement::Controls;

fn parse_f32(word: Option<&str>, what: &str) -> Result<f32> {
    let word = word.ok_or_else(|| anyhow!("missing {what}"))?;
    word.parse::<f32>()
        .with_context(|| format!("invalid {what}: {word}"))
}

fn parse_switch(word: Option<&str>) -> Result<bool> {
    match word {
        Some("on" | "true" | "1") => Ok(true),
        Some("off" | "false" | "0") => Ok(false),
        Some(other) => bail!("expected on/off, got {other}"),
        None => bail!("expected on/off"),
    }
}

/// Parse one command line. Blank lines and `#` comments yield `None`.
pub fn parse_command(line: &str) -> Result<Option<ViewerCommand>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let cmd = match verb.to_ascii_lowercase().as_str() {
        "tap" => ViewerCommand::Tap {
            x: parse_f32(words.next(), "x")?,
            y: parse_f32(words.next(), "y")?,
        },
        "place" => ViewerCommand::Place,
        "recenter" => ViewerCommand::Recenter,
        "stabilize" => ViewerCommand::SetStabilize(parse_switch(words.next())?),
        "transparent" => ViewerCommand::SetTransparentBackground(parse_switch(words.next())?),
        "controls" => ViewerCommand::SetControls(Controls {
            scale: parse_f32(words.next(), "scale")?,
            rotation: parse_f32(words.next(), "rotation")?,
            offset_x: parse_f32(words.next(), "offset-x")?,
            offset_y: parse_f32(words.next(), "offset-y")?,
        }),
        "reset" => ViewerCommand::ResetControls,
        "capture" => ViewerCommand::Capture,
        "permission" => ViewerCommand::RequestSensorPermission,
        "mode" => ViewerCommand::SwitchMode(match words.next() {
            Some("auto") => ViewMode::Auto,
            Some("immersive") => ViewMode::Immersive,
            Some("camera") => ViewMode::Camera,
            Some(other) => bail!("unknown mode {other}"),
            None => bail!("missing mode"),
        }),
        "start" => ViewerCommand::StartSession,
        "end" => ViewerCommand::EndSession,
        other => bail!("unknown command {other}"),
    };
    if let Some(extra) = words.next() {
        bail!("unexpected argument {extra}");
    }
    Ok(Some(cmd))
}

/// Forward parsed commands from `input` until it closes or `cancel` fires.
/// Malformed lines are logged and skipped.
pub async fn run<R>(
    input: R,
    to_viewer: mpsc::Sender<ViewerCommand>,
    cancel: CancellationToken,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line.context("failed to read command input")?,
        };
        let Some(line) = line else {
            info!("command input closed");
            break;
        };
        match parse_command(&line) {
            Ok(Some(cmd)) => {
                debug!(?cmd, "command received");
                if to_viewer.send(cmd).await.is_err() {
                    debug!("viewer gone; command reader stopping");
                    break;
                }
            }
            Ok(None) => {}
            Err(err) => warn!(line = %line, error = %err, "ignoring command"),
        }
    }
    Ok(())
}

/// Read commands from the process's stdin on a detached thread so a blocked
/// read never holds up shutdown.
pub fn spawn_stdin_reader(to_viewer: mpsc::Sender<ViewerCommand>) -> std::io::Result<()> {
    std::thread::Builder::new()
        .name("stdin-commands".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(err) => {
                        warn!(error = %err, "stdin read failed");
                        break;
                    }
                };
                match parse_command(&line) {
                    Ok(Some(cmd)) => {
                        if to_viewer.blocking_send(cmd).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(err) => warn!(line = %line, error = %err, "ignoring command"),
                }
            }
            debug!("stdin command reader finished");
        })?;
    Ok(())
}
