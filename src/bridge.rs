//! JSON-lines transport: game events and control messages in, commands out.

use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

use crate::boundary::{Command, GameEvent};
use crate::event_loop::Control;

/// One inbound line. Control messages are tried first; anything else with
/// an `action` field is a game event.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum InboundLine {
    Control(Control),
    Event(GameEvent),
}

pub fn parse_line(line: &str) -> Option<InboundLine> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str(line) {
        Ok(msg) => Some(msg),
        Err(e) => {
            warn!(error = %e, "dropping malformed input line");
            None
        }
    }
}

/// Read until EOF or until the control side hangs up.
pub async fn read_input<R: AsyncBufRead + Unpin>(
    reader: R,
    events: UnboundedSender<GameEvent>,
    control: UnboundedSender<Control>,
) -> std::io::Result<()> {
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        match parse_line(&line) {
            Some(InboundLine::Control(c)) => {
                if control.send(c).is_err() {
                    break;
                }
            }
            Some(InboundLine::Event(e)) => {
                if events.send(e).is_err() {
                    debug!("event receiver gone");
                }
            }
            None => {}
        }
    }
    Ok(())
}

/// One JSON object per line, flushed per command.
pub async fn write_commands<W: AsyncWrite + Unpin>(
    mut writer: W,
    mut commands: UnboundedReceiver<Command>,
) -> std::io::Result<()> {
    while let Some(cmd) = commands.recv().await {
        let mut line = serde_json::to_string(&cmd).map_err(std::io::Error::other)?;
        line.push('\n');
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
    }
    Ok(())
}
