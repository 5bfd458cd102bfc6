//! Timer host for the decision loop: a poll interval, a think interval and
//! an optional restart delay, all on one task.

use std::future::pending;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{Instant, Interval, MissedTickBehavior, Sleep, interval_at, sleep};
use tracing::{debug, info};

use crate::boundary::GameEvent;
use crate::player::{AutoPlayer, EndAction};

/// Operator commands for the loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum Control {
    #[serde(rename = "aiStart")]
    Start,
    #[serde(rename = "aiStop")]
    Stop,
    #[serde(rename = "aiPause")]
    TogglePause,
    #[serde(rename = "aiSetSpeed")]
    SetSpeed { speed: f32 },
    #[serde(rename = "aiTrainingMode")]
    TrainingMode { enabled: bool },
}

/// First tick one period from now.
fn ticker(period: Duration) -> Interval {
    let mut t = interval_at(Instant::now() + period, period);
    t.set_missed_tick_behavior(MissedTickBehavior::Delay);
    t
}

async fn restart_due(restart: &mut Option<Pin<Box<Sleep>>>) {
    match restart {
        Some(s) => s.as_mut().await,
        None => pending().await,
    }
}

/// Drive `player` until the control channel closes, then hand it back.
pub async fn run(
    mut player: AutoPlayer,
    mut events: UnboundedReceiver<GameEvent>,
    mut control: UnboundedReceiver<Control>,
) -> AutoPlayer {
    let mut poll = ticker(player.poll_period());
    let mut think = ticker(player.think_period());
    let mut restart: Option<Pin<Box<Sleep>>> = None;
    let mut events_open = true;

    loop {
        tokio::select! {
            _ = poll.tick(), if player.is_active() => player.request_state(),
            _ = think.tick(), if player.is_active() => player.think(),
            _ = restart_due(&mut restart), if restart.is_some() => {
                restart = None;
                player.restart_level();
            }
            ev = events.recv(), if events_open => match ev {
                Some(ev) => match player.handle_event(ev) {
                    Some(EndAction::RetryAfter(delay)) => restart = Some(Box::pin(sleep(delay))),
                    Some(EndAction::Stopped) => restart = None,
                    _ => {}
                },
                None => {
                    debug!("event channel closed");
                    events_open = false;
                }
            },
            msg = control.recv() => {
                let Some(msg) = msg else { break };
                debug!(?msg, "control");
                match msg {
                    Control::Start => {
                        if !player.is_active() {
                            player.start();
                            poll = ticker(player.poll_period());
                            think = ticker(player.think_period());
                        }
                    }
                    Control::Stop => {
                        player.stop();
                        restart = None;
                    }
                    Control::TogglePause => player.toggle_pause(),
                    Control::SetSpeed { speed } => {
                        player.set_speed(speed);
                        think = ticker(player.think_period());
                    }
                    Control::TrainingMode { enabled } => {
                        player.set_training_mode(enabled);
                        think = ticker(player.think_period());
                    }
                }
            }
        }
    }

    info!("control channel closed, decision loop exiting");
    player
}
