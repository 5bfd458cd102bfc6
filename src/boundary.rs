//! Messages exchanged with the host game and the outbound send capability.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use crate::episode::EpisodeExtra;
use crate::snapshot::{MapUpdate, PickupUpdate, StatsUpdate};

/// Outbound request. Fire-and-forget; replies arrive later as `GameEvent`s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Command {
    RequestGameStats,
    RequestGameMap,
    RequestSunTracker,
    #[serde(rename_all = "camelCase")]
    PlacePlant {
        card_index: usize,
        row: i32,
        col: i32,
    },
    CollectAllSuns,
    RestartLevel,
    SetGameSpeed {
        speed: f32,
        headless: bool,
    },
}

/// Summary the host attaches to `gameEnd`. Missing counters fall back to the
/// loop's own tallies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GameEndStats {
    pub zombies_killed: Option<u32>,
    pub plants_placed: Option<u32>,
    pub level: u32,
    pub sun_collected: u32,
    pub final_sun: u32,
}

impl GameEndStats {
    pub fn extra(&self) -> EpisodeExtra {
        EpisodeExtra { level: self.level, sun_collected: self.sun_collected, final_sun: self.final_sun }
    }
}

/// Inbound event. Order relative to requests is not guaranteed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum GameEvent {
    GameStatsUpdate(StatsUpdate),
    GameMapUpdate(MapUpdate),
    SunTrackerUpdate(PickupUpdate),
    GameEnd {
        won: bool,
        #[serde(default)]
        stats: Option<GameEndStats>,
    },
    LevelStart,
    PlantPlacementResult {
        success: bool,
        #[serde(default)]
        message: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

/// Sink for outbound commands.
pub trait GameBoundary: Send {
    fn send(&mut self, cmd: Command);
}

/// Forwards commands into an unbounded channel drained by the transport.
pub struct ChannelBoundary {
    tx: UnboundedSender<Command>,
}

impl ChannelBoundary {
    pub fn new(tx: UnboundedSender<Command>) -> Self {
        Self { tx }
    }
}

impl GameBoundary for ChannelBoundary {
    fn send(&mut self, cmd: Command) {
        debug!(?cmd, "send");
        if self.tx.send(cmd).is_err() {
            warn!("command channel closed, dropping command");
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_use_host_wire_names() {
        let json = serde_json::to_value(Command::PlacePlant { card_index: 2, row: 3, col: 4 }).unwrap();
        assert_eq!(json, serde_json::json!({"action":"placePlant","cardIndex":2,"row":3,"col":4}));
        let json = serde_json::to_value(Command::RequestSunTracker).unwrap();
        assert_eq!(json, serde_json::json!({"action":"requestSunTracker"}));
        let json = serde_json::to_value(Command::SetGameSpeed { speed: 100.0, headless: true }).unwrap();
        assert_eq!(json, serde_json::json!({"action":"setGameSpeed","speed":100.0,"headless":true}));
    }

    #[test]
    fn stats_update_parses_host_payload() {
        let ev: GameEvent = serde_json::from_str(
            r#"{"action":"gameStatsUpdate","sunCount":150,"isPlaying":true,
                "cards":[{"name":"SunFlower","cost":50,"canAfford":true,"isCooldown":false}]}"#,
        )
        .unwrap();
        let GameEvent::GameStatsUpdate(u) = ev else { panic!("wrong variant") };
        assert_eq!(u.sun_count, 150);
        assert!(u.cards[0].is_ready());
    }

    #[test]
    fn game_end_with_and_without_stats() {
        let ev: GameEvent = serde_json::from_str(r#"{"action":"gameEnd","won":false}"#).unwrap();
        assert_eq!(ev, GameEvent::GameEnd { won: false, stats: None });

        let ev: GameEvent =
            serde_json::from_str(r#"{"action":"gameEnd","won":true,"stats":{"level":4,"zombiesKilled":12}}"#)
                .unwrap();
        let GameEvent::GameEnd { stats: Some(s), .. } = ev else { panic!("wrong variant") };
        assert_eq!(s.zombies_killed, Some(12));
        assert_eq!(s.extra().level, 4);
    }

    #[test]
    fn unknown_actions_are_tolerated() {
        let ev: GameEvent = serde_json::from_str(r#"{"action":"plantRemoved","row":1}"#).unwrap();
        assert_eq!(ev, GameEvent::Unknown);
    }
}
