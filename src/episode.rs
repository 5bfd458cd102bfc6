//! Per-episode history and running statistics, persisted as one document.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::db::{MEMORY_KEY, Storage, StorageError};
use crate::log;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub epsilon: f32,       // starting exploration rate
    pub epsilon_decay: f32, // per episode
    pub epsilon_min: f32,
    pub history: usize,       // episodes kept
    pub recent_window: usize, // episodes counted in recent_wins
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self { epsilon: 0.9, epsilon_decay: 0.995, epsilon_min: 0.1, history: 100, recent_window: 10 }
    }
}

/// Summary fields reported by the host at game end.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EpisodeExtra {
    pub level: u32,
    pub sun_collected: u32,
    pub final_sun: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeRecord {
    pub won: bool,
    pub score: f32,
    pub zombies_killed: u32,
    pub plants_placed: u32,
    #[serde(default)]
    pub level: u32,
    #[serde(default)]
    pub sun_collected: u32,
    #[serde(default)]
    pub final_sun: u32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentStatistics {
    pub games_played: u32,
    pub games_won: u32,
    pub total_reward: f64,
    pub best_score: f32,
    pub epsilon: f32,
    pub win_streak: u32, // consecutive trailing wins
    pub recent_wins: u32,
    pub total_zombies_killed: u64,
    pub best_win_score: f32,
    pub best_win_zombies: u32,
    pub best_win_level: u32,
}

impl Default for AgentStatistics {
    fn default() -> Self {
        Self::with_epsilon(TrackerConfig::default().epsilon)
    }
}

impl AgentStatistics {
    fn with_epsilon(epsilon: f32) -> Self {
        Self {
            games_played: 0,
            games_won: 0,
            total_reward: 0.0,
            best_score: 0.0,
            epsilon,
            win_streak: 0,
            recent_wins: 0,
            total_zombies_killed: 0,
            best_win_score: 0.0,
            best_win_zombies: 0,
            best_win_level: 0,
        }
    }

    /// Percentage in [0, 100].
    pub fn win_rate(&self) -> f32 {
        if self.games_played == 0 {
            return 0.0;
        }
        self.games_won as f32 / self.games_played as f32 * 100.0
    }
}

/// Read-only view handed out by `statistics()`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsSnapshot {
    #[serde(flatten)]
    pub stats: AgentStatistics,
    pub win_rate: f32,
    pub episode_count: usize,
}

#[derive(Default, Serialize, Deserialize)]
#[serde(default)]
struct Document {
    episodes: VecDeque<EpisodeRecord>,
    statistics: AgentStatistics,
}

pub struct EpisodeTracker {
    cfg: TrackerConfig,
    storage: Option<Arc<dyn Storage>>,
    episodes: VecDeque<EpisodeRecord>,
    stats: AgentStatistics,
}

impl EpisodeTracker {
    /// Restores the persisted document when one exists and parses.
    pub fn new(cfg: TrackerConfig, storage: Option<Arc<dyn Storage>>) -> Self {
        let mut tracker = Self {
            stats: AgentStatistics::with_epsilon(cfg.epsilon),
            cfg,
            storage,
            episodes: VecDeque::new(),
        };
        tracker.restore();
        tracker
    }

    fn restore(&mut self) {
        let Some(storage) = &self.storage else { return };
        match storage.load(MEMORY_KEY) {
            Ok(Some(json)) => match serde_json::from_str::<Document>(&json) {
                Ok(doc) => {
                    self.episodes = doc.episodes;
                    self.stats = doc.statistics;
                    while self.episodes.len() > self.cfg.history {
                        self.episodes.pop_front();
                    }
                    info!(episodes = self.episodes.len(), "episode history loaded");
                }
                Err(e) => warn!(error = %e, "episode history is corrupt, starting fresh"),
            },
            Ok(None) => {}
            Err(e) => warn!(error = %e, "episode history load failed"),
        }
    }

    fn persist(&self) {
        let Some(storage) = &self.storage else { return };
        let doc = Document { episodes: self.episodes.clone(), statistics: self.stats.clone() };
        let result = serde_json::to_string(&doc)
            .map_err(StorageError::from)
            .and_then(|json| storage.save(MEMORY_KEY, &json));
        if let Err(e) = result {
            warn!(error = %e, "episode history save failed");
        }
    }

    pub fn epsilon(&self) -> f32 {
        self.stats.epsilon
    }

    /// Running reward total across all stored transitions. Persisted with the next episode.
    pub fn add_reward(&mut self, reward: f32) {
        self.stats.total_reward += reward as f64;
    }

    pub fn record_episode(
        &mut self,
        won: bool,
        score: f32,
        zombies_killed: u32,
        plants_placed: u32,
        extra: EpisodeExtra,
    ) -> EpisodeRecord {
        let record = EpisodeRecord {
            won,
            score,
            zombies_killed,
            plants_placed,
            level: extra.level,
            sun_collected: extra.sun_collected,
            final_sun: extra.final_sun,
            timestamp: Utc::now(),
        };

        let s = &mut self.stats;
        s.games_played += 1;
        if won {
            s.games_won += 1;
        }
        if score > s.best_score {
            s.best_score = score;
        }
        s.total_zombies_killed += zombies_killed as u64;
        if won && score > s.best_win_score {
            s.best_win_score = score;
            s.best_win_zombies = zombies_killed;
            s.best_win_level = extra.level;
        }

        self.episodes.push_back(record.clone());
        while self.episodes.len() > self.cfg.history.max(1) {
            self.episodes.pop_front();
        }

        let s = &mut self.stats;
        s.recent_wins = self.episodes.iter().rev().take(self.cfg.recent_window).filter(|e| e.won).count() as u32;
        s.win_streak = self.episodes.iter().rev().take_while(|e| e.won).count() as u32;
        s.epsilon = (s.epsilon * self.cfg.epsilon_decay).max(self.cfg.epsilon_min);

        self.persist();

        let game = self.stats.games_played as u64;
        log::scalar(game, "episode_score", score);
        log::scalar(game, "episode_won", if won { 1.0 } else { 0.0 });
        log::scalar(game, "win_rate", self.stats.win_rate());
        info!(won, score, zombies_killed, plants_placed, "episode recorded");
        record
    }

    pub fn statistics(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            stats: self.stats.clone(),
            win_rate: self.stats.win_rate(),
            episode_count: self.episodes.len(),
        }
    }

    /// Last `n` episodes, oldest first.
    pub fn recent_episodes(&self, n: usize) -> Vec<EpisodeRecord> {
        let skip = self.episodes.len().saturating_sub(n);
        self.episodes.iter().skip(skip).cloned().collect()
    }

    pub fn reset(&mut self) {
        self.episodes.clear();
        self.stats = AgentStatistics::with_epsilon(self.cfg.epsilon);
        self.persist();
        info!("episode history reset");
    }
}
