//! Decision loop: turns the latest snapshot into a command every think tick,
//! attributes rewards to the action that earned them, and drives learning.
//!
//! Timers live in `event_loop`; this type is the synchronous state machine
//! they call into.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::action::{Action, valid_actions};
use crate::boundary::{Command, GameBoundary, GameEndStats, GameEvent};
use crate::catalog::PlantKind;
use crate::db::Storage;
use crate::dqn::DQNAgent;
use crate::episode::{EpisodeTracker, TrackerConfig};
use crate::game_input::GameInput;
use crate::knowledge::{Advice, Advisor};
use crate::replay_buffer::Transition;
use crate::reward::RewardModel;
use crate::snapshot::{COLS, ROWS, Snapshot, SnapshotCache};

pub const MIN_SPEED: f32 = 0.01;
pub const MAX_SPEED: f32 = 1000.0;
const MAX_THINK_PERIOD: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub poll_period_ms: u64,
    pub think_period_ms: u64, // at speed 1
    pub speed: f32,
    pub training_speed: f32,
    pub train_probability: f32,
    pub target_sync_probability: f32,
    pub retry_delay_ms: u64,
    pub max_consecutive_retries: u32,
    pub advice_experience_threshold: usize, // advisor consulted below this many transitions
    pub advice_probability: f32,
    pub action_log_len: usize,
    pub episodes: TrackerConfig,
    pub seed: Option<u64>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            poll_period_ms: 200,
            think_period_ms: 500,
            speed: 1.0,
            training_speed: 100.0,
            train_probability: 0.1,
            target_sync_probability: 0.01,
            retry_delay_ms: 3000,
            max_consecutive_retries: 10,
            advice_experience_threshold: 500,
            advice_probability: 0.3,
            action_log_len: 50,
            episodes: TrackerConfig::default(),
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LoopState {
    Stopped,
    Running,
    Paused,
}

/// What the host runner should do after a game ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndAction {
    Stopped,
    RetryAfter(Duration),
    Idle,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub time: DateTime<Local>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlayerStatus {
    pub state: LoopState,
    pub episode_reward: f32,
    pub plants_placed: u32,
    pub zombies_killed: u32,
    pub epsilon: f32,
    pub experience: usize,
    pub train_steps: u64,
    pub consecutive_retries: u32,
    pub action_log: Vec<LogEntry>,
}

/// Last action still waiting for the observation that scores it.
struct Pending {
    state: Vec<f32>,
    action: usize,
    snapshot: Snapshot,
    immediate: f32,
}

pub struct AutoPlayer {
    cfg: PlayerConfig,
    state: LoopState,
    speed: f32,

    agent: DQNAgent,
    rewards: RewardModel,
    tracker: EpisodeTracker,
    cache: SnapshotCache,
    storage: Option<Arc<dyn Storage>>,
    boundary: Option<Box<dyn GameBoundary>>,
    advisor: Option<Box<dyn Advisor>>,
    rng: StdRng,

    pending: Option<Pending>,
    last_state: Option<Vec<f32>>,
    episode_reward: f32,
    plants_placed: u32,
    zombies_killed: u32,
    consecutive_retries: u32,
    action_log: VecDeque<LogEntry>,
}

impl AutoPlayer {
    pub fn new(
        cfg: PlayerConfig,
        agent: DQNAgent,
        rewards: RewardModel,
        tracker: EpisodeTracker,
        storage: Option<Arc<dyn Storage>>,
    ) -> Self {
        let rng = match cfg.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            speed: sanitize_speed(cfg.speed),
            cfg,
            state: LoopState::Stopped,
            agent,
            rewards,
            tracker,
            cache: SnapshotCache::new(),
            storage,
            boundary: None,
            advisor: None,
            rng,
            pending: None,
            last_state: None,
            episode_reward: 0.0,
            plants_placed: 0,
            zombies_killed: 0,
            consecutive_retries: 0,
            action_log: VecDeque::new(),
        }
    }

    pub fn with_boundary(mut self, boundary: Box<dyn GameBoundary>) -> Self {
        self.boundary = Some(boundary);
        self
    }

    pub fn with_advisor(mut self, advisor: Box<dyn Advisor>) -> Self {
        self.advisor = Some(advisor);
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state != LoopState::Stopped
    }

    pub fn agent(&self) -> &DQNAgent {
        &self.agent
    }

    pub fn tracker(&self) -> &EpisodeTracker {
        &self.tracker
    }

    pub fn snapshot(&self) -> &Snapshot {
        self.cache.latest()
    }

    pub fn poll_period(&self) -> Duration {
        Duration::from_millis(self.cfg.poll_period_ms.max(1))
    }

    /// Base think period divided by the speed multiplier.
    pub fn think_period(&self) -> Duration {
        let ms = self.cfg.think_period_ms as f64 / self.speed as f64;
        Duration::try_from_secs_f64((ms / 1000.0).max(0.001)).unwrap_or(MAX_THINK_PERIOD)
    }

    pub fn start(&mut self) {
        if self.is_active() {
            return;
        }
        self.state = LoopState::Running;
        self.reset_episode();
        self.action_log.clear();
        self.note("autopilot started".to_string());
        self.request_state();
    }

    /// No further decision cycles run and no restart is scheduled afterwards.
    pub fn stop(&mut self) {
        if !self.is_active() {
            return;
        }
        self.state = LoopState::Stopped;
        self.note("autopilot stopped".to_string());
    }

    pub fn toggle_pause(&mut self) {
        self.state = match self.state {
            LoopState::Running => LoopState::Paused,
            LoopState::Paused => LoopState::Running,
            LoopState::Stopped => return,
        };
        let msg = if self.state == LoopState::Paused { "paused" } else { "resumed" };
        self.note(msg.to_string());
    }

    /// Out-of-range speeds are clamped to `MIN_SPEED..=MAX_SPEED`.
    pub fn set_speed(&mut self, speed: f32) {
        if !(speed.is_finite() && speed > 0.0) {
            warn!(speed, "ignoring invalid speed");
            return;
        }
        let clamped = speed.clamp(MIN_SPEED, MAX_SPEED);
        if clamped != speed {
            warn!(speed, clamped, "speed out of range");
        }
        self.speed = clamped;
        debug!(speed, period = ?self.think_period(), "think speed changed");
    }

    pub fn speed(&self) -> f32 {
        self.speed
    }

    /// Fast headless simulation on the host, matched by a fast think rate.
    pub fn set_training_mode(&mut self, enabled: bool) {
        let speed = if enabled { self.cfg.training_speed } else { 1.0 };
        self.send(Command::SetGameSpeed { speed, headless: enabled });
        self.set_speed(speed);
        let msg = if enabled { "training mode enabled" } else { "training mode disabled" };
        self.note(msg.to_string());
    }

    pub fn request_state(&mut self) {
        self.send(Command::RequestGameStats);
        self.send(Command::RequestGameMap);
        self.send(Command::RequestSunTracker);
    }

    /// Merge an inbound event. Returns the follow-up for a finished game.
    pub fn handle_event(&mut self, event: GameEvent) -> Option<EndAction> {
        match event {
            GameEvent::GameStatsUpdate(u) => self.cache.apply_stats(u),
            GameEvent::GameMapUpdate(u) => self.cache.apply_map(u),
            GameEvent::SunTrackerUpdate(u) => self.cache.apply_pickups(u),
            GameEvent::GameEnd { won, stats } => return Some(self.on_game_end(won, stats.unwrap_or_default())),
            GameEvent::LevelStart => info!("level started"),
            GameEvent::PlantPlacementResult { success, message } => {
                if !success {
                    warn!(message = message.as_deref().unwrap_or(""), "placement rejected by host");
                }
            }
            GameEvent::Unknown => {}
        }
        None
    }

    /// One decision cycle on the latest snapshot.
    pub fn think(&mut self) {
        if self.state != LoopState::Running {
            return;
        }
        let snap = self.cache.capture();
        if !snap.is_playing {
            return;
        }
        let state = GameInput::from_snapshot(&snap).to_vec();

        if let Some(prev) = self.pending.take() {
            let action = Action::from_code(prev.action).unwrap_or(Action::Wait);
            let report = self.rewards.score_step(&prev.snapshot, &snap, action);
            for term in &report.breakdown {
                if !term.reasons.is_empty() {
                    debug!(kind = ?term.kind, reward = term.reward, reasons = ?term.reasons, "reward term");
                }
            }
            self.zombies_killed += report.zombies_killed;
            let reward = prev.immediate + report.total;
            self.store(prev.state, prev.action, reward, state.clone(), false);
        }

        let valid = valid_actions(&snap);
        let code = match self.advised_action(&snap) {
            Some(code) => code,
            None => {
                let epsilon = self.agent.epsilon();
                self.agent.select_action(&state, epsilon, &valid)
            }
        };
        let immediate = self.execute(code, &snap);

        self.last_state = Some(state.clone());
        self.pending = Some(Pending { state, action: code, snapshot: snap, immediate });

        if self.rng.r#gen::<f32>() < self.cfg.train_probability {
            let loss = self.agent.train();
            if loss > 0.0 {
                debug!(loss, "training step");
            }
        }
        if self.rng.r#gen::<f32>() < self.cfg.target_sync_probability {
            self.agent.update_target();
        }
    }

    fn store(&mut self, state: Vec<f32>, action: usize, reward: f32, next_state: Vec<f32>, done: bool) {
        self.agent.remember(Transition { state, action, reward, next_state, done });
        self.tracker.add_reward(reward);
        self.episode_reward += reward;
    }

    /// Heuristic override while experience is low. `None` falls through to the agent.
    fn advised_action(&mut self, snap: &Snapshot) -> Option<usize> {
        let advisor = self.advisor.as_ref()?;
        if self.agent.experience() >= self.cfg.advice_experience_threshold
            || self.rng.r#gen::<f32>() >= self.cfg.advice_probability
        {
            return None;
        }
        let Advice::Plant { plant, col, reason, .. } = advisor.recommend(snap) else {
            return None;
        };
        let wanted = plant.to_lowercase();
        let card = snap.cards.iter().position(|c| c.is_ready() && c.name.to_lowercase().contains(&wanted))?;
        let action = Action::place(card, col)?;
        self.note(format!("knowledge: {reason}"));
        Some(action.code())
    }

    /// Send the command for `code` and return its immediate reward.
    fn execute(&mut self, code: usize, snap: &Snapshot) -> f32 {
        let c = self.rewards.config().clone();
        match Action::from_code(code) {
            None => c.invalid_card,
            Some(Action::Wait) => c.wait_step,
            Some(Action::Collect) => {
                if snap.suns.is_empty() {
                    return 0.0;
                }
                self.send(Command::CollectAllSuns);
                let reward = snap.suns.len() as f32 * c.collect_per_pickup;
                self.note(format!("collected {} suns (+{reward})", snap.suns.len()));
                reward
            }
            Some(Action::Place { card, col }) => {
                let Some(card_state) = snap.cards.get(card).filter(|c| c.is_ready()) else {
                    debug!(card, "placement references an unusable card");
                    return c.invalid_card;
                };
                let Some(row) = select_row(&card_state.name, col as i32, snap) else {
                    return c.no_free_row;
                };
                self.send(Command::PlacePlant { card_index: card, row, col: col as i32 });
                self.plants_placed += 1;
                let placed = self.rewards.score_placement(&card_state.name, row, col as i32, snap);
                self.note(format!("placed {} at ({row}, {col}) ({:+})", card_state.name, placed.reward));
                placed.reward
            }
        }
    }

    fn on_game_end(&mut self, won: bool, stats: GameEndStats) -> EndAction {
        let outcome = if won { "victory" } else { "defeat" };
        self.note(outcome.to_string());

        if let Some(prev) = self.pending.take() {
            let terminal = if won { self.rewards.config().win_game } else { self.rewards.config().lose_game };
            let last = GameInput::from_snapshot(self.cache.latest()).to_vec();
            self.store(prev.state, prev.action, prev.immediate + terminal, last, true);
        }

        let kills = stats.zombies_killed.unwrap_or(self.zombies_killed);
        let plants = stats.plants_placed.unwrap_or(self.plants_placed);
        self.tracker.record_episode(won, self.episode_reward, kills, plants, stats.extra());
        let eps = self.agent.epsilon().min(self.tracker.epsilon());
        self.agent.set_epsilon(eps);

        let loss = self.agent.train();
        info!(won, loss, episode_reward = self.episode_reward, "post-game training");
        if let Some(storage) = &self.storage {
            if let Err(e) = self.agent.save(storage.as_ref()) {
                warn!(error = %e, "model save failed");
            }
        }

        if won {
            self.consecutive_retries = 0;
            self.stop();
            return EndAction::Stopped;
        }
        if !self.is_active() {
            return EndAction::Idle;
        }
        if self.consecutive_retries >= self.cfg.max_consecutive_retries {
            warn!(retries = self.consecutive_retries, "retry limit reached");
            self.stop();
            return EndAction::Stopped;
        }
        self.consecutive_retries += 1;
        self.note(format!("retrying level in {} ms", self.cfg.retry_delay_ms));
        EndAction::RetryAfter(Duration::from_millis(self.cfg.retry_delay_ms))
    }

    /// Fires after the retry delay; a loop stopped meanwhile stays stopped.
    pub fn restart_level(&mut self) {
        if !self.is_active() {
            return;
        }
        self.reset_episode();
        self.send(Command::RestartLevel);
    }

    fn reset_episode(&mut self) {
        self.episode_reward = 0.0;
        self.plants_placed = 0;
        self.zombies_killed = 0;
        self.pending = None;
    }

    pub fn status(&self) -> PlayerStatus {
        PlayerStatus {
            state: self.state,
            episode_reward: self.episode_reward,
            plants_placed: self.plants_placed,
            zombies_killed: self.zombies_killed,
            epsilon: self.agent.epsilon(),
            experience: self.agent.experience(),
            train_steps: self.agent.train_steps(),
            consecutive_retries: self.consecutive_retries,
            action_log: self.action_log.iter().cloned().collect(),
        }
    }

    /// Value estimates for the most recent state, if one has been seen.
    pub fn q_values(&self) -> Option<Vec<f32>> {
        self.last_state.as_ref().map(|s| self.agent.predict(s))
    }

    fn send(&mut self, cmd: Command) {
        match &mut self.boundary {
            Some(b) => b.send(cmd),
            None => debug!(?cmd, "no game boundary, dropping command"),
        }
    }

    fn note(&mut self, message: String) {
        info!("{message}");
        self.action_log.push_back(LogEntry { time: Local::now(), message });
        while self.action_log.len() > self.cfg.action_log_len {
            self.action_log.pop_front();
        }
    }
}

fn sanitize_speed(speed: f32) -> f32 {
    if speed.is_finite() && speed > 0.0 { speed.clamp(MIN_SPEED, MAX_SPEED) } else { 1.0 }
}

/// Row for a plant going into `col`: free cells only, highest heuristic
/// score first, lowest row on ties. `None` when the column is full.
pub fn select_row(plant_name: &str, col: i32, snap: &Snapshot) -> Option<i32> {
    if !(1..=COLS as i32).contains(&col) {
        return None;
    }
    let kind = PlantKind::classify(plant_name);
    let mut best: Option<(i32, i32)> = None;

    for row in 1..=ROWS as i32 {
        if snap.is_occupied(row, col) {
            continue;
        }
        let mut score = 0;
        if kind != PlantKind::Economy {
            score += snap.zombies_in_row(row).count() as i32 * 10;
        }
        if kind == PlantKind::Economy
            && col <= 2
            && !snap.plants_in_row(row).any(|p| PlantKind::classify(&p.name) == PlantKind::Economy)
        {
            score += 20;
        }
        if kind == PlantKind::Wall {
            score += (COLS as i32 - col) * 2;
        }
        if best.is_none_or(|(_, s)| score > s) {
            best = Some((row, score));
        }
    }
    best.map(|(row, _)| row)
}
