//! agent: online/target networks, replay memory, epsilon-greedy policy,
//! TD learning, save/load

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::action::ACTION_COUNT;
use crate::db::{MODEL_KEY, Storage, StorageError};
use crate::game_input::STATE_SIZE;
use crate::log;
use crate::network::Net;
use crate::replay_buffer::{ReplayMemory, Transition};
use crate::utils::{argmax, argmax_over, has_non_finite, vec_stats};

/// Hyperparameters for the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub input_size: usize,       // state vector length
    pub output_size: usize,      // number of action codes
    pub hidden: Vec<usize>,      // hidden layer widths (tanh)
    pub gamma: f32,              // discount factor
    pub lr: f32,                 // Adam learning rate
    pub batch_size: usize,       // minibatch size
    pub capacity: usize,         // replay memory capacity
    pub epsilon: f32,            // initial epsilon
    pub epsilon_min: f32,        // epsilon floor
    pub epsilon_decay: f32,      // multiplicative decay per train step
    pub epsilon_after_load: f32, // epsilon once trained parameters are restored
    pub max_grad_norm: f32,      // global gradient clip
    pub seed: Option<u64>,       // RNG seed, entropy when unset
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            input_size: STATE_SIZE,
            output_size: ACTION_COUNT,
            hidden: vec![128, 128],
            gamma: 0.99,
            lr: 0.001,
            batch_size: 64,
            capacity: 10_000,
            epsilon: 1.0,
            epsilon_min: 0.05,
            epsilon_decay: 0.995,
            epsilon_after_load: 0.3,
            max_grad_norm: 1.0,
            seed: None,
        }
    }
}

impl AgentConfig {
    fn layer_sizes(&self) -> Vec<usize> {
        let mut sizes = Vec::with_capacity(self.hidden.len() + 2);
        sizes.push(self.input_size);
        sizes.extend(self.hidden.iter().copied());
        sizes.push(self.output_size);
        sizes
    }
}

/// DQN agent with a hard-synced target network.
pub struct DQNAgent {
    cfg: AgentConfig,
    online: Net, // trained every step, used for action selection
    target: Net, // bootstrap values only; written by whole copy
    memory: ReplayMemory,

    rng: StdRng, // epsilon-greedy + sampling
    epsilon: f32,
    train_steps: u64,

    // monitoring
    last_loss: f32,
}

impl DQNAgent {
    pub fn new(cfg: AgentConfig) -> Self {
        let mut rng = match cfg.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let online = Net::new(&cfg.layer_sizes(), &mut rng);
        let target = online.clone();
        let memory = ReplayMemory::new(cfg.capacity);
        let epsilon = cfg.epsilon;
        Self { cfg, online, target, memory, rng, epsilon, train_steps: 0, last_loss: 0.0 }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.cfg
    }

    pub fn epsilon(&self) -> f32 {
        self.epsilon
    }

    pub fn set_epsilon(&mut self, epsilon: f32) {
        self.epsilon = epsilon.clamp(0.0, 1.0);
    }

    /// Number of stored transitions.
    pub fn experience(&self) -> usize {
        self.memory.len()
    }

    pub fn train_steps(&self) -> u64 {
        self.train_steps
    }

    pub fn last_loss(&self) -> f32 {
        self.last_loss
    }

    pub fn online(&self) -> &Net {
        &self.online
    }

    pub fn target(&self) -> &Net {
        &self.target
    }

    pub fn memory_mut(&mut self) -> &mut ReplayMemory {
        &mut self.memory
    }

    /// Value estimates from the online network.
    pub fn predict(&self, state: &[f32]) -> Vec<f32> {
        debug_assert_eq!(state.len(), self.cfg.input_size, "state vector length");
        self.online.forward(state)
    }

    /// Epsilon-greedy over `valid` (the full action space when empty).
    pub fn select_action(&mut self, state: &[f32], epsilon: f32, valid: &[usize]) -> usize {
        if self.rng.r#gen::<f32>() < epsilon {
            return self.random_action(valid);
        }
        let q = self.predict(state);
        if has_non_finite(&q) {
            error!("Q contains NaN/Inf in select_action, falling back to random action");
            return self.random_action(valid);
        }
        if valid.is_empty() {
            return argmax(&q);
        }
        argmax_over(&q, valid).unwrap_or_else(|| argmax(&q))
    }

    fn random_action(&mut self, valid: &[usize]) -> usize {
        if valid.is_empty() {
            self.rng.gen_range(0..self.cfg.output_size)
        } else {
            valid[self.rng.gen_range(0..valid.len())]
        }
    }

    pub fn remember(&mut self, transition: Transition) {
        self.memory.store(transition);
    }

    /// One gradient step on a sampled minibatch. Returns the MSE loss, or 0
    /// when fewer than `batch_size` transitions are stored.
    pub fn train(&mut self) -> f32 {
        let n = self.cfg.batch_size;
        if n == 0 || !self.memory.is_ready(n) {
            return 0.0;
        }

        let batch = self.memory.sample_batch(n, &mut self.rng);
        let online = &self.online;
        let acts: Vec<Vec<Vec<f32>>> = batch.par_iter().map(|t| online.forward_cached(&t.state)).collect();
        let current: Vec<Vec<f32>> = acts.iter().map(|a| a.last().cloned().unwrap_or_default()).collect();
        let targets = build_targets(&self.target, self.cfg.gamma, &batch, &current);

        let elems = (batch.len() * self.cfg.output_size) as f32;
        let mut loss = 0.0f32;
        let mut td_errs = Vec::with_capacity(batch.len());
        self.online.zero_grad();

        for ((t, a), (q, y)) in batch.iter().zip(&acts).zip(current.iter().zip(&targets)) {
            if has_non_finite(q) || has_non_finite(y) {
                error!("NaN/Inf in Q(s,.) during train, skipping sample");
                continue;
            }
            let d_out: Vec<f32> = q.iter().zip(y).map(|(qv, yv)| 2.0 * (qv - yv) / elems).collect();
            loss += q.iter().zip(y).map(|(qv, yv)| (qv - yv) * (qv - yv)).sum::<f32>() / elems;
            if let (Some(qa), Some(ya)) = (q.get(t.action), y.get(t.action)) {
                td_errs.push(ya - qa);
            }
            self.online.backward_from_output_grad(a, &d_out);
        }

        if td_errs.is_empty() {
            warn!("train: batch had only bad samples, skipping update");
            return 0.0;
        }

        let grad_l2 = self.online.grad_l2_sum_all().sqrt();
        if !grad_l2.is_finite() {
            error!(grad_l2, "non-finite gradients before step, skipping update");
            self.online.zero_grad();
            return 0.0;
        }
        let scale = self.online.clip_grad_norm(self.cfg.max_grad_norm);
        self.online.step_adam(self.cfg.lr, 0.9, 0.999, 1e-8, scale);
        if self.online.non_finite_any() {
            error!("non-finite parameters right after Adam step");
        }

        self.epsilon = (self.epsilon * self.cfg.epsilon_decay).max(self.cfg.epsilon_min);
        self.train_steps += 1;
        self.last_loss = loss;

        let td = vec_stats(&td_errs);
        log::scalar(self.train_steps, "loss", loss);
        log::scalar(self.train_steps, "grad_norm", grad_l2);
        log::scalar(self.train_steps, "td_mean", td.mean);
        log::scalar(self.train_steps, "td_min", td.min);
        log::scalar(self.train_steps, "td_max", td.max);
        log::scalar(self.train_steps, "epsilon", self.epsilon);
        loss
    }

    /// Desired network outputs for `batch`: the online prediction with the
    /// taken action's entry replaced by its TD target.
    pub(crate) fn td_targets(&self, batch: &[&Transition]) -> Vec<Vec<f32>> {
        let current: Vec<Vec<f32>> = batch.par_iter().map(|t| self.online.forward(&t.state)).collect();
        build_targets(&self.target, self.cfg.gamma, batch, &current)
    }

    /// Hard copy online -> target.
    pub fn update_target(&mut self) {
        self.target.copy_from(&self.online);
        debug!(train_steps = self.train_steps, "target network synced");
    }

    pub fn save(&self, storage: &dyn Storage) -> Result<(), StorageError> {
        storage.save(MODEL_KEY, &self.online.to_json()?)?;
        info!(train_steps = self.train_steps, "model saved");
        Ok(())
    }

    /// Restore online parameters and reset target to them. A missing or
    /// unreadable value leaves the current parameters untouched.
    pub fn load(&mut self, storage: &dyn Storage) -> bool {
        let json = match storage.load(MODEL_KEY) {
            Ok(Some(json)) => json,
            Ok(None) => {
                info!("no saved model, starting fresh");
                return false;
            }
            Err(e) => {
                warn!(error = %e, "model load failed, starting fresh");
                return false;
            }
        };
        match Net::from_json(&json, &self.cfg.layer_sizes()) {
            Ok(net) => {
                self.online = net;
                self.target.copy_from(&self.online);
                self.epsilon = self.cfg.epsilon_after_load;
                info!(epsilon = self.epsilon, "model loaded");
                true
            }
            Err(e) => {
                warn!(error = %e, "saved model is corrupt, starting fresh");
                false
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn online_mut(&mut self) -> &mut Net {
        &mut self.online
    }
}

fn build_targets(target: &Net, gamma: f32, batch: &[&Transition], current: &[Vec<f32>]) -> Vec<Vec<f32>> {
    let next_best: Vec<f32> = batch
        .par_iter()
        .map(|t| {
            if t.done {
                0.0
            } else {
                target.forward(&t.next_state).into_iter().fold(f32::NEG_INFINITY, f32::max)
            }
        })
        .collect();

    batch
        .iter()
        .zip(current)
        .zip(next_best)
        .map(|((t, q), best)| {
            let mut y = q.clone();
            let td = if t.done { t.reward } else { t.reward + gamma * best };
            if let Some(slot) = y.get_mut(t.action) {
                *slot = td;
            }
            y
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStorage;

    const A: [f32; 2] = [1.0, 0.0];
    const B: [f32; 2] = [0.0, 1.0];

    fn toy_cfg() -> AgentConfig {
        AgentConfig {
            input_size: 2,
            output_size: 2,
            hidden: vec![16],
            gamma: 0.9,
            lr: 0.02,
            batch_size: 8,
            capacity: 64,
            epsilon: 0.0,
            epsilon_min: 0.0,
            epsilon_decay: 1.0,
            seed: Some(5),
            ..AgentConfig::default()
        }
    }

    fn wide_cfg() -> AgentConfig {
        AgentConfig { input_size: 4, output_size: 100, hidden: vec![8], seed: Some(1), ..AgentConfig::default() }
    }

    fn tr(s: [f32; 2], a: usize, r: f32, s2: [f32; 2], done: bool) -> Transition {
        Transition { state: s.to_vec(), action: a, reward: r, next_state: s2.to_vec(), done }
    }

    /// Output = bias only, so Q(s, k) = biases[k] for every state.
    fn flatten_output(agent: &mut DQNAgent, biases: impl Fn(usize) -> f32) {
        let layer = agent.online_mut().output_layer_mut().unwrap();
        layer.weights.iter_mut().for_each(|w| *w = 0.0);
        for (k, b) in layer.biases.iter_mut().enumerate() {
            *b = biases(k);
        }
    }

    #[test]
    fn full_exploration_stays_in_valid_set_and_is_uniform() {
        let mut agent = DQNAgent::new(wide_cfg());
        let valid = [4, 40, 99];
        let mut counts = [0usize; 3];
        for _ in 0..1000 {
            let a = agent.select_action(&[0.0; 4], 1.0, &valid);
            let i = valid.iter().position(|&v| v == a).expect("action outside valid set");
            counts[i] += 1;
        }
        for c in counts {
            assert!((250..420).contains(&c), "counts {counts:?}");
        }
    }

    #[test]
    fn greedy_picks_best_valid_action() {
        let mut agent = DQNAgent::new(wide_cfg());
        flatten_output(&mut agent, |k| k as f32);
        assert_eq!(agent.select_action(&[0.0; 4], 0.0, &[3, 50, 7]), 50);
        // global max (99) excluded
        assert_eq!(agent.select_action(&[0.0; 4], 0.0, &[3, 7]), 7);
        assert_eq!(agent.select_action(&[0.0; 4], 0.0, &[]), 99);
    }

    #[test]
    fn greedy_ties_keep_first_valid() {
        let mut agent = DQNAgent::new(wide_cfg());
        flatten_output(&mut agent, |_| 1.0);
        assert_eq!(agent.select_action(&[0.0; 4], 0.0, &[12, 5, 30]), 12);
    }

    #[test]
    fn random_over_empty_set_uses_whole_space() {
        let mut agent = DQNAgent::new(wide_cfg());
        for _ in 0..200 {
            assert!(agent.select_action(&[0.0; 4], 1.0, &[]) < 100);
        }
    }

    #[test]
    fn train_underflow_is_a_zero_loss_noop() {
        let mut agent = DQNAgent::new(toy_cfg());
        agent.remember(tr(A, 0, 1.0, B, false));
        let before = agent.online().layers().to_vec();
        assert_eq!(agent.train(), 0.0);
        assert_eq!(agent.online().layers(), &before[..]);
        assert_eq!(agent.train_steps(), 0);
    }

    #[test]
    fn td_target_bootstraps_from_target_network() {
        let mut agent = DQNAgent::new(toy_cfg());
        // push online away from target
        if let Some(layer) = agent.online_mut().output_layer_mut() {
            layer.biases.iter_mut().for_each(|b| *b += 3.0);
        }
        let t = tr(A, 1, 0.5, B, false);
        let y = agent.td_targets(&[&t]).remove(0);

        let from_target = 0.5 + 0.9 * agent.target().forward(&B).into_iter().fold(f32::MIN, f32::max);
        let from_online = 0.5 + 0.9 * agent.online().forward(&B).into_iter().fold(f32::MIN, f32::max);
        assert!((y[1] - from_target).abs() < 1e-5);
        assert!((y[1] - from_online).abs() > 1.0);
        // untouched entry keeps the online prediction
        assert_eq!(y[0], agent.predict(&A)[0]);

        agent.update_target();
        let y = agent.td_targets(&[&t]).remove(0);
        assert!((y[1] - from_online).abs() < 1e-5);
    }

    #[test]
    fn terminal_td_target_is_the_reward() {
        let agent = DQNAgent::new(toy_cfg());
        let t = tr(B, 0, -150.0, B, true);
        assert_eq!(agent.td_targets(&[&t])[0][0], -150.0);
    }

    fn train_toy(sync_every: Option<u64>) -> f32 {
        let mut agent = DQNAgent::new(toy_cfg());
        // phase 1: Q(B, .) -> 5
        for _ in 0..4 {
            agent.remember(tr(B, 0, 5.0, B, true));
            agent.remember(tr(B, 1, 5.0, B, true));
        }
        for _ in 0..600 {
            agent.train();
        }
        agent.update_target();

        // phase 2: B is terminal with 0; A --0--> B pays 1
        agent.memory_mut().clear();
        for _ in 0..4 {
            agent.remember(tr(A, 0, 1.0, B, false));
            agent.remember(tr(A, 1, 0.0, B, false));
            agent.remember(tr(B, 0, 0.0, B, true));
            agent.remember(tr(B, 1, 0.0, B, true));
        }
        for step in 1..=1500u64 {
            agent.train();
            if sync_every.is_some_and(|k| step % k == 0) {
                agent.update_target();
            }
        }
        agent.predict(&A)[0]
    }

    #[test]
    fn target_sync_changes_what_training_converges_to() {
        let synced = train_toy(Some(25));
        let frozen = train_toy(None);
        // synced: Q(A,0) -> 1 + 0.9 * 0; frozen target still says Q(B) ~ 5
        assert!(frozen > synced + 2.0, "frozen {frozen} synced {synced}");
        assert!((synced - 1.0).abs() < 1.0, "synced {synced}");
    }

    #[test]
    fn target_sync_is_idempotent() {
        let mut agent = DQNAgent::new(toy_cfg());
        for _ in 0..8 {
            agent.remember(tr(A, 0, 1.0, B, false));
        }
        agent.train();
        agent.update_target();
        let once = agent.target().layers().to_vec();
        agent.update_target();
        assert_eq!(agent.target().layers(), &once[..]);
        assert_eq!(agent.target().layers(), agent.online().layers());
    }

    #[test]
    fn epsilon_decays_per_train_step_to_floor() {
        let mut agent = DQNAgent::new(AgentConfig {
            epsilon: 0.06,
            epsilon_min: 0.05,
            epsilon_decay: 0.5,
            ..toy_cfg()
        });
        for _ in 0..8 {
            agent.remember(tr(A, 0, 1.0, B, true));
        }
        agent.train();
        assert_eq!(agent.epsilon(), 0.05);
    }

    #[test]
    fn save_then_load_restores_online_and_target() {
        let storage = MemoryStorage::new();
        let source = DQNAgent::new(toy_cfg());
        source.save(&storage).unwrap();

        let mut restored = DQNAgent::new(AgentConfig { seed: Some(77), ..toy_cfg() });
        assert_ne!(restored.online().layers(), source.online().layers());
        assert!(restored.load(&storage));
        assert_eq!(restored.online().layers(), source.online().layers());
        assert_eq!(restored.target().layers(), source.online().layers());
        assert_eq!(restored.epsilon(), 0.3);
    }

    #[test]
    fn load_miss_and_corruption_keep_parameters() {
        let storage = MemoryStorage::new();
        let mut agent = DQNAgent::new(toy_cfg());
        let before = agent.online().layers().to_vec();
        assert!(!agent.load(&storage));

        storage.save(MODEL_KEY, "not a model").unwrap();
        assert!(!agent.load(&storage));

        let other = DQNAgent::new(AgentConfig { hidden: vec![3], ..toy_cfg() });
        other.save(&storage).unwrap();
        assert!(!agent.load(&storage));

        assert_eq!(agent.online().layers(), &before[..]);
        assert_eq!(agent.epsilon(), 0.0);
    }
}
