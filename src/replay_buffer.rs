//! Experience replay: a bounded FIFO of transitions sampled uniformly
//! with replacement.

use std::collections::VecDeque;

use rand::Rng;

/// One experience tuple (s, a, r, s', done).
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: Vec<f32>,
    pub action: usize,
    pub reward: f32,
    pub next_state: Vec<f32>,
    pub done: bool,
}

/// Bounded FIFO replay memory. Past capacity the oldest entry is evicted.
#[derive(Debug, Clone)]
pub struct ReplayMemory {
    buffer: VecDeque<Transition>,
    capacity: usize,
}

impl ReplayMemory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { buffer: VecDeque::with_capacity(capacity), capacity }
    }

    /// add new transition
    pub fn store(&mut self, transition: Transition) {
        if self.buffer.len() == self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(transition);
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// are there at least batch_size elements
    pub fn is_ready(&self, batch_size: usize) -> bool {
        self.buffer.len() >= batch_size
    }

    /// Uniform sample with replacement. Returns everything stored when fewer
    /// than `n` transitions are held.
    pub fn sample_batch<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Vec<&Transition> {
        if self.buffer.len() < n {
            return self.buffer.iter().collect();
        }
        (0..n).map(|_| &self.buffer[rng.gen_range(0..self.buffer.len())]).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Transition> + '_ {
        self.buffer.iter()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
