//! Additive reward shaping.
//!
//! The per-tick reward is a sum of independent named terms computed from the
//! previous snapshot, the current snapshot and the action taken. Placement is
//! scored separately at the moment a plant goes down.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::action::Action;
use crate::catalog::{self, PlantKind};
use crate::snapshot::{EntityId, ROWS, Snapshot, Zombie};

/// Reward constants. The shape of each rule is fixed; the numbers are tunable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardConfig {
    pub win_game: f32,
    pub lose_game: f32,

    pub kill_zombie: f32,
    pub zombie_critical: f32, // per zombie at or inside critical_col
    pub zombie_near: f32,     // per zombie at or inside near_col
    pub critical_col: f32,
    pub near_col: f32,

    pub collect_sun: f32,
    pub miss_sun: f32,
    pub pickup_backlog_margin: usize,

    pub lane_undefended: f32,
    pub all_lanes_covered: f32,

    pub wait_critical: f32,
    pub wait_with_pickups: f32,
    pub wait_for_economy: f32,
    pub wait_danger_col: f32,

    pub place_base: f32,
    pub economy_back: f32,
    pub economy_forward: f32,
    pub economy_early: f32,
    pub early_plant_count: usize,
    pub ranged_hot_row: f32,
    pub ranged_per_zombie: f32,
    pub ranged_empty_row: f32,
    pub synergy: f32,
    pub new_lane_coverage: f32,
    pub wall_front: f32,
    pub wall_back: f32,
    pub instant_multi: f32,
    pub instant_wasted: f32,
    pub instant_radius: f32,
    pub instant_reach_col: f32,
    pub instant_min_targets: usize,
    pub mine_good: f32,
    pub mine_idle: f32,
    pub mine_reach_col: f32,

    // immediate rewards assigned by the decision loop
    pub collect_per_pickup: f32,
    pub wait_step: f32,
    pub invalid_card: f32,
    pub no_free_row: f32,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            win_game: 200.0,
            lose_game: -150.0,

            kill_zombie: 15.0,
            zombie_critical: -8.0,
            zombie_near: -2.5,
            critical_col: 2.0,
            near_col: 3.0,

            collect_sun: 3.0,
            miss_sun: -5.0,
            pickup_backlog_margin: 3,

            lane_undefended: -6.0,
            all_lanes_covered: 15.0,

            wait_critical: -15.0,
            wait_with_pickups: -3.0,
            wait_for_economy: 1.0,
            wait_danger_col: 4.0,

            place_base: 5.0,
            economy_back: 15.0,
            economy_forward: -8.0,
            economy_early: 20.0,
            early_plant_count: 3,
            ranged_hot_row: 12.0,
            ranged_per_zombie: 3.0,
            ranged_empty_row: -3.0,
            synergy: 5.0,
            new_lane_coverage: 10.0,
            wall_front: 18.0,
            wall_back: -5.0,
            instant_multi: 25.0,
            instant_wasted: -15.0,
            instant_radius: 2.0,
            instant_reach_col: 6.0,
            instant_min_targets: 3,
            mine_good: 10.0,
            mine_idle: -4.0,
            mine_reach_col: 7.0,

            collect_per_pickup: 2.0,
            wait_step: -1.0,
            invalid_card: -5.0,
            no_free_row: -2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TermKind {
    Kill,
    Threat,
    Economy,
    Coverage,
    Timing,
}

/// One named contribution to the tick reward.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Term {
    pub kind: TermKind,
    pub reward: f32,
    pub reasons: Vec<String>,
}

impl Term {
    fn new(kind: TermKind) -> Self {
        Self { kind, reward: 0.0, reasons: Vec::new() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RewardReport {
    pub total: f32,
    pub breakdown: Vec<Term>, // non-zero terms only
    pub zombies_killed: u32,
    pub pickups_collected: u32,
}

impl RewardReport {
    pub fn term(&self, kind: TermKind) -> Option<&Term> {
        self.breakdown.iter().find(|t| t.kind == kind)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlacementReward {
    pub reward: f32,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RewardModel {
    cfg: RewardConfig,
}

impl RewardModel {
    pub fn new(cfg: RewardConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &RewardConfig {
        &self.cfg
    }

    /// Terms that need `prev` contribute nothing when it is absent.
    pub fn score(&self, prev: Option<&Snapshot>, curr: &Snapshot, action: Action) -> RewardReport {
        self.score_with_timing(prev, curr, curr, action)
    }

    /// Reward for `action` chosen on `decided_on` and followed by `observed`.
    /// The timing term judges the decision state, not the one after it.
    pub fn score_step(&self, decided_on: &Snapshot, observed: &Snapshot, action: Action) -> RewardReport {
        self.score_with_timing(Some(decided_on), observed, decided_on, action)
    }

    fn score_with_timing(
        &self,
        prev: Option<&Snapshot>,
        curr: &Snapshot,
        timing_on: &Snapshot,
        action: Action,
    ) -> RewardReport {
        let mut report = RewardReport::default();
        let mut terms = Vec::with_capacity(5);

        if let Some(prev) = prev {
            let (kill, killed) = self.kill_term(prev, curr);
            report.zombies_killed = killed;
            terms.push(kill);
            let (economy, collected) = self.economy_term(prev, curr);
            report.pickups_collected = collected;
            terms.push(economy);
        }
        terms.push(self.threat_term(curr));
        terms.push(self.coverage_term(curr));
        terms.push(self.timing_term(action, timing_on));

        for t in terms {
            if t.reward != 0.0 {
                report.total += t.reward;
                report.breakdown.push(t);
            }
        }
        report
    }

    /// Reward for putting `plant_name` at (`row`, `col`) given the state at placement time.
    pub fn score_placement(&self, plant_name: &str, row: i32, col: i32, snap: &Snapshot) -> PlacementReward {
        let c = &self.cfg;
        let mut reward = c.place_base;
        let mut reasons = Vec::new();
        let colf = col as f32;

        let row_zombies: Vec<&Zombie> = snap.zombies_in_row(row).collect();
        let nearest = snap.nearest_zombie_col(row);
        let kind = PlantKind::classify(plant_name);

        match kind {
            PlantKind::Economy => {
                if col <= 2 {
                    reward += c.economy_back;
                    reasons.push("economy plant in safe column".to_string());
                } else if col > 3 {
                    reward += c.economy_forward;
                    reasons.push("economy plant too far forward".to_string());
                }
                if snap.plants.len() < c.early_plant_count {
                    reward += c.economy_early;
                    reasons.push("early economy boost".to_string());
                }
            }
            PlantKind::Ranged => {
                if row_zombies.is_empty() {
                    reward += c.ranged_empty_row;
                    reasons.push("attack in empty lane".to_string());
                } else {
                    reward += c.ranged_hot_row + row_zombies.len() as f32 * c.ranged_per_zombie;
                    reasons.push(format!("attack in lane with {} zombies", row_zombies.len()));
                }
                if snap.plants_in_row(row).any(|p| catalog::is_slowing(&p.name)) {
                    reward += c.synergy;
                    reasons.push("attack + slow synergy".to_string());
                }
                if !snap.plants_in_row(row).any(|p| catalog::is_ranged(&p.name)) {
                    reward += c.new_lane_coverage;
                    reasons.push("new lane coverage".to_string());
                }
            }
            PlantKind::Wall => match nearest {
                Some(n) if colf < n => {
                    reward += c.wall_front;
                    reasons.push("wall protecting lane".to_string());
                }
                _ if col <= 2 => {
                    reward += c.wall_back;
                    reasons.push("wall too far back".to_string());
                }
                _ => {}
            },
            PlantKind::Instant => match nearest {
                Some(n) if n <= c.instant_reach_col => {
                    let in_range =
                        row_zombies.iter().filter(|z| (z.col - colf).abs() <= c.instant_radius).count();
                    if in_range >= c.instant_min_targets {
                        reward += c.instant_multi;
                        reasons.push(format!("instant hits {in_range} zombies"));
                    } else if in_range == 0 {
                        reward += c.instant_wasted;
                        reasons.push("instant wasted".to_string());
                    }
                }
                _ => {
                    reward += c.instant_wasted;
                    reasons.push("no targets for instant".to_string());
                }
            },
            PlantKind::Mine => match nearest {
                Some(n) if n <= c.mine_reach_col && n > colf => {
                    reward += c.mine_good;
                    reasons.push("mine in zombie path".to_string());
                }
                None => {
                    reward += c.mine_idle;
                    reasons.push("mine with no target".to_string());
                }
                _ => {}
            },
            PlantKind::Other => {}
        }

        PlacementReward { reward, reasons }
    }

    /// Zombies present in `prev` and gone from `curr`. Matched by id when
    /// every zombie carries one, otherwise by count and name.
    fn kill_term(&self, prev: &Snapshot, curr: &Snapshot) -> (Term, u32) {
        let mut term = Term::new(TermKind::Kill);
        let killed = killed_zombies(prev, curr);
        if killed.is_empty() {
            return (term, 0);
        }

        term.reward += killed.len() as f32 * self.cfg.kill_zombie;
        term.reasons.push(format!("killed {} zombies", killed.len()));
        for z in &killed {
            if let Some((kind, bonus)) = catalog::tough_bonus(&z.name) {
                term.reward += bonus;
                term.reasons.push(format!("bonus: {kind}"));
            }
        }
        (term, killed.len() as u32)
    }

    /// Per-zombie penalty for proximity to the defended edge. Not capped.
    fn threat_term(&self, curr: &Snapshot) -> Term {
        let mut term = Term::new(TermKind::Threat);
        for z in &curr.zombies {
            if z.col <= self.cfg.critical_col {
                term.reward += self.cfg.zombie_critical;
                term.reasons.push(format!("zombie critical at col {}", z.col));
            } else if z.col <= self.cfg.near_col {
                term.reward += self.cfg.zombie_near;
            }
        }
        term
    }

    fn economy_term(&self, prev: &Snapshot, curr: &Snapshot) -> (Term, u32) {
        let mut term = Term::new(TermKind::Economy);
        let before = prev.suns.len();
        let after = curr.suns.len();
        let mut collected = 0;

        if after < before {
            collected = (before - after) as u32;
            term.reward += collected as f32 * self.cfg.collect_sun;
            term.reasons.push(format!("collected {collected} suns"));
        }
        if after > before + self.cfg.pickup_backlog_margin {
            term.reward += self.cfg.miss_sun;
            term.reasons.push("too many suns on field".to_string());
        }
        (term, collected)
    }

    fn coverage_term(&self, curr: &Snapshot) -> Term {
        let mut term = Term::new(TermKind::Coverage);
        let mut threatened = 0;
        let mut uncovered = 0;

        for row in 1..=ROWS as i32 {
            if curr.zombies_in_row(row).next().is_none() {
                continue;
            }
            threatened += 1;
            if !curr.plants_in_row(row).any(|p| catalog::is_ranged(&p.name)) {
                uncovered += 1;
            }
        }

        if uncovered > 0 {
            term.reward += uncovered as f32 * self.cfg.lane_undefended;
            term.reasons.push(format!("{uncovered} undefended lanes"));
        } else if threatened > 0 {
            term.reward += self.cfg.all_lanes_covered;
            term.reasons.push("all threatened lanes defended".to_string());
        }
        term
    }

    fn timing_term(&self, action: Action, curr: &Snapshot) -> Term {
        let mut term = Term::new(TermKind::Timing);
        if action != Action::Wait {
            return term;
        }

        let zombies_close = curr.zombies.iter().any(|z| z.col <= self.cfg.wait_danger_col);
        let can_afford = curr.any_card_ready();

        if zombies_close && can_afford {
            term.reward += self.cfg.wait_critical;
            term.reasons.push("waiting during crisis".to_string());
        } else if !curr.suns.is_empty() {
            term.reward += self.cfg.wait_with_pickups;
            term.reasons.push("waiting with suns available".to_string());
        } else if !can_afford {
            term.reward += self.cfg.wait_for_economy;
            term.reasons.push("waiting for sun".to_string());
        }
        term
    }
}

fn killed_zombies<'a>(prev: &'a Snapshot, curr: &Snapshot) -> Vec<&'a Zombie> {
    let all_ids = prev.zombies.iter().chain(&curr.zombies).all(|z| z.id.is_some());
    if all_ids {
        let alive: Vec<&EntityId> = curr.zombies.iter().filter_map(|z| z.id.as_ref()).collect();
        return prev
            .zombies
            .iter()
            .filter(|z| z.id.as_ref().is_some_and(|id| !alive.contains(&id)))
            .collect();
    }

    // No ids: a count drop is a kill, attributed to names that lost members.
    let missing = prev.zombies.len().saturating_sub(curr.zombies.len());
    if missing == 0 {
        return Vec::new();
    }
    let mut remaining: HashMap<&str, usize> = HashMap::new();
    for z in &curr.zombies {
        *remaining.entry(z.name.as_str()).or_default() += 1;
    }
    let mut by_name = Vec::new();
    let mut unnamed = Vec::new();
    for z in &prev.zombies {
        match remaining.get_mut(z.name.as_str()) {
            Some(n) if *n > 0 => *n -= 1,
            _ => by_name.push(z),
        }
        unnamed.push(z);
    }
    by_name.truncate(missing);
    // pad with arbitrary earlier zombies if names did not explain the drop
    let mut i = 0;
    while by_name.len() < missing && i < unnamed.len() {
        if !by_name.iter().any(|k| std::ptr::eq(*k, unnamed[i])) {
            by_name.push(unnamed[i]);
        }
        i += 1;
    }
    by_name
}
