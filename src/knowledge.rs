//! Rule-of-thumb advisor consulted while the agent has little experience.

use crate::catalog::PlantKind;
use crate::snapshot::{ROWS, Snapshot};

#[derive(Debug, Clone, PartialEq)]
pub enum Advice {
    Plant { plant: &'static str, col: u8, row: Option<i32>, reason: &'static str },
    Wait { reason: &'static str },
}

/// Optional heuristic strategy injected into the decision loop.
pub trait Advisor: Send {
    fn recommend(&self, snap: &Snapshot) -> Advice;
}

#[derive(Debug, Clone)]
pub struct KnowledgeAdvisor {
    pub economy_target: usize, // stop suggesting economy past this many
    pub threat_col: f32,       // zombies at or inside this column threaten a lane
    pub economy_cost: u32,
    pub attacker_cost: u32,
}

impl Default for KnowledgeAdvisor {
    fn default() -> Self {
        Self { economy_target: 5, threat_col: 5.0, economy_cost: 50, attacker_cost: 100 }
    }
}

impl Advisor for KnowledgeAdvisor {
    fn recommend(&self, snap: &Snapshot) -> Advice {
        let economy = snap
            .plants
            .iter()
            .filter(|p| PlantKind::classify(&p.name) == PlantKind::Economy)
            .count();
        let covered = |row: i32| {
            snap.plants_in_row(row).any(|p| PlantKind::classify(&p.name) != PlantKind::Economy)
        };
        let threatened: Vec<i32> =
            snap.zombies.iter().filter(|z| z.col <= self.threat_col).map(|z| z.row).collect();

        if economy < self.economy_target && snap.sun >= self.economy_cost && threatened.is_empty() {
            return Advice::Plant { plant: "SunFlower", col: 1, row: None, reason: "need more economy" };
        }

        if snap.sun >= self.attacker_cost {
            if let Some(&row) = threatened.iter().find(|&&r| !covered(r)) {
                return Advice::Plant { plant: "Peashooter", col: 3, row: Some(row), reason: "defend threatened lane" };
            }
            if let Some(row) = (1..=ROWS as i32).find(|&r| !covered(r)) {
                return Advice::Plant { plant: "Peashooter", col: 3, row: Some(row), reason: "cover empty lane" };
            }
        }

        Advice::Wait { reason: "saving sun" }
    }
}
