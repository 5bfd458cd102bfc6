//! State encoder: a snapshot becomes a fixed 145-float vector (three 5x9
//! board layers, normalized sun, one ready flag per card slot).

use crate::catalog::PlantKind;
use crate::snapshot::{COLS, ROWS, Snapshot};

pub const LAYERS: usize = 3; // plant type, zombie danger, reserved
pub const CARD_SLOTS: usize = 9; // card flags tracked in the state
pub const GLOBAL_FEATURES: usize = 1 + CARD_SLOTS;
pub const STATE_SIZE: usize = ROWS * COLS * LAYERS + GLOBAL_FEATURES; // 145

const DEFAULT_ZOMBIE_HP: f32 = 200.0;

pub type StateVector = [f32; STATE_SIZE];

/// Snapshot -> fixed-length feature vector.
pub struct GameInput;

impl GameInput {
    /// Layout: plant layer, danger layer, reserved layer (each row-major 5x9),
    /// then normalized sun and one ready flag per card slot.
    pub fn from_snapshot(snap: &Snapshot) -> StateVector {
        let mut plant_grid = [[0.0f32; COLS]; ROWS];
        let mut danger_grid = [[0.0f32; COLS]; ROWS];
        let reserved_grid = [[0.0f32; COLS]; ROWS];

        for p in &snap.plants {
            if let (Some(r), Some(c)) = (cell_index(p.row, ROWS), cell_index(p.col, COLS)) {
                plant_grid[r][c] = PlantKind::classify(&p.name).grid_code();
            }
        }

        for z in &snap.zombies {
            let Some(r) = cell_index(z.row, ROWS) else { continue };
            // smooth position snapped to a column bucket
            let col = if z.col.is_finite() { z.col.floor().clamp(1.0, COLS as f32) } else { 1.0 };
            let hp = z.hp.filter(|hp| hp.is_finite()).unwrap_or(DEFAULT_ZOMBIE_HP);
            danger_grid[r][col as usize - 1] += hp / 1000.0;
        }

        let mut input = [0.0f32; STATE_SIZE];
        let mut i = 0;
        for row in &plant_grid {
            for &v in row {
                input[i] = v;
                i += 1;
            }
        }
        for row in &danger_grid {
            for &v in row {
                input[i] = v.min(1.0);
                i += 1;
            }
        }
        for row in &reserved_grid {
            for &v in row {
                input[i] = v;
                i += 1;
            }
        }

        input[i] = (snap.sun as f32 / 1000.0).min(1.0);
        i += 1;

        for slot in 0..CARD_SLOTS {
            let ready = snap.cards.get(slot).is_some_and(|c| c.is_ready());
            input[i + slot] = if ready { 1.0 } else { 0.0 };
        }

        input
    }

    /// Pad with zeros or truncate a foreign vector to the state length.
    pub fn fit(raw: &[f32]) -> StateVector {
        let mut input = [0.0f32; STATE_SIZE];
        let n = raw.len().min(STATE_SIZE);
        input[..n].copy_from_slice(&raw[..n]);
        input
    }
}

/// 1-based board coordinate -> 0-based index, `None` when off the board.
fn cell_index(v: i32, size: usize) -> Option<usize> {
    (1..=size as i32).contains(&v).then(|| (v - 1) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{CardState, Plant, Zombie};

    const DANGER: usize = ROWS * COLS;
    const GLOBALS: usize = ROWS * COLS * LAYERS;

    #[test]
    fn empty_snapshot_has_fixed_length() {
        let v = GameInput::from_snapshot(&Snapshot::default());
        assert_eq!(v.len(), 145);
        assert!(v.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn plants_land_in_their_cell_and_out_of_range_is_dropped() {
        let snap = Snapshot {
            plants: vec![
                Plant { row: 1, col: 1, name: "SunFlower".into() },
                Plant { row: 5, col: 9, name: "WallNut".into() },
                Plant { row: 6, col: 1, name: "Peashooter".into() },
                Plant { row: 0, col: 3, name: "Peashooter".into() },
            ],
            ..Default::default()
        };
        let v = GameInput::from_snapshot(&snap);
        assert_eq!(v[0], 0.2);
        assert_eq!(v[4 * COLS + 8], 0.6);
        assert_eq!(v[..DANGER].iter().filter(|&&x| x != 0.0).count(), 2);
    }

    #[test]
    fn zombie_danger_sums_and_caps() {
        let snap = Snapshot {
            zombies: vec![
                Zombie { row: 2, col: 3.7, hp: Some(400.0), ..Default::default() },
                Zombie { row: 2, col: 3.1, hp: Some(300.0), ..Default::default() },
                Zombie { row: 3, col: 12.0, hp: Some(5000.0), ..Default::default() },
                Zombie { row: 4, col: -2.0, hp: None, ..Default::default() },
            ],
            ..Default::default()
        };
        let v = GameInput::from_snapshot(&snap);
        assert!((v[DANGER + COLS + 2] - 0.7).abs() < 1e-6);
        assert_eq!(v[DANGER + 2 * COLS + 8], 1.0); // clamped to col 9, capped at 1
        assert!((v[DANGER + 3 * COLS] - 0.2).abs() < 1e-6); // clamped to col 1, default hp
    }

    #[test]
    fn globals_hold_sun_and_first_nine_card_flags() {
        let ready = CardState { name: "SunFlower".into(), cost: 50, affordable: true, on_cooldown: false };
        let mut cards = vec![ready.clone(); 12];
        cards[1].on_cooldown = true;
        cards[2].affordable = false;
        let snap = Snapshot { sun: 2500, cards, ..Default::default() };
        let v = GameInput::from_snapshot(&snap);
        assert_eq!(v[GLOBALS], 1.0);
        assert_eq!(&v[GLOBALS + 1..GLOBALS + 4], &[1.0, 0.0, 0.0]);
        assert_eq!(v[STATE_SIZE - 1], 1.0);

        let v = GameInput::from_snapshot(&Snapshot { sun: 250, cards: vec![ready], ..Default::default() });
        assert_eq!(v[GLOBALS], 0.25);
        assert_eq!(v[GLOBALS + 2], 0.0); // missing slot
    }

    #[test]
    fn fit_pads_and_truncates() {
        let short = GameInput::fit(&[1.0, 2.0]);
        assert_eq!(short[1], 2.0);
        assert_eq!(short[2], 0.0);
        let long = GameInput::fit(&vec![3.0; 200]);
        assert_eq!(long.len(), STATE_SIZE);
        assert_eq!(long[STATE_SIZE - 1], 3.0);
    }
}
