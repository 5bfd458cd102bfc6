//! Discrete action space shared by the agent and the decision loop.
//!
//! Codes `0..98` place card `code / 9` at column `code % 9 + 1`,
//! `98` collects every pickup and `99` waits.

use std::fmt;

use crate::snapshot::{COLS, Snapshot};

pub const ACTION_COUNT: usize = 100; // fixed output size of the value network
pub const COLLECT: usize = 98;
pub const WAIT: usize = 99;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Place { card: usize, col: u8 },
    Collect,
    Wait,
}

impl Action {
    /// Placement action, or `None` when the pair falls outside the code space.
    pub fn place(card: usize, col: u8) -> Option<Self> {
        if !(1..=COLS as u8).contains(&col) {
            return None;
        }
        let code = card.checked_mul(COLS)?.checked_add(col as usize - 1)?;
        (code < COLLECT).then_some(Action::Place { card, col })
    }

    pub fn from_code(code: usize) -> Option<Self> {
        match code {
            WAIT => Some(Action::Wait),
            COLLECT => Some(Action::Collect),
            c if c < COLLECT => Some(Action::Place { card: c / COLS, col: (c % COLS) as u8 + 1 }),
            _ => None,
        }
    }

    pub fn code(self) -> usize {
        match self {
            Action::Place { card, col } => card * COLS + (col as usize - 1),
            Action::Collect => COLLECT,
            Action::Wait => WAIT,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Place { card, col } => write!(f, "Plant #{} at Col {}", card + 1, col),
            Action::Collect => write!(f, "Collect Suns"),
            Action::Wait => write!(f, "Wait"),
        }
    }
}

/// Every ready card at every column, collect when pickups exist, and wait.
pub fn valid_actions(snap: &Snapshot) -> Vec<usize> {
    let mut valid = Vec::new();
    for (card_index, card) in snap.cards.iter().enumerate() {
        if !card.is_ready() {
            continue;
        }
        for col in 1..=COLS as u8 {
            if let Some(a) = Action::place(card_index, col) {
                valid.push(a.code());
            }
        }
    }
    if !snap.suns.is_empty() {
        valid.push(COLLECT);
    }
    valid.push(WAIT);
    valid
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{CardState, Pickup};

    fn ready(name: &str) -> CardState {
        CardState { name: name.into(), cost: 50, affordable: true, on_cooldown: false }
    }

    #[test]
    fn place_codes_decode_back() {
        for card in 0..10 {
            for col in 1..=9u8 {
                let a = Action::place(card, col).unwrap();
                assert_eq!(Action::from_code(a.code()), Some(Action::Place { card, col }));
            }
        }
        assert_eq!(Action::from_code(98), Some(Action::Collect));
        assert_eq!(Action::from_code(99), Some(Action::Wait));
        assert_eq!(Action::from_code(100), None);
    }

    #[test]
    fn place_rejects_codes_that_collide_with_specials() {
        assert!(Action::place(10, 8).is_some()); // code 97
        assert!(Action::place(10, 9).is_none()); // would be 98
        assert!(Action::place(11, 1).is_none());
        assert!(Action::place(0, 0).is_none());
        assert!(Action::place(0, 10).is_none());
    }

    #[test]
    fn display_is_human_readable() {
        assert_eq!(Action::from_code(10).unwrap().to_string(), "Plant #2 at Col 2");
        assert_eq!(Action::Collect.to_string(), "Collect Suns");
        assert_eq!(Action::Wait.to_string(), "Wait");
    }

    #[test]
    fn valid_actions_skip_unready_cards() {
        let mut cooling = ready("Peashooter");
        cooling.on_cooldown = true;
        let snap = Snapshot { cards: vec![cooling, ready("SunFlower")], ..Default::default() };
        let valid = valid_actions(&snap);
        assert_eq!(valid.len(), 10);
        assert_eq!(valid[0], 9);
        assert_eq!(valid[8], 17);
        assert_eq!(*valid.last().unwrap(), WAIT);
        assert!(!valid.contains(&COLLECT));
    }

    #[test]
    fn collect_is_valid_only_with_pickups() {
        let snap = Snapshot { suns: vec![Pickup::default()], ..Default::default() };
        assert_eq!(valid_actions(&snap), vec![COLLECT, WAIT]);
    }
}
