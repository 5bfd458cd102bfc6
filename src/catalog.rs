//! Coarse plant and zombie categories, derived from display names by substring.

/// Plant role buckets used by the encoder and the reward model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlantKind {
    Economy,
    Ranged,
    Wall,
    Mine,
    Instant,
    Other,
}

const ECONOMY: &[&str] = &["Sun", "Flower"];
const RANGED: &[&str] = &[
    "Pea", "Repeater", "Threepeater", "Gatling", "Snow", "Cactus", "Starfruit", "Chomper", "Fume",
    "Gloom",
];
const WALL: &[&str] = &["Nut", "Wall", "Pumpkin"];
const MINE: &[&str] = &["Potato", "Mine"];
const INSTANT: &[&str] = &["Cherry", "Jalapeno", "Squash", "Doom", "Tangle"];
const SLOWING: &[&str] = &["Snow", "Winter"];

fn matches(name: &str, keys: &[&str]) -> bool {
    keys.iter().any(|k| name.contains(k))
}

impl PlantKind {
    /// First matching bucket wins, in declaration order.
    pub fn classify(name: &str) -> Self {
        if matches(name, ECONOMY) {
            PlantKind::Economy
        } else if matches(name, RANGED) {
            PlantKind::Ranged
        } else if matches(name, WALL) {
            PlantKind::Wall
        } else if matches(name, MINE) {
            PlantKind::Mine
        } else if matches(name, INSTANT) {
            PlantKind::Instant
        } else {
            PlantKind::Other
        }
    }

    /// Value written into the plant layer of the state vector.
    pub fn grid_code(self) -> f32 {
        match self {
            PlantKind::Economy => 0.2,
            PlantKind::Ranged => 0.4,
            PlantKind::Wall => 0.6,
            PlantKind::Mine => 0.8,
            PlantKind::Instant | PlantKind::Other => 1.0,
        }
    }
}

pub fn is_ranged(name: &str) -> bool {
    PlantKind::classify(name) == PlantKind::Ranged
}

pub fn is_slowing(name: &str) -> bool {
    matches(name, SLOWING)
}

/// Extra kill bonus for tougher zombie types.
const TOUGH_ZOMBIES: &[(&str, f32)] = &[
    ("Buckethead", 25.0),
    ("Conehead", 10.0),
    ("Football", 35.0),
    ("Gargantuar", 50.0),
    ("Pole", 15.0),
    ("Newspaper", 8.0),
    ("Screen", 20.0),
    ("Dancer", 30.0),
    ("Jack", 25.0),
];

/// Bonus for killing a zombie called `name`, if it is a known tough type.
pub fn tough_bonus(name: &str) -> Option<(&'static str, f32)> {
    TOUGH_ZOMBIES.iter().find(|(k, _)| name.contains(k)).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_common_plants() {
        assert_eq!(PlantKind::classify("SunFlower"), PlantKind::Economy);
        assert_eq!(PlantKind::classify("TwinSunflower"), PlantKind::Economy);
        assert_eq!(PlantKind::classify("Peashooter"), PlantKind::Ranged);
        assert_eq!(PlantKind::classify("SnowPea"), PlantKind::Ranged);
        assert_eq!(PlantKind::classify("WallNut"), PlantKind::Wall);
        assert_eq!(PlantKind::classify("PotatoMine"), PlantKind::Mine);
        assert_eq!(PlantKind::classify("CherryBomb"), PlantKind::Instant);
        assert_eq!(PlantKind::classify("LilyPad"), PlantKind::Other);
        assert_eq!(PlantKind::classify(""), PlantKind::Other);
    }

    #[test]
    fn snow_pea_is_ranged_and_slowing() {
        assert!(is_ranged("SnowPea"));
        assert!(is_slowing("SnowPea"));
        assert!(!is_slowing("Repeater"));
    }

    #[test]
    fn tough_bonus_by_substring() {
        assert_eq!(tough_bonus("BucketheadZombie"), Some(("Buckethead", 25.0)));
        assert_eq!(tough_bonus("Zombie"), None);
    }
}
