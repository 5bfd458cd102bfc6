//! Observable game state as reported by the host, plus the cache that merges
//! partial updates into one latest-known snapshot.

use serde::{Deserialize, Serialize};

pub const ROWS: usize = 5; // lawn rows
pub const COLS: usize = 9; // lawn columns

/// Seed card in the host's card tray.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CardState {
    #[serde(deserialize_with = "lenient::text")]
    pub name: String,
    #[serde(deserialize_with = "lenient::count")]
    pub cost: u32,
    #[serde(alias = "canAfford", deserialize_with = "lenient::flag")]
    pub affordable: bool,
    #[serde(alias = "isCooldown", deserialize_with = "lenient::flag")]
    pub on_cooldown: bool,
}

impl CardState {
    /// Card can be played right now.
    pub fn is_ready(&self) -> bool {
        self.affordable && !self.on_cooldown
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Plant {
    #[serde(deserialize_with = "lenient::coord")]
    pub row: i32, // 1-based
    #[serde(deserialize_with = "lenient::coord")]
    pub col: i32, // 1-based
    #[serde(deserialize_with = "lenient::text")]
    pub name: String,
}

/// Host entity id; the host sends either numbers or strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityId {
    Num(i64),
    Text(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Zombie {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<EntityId>,
    #[serde(deserialize_with = "lenient::coord")]
    pub row: i32,
    #[serde(deserialize_with = "lenient::real")]
    pub col: f32, // zombies move smoothly, so the column is fractional
    #[serde(deserialize_with = "lenient::text")]
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient::maybe_real")]
    pub hp: Option<f32>,
}

/// Uncollected sun on the field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Pickup {
    #[serde(deserialize_with = "lenient::real")]
    pub x: f32,
    #[serde(deserialize_with = "lenient::real")]
    pub y: f32,
    #[serde(deserialize_with = "lenient::count")]
    pub value: u32,
}

impl Default for Pickup {
    fn default() -> Self {
        Self { x: 0.0, y: 0.0, value: 25 }
    }
}

/// One immutable observation. Missing fields deserialize to zero/empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Snapshot {
    pub sun: u32,
    pub cards: Vec<CardState>,
    pub plants: Vec<Plant>,
    pub zombies: Vec<Zombie>,
    pub suns: Vec<Pickup>,
    pub is_playing: bool,
    pub is_sun_free: bool,
    pub rows: usize,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            sun: 0,
            cards: Vec::new(),
            plants: Vec::new(),
            zombies: Vec::new(),
            suns: Vec::new(),
            is_playing: false,
            is_sun_free: false,
            rows: ROWS,
        }
    }
}

impl Snapshot {
    pub fn zombies_in_row(&self, row: i32) -> impl Iterator<Item = &Zombie> + '_ {
        self.zombies.iter().filter(move |z| z.row == row)
    }

    pub fn plants_in_row(&self, row: i32) -> impl Iterator<Item = &Plant> + '_ {
        self.plants.iter().filter(move |p| p.row == row)
    }

    pub fn is_occupied(&self, row: i32, col: i32) -> bool {
        self.plants.iter().any(|p| p.row == row && p.col == col)
    }

    /// At least one card is affordable and off cooldown.
    pub fn any_card_ready(&self) -> bool {
        self.cards.iter().any(CardState::is_ready)
    }

    /// Column of the leftmost zombie in `row`.
    pub fn nearest_zombie_col(&self, row: i32) -> Option<f32> {
        self.zombies_in_row(row).map(|z| z.col).reduce(f32::min)
    }
}

/// Payload of a `gameStatsUpdate` message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StatsUpdate {
    #[serde(deserialize_with = "lenient::count")]
    pub sun_count: u32,
    #[serde(deserialize_with = "lenient::list")]
    pub cards: Vec<CardState>,
    #[serde(deserialize_with = "lenient::flag")]
    pub is_playing: bool,
    #[serde(deserialize_with = "lenient::flag")]
    pub is_sun_free: bool,
}

/// Payload of a `gameMapUpdate` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MapUpdate {
    #[serde(deserialize_with = "lenient::list")]
    pub plants: Vec<Plant>,
    #[serde(deserialize_with = "lenient::list")]
    pub zombies: Vec<Zombie>,
    #[serde(deserialize_with = "lenient::count")]
    pub rows: usize,
}

impl Default for MapUpdate {
    fn default() -> Self {
        Self { plants: Vec::new(), zombies: Vec::new(), rows: ROWS }
    }
}

/// Payload of a `sunTrackerUpdate` message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PickupUpdate {
    #[serde(deserialize_with = "lenient::list")]
    pub suns: Vec<Pickup>,
}

/// Field readers for host payloads. The host reads some values out of the
/// page, so `null`, floats and numeric strings all show up; anything
/// unusable reads as zero/empty instead of failing the whole message.
mod lenient {
    use serde::de::IgnoredAny;
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Flag(bool),
        Int(i64),
        Float(f64),
        Text(String),
        Other(IgnoredAny),
    }

    fn number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
        let v = match Raw::deserialize(d)? {
            Raw::Int(v) => Some(v as f64),
            Raw::Float(v) => Some(v),
            Raw::Text(s) => s.trim().parse().ok(),
            Raw::Flag(_) | Raw::Other(_) => None,
        };
        Ok(v.filter(|v: &f64| v.is_finite()))
    }

    /// Non-negative integer; float-to-int casts saturate.
    pub fn count<'de, D, T>(d: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: TryFrom<u64> + Default,
    {
        let v = number(d)?.map(|v| v as u64).unwrap_or(0);
        Ok(T::try_from(v).unwrap_or_default())
    }

    pub fn coord<'de, D: Deserializer<'de>>(d: D) -> Result<i32, D::Error> {
        Ok(number(d)?.map(|v| v as i32).unwrap_or(0))
    }

    pub fn real<'de, D: Deserializer<'de>>(d: D) -> Result<f32, D::Error> {
        Ok(number(d)?.map(|v| v as f32).unwrap_or(0.0))
    }

    pub fn maybe_real<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f32>, D::Error> {
        Ok(number(d)?.map(|v| v as f32))
    }

    pub fn flag<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
        Ok(match Raw::deserialize(d)? {
            Raw::Flag(b) => b,
            Raw::Int(v) => v != 0,
            _ => false,
        })
    }

    pub fn text<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        Ok(match Raw::deserialize(d)? {
            Raw::Text(s) => s,
            _ => String::new(),
        })
    }

    pub fn list<'de, D, T>(d: D) -> Result<Vec<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de>,
    {
        Ok(Option::<Vec<T>>::deserialize(d)?.unwrap_or_default())
    }
}

/// Latest-known state. Updates arrive in any order and each one only
/// overwrites the fields it carries.
#[derive(Debug, Default)]
pub struct SnapshotCache {
    latest: Snapshot,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply_stats(&mut self, u: StatsUpdate) {
        self.latest.sun = u.sun_count;
        self.latest.cards = u.cards;
        self.latest.is_playing = u.is_playing;
        self.latest.is_sun_free = u.is_sun_free;
    }

    pub fn apply_map(&mut self, u: MapUpdate) {
        self.latest.plants = u.plants;
        self.latest.zombies = u.zombies;
        self.latest.rows = if u.rows == 0 { ROWS } else { u.rows };
    }

    pub fn apply_pickups(&mut self, u: PickupUpdate) {
        self.latest.suns = u.suns;
    }

    pub fn latest(&self) -> &Snapshot {
        &self.latest
    }

    /// Owned copy of the current state, detached from later updates.
    pub fn capture(&self) -> Snapshot {
        self.latest.clone()
    }

    pub fn clear(&mut self) {
        self.latest = Snapshot::default();
    }
}
