//! World snapshots - the per-tick view of the tavern handed to the director.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::entities::ActorId;

const MINUTES_PER_HOUR: u64 = 60;
const MINUTES_PER_DAY: u64 = 24 * MINUTES_PER_HOUR;

/// Game clock. Ordering follows day, then hour, then minute.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct WorldTime {
    pub day: u32,
    pub hour: u8,
    pub minute: u8,
}

impl WorldTime {
    /// Create a new world time.
    pub fn new(day: u32, hour: u8, minute: u8) -> Self {
        Self { day, hour, minute }
    }

    /// Build a time from a count of minutes since day 0, 00:00.
    pub fn from_minutes(total: u64) -> Self {
        Self {
            day: (total / MINUTES_PER_DAY) as u32,
            hour: ((total % MINUTES_PER_DAY) / MINUTES_PER_HOUR) as u8,
            minute: (total % MINUTES_PER_HOUR) as u8,
        }
    }

    /// Minutes since day 0, 00:00.
    pub fn as_minutes(&self) -> u64 {
        self.day as u64 * MINUTES_PER_DAY + self.hour as u64 * MINUTES_PER_HOUR + self.minute as u64
    }

    /// The time `minutes` later.
    pub fn plus_minutes(&self, minutes: u64) -> Self {
        Self::from_minutes(self.as_minutes() + minutes)
    }

    /// Minutes elapsed since `earlier`; zero if `earlier` is in the future.
    pub fn minutes_since(&self, earlier: WorldTime) -> u64 {
        self.as_minutes().saturating_sub(earlier.as_minutes())
    }

    /// Absolute distance in minutes between two times.
    pub fn distance(&self, other: WorldTime) -> u64 {
        self.as_minutes().abs_diff(other.as_minutes())
    }
}

impl std::fmt::Display for WorldTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "day {} {:02}:{:02}", self.day, self.hour, self.minute)
    }
}

/// Flag value types for world flags and beat prerequisites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FlagValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl FlagValue {
    /// Create a string flag.
    pub fn text(value: impl Into<String>) -> Self {
        FlagValue::String(value.into())
    }
}

impl From<bool> for FlagValue {
    fn from(value: bool) -> Self {
        FlagValue::Bool(value)
    }
}

impl From<i64> for FlagValue {
    fn from(value: i64) -> Self {
        FlagValue::Int(value)
    }
}

impl From<&str> for FlagValue {
    fn from(value: &str) -> Self {
        FlagValue::String(value.to_string())
    }
}

/// Prerequisite key matched against the active location instead of a flag.
pub const LOCATION_KEY: &str = "location";

/// Read-only view of the tavern at a single tick.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WorldSnapshot {
    /// Current game time.
    pub time: WorldTime,

    /// Where the player currently is (e.g. "common_room", "upstairs").
    pub location: String,

    /// Actors present in the scene.
    pub present_actors: HashSet<ActorId>,

    /// Global flags and variables.
    pub flags: HashMap<String, FlagValue>,
}

impl WorldSnapshot {
    /// Create a new empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the time.
    pub fn at(mut self, time: WorldTime) -> Self {
        self.time = time;
        self
    }

    /// Set the active location.
    pub fn in_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    /// Mark an actor as present.
    pub fn with_actor(mut self, actor: ActorId) -> Self {
        self.present_actors.insert(actor);
        self
    }

    /// Set a flag.
    pub fn with_flag(mut self, key: impl Into<String>, value: FlagValue) -> Self {
        self.flags.insert(key.into(), value);
        self
    }

    /// Check if an actor is present.
    pub fn is_present(&self, actor: ActorId) -> bool {
        self.present_actors.contains(&actor)
    }

    /// Check a single prerequisite against this snapshot.
    ///
    /// The `location` key compares against the active location; every other key
    /// must name a flag holding an equal value.
    pub fn satisfies(&self, key: &str, expected: &FlagValue) -> bool {
        if key == LOCATION_KEY {
            return matches!(expected, FlagValue::String(loc) if *loc == self.location);
        }
        self.flags.get(key) == Some(expected)
    }

    /// Advance time by given minutes.
    pub fn advance_time(&mut self, minutes: u64) {
        self.time = self.time.plus_minutes(minutes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_world_time_minutes() {
        let time = WorldTime::new(1, 23, 30);
        assert_eq!(time.as_minutes(), 1440 + 23 * 60 + 30);
        assert_eq!(WorldTime::from_minutes(time.as_minutes()), time);
    }

    #[test]
    fn test_world_time_ordering() {
        let earlier = WorldTime::new(0, 22, 59);
        let later = WorldTime::new(1, 0, 0);
        assert!(earlier < later);
        assert_eq!(later.minutes_since(earlier), 61);
        assert_eq!(earlier.minutes_since(later), 0);
        assert_eq!(earlier.distance(later), 61);
    }

    #[test]
    fn test_advance_time() {
        let mut state = WorldSnapshot::new().at(WorldTime::new(1, 23, 30));

        state.advance_time(60);

        assert_eq!(state.time.hour, 0);
        assert_eq!(state.time.minute, 30);
        assert_eq!(state.time.day, 2);
    }

    #[test]
    fn test_location_prerequisite() {
        let state = WorldSnapshot::new().in_location("upstairs");

        assert!(state.satisfies(LOCATION_KEY, &FlagValue::text("upstairs")));
        assert!(!state.satisfies(LOCATION_KEY, &FlagValue::text("cellar")));
        assert!(!state.satisfies(LOCATION_KEY, &FlagValue::Bool(true)));
    }

    #[test]
    fn test_flag_prerequisite() {
        let state = WorldSnapshot::new()
            .with_flag("bard_playing", FlagValue::Bool(true))
            .with_flag("ale_barrels", FlagValue::Int(3));

        assert!(state.satisfies("bard_playing", &FlagValue::Bool(true)));
        assert!(!state.satisfies("ale_barrels", &FlagValue::Int(4)));
        assert!(!state.satisfies("missing", &FlagValue::Bool(true)));
    }

    #[test]
    fn test_present_actors() {
        let actor = ActorId::new();
        let state = WorldSnapshot::new().with_actor(actor);

        assert!(state.is_present(actor));
        assert!(!state.is_present(ActorId::new()));
    }
}
