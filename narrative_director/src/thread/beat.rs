//! Story beats - discrete narrative events belonging to a thread.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tavern_world::{ActorId, FlagValue, ParticipantDirectory, WorldSnapshot};
use uuid::Uuid;

use super::ThreadId;
use crate::error::{DirectorError, DirectorResult};

/// Beat type that closes out a thread's climax.
pub const RESOLUTION_BEAT: &str = "resolution";

/// Unique identifier for beats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BeatId(pub Uuid);

impl BeatId {
    /// Create a new random beat ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BeatId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BeatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What firing a beat does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BeatEffect {
    /// Raise or lower the owning thread's tension.
    TensionDelta(f64),

    /// The player learns something; recorded on the thread.
    ClueDiscovered(String),

    /// Nudge the player's relationship with an actor. Reported to the caller,
    /// never applied to the psychology subsystem directly.
    RelationshipDelta { target: ActorId, delta: f64 },
}

/// A single narrative event queued on a thread.
///
/// Beats are built once and then only read; firing moves a beat from the
/// thread's queue into its history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoryBeat {
    pub id: BeatId,
    pub thread_id: ThreadId,

    /// Free-form tag such as "investigation" or "confrontation".
    pub beat_type: String,

    /// Short description handed to the content layer.
    pub content: String,

    pub participants: HashSet<ActorId>,

    /// Condition key -> required value, checked against the world snapshot.
    pub prerequisites: BTreeMap<String, FlagValue>,

    pub effects: Vec<BeatEffect>,

    /// Emotional charge (0.0 - 1.0).
    pub emotional_weight: f64,

    /// How much the beat moves its thread forward (0.0 - 1.0).
    pub narrative_significance: f64,
}

impl StoryBeat {
    /// Create a new beat for a thread.
    pub fn new(thread_id: ThreadId, beat_type: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: BeatId::new(),
            thread_id,
            beat_type: beat_type.into(),
            content: content.into(),
            participants: HashSet::new(),
            prerequisites: BTreeMap::new(),
            effects: Vec::new(),
            emotional_weight: 0.5,
            narrative_significance: 0.5,
        }
    }

    /// Add a participant.
    pub fn with_participant(mut self, actor: ActorId) -> Self {
        self.participants.insert(actor);
        self
    }

    /// Require a world condition before the beat may fire.
    pub fn with_prerequisite(mut self, key: impl Into<String>, value: FlagValue) -> Self {
        self.prerequisites.insert(key.into(), value);
        self
    }

    /// Add an effect.
    pub fn with_effect(mut self, effect: BeatEffect) -> Self {
        self.effects.push(effect);
        self
    }

    /// Set the emotional weight.
    pub fn with_emotional_weight(mut self, weight: f64) -> Self {
        self.emotional_weight = weight.clamp(0.0, 1.0);
        self
    }

    /// Set the narrative significance.
    pub fn with_significance(mut self, significance: f64) -> Self {
        self.narrative_significance = significance.clamp(0.0, 1.0);
        self
    }

    /// Whether this beat closes out a climax.
    pub fn is_resolution(&self) -> bool {
        self.beat_type == RESOLUTION_BEAT
    }

    /// Whether every prerequisite holds in the given snapshot.
    pub fn prerequisites_met(&self, world: &WorldSnapshot) -> bool {
        self.prerequisites
            .iter()
            .all(|(key, value)| world.satisfies(key, value))
    }

    /// Every actor the beat touches, including relationship targets.
    pub fn referenced_actors(&self) -> impl Iterator<Item = ActorId> + '_ {
        self.participants
            .iter()
            .copied()
            .chain(self.effects.iter().filter_map(|effect| match effect {
                BeatEffect::RelationshipDelta { target, .. } => Some(*target),
                _ => None,
            }))
    }

    /// First referenced actor the directory no longer knows about.
    pub fn missing_collaborator(&self, directory: &dyn ParticipantDirectory) -> Option<ActorId> {
        self.referenced_actors()
            .find(|actor| !directory.contains(*actor))
    }

    /// A copy of this beat owned by another thread, used when threads merge.
    pub fn reassigned(&self, thread_id: ThreadId) -> Self {
        Self {
            thread_id,
            ..self.clone()
        }
    }

    /// Reject malformed beats at the boundary.
    pub fn validate(&self) -> DirectorResult<()> {
        if self.beat_type.trim().is_empty() {
            return Err(DirectorError::malformed(format!(
                "beat {} has an empty beat type",
                self.id
            )));
        }
        if !self.emotional_weight.is_finite() || !self.narrative_significance.is_finite() {
            return Err(DirectorError::malformed(format!(
                "beat {} has non-finite weights",
                self.id
            )));
        }
        for effect in &self.effects {
            let finite = match effect {
                BeatEffect::TensionDelta(delta) => delta.is_finite(),
                BeatEffect::RelationshipDelta { delta, .. } => delta.is_finite(),
                BeatEffect::ClueDiscovered(_) => true,
            };
            if !finite {
                return Err(DirectorError::malformed(format!(
                    "beat {} has a non-finite effect",
                    self.id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tavern_world::{Patron, Roster, LOCATION_KEY};

    #[test]
    fn test_beat_creation() {
        let thread = ThreadId::new();
        let beat = StoryBeat::new(thread, "investigation", "A torn letter under the bar");

        assert_eq!(beat.thread_id, thread);
        assert_eq!(beat.emotional_weight, 0.5);
        assert_eq!(beat.narrative_significance, 0.5);
        assert!(!beat.is_resolution());
    }

    #[test]
    fn test_beat_weight_clamping() {
        let beat = StoryBeat::new(ThreadId::new(), "reveal", "")
            .with_significance(1.4)
            .with_emotional_weight(-0.2);

        assert_eq!(beat.narrative_significance, 1.0);
        assert_eq!(beat.emotional_weight, 0.0);
    }

    #[test]
    fn test_prerequisites() {
        let beat = StoryBeat::new(ThreadId::new(), "investigation", "Footsteps above")
            .with_prerequisite(LOCATION_KEY, FlagValue::text("upstairs"))
            .with_prerequisite("night", FlagValue::Bool(true));

        let downstairs = WorldSnapshot::new()
            .in_location("common_room")
            .with_flag("night", FlagValue::Bool(true));
        let upstairs = downstairs.clone().in_location("upstairs");

        assert!(!beat.prerequisites_met(&downstairs));
        assert!(beat.prerequisites_met(&upstairs));
    }

    #[test]
    fn test_missing_collaborator() {
        let mut roster = Roster::new();
        let known = roster.add_patron(Patron::new("Hob"));
        let gone = ActorId::new();

        let fine = StoryBeat::new(ThreadId::new(), "gossip", "").with_participant(known);
        let broken = StoryBeat::new(ThreadId::new(), "gossip", "")
            .with_participant(known)
            .with_effect(BeatEffect::RelationshipDelta {
                target: gone,
                delta: 0.2,
            });

        assert_eq!(fine.missing_collaborator(&roster), None);
        assert_eq!(broken.missing_collaborator(&roster), Some(gone));
    }

    #[test]
    fn test_validation() {
        let thread = ThreadId::new();
        assert!(StoryBeat::new(thread, "clue", "").validate().is_ok());
        assert!(StoryBeat::new(thread, "  ", "").validate().is_err());
        assert!(StoryBeat::new(thread, "clue", "")
            .with_effect(BeatEffect::TensionDelta(f64::NAN))
            .validate()
            .is_err());
    }

    #[test]
    fn test_reassigned_keeps_identity() {
        let beat = StoryBeat::new(ThreadId::new(), "rumour", "The smith owes money");
        let target = ThreadId::new();
        let moved = beat.reassigned(target);

        assert_eq!(moved.id, beat.id);
        assert_eq!(moved.thread_id, target);
        assert_eq!(moved.content, beat.content);
    }
}
