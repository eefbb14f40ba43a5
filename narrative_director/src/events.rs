//! Narrative events produced while advancing threads.
//!
//! These are what happened this tick, for the caller to render. Non-fatal
//! problems (a beat that could not fire) are reported here as notes rather than
//! errors.

use serde::{Deserialize, Serialize};
use tavern_world::ActorId;

use crate::thread::{BeatId, ThreadId, ThreadStage};

/// Why a beat did not fire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    /// World conditions are not met yet; the beat stays queued.
    PrerequisitesUnmet,
    /// The beat references an actor that no longer exists; the beat is dropped.
    MissingCollaborator { actor: ActorId },
}

/// Something that happened to a thread during a tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NarrativeEvent {
    BeatFired {
        thread_id: ThreadId,
        beat_id: BeatId,
        beat_type: String,
        content: String,
    },
    StageAdvanced {
        thread_id: ThreadId,
        from: ThreadStage,
        to: ThreadStage,
    },
    ClueDiscovered {
        thread_id: ThreadId,
        clue: String,
    },
    /// The caller forwards this to the relationship subsystem.
    RelationshipShifted {
        thread_id: ThreadId,
        target: ActorId,
        delta: f64,
    },
    BeatSkipped {
        thread_id: ThreadId,
        beat_id: BeatId,
        reason: SkipReason,
    },
    ThreadArchived {
        thread_id: ThreadId,
        stage: ThreadStage,
    },
}

impl NarrativeEvent {
    /// The thread this event belongs to.
    pub fn thread_id(&self) -> ThreadId {
        match self {
            NarrativeEvent::BeatFired { thread_id, .. }
            | NarrativeEvent::StageAdvanced { thread_id, .. }
            | NarrativeEvent::ClueDiscovered { thread_id, .. }
            | NarrativeEvent::RelationshipShifted { thread_id, .. }
            | NarrativeEvent::BeatSkipped { thread_id, .. }
            | NarrativeEvent::ThreadArchived { thread_id, .. } => *thread_id,
        }
    }

    /// Whether this is a non-fatal note rather than a narrative development.
    pub fn is_note(&self) -> bool {
        matches!(self, NarrativeEvent::BeatSkipped { .. })
    }
}
