//! Orchestration actions - the director's output to the game state layer.

use serde::{Deserialize, Serialize};
use tavern_world::WorldTime;

use crate::orchestrator::ArcId;
use crate::sequencer::ClimaxId;
use crate::thread::{BeatId, ThreadId};

/// A tagged record the game state applies to its own world.
///
/// The director has already updated its own thread state when an action is
/// emitted; the action tells the rest of the game what changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestrationAction {
    AdjustTension {
        thread_id: ThreadId,
        target: f64,
    },
    BoostThread {
        thread_id: ThreadId,
        involvement: f64,
    },
    ScheduleClimax {
        climax_id: ClimaxId,
        primary_thread_id: ThreadId,
        secondary_thread_ids: Vec<ThreadId>,
        at: WorldTime,
    },
    DelayClimax {
        thread_id: ThreadId,
        until: WorldTime,
    },
    FireClimax {
        climax_id: ClimaxId,
        thread_ids: Vec<ThreadId>,
    },
    InjectBeat {
        thread_id: ThreadId,
        beat_id: BeatId,
        beat_type: String,
    },
    RetireThread {
        thread_id: ThreadId,
    },
    MergeThreads {
        primary_thread_id: ThreadId,
        absorbed_thread_id: ThreadId,
    },
    PlanArc {
        arc_id: ArcId,
        thread_ids: Vec<ThreadId>,
    },
}

impl OrchestrationAction {
    /// The snake_case tag this action serializes under.
    pub fn kind(&self) -> &'static str {
        match self {
            OrchestrationAction::AdjustTension { .. } => "adjust_tension",
            OrchestrationAction::BoostThread { .. } => "boost_thread",
            OrchestrationAction::ScheduleClimax { .. } => "schedule_climax",
            OrchestrationAction::DelayClimax { .. } => "delay_climax",
            OrchestrationAction::FireClimax { .. } => "fire_climax",
            OrchestrationAction::InjectBeat { .. } => "inject_beat",
            OrchestrationAction::RetireThread { .. } => "retire_thread",
            OrchestrationAction::MergeThreads { .. } => "merge_threads",
            OrchestrationAction::PlanArc { .. } => "plan_arc",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_tag_matches_kind() {
        let action = OrchestrationAction::AdjustTension {
            thread_id: ThreadId::new(),
            target: 0.3,
        };
        let json = serde_json::to_string(&action).unwrap();
        assert!(json.contains(&format!(r#""type":"{}""#, action.kind())));
    }

    #[test]
    fn test_action_round_trip() {
        let action = OrchestrationAction::ScheduleClimax {
            climax_id: ClimaxId::new(),
            primary_thread_id: ThreadId::new(),
            secondary_thread_ids: vec![ThreadId::new()],
            at: WorldTime::new(2, 21, 15),
        };
        let json = serde_json::to_string(&action).unwrap();
        let parsed: OrchestrationAction = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, action);
    }
}
