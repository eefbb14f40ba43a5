//! Director persistence for save/load.
//!
//! A snapshot holds everything needed to resume a session with identical
//! thread stages, tension levels and pending climaxes. The host decides where
//! the JSON goes.

use serde::{Deserialize, Serialize};
use tavern_world::WorldTime;

use crate::error::{DirectorError, DirectorResult};
use crate::orchestrator::ArcPlan;
use crate::pacing::ThreadPacing;
use crate::rules::NarrativeHealth;
use crate::sequencer::ClimaticMoment;
use crate::tension::TensionSample;
use crate::thread::{StoryThread, ThreadId};

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Saved director state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectorSnapshot {
    /// Format version for compatibility checking.
    pub version: u32,

    /// Game time when the snapshot was taken.
    pub saved_at: WorldTime,

    /// Ticks run before the save.
    pub tick: u64,

    /// Active and archived threads.
    pub threads: Vec<StoryThread>,

    pub tension_history: Vec<TensionSample>,

    /// Pending climaxes, in timestamp order.
    pub scheduled_climaxes: Vec<ClimaticMoment>,

    pub climax_history: Vec<ClimaticMoment>,

    pub arcs: Vec<ArcPlan>,

    /// Health from the last orchestration pass before the save.
    #[serde(default)]
    pub last_health: Option<NarrativeHealth>,

    /// Rules engine memory, so plateaus and starvation keep counting.
    #[serde(default)]
    pub pacing_records: Vec<(ThreadId, ThreadPacing)>,
}

impl DirectorSnapshot {
    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> DirectorResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse JSON, rejecting other format versions.
    pub fn from_json(content: &str) -> DirectorResult<Self> {
        let snapshot: Self = serde_json::from_str(content)?;
        snapshot.check_version()?;
        Ok(snapshot)
    }

    pub fn check_version(&self) -> DirectorResult<()> {
        if self.version != SNAPSHOT_VERSION {
            return Err(DirectorError::VersionMismatch {
                expected: SNAPSHOT_VERSION,
                found: self.version,
            });
        }
        Ok(())
    }

    /// IDs of threads that were active when saved.
    pub fn active_thread_ids(&self) -> Vec<ThreadId> {
        self.threads
            .iter()
            .filter(|t| !t.is_archived())
            .map(|t| t.id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::NarrativeOrchestrator;
    use crate::thread::{ThreadStage, ThreadType};
    use tavern_world::ActorId;

    fn snapshot() -> DirectorSnapshot {
        let mut director = NarrativeOrchestrator::with_defaults();
        let thread = StoryThread::new("Haunted Cellar", ThreadType::Mystery)
            .with_primary(ActorId::new())
            .with_tension(0.35)
            .starting_at(ThreadStage::RisingAction);
        director.add_thread(thread).unwrap();
        director.snapshot(WorldTime::new(3, 23, 10))
    }

    #[test]
    fn test_json_round_trip() {
        let saved = snapshot();
        let json = saved.to_json().unwrap();
        let loaded = DirectorSnapshot::from_json(&json).unwrap();

        assert_eq!(loaded.active_thread_ids(), saved.active_thread_ids());
        assert_eq!(loaded.saved_at, saved.saved_at);
        assert_eq!(loaded.threads[0].stage(), ThreadStage::RisingAction);
        assert!((loaded.threads[0].tension_level() - 0.35).abs() < 1e-6);
    }

    #[test]
    fn test_version_mismatch() {
        let mut saved = snapshot();
        saved.version = SNAPSHOT_VERSION + 1;
        let json = saved.to_json().unwrap();

        assert!(matches!(
            DirectorSnapshot::from_json(&json),
            Err(DirectorError::VersionMismatch { expected: 1, found: 2 })
        ));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(
            DirectorSnapshot::from_json("{ not json"),
            Err(DirectorError::Json(_))
        ));
    }
}
