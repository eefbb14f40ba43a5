//! Thread Manager - the single owner of thread lifecycle state.
//!
//! Each tick the manager walks the active threads, fires beats whose
//! prerequisites hold, applies their effects, and moves threads between stages.
//! A problem with one thread never stops the others from advancing.

use std::collections::{BTreeMap, HashSet};
use tavern_world::{ActorId, ParticipantDirectory, WorldSnapshot, WorldTime};

use crate::config::ThreadConfig;
use crate::error::{DirectorResult, ValidationError};
use crate::events::{NarrativeEvent, SkipReason};
use crate::thread::{
    BeatEffect, StoryBeat, StoryThread, ThreadConvergence, ThreadId, ThreadStage,
};

/// Owns the active threads and the archive of completed ones.
#[derive(Debug, Clone)]
pub struct ThreadManager {
    config: ThreadConfig,
    active: BTreeMap<ThreadId, StoryThread>,
    completed: BTreeMap<ThreadId, StoryThread>,
}

impl ThreadManager {
    /// Create a new thread manager with the given configuration.
    pub fn new(config: ThreadConfig) -> Self {
        Self {
            config,
            active: BTreeMap::new(),
            completed: BTreeMap::new(),
        }
    }

    /// Create a thread manager with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(ThreadConfig::default())
    }

    /// Rebuild a manager from saved threads, splitting them by archive state.
    ///
    /// Every thread is checked as strictly as a fresh one, apart from its
    /// archive state, and an ID may appear only once.
    pub(crate) fn from_threads(config: ThreadConfig, threads: Vec<StoryThread>) -> DirectorResult<Self> {
        let mut manager = Self::new(config);
        for thread in threads {
            thread.validate_contents()?;
            if manager.contains(thread.id) {
                return Err(ValidationError::DuplicateId(thread.id).into());
            }
            if thread.is_archived() {
                manager.completed.insert(thread.id, thread);
            } else {
                manager.active.insert(thread.id, thread);
            }
        }
        Ok(manager)
    }

    /// Register a thread as active.
    ///
    /// Malformed threads and IDs already seen (active or completed) are
    /// rejected. Going over `max_active_threads` is only an advisory.
    pub fn add_thread(&mut self, thread: StoryThread) -> DirectorResult<ThreadId> {
        if let Err(err) = thread.validate() {
            tracing::warn!(thread_id = %thread.id, error = %err, "rejected malformed thread");
            return Err(err);
        }
        if self.contains(thread.id) {
            tracing::warn!(thread_id = %thread.id, "rejected duplicate thread");
            return Err(ValidationError::DuplicateId(thread.id).into());
        }

        let id = thread.id;
        tracing::info!(thread_id = %id, title = %thread.title, stage = %thread.stage(), "thread added");
        self.active.insert(id, thread);

        if self.is_over_capacity() {
            tracing::warn!(
                active = self.active.len(),
                max = self.config.max_active_threads,
                "capacity advisory: active threads above soft limit"
            );
        }
        Ok(id)
    }

    /// Advance every active thread that has a reachable primary participant.
    ///
    /// Threads without one are left exactly as they were. Returns the events
    /// produced, in thread ID order.
    pub fn advance_threads(
        &mut self,
        available_participants: &HashSet<ActorId>,
        world: &WorldSnapshot,
        directory: &dyn ParticipantDirectory,
    ) -> Vec<NarrativeEvent> {
        let mut events = Vec::new();

        for thread in self.active.values_mut() {
            if !thread.has_available_primary(available_participants) {
                continue;
            }
            if thread.is_held(world.time) {
                continue;
            }
            advance_thread(&self.config, thread, world, directory, &mut events);
        }

        events.extend(self.archive_resolved(world.time));
        events
    }

    /// Archive every resolved thread with nothing left to fire.
    pub fn archive_resolved(&mut self, now: WorldTime) -> Vec<NarrativeEvent> {
        let finished: Vec<ThreadId> = self
            .active
            .values()
            .filter(|t| t.stage().is_terminal() && t.pending_count() == 0)
            .map(|t| t.id)
            .collect();

        finished
            .into_iter()
            .filter_map(|id| {
                let stage = self.archive(id, now)?;
                tracing::info!(thread_id = %id, "thread archived");
                Some(NarrativeEvent::ThreadArchived {
                    thread_id: id,
                    stage,
                })
            })
            .collect()
    }

    /// Detect convergences among the active threads.
    pub fn detect_convergences(&self, directory: &dyn ParticipantDirectory) -> Vec<ThreadConvergence> {
        ThreadConvergence::detect(&self.active_threads(), directory)
    }

    /// Retire a thread from any non-terminal stage straight into the archive.
    pub fn retire_thread(&mut self, id: ThreadId, now: WorldTime) -> bool {
        match self.active.get_mut(&id) {
            Some(thread) => thread.retired = true,
            None => return false,
        }
        self.archive(id, now);
        tracing::info!(thread_id = %id, "thread retired");
        true
    }

    /// Fold `absorbed` into `primary`: cast, tags, clues and queued beats move
    /// over, and `absorbed` is archived.
    pub fn merge_threads(&mut self, primary: ThreadId, absorbed: ThreadId, now: WorldTime) -> bool {
        if primary == absorbed || !self.active.contains_key(&primary) {
            return false;
        }
        let Some(mut source) = self.active.remove(&absorbed) else {
            return false;
        };
        let moved_beats = source.drain_pending();

        if let Some(target) = self.active.get_mut(&primary) {
            target
                .primary_participants
                .extend(source.primary_participants.iter().copied());
            let secondary: Vec<ActorId> = source
                .secondary_participants
                .iter()
                .copied()
                .filter(|actor| !target.primary_participants.contains(actor))
                .collect();
            target.secondary_participants.extend(secondary);
            target.tags.extend(source.tags.iter().cloned());
            target.clues.extend(source.clues.iter().cloned());
            target.set_tension(target.tension_level().max(source.tension_level()));
            target.set_involvement(target.player_involvement().max(source.player_involvement()));
            for beat in moved_beats {
                target.queue_beat(beat.reassigned(primary));
            }
        }

        source.merged_into = Some(primary);
        source.archive(now);
        self.completed.insert(absorbed, source);
        tracing::info!(primary = %primary, absorbed = %absorbed, "threads merged");
        true
    }

    /// Queue a beat on an active thread.
    pub fn inject_beat(&mut self, id: ThreadId, beat: StoryBeat) -> bool {
        if beat.thread_id != id || beat.validate().is_err() {
            return false;
        }
        match self.active.get_mut(&id) {
            Some(thread) => {
                thread.queue_beat(beat);
                true
            }
            None => false,
        }
    }

    /// Get an active thread.
    pub fn get(&self, id: ThreadId) -> Option<&StoryThread> {
        self.active.get(&id)
    }

    /// Get a mutable active thread.
    pub fn get_mut(&mut self, id: ThreadId) -> Option<&mut StoryThread> {
        self.active.get_mut(&id)
    }

    /// Get an archived thread.
    pub fn get_completed(&self, id: ThreadId) -> Option<&StoryThread> {
        self.completed.get(&id)
    }

    /// Active threads in ID order.
    pub fn active_threads(&self) -> Vec<&StoryThread> {
        self.active.values().collect()
    }

    /// Archived threads in ID order.
    pub fn completed_threads(&self) -> Vec<&StoryThread> {
        self.completed.values().collect()
    }

    /// Every thread, active first.
    pub fn all_threads(&self) -> impl Iterator<Item = &StoryThread> {
        self.active.values().chain(self.completed.values())
    }

    /// Whether an ID is known, active or archived.
    pub fn contains(&self, id: ThreadId) -> bool {
        self.active.contains_key(&id) || self.completed.contains_key(&id)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    /// Whether active threads exceed the soft limit.
    pub fn is_over_capacity(&self) -> bool {
        self.active.len() > self.config.max_active_threads
    }

    pub fn config(&self) -> &ThreadConfig {
        &self.config
    }

    fn archive(&mut self, id: ThreadId, now: WorldTime) -> Option<ThreadStage> {
        let mut thread = self.active.remove(&id)?;
        let stage = thread.stage();
        thread.archive(now);
        self.completed.insert(id, thread);
        Some(stage)
    }
}

impl Default for ThreadManager {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Fire eligible beats on one thread and apply stage transitions.
fn advance_thread(
    config: &ThreadConfig,
    thread: &mut StoryThread,
    world: &WorldSnapshot,
    directory: &dyn ParticipantDirectory,
    events: &mut Vec<NarrativeEvent>,
) {
    let mut fired = 0;
    let mut index = 0;

    while fired < config.max_beats_per_tick {
        let (beat_id, skip) = match thread.pending_at(index) {
            Some(beat) => {
                let skip = if let Some(actor) = beat.missing_collaborator(directory) {
                    Some(SkipReason::MissingCollaborator { actor })
                } else if !beat.prerequisites_met(world) {
                    Some(SkipReason::PrerequisitesUnmet)
                } else {
                    None
                };
                (beat.id, skip)
            }
            None => break,
        };

        match skip {
            Some(SkipReason::MissingCollaborator { actor }) => {
                // Dropped for good; the actor is not coming back.
                thread.take_pending(index);
                tracing::debug!(thread_id = %thread.id, beat_id = %beat_id, actor = %actor, "beat skipped: missing collaborator");
                events.push(NarrativeEvent::BeatSkipped {
                    thread_id: thread.id,
                    beat_id,
                    reason: SkipReason::MissingCollaborator { actor },
                });
            }
            Some(reason) => {
                tracing::debug!(thread_id = %thread.id, beat_id = %beat_id, "beat deferred: prerequisites unmet");
                events.push(NarrativeEvent::BeatSkipped {
                    thread_id: thread.id,
                    beat_id,
                    reason,
                });
                index += 1;
            }
            None => {
                if let Some(beat) = thread.take_pending(index) {
                    fire_beat(config, thread, beat, world.time, events);
                    fired += 1;
                }
            }
        }
    }

    if thread.stage() == ThreadStage::Setup
        && thread.tension_level() >= config.rising_tension_threshold
    {
        advance_stage(thread, world.time, events);
    }
}

fn fire_beat(
    config: &ThreadConfig,
    thread: &mut StoryThread,
    beat: StoryBeat,
    now: WorldTime,
    events: &mut Vec<NarrativeEvent>,
) {
    events.push(NarrativeEvent::BeatFired {
        thread_id: thread.id,
        beat_id: beat.id,
        beat_type: beat.beat_type.clone(),
        content: beat.content.clone(),
    });

    for effect in &beat.effects {
        match effect {
            BeatEffect::TensionDelta(delta) => thread.adjust_tension(*delta),
            BeatEffect::ClueDiscovered(clue) => {
                thread.clues.push(clue.clone());
                events.push(NarrativeEvent::ClueDiscovered {
                    thread_id: thread.id,
                    clue: clue.clone(),
                });
            }
            BeatEffect::RelationshipDelta { target, delta } => {
                events.push(NarrativeEvent::RelationshipShifted {
                    thread_id: thread.id,
                    target: *target,
                    delta: *delta,
                });
            }
        }
    }

    let resolves = beat.is_resolution();
    let significance = beat.narrative_significance;
    thread.record_fired(beat);

    let transition = match thread.stage() {
        ThreadStage::Setup => thread.momentum() >= config.setup_momentum_threshold,
        ThreadStage::Climax => resolves || significance >= config.resolution_significance,
        // Rising action only ends when the scheduled climax fires.
        ThreadStage::RisingAction | ThreadStage::Resolution => false,
    };
    if transition {
        advance_stage(thread, now, events);
    }
}

fn advance_stage(thread: &mut StoryThread, now: WorldTime, events: &mut Vec<NarrativeEvent>) {
    if let Some((from, to)) = thread.advance_stage(now) {
        tracing::info!(thread_id = %thread.id, from = %from, to = %to, "thread stage advanced");
        events.push(NarrativeEvent::StageAdvanced {
            thread_id: thread.id,
            from,
            to,
        });
    }
}
