//! Story threads - long-lived narrative arcs.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet, VecDeque};
use tavern_world::{ActorId, WorldTime};
use uuid::Uuid;

use super::{StoryBeat, ThreadTag};
use crate::error::{DirectorError, DirectorResult};

/// Unique identifier for threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ThreadId(pub Uuid);

impl ThreadId {
    /// Create a new random thread ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a thread ID from a specific UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for ThreadId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kinds of storyline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ThreadType {
    MainQuest,
    SideQuest,
    Romance,
    Political,
    Mystery,
    CharacterArc,
    Social,
}

impl ThreadType {
    /// Baseline narrative value of this kind of thread (0.0 - 1.0).
    pub fn weight(&self) -> f64 {
        match self {
            ThreadType::MainQuest => 1.0,
            ThreadType::Romance => 0.7,
            ThreadType::Political => 0.65,
            ThreadType::Mystery => 0.6,
            ThreadType::CharacterArc => 0.55,
            ThreadType::SideQuest => 0.4,
            ThreadType::Social => 0.3,
        }
    }
}

/// Dramatic stage of a thread. Stages only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ThreadStage {
    Setup,
    RisingAction,
    Climax,
    Resolution,
}

impl ThreadStage {
    /// The single legal transition out of this stage; `None` once resolved.
    pub fn advance(self) -> Option<ThreadStage> {
        match self {
            ThreadStage::Setup => Some(ThreadStage::RisingAction),
            ThreadStage::RisingAction => Some(ThreadStage::Climax),
            ThreadStage::Climax => Some(ThreadStage::Resolution),
            ThreadStage::Resolution => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == ThreadStage::Resolution
    }

    pub fn name(self) -> &'static str {
        match self {
            ThreadStage::Setup => "setup",
            ThreadStage::RisingAction => "rising_action",
            ThreadStage::Climax => "climax",
            ThreadStage::Resolution => "resolution",
        }
    }
}

impl std::fmt::Display for ThreadStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A long-lived narrative arc.
///
/// Stage, tension, involvement and the beat queues are private so their
/// invariants (forward-only stages, values clamped to [0, 1], beats consumed
/// once) hold no matter who holds a mutable reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoryThread {
    pub id: ThreadId,
    pub title: String,
    pub thread_type: ThreadType,
    pub description: String,

    stage: ThreadStage,

    pub primary_participants: HashSet<ActorId>,
    pub secondary_participants: HashSet<ActorId>,

    /// Local dramatic intensity (0.0 - 1.0).
    tension_level: f64,

    /// How much the player is engaged with this thread (0.0 - 1.0).
    player_involvement: f64,

    /// Beats already fired, oldest first.
    beats: Vec<StoryBeat>,

    /// Beats waiting to fire, in order.
    pending_beats: VecDeque<StoryBeat>,

    pub tags: BTreeSet<ThreadTag>,

    /// Clues uncovered by fired beats.
    pub clues: Vec<String>,

    /// Significance accumulated in the current stage.
    momentum: f64,

    pub created_at: WorldTime,
    stage_entered_at: WorldTime,

    /// While set and in the future, an in-progress climax is held back.
    climax_hold_until: Option<WorldTime>,

    pub archived_at: Option<WorldTime>,
    pub retired: bool,
    pub merged_into: Option<ThreadId>,
}

impl StoryThread {
    /// Create a new thread in setup.
    pub fn new(title: impl Into<String>, thread_type: ThreadType) -> Self {
        Self {
            id: ThreadId::new(),
            title: title.into(),
            thread_type,
            description: String::new(),
            stage: ThreadStage::Setup,
            primary_participants: HashSet::new(),
            secondary_participants: HashSet::new(),
            tension_level: 0.0,
            player_involvement: 0.5,
            beats: Vec::new(),
            pending_beats: VecDeque::new(),
            tags: BTreeSet::new(),
            clues: Vec::new(),
            momentum: 0.0,
            created_at: WorldTime::default(),
            stage_entered_at: WorldTime::default(),
            climax_hold_until: None,
            archived_at: None,
            retired: false,
            merged_into: None,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Add a primary participant.
    pub fn with_primary(mut self, actor: ActorId) -> Self {
        self.primary_participants.insert(actor);
        self
    }

    /// Add a secondary participant.
    pub fn with_secondary(mut self, actor: ActorId) -> Self {
        self.secondary_participants.insert(actor);
        self
    }

    /// Set the initial tension.
    pub fn with_tension(mut self, tension: f64) -> Self {
        self.set_tension(tension);
        self
    }

    /// Set the initial player involvement.
    pub fn with_involvement(mut self, involvement: f64) -> Self {
        self.set_involvement(involvement);
        self
    }

    /// Add a tag.
    pub fn with_tag(mut self, tag: ThreadTag) -> Self {
        self.tags.insert(tag);
        self
    }

    /// Queue a beat.
    pub fn with_beat(mut self, beat: StoryBeat) -> Self {
        self.pending_beats.push_back(beat);
        self
    }

    /// Set the creation time, which also starts the stage clock.
    pub fn created_at(mut self, time: WorldTime) -> Self {
        self.created_at = time;
        self.stage_entered_at = time;
        self
    }

    /// Start the thread at a later stage, for storylines picked up mid-arc
    /// from external quest triggers or restored saves.
    pub fn starting_at(mut self, stage: ThreadStage) -> Self {
        self.stage = stage;
        self
    }

    /// Build a beat owned by this thread.
    pub fn beat(&self, beat_type: impl Into<String>, content: impl Into<String>) -> StoryBeat {
        StoryBeat::new(self.id, beat_type, content)
    }

    pub fn stage(&self) -> ThreadStage {
        self.stage
    }

    pub fn tension_level(&self) -> f64 {
        self.tension_level
    }

    pub fn player_involvement(&self) -> f64 {
        self.player_involvement
    }

    pub fn beats(&self) -> &[StoryBeat] {
        &self.beats
    }

    pub fn pending_beats(&self) -> impl Iterator<Item = &StoryBeat> {
        self.pending_beats.iter()
    }

    pub fn pending_count(&self) -> usize {
        self.pending_beats.len()
    }

    pub fn momentum(&self) -> f64 {
        self.momentum
    }

    pub fn stage_entered_at(&self) -> WorldTime {
        self.stage_entered_at
    }

    pub fn climax_hold_until(&self) -> Option<WorldTime> {
        self.climax_hold_until
    }

    /// Set tension, clamped to [0, 1]. Non-finite values are ignored.
    pub fn set_tension(&mut self, tension: f64) {
        if tension.is_finite() {
            self.tension_level = tension.clamp(0.0, 1.0);
        }
    }

    /// Shift tension by a delta, clamped to [0, 1].
    pub fn adjust_tension(&mut self, delta: f64) {
        self.set_tension(self.tension_level + delta);
    }

    /// Set involvement, clamped to [0, 1]. Non-finite values are ignored.
    pub fn set_involvement(&mut self, involvement: f64) {
        if involvement.is_finite() {
            self.player_involvement = involvement.clamp(0.0, 1.0);
        }
    }

    /// Shift involvement by a delta, clamped to [0, 1].
    pub fn adjust_involvement(&mut self, delta: f64) {
        self.set_involvement(self.player_involvement + delta);
    }

    /// Move to the next stage. Returns `(from, to)` or `None` when resolved.
    pub fn advance_stage(&mut self, now: WorldTime) -> Option<(ThreadStage, ThreadStage)> {
        let from = self.stage;
        let to = from.advance()?;
        self.stage = to;
        self.stage_entered_at = now;
        self.momentum = 0.0;
        self.climax_hold_until = None;
        Some((from, to))
    }

    /// Minutes spent in the current stage.
    pub fn minutes_in_stage(&self, now: WorldTime) -> u64 {
        now.minutes_since(self.stage_entered_at)
    }

    /// Hold an in-progress climax until the given time.
    pub fn hold_climax(&mut self, until: WorldTime) {
        self.climax_hold_until = Some(until);
    }

    /// Whether this thread is climaxing right now (in climax and not held).
    pub fn is_climax_live(&self, now: WorldTime) -> bool {
        self.stage == ThreadStage::Climax && !self.is_held(now)
    }

    /// Whether a climax hold is still in effect.
    pub fn is_held(&self, now: WorldTime) -> bool {
        self.climax_hold_until.is_some_and(|until| until > now)
    }

    /// Every actor involved, primary or secondary.
    pub fn all_participants(&self) -> HashSet<ActorId> {
        self.primary_participants
            .union(&self.secondary_participants)
            .copied()
            .collect()
    }

    /// Check if this thread involves a specific actor.
    pub fn involves(&self, actor: ActorId) -> bool {
        self.primary_participants.contains(&actor) || self.secondary_participants.contains(&actor)
    }

    /// Whether at least one primary participant is reachable.
    pub fn has_available_primary(&self, available: &HashSet<ActorId>) -> bool {
        self.primary_participants
            .iter()
            .any(|actor| available.contains(actor))
    }

    /// Narrative value used to rank threads against each other (0.0 - 1.0).
    pub fn priority(&self) -> f64 {
        0.5 * self.thread_type.weight() + 0.3 * self.player_involvement + 0.2 * self.tension_level
    }

    /// Whether the thread has left the active set.
    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }

    /// Queue a beat at the back.
    pub fn queue_beat(&mut self, beat: StoryBeat) {
        self.pending_beats.push_back(beat);
    }

    /// Remove a pending beat by queue position.
    pub(crate) fn take_pending(&mut self, index: usize) -> Option<StoryBeat> {
        self.pending_beats.remove(index)
    }

    pub(crate) fn pending_at(&self, index: usize) -> Option<&StoryBeat> {
        self.pending_beats.get(index)
    }

    /// Drain the pending queue (used when this thread is merged away).
    pub(crate) fn drain_pending(&mut self) -> Vec<StoryBeat> {
        self.pending_beats.drain(..).collect()
    }

    /// Record a fired beat and bank its significance.
    pub(crate) fn record_fired(&mut self, beat: StoryBeat) {
        self.momentum += beat.narrative_significance;
        self.beats.push(beat);
    }

    pub(crate) fn archive(&mut self, now: WorldTime) {
        self.archived_at = Some(now);
        self.climax_hold_until = None;
    }

    /// Reject malformed threads at the boundary.
    pub fn validate(&self) -> DirectorResult<()> {
        self.validate_contents()?;
        if self.is_archived() {
            return Err(DirectorError::malformed(format!(
                "thread '{}' is already archived",
                self.title
            )));
        }
        Ok(())
    }

    /// Structural checks shared by new and restored threads.
    pub fn validate_contents(&self) -> DirectorResult<()> {
        let unit = 0.0..=1.0;
        if !unit.contains(&self.tension_level) || !unit.contains(&self.player_involvement) {
            return Err(DirectorError::malformed(format!(
                "thread '{}' has tension or involvement outside [0, 1]",
                self.title
            )));
        }
        if self.title.trim().is_empty() {
            return Err(DirectorError::malformed(format!(
                "thread {} has an empty title",
                self.id
            )));
        }
        if self.primary_participants.is_empty() {
            return Err(DirectorError::malformed(format!(
                "thread '{}' has no primary participants",
                self.title
            )));
        }
        for beat in self.pending_beats.iter().chain(self.beats.iter()) {
            if beat.thread_id != self.id {
                return Err(DirectorError::malformed(format!(
                    "beat {} belongs to thread {}, not '{}'",
                    beat.id, beat.thread_id, self.title
                )));
            }
            beat.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tavern_thread() -> StoryThread {
        StoryThread::new("The Missing Cask", ThreadType::Mystery).with_primary(ActorId::new())
    }

    #[test]
    fn test_thread_creation() {
        let thread = tavern_thread();
        assert_eq!(thread.stage(), ThreadStage::Setup);
        assert_eq!(thread.tension_level(), 0.0);
        assert_eq!(thread.player_involvement(), 0.5);
        assert!(thread.beats().is_empty());
        assert!(!thread.is_archived());
    }

    #[test]
    fn test_stage_only_moves_forward() {
        let mut thread = tavern_thread();
        let now = WorldTime::new(0, 20, 0);

        assert_eq!(
            thread.advance_stage(now),
            Some((ThreadStage::Setup, ThreadStage::RisingAction))
        );
        assert_eq!(
            thread.advance_stage(now),
            Some((ThreadStage::RisingAction, ThreadStage::Climax))
        );
        assert_eq!(
            thread.advance_stage(now),
            Some((ThreadStage::Climax, ThreadStage::Resolution))
        );
        assert_eq!(thread.advance_stage(now), None);
        assert_eq!(thread.stage(), ThreadStage::Resolution);
    }

    #[test]
    fn test_stage_ordering() {
        assert!(ThreadStage::Setup < ThreadStage::RisingAction);
        assert!(ThreadStage::Climax < ThreadStage::Resolution);
        assert!(ThreadStage::Resolution.is_terminal());
        assert_eq!(ThreadStage::RisingAction.to_string(), "rising_action");
    }

    #[test]
    fn test_tension_clamping() {
        let mut thread = tavern_thread().with_tension(1.7);
        assert_eq!(thread.tension_level(), 1.0);

        thread.adjust_tension(-3.0);
        assert_eq!(thread.tension_level(), 0.0);

        thread.set_tension(f64::NAN);
        assert_eq!(thread.tension_level(), 0.0);

        thread.set_involvement(-0.5);
        assert_eq!(thread.player_involvement(), 0.0);
    }

    #[test]
    fn test_climax_hold() {
        let now = WorldTime::new(1, 12, 0);
        let mut thread = tavern_thread().starting_at(ThreadStage::Climax);
        assert!(thread.is_climax_live(now));

        thread.hold_climax(now.plus_minutes(30));
        assert!(!thread.is_climax_live(now));
        assert!(thread.is_climax_live(now.plus_minutes(30)));
    }

    #[test]
    fn test_priority_prefers_main_quest() {
        let main = StoryThread::new("Usurper's Toast", ThreadType::MainQuest);
        let social = StoryThread::new("Darts Rivalry", ThreadType::Social);
        assert!(main.priority() > social.priority());
    }

    #[test]
    fn test_participants() {
        let innkeeper = ActorId::new();
        let bard = ActorId::new();
        let thread = StoryThread::new("Songs of Debt", ThreadType::CharacterArc)
            .with_primary(innkeeper)
            .with_secondary(bard);

        assert!(thread.involves(bard));
        assert_eq!(thread.all_participants().len(), 2);

        let available: HashSet<_> = [bard].into_iter().collect();
        assert!(!thread.has_available_primary(&available));
    }

    #[test]
    fn test_validation() {
        assert!(tavern_thread().validate().is_ok());
        assert!(StoryThread::new("No one", ThreadType::Social)
            .validate()
            .is_err());
        assert!(StoryThread::new(" ", ThreadType::Social)
            .with_primary(ActorId::new())
            .validate()
            .is_err());

        let thread = tavern_thread();
        let foreign = StoryBeat::new(ThreadId::new(), "clue", "");
        assert!(thread.with_beat(foreign).validate().is_err());
    }

    #[test]
    fn test_record_fired_banks_momentum() {
        let mut thread = tavern_thread();
        let beat = thread.beat("rumour", "Someone saw the cask leave").with_significance(0.7);
        thread.queue_beat(beat);

        let taken = thread.take_pending(0).unwrap();
        thread.record_fired(taken);

        assert_eq!(thread.pending_count(), 0);
        assert_eq!(thread.beats().len(), 1);
        assert!((thread.momentum() - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_thread_serialization() {
        let thread = tavern_thread()
            .with_tension(0.4)
            .with_tag(ThreadTag::theme("theft"));

        let json = serde_json::to_string(&thread).unwrap();
        let parsed: StoryThread = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.id, thread.id);
        assert_eq!(parsed.stage(), ThreadStage::Setup);
        assert!((parsed.tension_level() - 0.4).abs() < 1e-9);
        assert!(parsed.tags.contains(&ThreadTag::theme("theft")));
    }
}
