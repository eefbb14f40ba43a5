//! Climatic Sequencer - reserves climax slots so storylines do not collide.
//!
//! Every pending climax has fewer than `max_parallel_climaxes` other pending
//! climaxes strictly within `min_climax_spacing_minutes` of it. New climaxes
//! take the earliest slot at or after `now + lead_minutes` that keeps this true
//! for the newcomer and for every neighbour it joins.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use tavern_world::{ActorId, WorldTime};
use uuid::Uuid;

use crate::config::ClimaxConfig;
use crate::thread::{shared_participant_groups, StoryThread, ThreadId, ThreadStage};

/// Unique identifier for climactic moments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClimaxId(pub Uuid);

impl ClimaxId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClimaxId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ClimaxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A scheduled (or fired) climax for one thread or a convergence group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClimaticMoment {
    pub id: ClimaxId,
    pub primary_thread_id: ThreadId,
    pub secondary_thread_ids: Vec<ThreadId>,

    /// When the climax should fire.
    pub timestamp: WorldTime,

    pub participants: BTreeSet<ActorId>,

    /// When the slot was reserved.
    pub scheduled_at: WorldTime,

    pub fired_at: Option<WorldTime>,
}

impl ClimaticMoment {
    /// Every thread taking part, primary first.
    pub fn thread_ids(&self) -> impl Iterator<Item = ThreadId> + '_ {
        std::iter::once(self.primary_thread_id).chain(self.secondary_thread_ids.iter().copied())
    }

    pub fn involves(&self, thread_id: ThreadId) -> bool {
        self.primary_thread_id == thread_id || self.secondary_thread_ids.contains(&thread_id)
    }

    pub fn is_joint(&self) -> bool {
        !self.secondary_thread_ids.is_empty()
    }
}

/// Rising threads that could climax together. Surfaced, never applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceOpportunity {
    /// In ascending ID order.
    pub thread_ids: Vec<ThreadId>,
    pub shared_participants: BTreeSet<ActorId>,
    /// Mean tension of the group.
    pub combined_tension: f64,
}

/// Owns pending climaxes and a bounded history of fired ones.
#[derive(Debug, Clone)]
pub struct ClimaticSequencer {
    config: ClimaxConfig,
    /// Kept sorted by timestamp.
    scheduled: Vec<ClimaticMoment>,
    history: VecDeque<ClimaticMoment>,
}

impl ClimaticSequencer {
    pub fn new(config: ClimaxConfig) -> Self {
        Self {
            history: VecDeque::with_capacity(config.history_capacity),
            config,
            scheduled: Vec::new(),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ClimaxConfig::default())
    }

    /// Reserve a climax slot for one thread.
    ///
    /// A thread that already has a pending climax gets that one back.
    pub fn schedule_climax(&mut self, thread: &StoryThread, now: WorldTime) -> ClimaticMoment {
        if let Some(existing) = self.pending_for(thread.id) {
            return existing.clone();
        }
        self.reserve(thread.id, Vec::new(), thread.all_participants().into_iter().collect(), now)
    }

    /// Reserve one slot for a convergence group.
    ///
    /// The highest-priority thread leads. Returns `None` for an empty group.
    pub fn schedule_joint_climax(
        &mut self,
        threads: &[&StoryThread],
        now: WorldTime,
    ) -> Option<ClimaticMoment> {
        let mut ordered: Vec<&StoryThread> = threads.to_vec();
        ordered.sort_by(|a, b| {
            b.priority()
                .partial_cmp(&a.priority())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.id.cmp(&b.id))
        });
        let (lead, rest) = ordered.split_first()?;

        let mut secondary: Vec<ThreadId> = rest.iter().map(|t| t.id).collect();
        secondary.sort();
        let participants = ordered
            .iter()
            .flat_map(|t| t.all_participants())
            .collect();

        Some(self.reserve(lead.id, secondary, participants, now))
    }

    /// Group rising threads that share participants.
    pub fn find_convergence_opportunities(&self, threads: &[&StoryThread]) -> Vec<ConvergenceOpportunity> {
        let rising: Vec<&StoryThread> = threads
            .iter()
            .copied()
            .filter(|t| t.stage() == ThreadStage::RisingAction)
            .collect();

        shared_participant_groups(&rising)
            .into_iter()
            .map(|group| {
                let members: Vec<&StoryThread> = rising
                    .iter()
                    .copied()
                    .filter(|t| group.contains(&t.id))
                    .collect();

                let mut shared_participants = BTreeSet::new();
                for (i, a) in members.iter().enumerate() {
                    let cast = a.all_participants();
                    for b in &members[i + 1..] {
                        shared_participants.extend(b.all_participants().intersection(&cast).copied());
                    }
                }

                let combined_tension = members.iter().map(|t| t.tension_level()).sum::<f64>()
                    / members.len().max(1) as f64;

                ConvergenceOpportunity {
                    thread_ids: group.into_iter().collect(),
                    shared_participants,
                    combined_tension,
                }
            })
            .collect()
    }

    /// Push a thread's pending climax back by `minutes`, re-checking spacing.
    ///
    /// Returns the new time, or `None` if the thread has nothing pending.
    pub fn delay_climax(&mut self, thread_id: ThreadId, minutes: u64, now: WorldTime) -> Option<WorldTime> {
        let index = self.scheduled.iter().position(|m| m.involves(thread_id))?;
        let mut moment = self.scheduled.remove(index);

        let candidate = moment.timestamp.max(now).plus_minutes(minutes);
        moment.timestamp = self.first_admissible(candidate);
        let until = moment.timestamp;

        tracing::info!(climax_id = %moment.id, thread_id = %thread_id, until = %until, "climax delayed");
        self.insert_sorted(moment);
        Some(until)
    }

    /// Withdraw a thread from pending climaxes.
    ///
    /// Climaxes it leads are cancelled outright; in joint climaxes it only
    /// leaves the secondary list. Returns how many moments were affected.
    pub fn cancel_for_thread(&mut self, thread_id: ThreadId) -> usize {
        let before = self.scheduled.len();
        self.scheduled.retain(|m| m.primary_thread_id != thread_id);
        let mut affected = before - self.scheduled.len();

        for moment in &mut self.scheduled {
            let len = moment.secondary_thread_ids.len();
            moment.secondary_thread_ids.retain(|id| *id != thread_id);
            if moment.secondary_thread_ids.len() != len {
                affected += 1;
            }
        }

        if affected > 0 {
            tracing::info!(thread_id = %thread_id, affected, "climaxes cancelled");
        }
        affected
    }

    /// Remove and return every climax due at `now`, recording them as fired.
    pub fn take_due(&mut self, now: WorldTime) -> Vec<ClimaticMoment> {
        let (due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.scheduled)
            .into_iter()
            .partition(|m| m.timestamp <= now);
        self.scheduled = waiting;

        due.into_iter()
            .map(|mut moment| {
                moment.fired_at = Some(now);
                self.remember(moment.clone());
                moment
            })
            .collect()
    }

    /// Pending climaxes in timestamp order.
    pub fn pending(&self) -> &[ClimaticMoment] {
        &self.scheduled
    }

    pub fn pending_count(&self) -> usize {
        self.scheduled.len()
    }

    /// The pending climax a thread takes part in, if any.
    pub fn pending_for(&self, thread_id: ThreadId) -> Option<&ClimaticMoment> {
        self.scheduled.iter().find(|m| m.involves(thread_id))
    }

    /// Fired climaxes, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &ClimaticMoment> {
        self.history.iter()
    }

    pub fn config(&self) -> &ClimaxConfig {
        &self.config
    }

    pub(crate) fn restore(&mut self, scheduled: Vec<ClimaticMoment>, history: Vec<ClimaticMoment>) {
        self.scheduled.clear();
        for moment in scheduled {
            self.insert_sorted(moment);
        }
        self.history.clear();
        for moment in history {
            self.remember(moment);
        }
    }

    fn reserve(
        &mut self,
        primary_thread_id: ThreadId,
        secondary_thread_ids: Vec<ThreadId>,
        participants: BTreeSet<ActorId>,
        now: WorldTime,
    ) -> ClimaticMoment {
        let candidate = now.plus_minutes(self.config.lead_minutes);
        let timestamp = self.first_admissible(candidate);
        if timestamp != candidate {
            tracing::debug!(
                thread_id = %primary_thread_id,
                requested = %candidate,
                granted = %timestamp,
                "scheduling conflict resolved"
            );
        }

        let moment = ClimaticMoment {
            id: ClimaxId::new(),
            primary_thread_id,
            secondary_thread_ids,
            timestamp,
            participants,
            scheduled_at: now,
            fired_at: None,
        };
        tracing::info!(climax_id = %moment.id, thread_id = %primary_thread_id, at = %timestamp, "climax scheduled");
        self.insert_sorted(moment.clone());
        moment
    }

    /// Earliest admissible slot at or after `candidate`.
    ///
    /// Only the candidate itself and the boundaries `existing + spacing` need
    /// checking; admissibility can only change at those points.
    fn first_admissible(&self, candidate: WorldTime) -> WorldTime {
        let spacing = self.config.min_climax_spacing_minutes;
        let start = candidate.as_minutes();
        let taken: Vec<u64> = self.scheduled.iter().map(|m| m.timestamp.as_minutes()).collect();

        let mut options: Vec<u64> = taken
            .iter()
            .map(|t| t + spacing)
            .filter(|t| *t >= start)
            .collect();
        options.push(start);
        options.sort_unstable();
        options.dedup();

        let max = self.config.max_parallel_climaxes;
        // Counts a pending climax as its own neighbour.
        let crowd = |slot: u64| taken.iter().filter(|t| t.abs_diff(slot) < spacing).count();
        let admissible = |slot: u64| {
            crowd(slot) < max
                && taken
                    .iter()
                    .filter(|t| t.abs_diff(slot) < spacing)
                    .all(|t| crowd(*t) < max)
        };

        // The last boundary is always clear of every other climax.
        let fallback = taken.iter().max().map_or(start, |latest| (latest + spacing).max(start));
        WorldTime::from_minutes(options.into_iter().find(|slot| admissible(*slot)).unwrap_or(fallback))
    }

    fn insert_sorted(&mut self, moment: ClimaticMoment) {
        let index = self
            .scheduled
            .partition_point(|m| m.timestamp <= moment.timestamp);
        self.scheduled.insert(index, moment);
    }

    fn remember(&mut self, moment: ClimaticMoment) {
        while self.history.len() >= self.config.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(moment);
    }
}

impl Default for ClimaticSequencer {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::ThreadType;

    fn rising(title: &str, cast: &[ActorId], tension: f64) -> StoryThread {
        cast.iter()
            .fold(StoryThread::new(title, ThreadType::SideQuest), |t, a| t.with_primary(*a))
            .with_tension(tension)
            .starting_at(ThreadStage::RisingAction)
    }

    fn solo(title: &str) -> StoryThread {
        rising(title, &[ActorId::new()], 0.7)
    }

    fn start() -> WorldTime {
        WorldTime::new(1, 20, 0)
    }

    #[test]
    fn test_schedule_uses_lead_time() {
        let mut sequencer = ClimaticSequencer::with_defaults();
        let moment = sequencer.schedule_climax(&solo("Tax Collector"), start());

        assert_eq!(moment.timestamp, start().plus_minutes(15));
        assert_eq!(moment.scheduled_at, start());
        assert_eq!(sequencer.pending_count(), 1);
    }

    #[test]
    fn test_schedule_is_idempotent() {
        let mut sequencer = ClimaticSequencer::with_defaults();
        let thread = solo("Tax Collector");

        let first = sequencer.schedule_climax(&thread, start());
        let second = sequencer.schedule_climax(&thread, start().plus_minutes(5));

        assert_eq!(first.id, second.id);
        assert_eq!(sequencer.pending_count(), 1);
    }

    #[test]
    fn test_parallel_allowance_then_pushed() {
        let mut sequencer = ClimaticSequencer::with_defaults();
        let a = sequencer.schedule_climax(&solo("A"), start());
        let b = sequencer.schedule_climax(&solo("B"), start());
        let c = sequencer.schedule_climax(&solo("C"), start());

        assert_eq!(a.timestamp, b.timestamp);
        assert_eq!(c.timestamp, a.timestamp.plus_minutes(30));
    }

    #[test]
    fn test_spacing_holds_for_many_climaxes() {
        let mut sequencer = ClimaticSequencer::with_defaults();
        for i in 0..9u64 {
            sequencer.schedule_climax(&solo("Rumour"), start().plus_minutes(i * 7));
        }

        let times: Vec<WorldTime> = sequencer.pending().iter().map(|m| m.timestamp).collect();
        for (i, t) in times.iter().enumerate() {
            let crowded = times
                .iter()
                .enumerate()
                .filter(|(j, other)| *j != i && t.distance(**other) < 30)
                .count();
            assert!(crowded < 2, "climax at {t} has {crowded} neighbours");
        }
    }

    #[test]
    fn test_first_fit_uses_gaps() {
        let mut sequencer = ClimaticSequencer::new(ClimaxConfig {
            max_parallel_climaxes: 1,
            ..ClimaxConfig::default()
        });
        let early = sequencer.schedule_climax(&solo("Early"), start());
        let late = sequencer.schedule_climax(&solo("Late"), start().plus_minutes(100));
        let filler = sequencer.schedule_climax(&solo("Filler"), start().plus_minutes(20));

        assert_eq!(early.timestamp, start().plus_minutes(15));
        assert_eq!(late.timestamp, start().plus_minutes(115));
        // Candidate 35 is too close to 15, so the next boundary is 45.
        assert_eq!(filler.timestamp, start().plus_minutes(45));
    }

    #[test]
    fn test_joint_climax_led_by_priority() {
        let mut sequencer = ClimaticSequencer::with_defaults();
        let shared = ActorId::new();
        let side = rising("Stolen Lute", &[shared], 0.6);
        let main = {
            let mut t = rising("Bardic Curse", &[shared], 0.6);
            t.thread_type = ThreadType::MainQuest;
            t
        };

        let moment = sequencer.schedule_joint_climax(&[&side, &main], start()).unwrap();
        assert_eq!(moment.primary_thread_id, main.id);
        assert_eq!(moment.secondary_thread_ids, vec![side.id]);
        assert!(moment.is_joint());
        assert!(sequencer.pending_for(side.id).is_some());
        assert!(sequencer.schedule_joint_climax(&[], start()).is_none());
    }

    #[test]
    fn test_convergence_opportunities_only_rising() {
        let sequencer = ClimaticSequencer::with_defaults();
        let shared = ActorId::new();
        let a = rising("A", &[shared], 0.6);
        let b = rising("B", &[shared], 0.4);
        let c = rising("C", &[shared], 0.9).starting_at(ThreadStage::Setup);

        let opportunities = sequencer.find_convergence_opportunities(&[&a, &b, &c]);
        assert_eq!(opportunities.len(), 1);
        assert_eq!(opportunities[0].thread_ids.len(), 2);
        assert!(!opportunities[0].thread_ids.contains(&c.id));
        assert!((opportunities[0].combined_tension - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_delay_climax() {
        let mut sequencer = ClimaticSequencer::with_defaults();
        let thread = solo("Tax Collector");
        let moment = sequencer.schedule_climax(&thread, start());

        let until = sequencer.delay_climax(thread.id, 30, start()).unwrap();
        assert_eq!(until, moment.timestamp.plus_minutes(30));
        assert_eq!(sequencer.pending_for(thread.id).unwrap().timestamp, until);
        assert!(sequencer.delay_climax(ThreadId::new(), 30, start()).is_none());
    }

    #[test]
    fn test_cancel_for_thread() {
        let mut sequencer = ClimaticSequencer::with_defaults();
        let shared = ActorId::new();
        let a = rising("A", &[shared], 0.6);
        let b = rising("B", &[shared], 0.6);
        let moment = sequencer.schedule_joint_climax(&[&a, &b], start()).unwrap();
        let secondary = moment.secondary_thread_ids[0];

        assert_eq!(sequencer.cancel_for_thread(secondary), 1);
        assert_eq!(sequencer.pending_count(), 1);
        assert!(!sequencer.pending()[0].is_joint());

        assert_eq!(sequencer.cancel_for_thread(moment.primary_thread_id), 1);
        assert_eq!(sequencer.pending_count(), 0);
    }

    #[test]
    fn test_take_due_moves_to_history() {
        let mut sequencer = ClimaticSequencer::with_defaults();
        sequencer.schedule_climax(&solo("Soon"), start());
        sequencer.schedule_climax(&solo("Later"), start().plus_minutes(120));

        assert!(sequencer.take_due(start()).is_empty());

        let fired = sequencer.take_due(start().plus_minutes(15));
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].fired_at, Some(start().plus_minutes(15)));
        assert_eq!(sequencer.pending_count(), 1);
        assert_eq!(sequencer.history().count(), 1);
    }

    #[test]
    fn test_history_bounded() {
        let mut sequencer = ClimaticSequencer::new(ClimaxConfig {
            history_capacity: 2,
            ..ClimaxConfig::default()
        });
        for i in 0..5u64 {
            let now = start().plus_minutes(i * 60);
            sequencer.schedule_climax(&solo("Nightly Brawl"), now);
            sequencer.take_due(now.plus_minutes(15));
        }
        assert_eq!(sequencer.history().count(), 2);
    }
}
