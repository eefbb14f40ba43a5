//! Narrative Orchestrator - the per-tick entry point.
//!
//! One orchestrator per play session. Each tick:
//! 1. **Advance**: Fire eligible beats on threads whose cast is present
//! 2. **Climaxes**: Fire climaxes that have come due
//! 3. **Health**: Score the narrative and intervene when it is poor
//! 4. **Arcs**: Group fresh threads into arcs while there is room
//! 5. **Schedule**: Reserve climax slots for threads that are ready
//!
//! Nothing in here returns an error once the orchestrator exists; problems are
//! logged and the tick carries on.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tavern_world::{ActorId, ParticipantDirectory, WorldSnapshot, WorldTime};
use uuid::Uuid;

use crate::actions::OrchestrationAction;
use crate::config::DirectorConfig;
use crate::error::DirectorResult;
use crate::events::NarrativeEvent;
use crate::manager::ThreadManager;
use crate::persist::{DirectorSnapshot, SNAPSHOT_VERSION};
use crate::rules::{InterventionAction, InterventionKind, NarrativeHealth, NarrativeRulesEngine};
use crate::sequencer::{ClimaticMoment, ClimaticSequencer};
use crate::thread::{BeatEffect, StoryBeat, StoryThread, ThreadConvergence, ThreadId, ThreadStage};

/// Tension added by an injected complication.
const COMPLICATION_TENSION: f64 = 0.1;

/// Significance of an injected complication.
const COMPLICATION_SIGNIFICANCE: f64 = 0.6;

/// Unique identifier for arc plans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ArcId(pub Uuid);

impl ArcId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ArcId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ArcId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A group of threads meant to play out together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArcPlan {
    pub id: ArcId,
    pub title: String,
    pub thread_ids: Vec<ThreadId>,
    pub created_at: WorldTime,
}

/// Everything one tick produced.
#[derive(Debug, Clone)]
pub struct TickOutcome {
    pub health: NarrativeHealth,
    pub events: Vec<NarrativeEvent>,
    pub actions: Vec<OrchestrationAction>,
}

/// Coordinates threads, tension, rules and climax scheduling for a session.
#[derive(Debug, Clone)]
pub struct NarrativeOrchestrator {
    config: DirectorConfig,
    threads: ThreadManager,
    rules: NarrativeRulesEngine,
    sequencer: ClimaticSequencer,
    arcs: Vec<ArcPlan>,
    last_health: Option<NarrativeHealth>,
    tick: u64,
}

impl NarrativeOrchestrator {
    /// Create an orchestrator. Fails only on structural misconfiguration.
    pub fn new(config: DirectorConfig) -> DirectorResult<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    /// Create an orchestrator with default configuration.
    pub fn with_defaults() -> Self {
        Self::build(DirectorConfig::default())
    }

    fn build(config: DirectorConfig) -> Self {
        Self {
            threads: ThreadManager::new(config.threads.clone()),
            rules: NarrativeRulesEngine::new(&config),
            sequencer: ClimaticSequencer::new(config.climax.clone()),
            arcs: Vec::new(),
            last_health: None,
            tick: 0,
            config,
        }
    }

    /// Register a new thread.
    pub fn add_thread(&mut self, thread: StoryThread) -> DirectorResult<ThreadId> {
        self.threads.add_thread(thread)
    }

    /// Run one full tick: advance threads, then orchestrate.
    pub fn tick(
        &mut self,
        world: &WorldSnapshot,
        available_participants: &HashSet<ActorId>,
        directory: &dyn ParticipantDirectory,
    ) -> TickOutcome {
        self.tick += 1;
        let events = self
            .threads
            .advance_threads(available_participants, world, directory);
        let actions = self.orchestrate_narrative(world, directory);

        TickOutcome {
            health: self.last_health.unwrap_or(NarrativeHealth::Adequate),
            events,
            actions,
        }
    }

    /// Fire due climaxes, evaluate health, intervene, plan arcs and schedule
    /// climaxes. Returns the actions in the order they were taken.
    pub fn orchestrate_narrative(
        &mut self,
        world: &WorldSnapshot,
        directory: &dyn ParticipantDirectory,
    ) -> Vec<OrchestrationAction> {
        let now = world.time;
        let mut actions = Vec::new();

        // Step 1: Fire climaxes that have come due
        for moment in self.sequencer.take_due(now) {
            if let Some(action) = self.fire_climax(&moment, now) {
                actions.push(action);
            }
        }

        // Step 2: Evaluate narrative health
        let active = self.threads.active_threads();
        let health = self
            .rules
            .evaluate_narrative_health(&active, world, self.sequencer.pending_count());
        self.last_health = Some(health);

        // Step 3: Intervene when the narrative is in trouble
        if health.needs_intervention() {
            let interventions = self
                .rules
                .generate_weighted_interventions(&active, health, directory);
            tracing::info!(health = %health, count = interventions.len(), "intervening");
            for intervention in interventions {
                if let Some(action) = self.execute_intervention(&intervention, now) {
                    actions.push(action);
                }
            }
        }

        // Step 4: Plan arcs
        actions.extend(self.plan_arcs(now, directory));

        // Step 5: Schedule climaxes
        actions.extend(self.schedule_climaxes(now));

        actions
    }

    fn fire_climax(&mut self, moment: &ClimaticMoment, now: WorldTime) -> Option<OrchestrationAction> {
        let mut fired = Vec::new();
        for thread_id in moment.thread_ids() {
            let Some(thread) = self.threads.get_mut(thread_id) else {
                continue;
            };
            if thread.stage() != ThreadStage::RisingAction {
                continue;
            }
            if let Some((from, to)) = thread.advance_stage(now) {
                tracing::info!(thread_id = %thread_id, from = %from, to = %to, "thread stage advanced");
                fired.push(thread_id);
            }
        }

        if fired.is_empty() {
            tracing::debug!(climax_id = %moment.id, "climax came due with no rising threads left");
            return None;
        }

        tracing::info!(climax_id = %moment.id, threads = fired.len(), "climax fired");
        Some(OrchestrationAction::FireClimax {
            climax_id: moment.id,
            thread_ids: fired,
        })
    }

    fn execute_intervention(
        &mut self,
        intervention: &InterventionAction,
        now: WorldTime,
    ) -> Option<OrchestrationAction> {
        let thread_id = intervention.target_thread_id;
        let Some(thread) = self.threads.get_mut(thread_id) else {
            tracing::debug!(thread_id = %thread_id, "intervention target missing");
            return None;
        };

        match &intervention.kind {
            InterventionKind::ReduceTension { target } => {
                thread.set_tension(*target);
                Some(OrchestrationAction::AdjustTension {
                    thread_id,
                    target: thread.tension_level(),
                })
            }
            InterventionKind::BoostThread { amount } => {
                thread.adjust_involvement(*amount);
                Some(OrchestrationAction::BoostThread {
                    thread_id,
                    involvement: thread.player_involvement(),
                })
            }
            InterventionKind::DelayClimax { minutes } => {
                let until = if thread.stage() == ThreadStage::Climax {
                    let until = now.plus_minutes(*minutes);
                    thread.hold_climax(until);
                    tracing::info!(thread_id = %thread_id, until = %until, "climax held");
                    until
                } else {
                    self.sequencer.delay_climax(thread_id, *minutes, now)?
                };
                Some(OrchestrationAction::DelayClimax { thread_id, until })
            }
            InterventionKind::RetireThread => {
                if !self.threads.retire_thread(thread_id, now) {
                    return None;
                }
                self.sequencer.cancel_for_thread(thread_id);
                Some(OrchestrationAction::RetireThread { thread_id })
            }
            InterventionKind::InjectBeat { beat_type } => {
                let beat = StoryBeat::new(thread_id, beat_type.clone(), intervention.description.clone())
                    .with_effect(BeatEffect::TensionDelta(COMPLICATION_TENSION))
                    .with_significance(COMPLICATION_SIGNIFICANCE);
                let beat_id = beat.id;
                thread.queue_beat(beat);
                Some(OrchestrationAction::InjectBeat {
                    thread_id,
                    beat_id,
                    beat_type: beat_type.clone(),
                })
            }
            InterventionKind::MergeThreads { absorb } => {
                if !self.threads.merge_threads(thread_id, *absorb, now) {
                    tracing::debug!(thread_id = %absorb, "intervention target missing");
                    return None;
                }
                self.sequencer.cancel_for_thread(*absorb);
                Some(OrchestrationAction::MergeThreads {
                    primary_thread_id: thread_id,
                    absorbed_thread_id: *absorb,
                })
            }
        }
    }

    fn plan_arcs(&mut self, now: WorldTime, directory: &dyn ParticipantDirectory) -> Vec<OrchestrationAction> {
        let threads = &self.threads;
        self.arcs.retain(|arc| arc.thread_ids.iter().any(|id| threads.get(*id).is_some()));

        if self.threads.is_over_capacity() {
            tracing::warn!(
                active = self.threads.active_count(),
                max = self.config.threads.max_active_threads,
                "arc planning paused: thread capacity exceeded"
            );
            return Vec::new();
        }

        let mut actions = Vec::new();
        while self.arcs.len() < self.config.arcs.max_concurrent_arcs {
            let assigned: HashSet<ThreadId> = self
                .arcs
                .iter()
                .flat_map(|arc| arc.thread_ids.iter().copied())
                .collect();
            let mut candidates: Vec<&StoryThread> = self
                .threads
                .active_threads()
                .into_iter()
                .filter(|t| t.stage() == ThreadStage::Setup && !assigned.contains(&t.id))
                .collect();
            candidates.sort_by(|a, b| {
                b.priority()
                    .partial_cmp(&a.priority())
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.id.cmp(&b.id))
            });
            let Some(seed) = candidates.first().copied() else {
                break;
            };

            // The seed brings along the strongest convergence it belongs to.
            let strongest = ThreadConvergence::detect(&candidates, directory)
                .into_iter()
                .filter(|c| c.includes(seed.id))
                .max_by(|a, b| a.strength.partial_cmp(&b.strength).unwrap_or(std::cmp::Ordering::Equal));
            let thread_ids = strongest.map_or_else(|| vec![seed.id], |c| c.thread_ids);

            let arc = ArcPlan {
                id: ArcId::new(),
                title: seed.title.clone(),
                thread_ids,
                created_at: now,
            };
            tracing::info!(arc_id = %arc.id, title = %arc.title, threads = arc.thread_ids.len(), "arc planned");
            actions.push(OrchestrationAction::PlanArc {
                arc_id: arc.id,
                thread_ids: arc.thread_ids.clone(),
            });
            self.arcs.push(arc);
        }
        actions
    }

    fn schedule_climaxes(&mut self, now: WorldTime) -> Vec<OrchestrationAction> {
        let mut actions = Vec::new();
        let active = self.threads.active_threads();

        for opportunity in self.sequencer.find_convergence_opportunities(&active) {
            let members: Vec<&StoryThread> = active
                .iter()
                .copied()
                .filter(|t| opportunity.thread_ids.contains(&t.id))
                .collect();
            let ready = members.len() == opportunity.thread_ids.len()
                && members
                    .iter()
                    .all(|t| t.tension_level() >= self.config.climax.joint_climax_tension)
                && members
                    .iter()
                    .all(|t| self.sequencer.pending_for(t.id).is_none());
            if !ready {
                continue;
            }
            if let Some(moment) = self.sequencer.schedule_joint_climax(&members, now) {
                actions.push(schedule_action(&moment));
            }
        }

        for thread in active.iter().filter(|t| t.stage() == ThreadStage::RisingAction) {
            if self.sequencer.pending_for(thread.id).is_some() {
                continue;
            }
            let recommended = self.rules.tension().recommend_tension_adjustment(thread, now);
            let tension = thread.tension_level();
            if tension >= recommended && tension >= self.config.climax.min_climax_tension {
                let moment = self.sequencer.schedule_climax(thread, now);
                actions.push(schedule_action(&moment));
            }
        }

        actions
    }

    /// Capture everything needed to resume this session.
    pub fn snapshot(&self, saved_at: WorldTime) -> DirectorSnapshot {
        DirectorSnapshot {
            version: SNAPSHOT_VERSION,
            saved_at,
            tick: self.tick,
            threads: self.threads.all_threads().cloned().collect(),
            tension_history: self.rules.tension().history().copied().collect(),
            scheduled_climaxes: self.sequencer.pending().to_vec(),
            climax_history: self.sequencer.history().cloned().collect(),
            arcs: self.arcs.clone(),
            last_health: self.last_health,
            pacing_records: self
                .rules
                .records()
                .iter()
                .map(|(id, record)| (*id, record.clone()))
                .collect(),
        }
    }

    /// Rebuild an orchestrator from a snapshot.
    ///
    /// Threads are validated again; malformed entries or a repeated ID reject
    /// the whole snapshot.
    pub fn restore(config: DirectorConfig, snapshot: DirectorSnapshot) -> DirectorResult<Self> {
        snapshot.check_version()?;
        let mut orchestrator = Self::new(config)?;

        orchestrator.threads =
            ThreadManager::from_threads(orchestrator.config.threads.clone(), snapshot.threads)?;
        orchestrator
            .rules
            .restore(snapshot.tension_history, snapshot.pacing_records.into_iter().collect());
        orchestrator
            .sequencer
            .restore(snapshot.scheduled_climaxes, snapshot.climax_history);
        orchestrator.arcs = snapshot.arcs;
        orchestrator.last_health = snapshot.last_health;
        orchestrator.tick = snapshot.tick;

        tracing::info!(
            active = orchestrator.threads.active_count(),
            pending_climaxes = orchestrator.sequencer.pending_count(),
            "director restored"
        );
        Ok(orchestrator)
    }

    pub fn threads(&self) -> &ThreadManager {
        &self.threads
    }

    pub fn sequencer(&self) -> &ClimaticSequencer {
        &self.sequencer
    }

    pub fn rules(&self) -> &NarrativeRulesEngine {
        &self.rules
    }

    pub fn arcs(&self) -> &[ArcPlan] {
        &self.arcs
    }

    /// Health from the most recent orchestration pass.
    pub fn last_health(&self) -> Option<NarrativeHealth> {
        self.last_health
    }

    pub fn config(&self) -> &DirectorConfig {
        &self.config
    }

    /// Ticks run so far.
    pub fn tick_count(&self) -> u64 {
        self.tick
    }
}

fn schedule_action(moment: &ClimaticMoment) -> OrchestrationAction {
    OrchestrationAction::ScheduleClimax {
        climax_id: moment.id,
        primary_thread_id: moment.primary_thread_id,
        secondary_thread_ids: moment.secondary_thread_ids.clone(),
        at: moment.timestamp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ThreadConfig;
    use crate::error::DirectorError;
    use crate::thread::ThreadType;
    use tavern_world::{Patron, Roster};

    fn roster_with(names: &[&str]) -> (Roster, Vec<ActorId>) {
        let mut roster = Roster::new();
        let ids = names
            .iter()
            .map(|name| roster.add_patron(Patron::new(*name)))
            .collect();
        (roster, ids)
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = DirectorConfig {
            threads: ThreadConfig {
                max_active_threads: 0,
                ..ThreadConfig::default()
            },
            ..DirectorConfig::default()
        };
        assert!(matches!(
            NarrativeOrchestrator::new(config),
            Err(DirectorError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_ready_thread_gets_climax_slot() {
        let (roster, cast) = roster_with(&["Captain Vey"]);
        let mut director = NarrativeOrchestrator::with_defaults();
        let start = WorldTime::new(1, 21, 0);
        let thread = StoryThread::new("Mutiny Brewing", ThreadType::MainQuest)
            .with_primary(cast[0])
            .with_tension(0.75)
            .created_at(start)
            .starting_at(ThreadStage::RisingAction);
        let id = director.add_thread(thread).unwrap();

        let actions = director.orchestrate_narrative(&WorldSnapshot::new().at(start), &roster);

        assert!(actions.iter().any(|a| matches!(
            a,
            OrchestrationAction::ScheduleClimax { primary_thread_id, .. } if *primary_thread_id == id
        )));
        assert!(director.sequencer().pending_for(id).is_some());
    }

    #[test]
    fn test_cool_thread_not_scheduled() {
        let (roster, cast) = roster_with(&["Captain Vey"]);
        let mut director = NarrativeOrchestrator::with_defaults();
        let thread = StoryThread::new("Mutiny Brewing", ThreadType::MainQuest)
            .with_primary(cast[0])
            .with_tension(0.45)
            .starting_at(ThreadStage::RisingAction);
        director.add_thread(thread).unwrap();

        director.orchestrate_narrative(&WorldSnapshot::new(), &roster);
        assert_eq!(director.sequencer().pending_count(), 0);
    }

    #[test]
    fn test_due_climax_fires() {
        let (roster, cast) = roster_with(&["Captain Vey"]);
        let mut director = NarrativeOrchestrator::with_defaults();
        let start = WorldTime::new(1, 21, 0);
        let thread = StoryThread::new("Mutiny Brewing", ThreadType::MainQuest)
            .with_primary(cast[0])
            .with_tension(0.75)
            .created_at(start)
            .starting_at(ThreadStage::RisingAction);
        let id = director.add_thread(thread).unwrap();

        director.orchestrate_narrative(&WorldSnapshot::new().at(start), &roster);
        let later = WorldSnapshot::new().at(start.plus_minutes(15));
        let actions = director.orchestrate_narrative(&later, &roster);

        assert!(matches!(actions[0], OrchestrationAction::FireClimax { .. }));
        assert_eq!(director.threads().get(id).unwrap().stage(), ThreadStage::Climax);
        assert_eq!(director.sequencer().history().count(), 1);
    }

    #[test]
    fn test_joint_climax_for_converging_threads() {
        let (roster, cast) = roster_with(&["Widow Marsh"]);
        let mut director = NarrativeOrchestrator::with_defaults();
        let mut ids = Vec::new();
        for title in ["Widow's Will", "Widow's Suitor"] {
            let thread = StoryThread::new(title, ThreadType::SideQuest)
                .with_primary(cast[0])
                .with_tension(0.55)
                .starting_at(ThreadStage::RisingAction);
            ids.push(director.add_thread(thread).unwrap());
        }

        let actions = director.orchestrate_narrative(&WorldSnapshot::new(), &roster);

        let joint = actions
            .iter()
            .find_map(|a| match a {
                OrchestrationAction::ScheduleClimax {
                    secondary_thread_ids,
                    ..
                } if !secondary_thread_ids.is_empty() => Some(a),
                _ => None,
            });
        assert!(joint.is_some());
        assert_eq!(director.sequencer().pending_count(), 1);
        assert!(ids.iter().all(|id| director.sequencer().pending_for(*id).is_some()));
    }

    #[test]
    fn test_arcs_planned_for_setup_threads() {
        let (roster, cast) = roster_with(&["Old Tam", "Sister Ro"]);
        let mut director = NarrativeOrchestrator::with_defaults();
        let a = StoryThread::new("Tam's Debt", ThreadType::SideQuest).with_primary(cast[0]);
        let b = StoryThread::new("Tam's Son", ThreadType::CharacterArc).with_primary(cast[0]);
        let c = StoryThread::new("Ro's Vow", ThreadType::Romance).with_primary(cast[1]);
        let (a_id, b_id) = (a.id, b.id);
        for thread in [a, b, c] {
            director.add_thread(thread).unwrap();
        }

        let actions = director.orchestrate_narrative(&WorldSnapshot::new(), &roster);
        let planned = actions
            .iter()
            .filter(|a| matches!(a, OrchestrationAction::PlanArc { .. }))
            .count();

        assert_eq!(planned, 2);
        assert_eq!(director.arcs().len(), 2);
        assert!(director
            .arcs()
            .iter()
            .any(|arc| arc.thread_ids.contains(&a_id) && arc.thread_ids.contains(&b_id)));

        // Nothing new to plan on the next pass.
        let actions = director.orchestrate_narrative(&WorldSnapshot::new(), &roster);
        assert!(!actions.iter().any(|a| matches!(a, OrchestrationAction::PlanArc { .. })));
    }

    #[test]
    fn test_arc_planning_paused_over_capacity() {
        let (roster, cast) = roster_with(&["Old Tam"]);
        let mut director = NarrativeOrchestrator::new(DirectorConfig {
            threads: ThreadConfig {
                max_active_threads: 1,
                ..ThreadConfig::default()
            },
            ..DirectorConfig::default()
        })
        .unwrap();
        for title in ["One", "Two"] {
            let thread = StoryThread::new(title, ThreadType::Social).with_primary(cast[0]);
            director.add_thread(thread).unwrap();
        }

        let actions = director.orchestrate_narrative(&WorldSnapshot::new(), &roster);
        assert!(!actions.iter().any(|a| matches!(a, OrchestrationAction::PlanArc { .. })));
        assert!(director.arcs().is_empty());
    }

    #[test]
    fn test_intervention_delays_extra_climax() {
        let (roster, cast) = roster_with(&["A", "B", "C"]);
        let mut director = NarrativeOrchestrator::with_defaults();
        let now = WorldTime::new(2, 22, 0);
        let types = [ThreadType::MainQuest, ThreadType::Political, ThreadType::Social];
        let mut ids = Vec::new();
        for (actor, thread_type) in cast.iter().zip(types) {
            let thread = StoryThread::new("Showdown", thread_type)
                .with_primary(*actor)
                .with_tension(0.9)
                .with_involvement(0.1)
                .starting_at(ThreadStage::Climax);
            ids.push(director.add_thread(thread).unwrap());
        }

        let actions = director.orchestrate_narrative(&WorldSnapshot::new().at(now), &roster);

        assert!(director.last_health().unwrap() <= NarrativeHealth::Poor);
        assert!(actions.iter().any(|a| matches!(
            a,
            OrchestrationAction::DelayClimax { thread_id, .. } if *thread_id == ids[2]
        )));
        let held = director.threads().get(ids[2]).unwrap();
        assert_eq!(held.stage(), ThreadStage::Climax);
        assert!(held.is_held(now));
    }

    #[test]
    fn test_tick_bundles_events_and_actions() {
        let (roster, cast) = roster_with(&["Minstrel"]);
        let mut director = NarrativeOrchestrator::with_defaults();
        let thread = StoryThread::new("Ballad of the Lost", ThreadType::CharacterArc).with_primary(cast[0]);
        let beat = thread.beat("performance", "A haunting verse");
        director.add_thread(thread.with_beat(beat)).unwrap();

        let available: HashSet<ActorId> = cast.iter().copied().collect();
        let outcome = director.tick(&WorldSnapshot::new(), &available, &roster);

        assert!(matches!(outcome.events[0], NarrativeEvent::BeatFired { .. }));
        assert_eq!(Some(outcome.health), director.last_health());
        assert_eq!(director.tick_count(), 1);
    }
}
