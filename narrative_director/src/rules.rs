//! Narrative Rules Engine - health scoring, pacing rules, and interventions.
//!
//! Health is recomputed on every evaluation from the current threads:
//! 1. **Measure**: Refresh pacing metrics, per-thread records and global tension
//! 2. **Check**: Collect pacing violations
//! 3. **Score**: Start from the pacing score and subtract per-violation penalties
//! 4. **Correct**: When health is poor, propose ranked interventions

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tavern_world::{ActorId, ParticipantDirectory, WorldSnapshot, WorldTime};

use crate::config::{ClimaxConfig, DirectorConfig, PacingConfig};
use crate::pacing::{PacingMetrics, ThreadPacing};
use crate::tension::{TensionManager, TensionSample};
use crate::thread::{StoryThread, ThreadId, ThreadStage};

/// Most interventions proposed in one evaluation.
pub const MAX_INTERVENTIONS: usize = 5;

/// Beat type queued to break a plateau.
pub const COMPLICATION_BEAT: &str = "complication";

/// Global tension at which a rising trend counts as runaway.
const RUNAWAY_TENSION_FLOOR: f64 = 0.6;

/// Involvement added by a boost.
const BOOST_AMOUNT: f64 = 0.25;

/// Highest score while a correctable violation stands; just under Adequate,
/// so the orchestrator always steps in.
pub const CORRECTION_CEILING: f64 = 0.39;

/// Overall narrative health. Ordered from worst to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NarrativeHealth {
    Critical,
    Poor,
    Adequate,
    Good,
    Excellent,
}

impl NarrativeHealth {
    /// Map a health score onto the fixed thresholds.
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            NarrativeHealth::Excellent
        } else if score >= 0.6 {
            NarrativeHealth::Good
        } else if score >= 0.4 {
            NarrativeHealth::Adequate
        } else if score >= 0.2 {
            NarrativeHealth::Poor
        } else {
            NarrativeHealth::Critical
        }
    }

    /// Whether the orchestrator should step in.
    pub fn needs_intervention(self) -> bool {
        self <= NarrativeHealth::Poor
    }
}

impl std::fmt::Display for NarrativeHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            NarrativeHealth::Critical => "critical",
            NarrativeHealth::Poor => "poor",
            NarrativeHealth::Adequate => "adequate",
            NarrativeHealth::Good => "good",
            NarrativeHealth::Excellent => "excellent",
        };
        f.write_str(name)
    }
}

/// A broken pacing rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PacingViolation {
    /// More live climaxes than allowed at once.
    SimultaneousClimax { thread_ids: Vec<ThreadId>, excess: usize },
    /// A rising thread whose tension has not moved.
    TensionPlateau { thread_id: ThreadId, ticks: u32 },
    /// A thread the player has been ignoring.
    ThreadStarvation { thread_id: ThreadId, ticks: u32 },
    /// Tension climbing fast with no climax in sight to release it.
    RunawayEscalation { trend: f64, global_tension: f64 },
    /// More active threads than the soft limit.
    ThreadOverload { active: usize, max: usize },
}

impl PacingViolation {
    /// Whether this violation alone should pull health under Adequate.
    ///
    /// Overload stays advisory: it only shapes interventions that are already
    /// happening.
    pub fn demands_correction(&self) -> bool {
        !matches!(self, PacingViolation::ThreadOverload { .. })
    }
}

impl std::fmt::Display for PacingViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PacingViolation::SimultaneousClimax { .. } => "simultaneous climax",
            PacingViolation::TensionPlateau { .. } => "tension plateau",
            PacingViolation::ThreadStarvation { .. } => "thread starvation",
            PacingViolation::RunawayEscalation { .. } => "runaway escalation",
            PacingViolation::ThreadOverload { .. } => "thread overload",
        };
        f.write_str(name)
    }
}

/// What an intervention does to its target thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InterventionKind {
    ReduceTension { target: f64 },
    BoostThread { amount: f64 },
    DelayClimax { minutes: u64 },
    RetireThread,
    InjectBeat { beat_type: String },
    /// Fold `absorb` into the target thread.
    MergeThreads { absorb: ThreadId },
}

/// A proposed correction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterventionAction {
    pub kind: InterventionKind,
    pub target_thread_id: ThreadId,
    /// Urgency (0.0 - 1.0).
    pub priority: f64,
    pub description: String,
}

impl InterventionAction {
    fn new(kind: InterventionKind, target: &StoryThread, priority: f64, description: String) -> Self {
        Self {
            kind,
            target_thread_id: target.id,
            priority: priority.clamp(0.0, 1.0),
            description,
        }
    }
}

/// Scores narrative health and proposes corrections.
#[derive(Debug, Clone)]
pub struct NarrativeRulesEngine {
    pacing: PacingConfig,
    climax: ClimaxConfig,
    max_active_threads: usize,
    tension: TensionManager,
    metrics: PacingMetrics,
    records: BTreeMap<ThreadId, ThreadPacing>,
    pending_climaxes: usize,
    last_score: f64,
}

impl NarrativeRulesEngine {
    pub fn new(config: &DirectorConfig) -> Self {
        Self {
            pacing: config.pacing.clone(),
            climax: config.climax.clone(),
            max_active_threads: config.threads.max_active_threads,
            tension: TensionManager::new(config.tension.clone()),
            metrics: PacingMetrics::default(),
            records: BTreeMap::new(),
            pending_climaxes: 0,
            last_score: 0.0,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(&DirectorConfig::default())
    }

    /// Evaluate the health of the given active threads.
    ///
    /// `pending_climaxes` is the number of scheduled, unfired climaxes; a
    /// pending climax means rising tension has somewhere to go.
    pub fn evaluate_narrative_health(
        &mut self,
        threads: &[&StoryThread],
        world: &WorldSnapshot,
        pending_climaxes: usize,
    ) -> NarrativeHealth {
        self.update_pacing_metrics(threads, world.time, pending_climaxes);

        let violations = self.check_pacing_rules(threads);
        let mut score = self.metrics.pacing_score;
        for violation in &violations {
            score -= match violation {
                PacingViolation::RunawayEscalation { .. } => 0.2,
                PacingViolation::SimultaneousClimax { excess, .. } => 0.25 * *excess as f64,
                PacingViolation::TensionPlateau { .. } => 0.1,
                PacingViolation::ThreadStarvation { .. } => 0.05,
                PacingViolation::ThreadOverload { .. } => 0.0,
            };
        }
        if violations.iter().any(PacingViolation::demands_correction) {
            score = score.min(CORRECTION_CEILING);
        }
        self.last_score = score.clamp(0.0, 1.0);

        let health = NarrativeHealth::from_score(self.last_score);
        tracing::debug!(score = self.last_score, health = %health, "narrative health evaluated");
        health
    }

    /// Refresh metrics, global tension and per-thread records.
    ///
    /// Records of threads no longer present are dropped.
    pub fn update_pacing_metrics(
        &mut self,
        threads: &[&StoryThread],
        now: WorldTime,
        pending_climaxes: usize,
    ) -> &PacingMetrics {
        let global_tension = self.tension.update_global_tension(threads, now);
        let tension_trend = self
            .tension
            .get_tension_trend(self.pacing.trend_window_minutes, now);

        self.metrics = PacingMetrics {
            global_tension,
            tension_trend,
            ..PacingMetrics::measure(threads, &self.pacing, now)
        };
        self.pending_climaxes = pending_climaxes;

        let present: HashSet<ThreadId> = threads.iter().map(|t| t.id).collect();
        self.records.retain(|id, _| present.contains(id));
        for thread in threads {
            match self.records.get_mut(&thread.id) {
                Some(record) => record.update(thread, &self.pacing),
                None => {
                    self.records
                        .insert(thread.id, ThreadPacing::observe(thread, &self.pacing));
                }
            }
        }

        &self.metrics
    }

    /// Check pacing rules against the threads and the latest metrics.
    pub fn check_pacing_rules(&self, threads: &[&StoryThread]) -> Vec<PacingViolation> {
        let mut violations = Vec::new();
        let now = self.metrics.measured_at;

        let live: Vec<ThreadId> = threads
            .iter()
            .filter(|t| t.is_climax_live(now))
            .map(|t| t.id)
            .collect();
        if live.len() > self.climax.max_parallel_climaxes {
            violations.push(PacingViolation::SimultaneousClimax {
                excess: live.len() - self.climax.max_parallel_climaxes,
                thread_ids: live,
            });
        }

        for thread in threads {
            let Some(record) = self.records.get(&thread.id) else {
                continue;
            };
            if thread.stage() == ThreadStage::RisingAction && record.is_plateaued(&self.pacing) {
                violations.push(PacingViolation::TensionPlateau {
                    thread_id: thread.id,
                    ticks: record.stagnant_ticks,
                });
            }
            if record.is_starving(&self.pacing) {
                violations.push(PacingViolation::ThreadStarvation {
                    thread_id: thread.id,
                    ticks: record.starved_ticks,
                });
            }
        }

        if self.metrics.tension_trend > self.pacing.runaway_trend_per_minute
            && self.metrics.global_tension >= RUNAWAY_TENSION_FLOOR
            && self.pending_climaxes == 0
        {
            violations.push(PacingViolation::RunawayEscalation {
                trend: self.metrics.tension_trend,
                global_tension: self.metrics.global_tension,
            });
        }

        if threads.len() > self.max_active_threads {
            violations.push(PacingViolation::ThreadOverload {
                active: threads.len(),
                max: self.max_active_threads,
            });
        }

        violations
    }

    /// Propose interventions for the current violations.
    ///
    /// Sorted by priority (highest first, ties by thread ID) and capped at
    /// [`MAX_INTERVENTIONS`].
    pub fn generate_interventions(
        &self,
        threads: &[&StoryThread],
        health: NarrativeHealth,
    ) -> Vec<InterventionAction> {
        self.propose(threads, health, None)
    }

    /// Like [`generate_interventions`](Self::generate_interventions), with
    /// participant affinities steering which threads get merged.
    pub fn generate_weighted_interventions(
        &self,
        threads: &[&StoryThread],
        health: NarrativeHealth,
        directory: &dyn ParticipantDirectory,
    ) -> Vec<InterventionAction> {
        self.propose(threads, health, Some(directory))
    }

    fn propose(
        &self,
        threads: &[&StoryThread],
        health: NarrativeHealth,
        directory: Option<&dyn ParticipantDirectory>,
    ) -> Vec<InterventionAction> {
        let by_id: BTreeMap<ThreadId, &StoryThread> = threads.iter().map(|t| (t.id, *t)).collect();
        let now = self.metrics.measured_at;
        let mut interventions = Vec::new();

        for violation in self.check_pacing_rules(threads) {
            match violation {
                PacingViolation::SimultaneousClimax { thread_ids, excess } => {
                    let mut live: Vec<&StoryThread> =
                        thread_ids.iter().filter_map(|id| by_id.get(id).copied()).collect();
                    live.sort_by(|a, b| {
                        a.priority()
                            .partial_cmp(&b.priority())
                            .unwrap_or(std::cmp::Ordering::Equal)
                            .then(a.id.cmp(&b.id))
                    });
                    for thread in live.into_iter().take(excess) {
                        interventions.push(InterventionAction::new(
                            InterventionKind::DelayClimax {
                                minutes: self.climax.delay_minutes,
                            },
                            thread,
                            0.9,
                            format!("hold back the climax of '{}'", thread.title),
                        ));
                    }
                }
                PacingViolation::RunawayEscalation { .. } => {
                    let hottest = threads
                        .iter()
                        .filter(|t| t.stage() != ThreadStage::Climax)
                        .max_by(|a, b| {
                            a.tension_level()
                                .partial_cmp(&b.tension_level())
                                .unwrap_or(std::cmp::Ordering::Equal)
                                .then(b.id.cmp(&a.id))
                        });
                    if let Some(thread) = hottest {
                        let recommended = self.tension.recommend_tension_adjustment(thread, now);
                        let target = recommended.min(thread.tension_level() - 0.1).max(0.0);
                        interventions.push(InterventionAction::new(
                            InterventionKind::ReduceTension { target },
                            thread,
                            0.8,
                            format!("ease tension in '{}'", thread.title),
                        ));
                    }
                }
                PacingViolation::TensionPlateau { thread_id, .. } => {
                    let Some(thread) = by_id.get(&thread_id) else {
                        continue;
                    };
                    // One queued complication is enough until it fires.
                    if thread.pending_beats().any(|b| b.beat_type == COMPLICATION_BEAT) {
                        continue;
                    }
                    interventions.push(InterventionAction::new(
                        InterventionKind::InjectBeat {
                            beat_type: COMPLICATION_BEAT.to_string(),
                        },
                        thread,
                        0.5 + 0.2 * thread.player_involvement(),
                        format!("complicate '{}' to break the plateau", thread.title),
                    ));
                }
                PacingViolation::ThreadStarvation { thread_id, .. } => {
                    let Some(thread) = by_id.get(&thread_id) else {
                        continue;
                    };
                    if health == NarrativeHealth::Critical
                        && thread.priority() < self.pacing.low_value_priority
                    {
                        interventions.push(InterventionAction::new(
                            InterventionKind::RetireThread,
                            thread,
                            0.6,
                            format!("retire neglected thread '{}'", thread.title),
                        ));
                    } else {
                        interventions.push(InterventionAction::new(
                            InterventionKind::BoostThread {
                                amount: BOOST_AMOUNT,
                            },
                            thread,
                            0.45 + (1.0 - thread.player_involvement()) * 0.2,
                            format!("draw the player back into '{}'", thread.title),
                        ));
                    }
                }
                PacingViolation::ThreadOverload { .. } => {
                    if let Some((primary, absorbed)) = best_merge_pair(threads, directory) {
                        interventions.push(InterventionAction::new(
                            InterventionKind::MergeThreads { absorb: absorbed.id },
                            primary,
                            0.35,
                            format!("fold '{}' into '{}'", absorbed.title, primary.title),
                        ));
                    } else if health == NarrativeHealth::Critical {
                        let weakest = threads
                            .iter()
                            .filter(|t| t.stage() == ThreadStage::Setup)
                            .min_by(|a, b| {
                                a.priority()
                                    .partial_cmp(&b.priority())
                                    .unwrap_or(std::cmp::Ordering::Equal)
                                    .then(a.id.cmp(&b.id))
                            });
                        if let Some(thread) = weakest {
                            interventions.push(InterventionAction::new(
                                InterventionKind::RetireThread,
                                thread,
                                0.35,
                                format!("retire '{}' to thin the cast of stories", thread.title),
                            ));
                        }
                    }
                }
            }
        }

        interventions.sort_by(|a, b| {
            b.priority
                .partial_cmp(&a.priority)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.target_thread_id.cmp(&b.target_thread_id))
        });
        interventions.truncate(MAX_INTERVENTIONS);
        interventions
    }

    /// Latest pacing metrics.
    pub fn metrics(&self) -> &PacingMetrics {
        &self.metrics
    }

    /// Latest health score before thresholding.
    pub fn last_score(&self) -> f64 {
        self.last_score
    }

    pub fn tension(&self) -> &TensionManager {
        &self.tension
    }

    pub fn thread_record(&self, id: ThreadId) -> Option<&ThreadPacing> {
        self.records.get(&id)
    }

    pub(crate) fn records(&self) -> &BTreeMap<ThreadId, ThreadPacing> {
        &self.records
    }

    pub(crate) fn restore(
        &mut self,
        history: Vec<TensionSample>,
        records: BTreeMap<ThreadId, ThreadPacing>,
    ) {
        self.tension.restore_history(history);
        self.records = records;
    }
}

/// The non-climax pair that shares cast and gets along best, higher priority
/// first.
///
/// Shared participants count one each; the mean mutual affinity across the
/// combined cast breaks near ties.
fn best_merge_pair<'a>(
    threads: &[&'a StoryThread],
    directory: Option<&dyn ParticipantDirectory>,
) -> Option<(&'a StoryThread, &'a StoryThread)> {
    let mut candidates: Vec<&StoryThread> = threads
        .iter()
        .copied()
        .filter(|t| t.stage() != ThreadStage::Climax)
        .collect();
    candidates.sort_by_key(|t| t.id);

    let mut best: Option<(f64, &StoryThread, &StoryThread)> = None;
    for (i, a) in candidates.iter().enumerate() {
        let cast = a.all_participants();
        for b in &candidates[i + 1..] {
            let other = b.all_participants();
            let shared = other.intersection(&cast).count();
            if shared == 0 {
                continue;
            }
            let cohesion = directory.map_or(0.0, |dir| {
                let union: BTreeSet<ActorId> = cast.union(&other).copied().collect();
                cast_affinity(&union, dir)
            });
            let score = shared as f64 + cohesion;
            if best.map_or(true, |(top, _, _)| score > top) {
                best = Some((score, *a, *b));
            }
        }
    }

    best.map(|(_, a, b)| if b.priority() > a.priority() { (b, a) } else { (a, b) })
}

/// Mean mutual affinity over every pair in the cast; 0 for a lone actor.
fn cast_affinity(cast: &BTreeSet<ActorId>, directory: &dyn ParticipantDirectory) -> f64 {
    let members: Vec<ActorId> = cast.iter().copied().collect();
    let mut total = 0.0;
    let mut pairs = 0usize;
    for (i, a) in members.iter().enumerate() {
        for b in &members[i + 1..] {
            total += directory.mutual_affinity(*a, *b);
            pairs += 1;
        }
    }
    if pairs == 0 {
        0.0
    } else {
        total / pairs as f64
    }
}
