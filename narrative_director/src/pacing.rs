//! Pacing metrics and per-thread pacing records.

use serde::{Deserialize, Serialize};
use tavern_world::WorldTime;

use crate::config::PacingConfig;
use crate::thread::{StoryThread, ThreadStage};

/// Score reported when nothing is running. Quiet is neither good nor bad.
const IDLE_PACING_SCORE: f64 = 0.5;

/// Snapshot of narrative pacing, recomputed on every health evaluation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PacingMetrics {
    pub measured_at: WorldTime,
    pub active_threads: usize,
    /// Threads in climax that are not held.
    pub live_climaxes: usize,
    pub average_tension: f64,
    pub average_involvement: f64,
    /// How close the active thread count is to the target density (0.0 - 1.0).
    pub density_score: f64,
    pub pacing_score: f64,
    pub global_tension: f64,
    pub tension_trend: f64,
}

impl PacingMetrics {
    /// Measure the thread-derived parts of the metrics.
    ///
    /// Global tension and trend belong to the tension manager and are filled in
    /// by the caller.
    pub fn measure(threads: &[&StoryThread], config: &PacingConfig, now: WorldTime) -> Self {
        let count = threads.len();
        let (average_tension, average_involvement) = if count == 0 {
            (0.0, 0.0)
        } else {
            let n = count as f64;
            (
                threads.iter().map(|t| t.tension_level()).sum::<f64>() / n,
                threads.iter().map(|t| t.player_involvement()).sum::<f64>() / n,
            )
        };

        Self {
            measured_at: now,
            active_threads: count,
            live_climaxes: threads.iter().filter(|t| t.is_climax_live(now)).count(),
            average_tension,
            average_involvement,
            density_score: density_score(count, config.target_thread_density),
            pacing_score: calculate_pacing_score(threads, config),
            global_tension: 0.0,
            tension_trend: 0.0,
        }
    }
}

/// Pacing score in [0, 1]: half thread density, half player involvement.
pub fn calculate_pacing_score(threads: &[&StoryThread], config: &PacingConfig) -> f64 {
    if threads.is_empty() {
        return IDLE_PACING_SCORE;
    }
    let involvement =
        threads.iter().map(|t| t.player_involvement()).sum::<f64>() / threads.len() as f64;
    let density = density_score(threads.len(), config.target_thread_density);
    (0.5 * density + 0.5 * involvement).clamp(0.0, 1.0)
}

fn density_score(count: usize, target: usize) -> f64 {
    let target = target.max(1) as f64;
    (1.0 - (count as f64 - target).abs() / target).clamp(0.0, 1.0)
}

/// What the rules engine remembers about one thread between evaluations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadPacing {
    pub last_tension: f64,
    pub last_stage: ThreadStage,
    /// Consecutive observations in rising action with unchanged tension.
    pub stagnant_ticks: u32,
    /// Consecutive observations with involvement under the starvation floor.
    pub starved_ticks: u32,
}

impl ThreadPacing {
    /// First observation of a thread.
    pub fn observe(thread: &StoryThread, config: &PacingConfig) -> Self {
        Self {
            last_tension: thread.tension_level(),
            last_stage: thread.stage(),
            stagnant_ticks: 0,
            starved_ticks: u32::from(thread.player_involvement() < config.starvation_floor),
        }
    }

    /// Fold in another observation.
    pub fn update(&mut self, thread: &StoryThread, config: &PacingConfig) {
        let unchanged = (thread.tension_level() - self.last_tension).abs() < 1e-9;
        if thread.stage() == ThreadStage::RisingAction && thread.stage() == self.last_stage && unchanged {
            self.stagnant_ticks = self.stagnant_ticks.saturating_add(1);
        } else {
            self.stagnant_ticks = 0;
        }

        if thread.player_involvement() < config.starvation_floor {
            self.starved_ticks = self.starved_ticks.saturating_add(1);
        } else {
            self.starved_ticks = 0;
        }

        self.last_tension = thread.tension_level();
        self.last_stage = thread.stage();
    }

    pub fn is_plateaued(&self, config: &PacingConfig) -> bool {
        self.last_stage == ThreadStage::RisingAction && self.stagnant_ticks >= config.plateau_ticks
    }

    pub fn is_starving(&self, config: &PacingConfig) -> bool {
        self.starved_ticks > config.starvation_grace_ticks
    }
}
