//! Tension Manager - global tension, its history, and per-stage targets.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tavern_world::WorldTime;

use crate::config::TensionConfig;
use crate::thread::{StoryThread, ThreadStage};

/// Tension a climax is pushed up to at minimum.
const CLIMAX_FLOOR: f64 = 0.7;

/// Tension a resolution is brought down to at most.
const RESOLUTION_CEILING: f64 = 0.3;

/// One recorded global tension reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TensionSample {
    pub at: WorldTime,
    pub value: f64,
}

/// Tracks global tension over time in a bounded history.
#[derive(Debug, Clone)]
pub struct TensionManager {
    config: TensionConfig,
    global_tension: f64,
    history: VecDeque<TensionSample>,
}

impl TensionManager {
    pub fn new(config: TensionConfig) -> Self {
        Self {
            history: VecDeque::with_capacity(config.history_capacity),
            config,
            global_tension: 0.0,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(TensionConfig::default())
    }

    /// Recompute global tension and record it.
    ///
    /// Each thread's tension is weighted by `0.5 + involvement`, so threads
    /// the player cares about dominate the mood. The result never exceeds
    /// `max_global_tension`.
    pub fn update_global_tension(&mut self, threads: &[&StoryThread], now: WorldTime) -> f64 {
        let (weighted, total_weight) = threads.iter().fold((0.0, 0.0), |(sum, weights), thread| {
            let weight = 0.5 + thread.player_involvement();
            (sum + thread.tension_level() * weight, weights + weight)
        });

        let value = if total_weight > 0.0 {
            (weighted / total_weight).clamp(0.0, self.config.max_global_tension)
        } else {
            0.0
        };

        self.global_tension = value;
        self.record(TensionSample { at: now, value });
        value
    }

    /// Least-squares slope of global tension, per game minute, over the last
    /// `window_minutes`.
    ///
    /// Returns 0.0 when fewer than two distinct sample times fall in the window.
    pub fn get_tension_trend(&self, window_minutes: u64, now: WorldTime) -> f64 {
        let samples: Vec<(f64, f64)> = self
            .history
            .iter()
            .filter(|s| s.at <= now && now.minutes_since(s.at) <= window_minutes)
            .map(|s| (s.at.as_minutes() as f64, s.value))
            .collect();

        if samples.len() < 2 {
            return 0.0;
        }

        let n = samples.len() as f64;
        let mean_x = samples.iter().map(|(x, _)| x).sum::<f64>() / n;
        let mean_y = samples.iter().map(|(_, y)| y).sum::<f64>() / n;

        let (covariance, variance) = samples.iter().fold((0.0, 0.0), |(cov, var), (x, y)| {
            let dx = x - mean_x;
            (cov + dx * (y - mean_y), var + dx * dx)
        });

        if variance <= f64::EPSILON {
            0.0
        } else {
            covariance / variance
        }
    }

    /// The tension a thread should be heading toward in its current stage.
    pub fn recommend_tension_adjustment(&self, thread: &StoryThread, now: WorldTime) -> f64 {
        let progress =
            (thread.minutes_in_stage(now) as f64 / self.config.stage_ramp_minutes as f64).min(1.0);

        match thread.stage() {
            ThreadStage::Setup => 0.1 + 0.2 * progress,
            ThreadStage::RisingAction => 0.3 + 0.4 * progress,
            ThreadStage::Climax => thread.tension_level().max(CLIMAX_FLOOR),
            ThreadStage::Resolution => thread.tension_level().min(RESOLUTION_CEILING),
        }
    }

    /// The latest global tension.
    pub fn global_tension(&self) -> f64 {
        self.global_tension
    }

    /// Recorded samples, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &TensionSample> {
        self.history.iter()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn config(&self) -> &TensionConfig {
        &self.config
    }

    /// Replace the history with saved samples, keeping the newest that fit.
    pub(crate) fn restore_history(&mut self, samples: Vec<TensionSample>) {
        self.history.clear();
        for sample in samples {
            self.record(sample);
        }
        self.global_tension = self.history.back().map(|s| s.value).unwrap_or(0.0);
    }

    fn record(&mut self, sample: TensionSample) {
        while self.history.len() >= self.config.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(sample);
    }
}

impl Default for TensionManager {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::ThreadType;
    use tavern_world::ActorId;

    fn thread(tension: f64, involvement: f64) -> StoryThread {
        StoryThread::new("Brewing Trouble", ThreadType::SideQuest)
            .with_primary(ActorId::new())
            .with_tension(tension)
            .with_involvement(involvement)
    }

    #[test]
    fn test_global_tension_weighted_by_involvement() {
        let mut manager = TensionManager::with_defaults();
        let engaged = thread(0.6, 1.0);
        let ignored = thread(0.0, 0.0);

        let value = manager.update_global_tension(&[&engaged, &ignored], WorldTime::default());

        // (0.6 * 1.5 + 0.0 * 0.5) / 2.0
        assert!((value - 0.45).abs() < 1e-9);
        assert_eq!(manager.history_len(), 1);
    }

    #[test]
    fn test_global_tension_capped() {
        let mut manager = TensionManager::with_defaults();
        let a = thread(1.0, 1.0);
        let b = thread(1.0, 0.5);

        let value = manager.update_global_tension(&[&a, &b], WorldTime::default());
        assert!((value - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_no_threads_no_tension() {
        let mut manager = TensionManager::with_defaults();
        assert_eq!(manager.update_global_tension(&[], WorldTime::default()), 0.0);
    }

    #[test]
    fn test_history_bounded() {
        let mut manager = TensionManager::new(TensionConfig {
            history_capacity: 3,
            ..TensionConfig::default()
        });
        let t = thread(0.5, 0.5);
        for minute in 0..10 {
            manager.update_global_tension(&[&t], WorldTime::from_minutes(minute));
        }

        assert_eq!(manager.history_len(), 3);
        assert_eq!(manager.history().next().unwrap().at, WorldTime::from_minutes(7));
    }

    #[test]
    fn test_trend_slope() {
        let mut manager = TensionManager::with_defaults();
        for minute in 0..=10u64 {
            let t = thread(minute as f64 * 0.05, 0.5);
            manager.update_global_tension(&[&t], WorldTime::from_minutes(minute));
        }

        let trend = manager.get_tension_trend(60, WorldTime::from_minutes(10));
        assert!((trend - 0.05).abs() < 1e-9);
    }

    #[test]
    fn test_trend_needs_two_times() {
        let mut manager = TensionManager::with_defaults();
        let t = thread(0.5, 0.5);
        manager.update_global_tension(&[&t], WorldTime::from_minutes(5));
        manager.update_global_tension(&[&t], WorldTime::from_minutes(5));

        assert_eq!(manager.get_tension_trend(60, WorldTime::from_minutes(5)), 0.0);
    }

    #[test]
    fn test_trend_ignores_old_samples() {
        let mut manager = TensionManager::with_defaults();
        let calm = thread(0.0, 0.5);
        let steady = thread(0.5, 0.5);
        manager.update_global_tension(&[&calm], WorldTime::from_minutes(0));
        manager.update_global_tension(&[&steady], WorldTime::from_minutes(100));
        manager.update_global_tension(&[&steady], WorldTime::from_minutes(110));

        assert!(manager.get_tension_trend(30, WorldTime::from_minutes(110)).abs() < 1e-9);
    }

    #[test]
    fn test_recommendations_by_stage() {
        let manager = TensionManager::with_defaults();
        let start = WorldTime::default();

        let setup = thread(0.0, 0.5).created_at(start);
        assert!((manager.recommend_tension_adjustment(&setup, start) - 0.1).abs() < 1e-9);
        assert!(
            (manager.recommend_tension_adjustment(&setup, start.plus_minutes(240)) - 0.3).abs()
                < 1e-9
        );

        let rising = thread(0.2, 0.5)
            .created_at(start)
            .starting_at(ThreadStage::RisingAction);
        assert!(
            (manager.recommend_tension_adjustment(&rising, start.plus_minutes(60)) - 0.5).abs()
                < 1e-9
        );

        let climax = thread(0.4, 0.5).starting_at(ThreadStage::Climax);
        assert!((manager.recommend_tension_adjustment(&climax, start) - 0.7).abs() < 1e-9);

        let resolution = thread(0.9, 0.5).starting_at(ThreadStage::Resolution);
        assert!((manager.recommend_tension_adjustment(&resolution, start) - 0.3).abs() < 1e-9);
    }
}
