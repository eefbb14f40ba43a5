//! Director configuration.
//!
//! Every section has documented defaults so an empty TOML document yields a
//! working director. Structural misconfiguration is rejected by
//! [`DirectorConfig::validate`], the only place the director treats bad input as
//! fatal.

use serde::{Deserialize, Serialize};

use crate::error::{DirectorError, DirectorResult};

/// Thread lifecycle tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadConfig {
    /// Soft cap on active threads; exceeding it pauses arc planning.
    pub max_active_threads: usize,

    /// Beats a single thread may fire per tick.
    pub max_beats_per_tick: usize,

    /// Accumulated beat significance that moves a thread out of setup.
    pub setup_momentum_threshold: f64,

    /// Tension at which a setup thread starts rising regardless of momentum.
    pub rising_tension_threshold: f64,

    /// Significance of a beat fired during climax that resolves the thread.
    pub resolution_significance: f64,
}

impl Default for ThreadConfig {
    fn default() -> Self {
        Self {
            max_active_threads: 7,
            max_beats_per_tick: 1,
            setup_momentum_threshold: 1.0,
            rising_tension_threshold: 0.4,
            resolution_significance: 0.9,
        }
    }
}

/// Global tension tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TensionConfig {
    /// Ceiling for global tension so the player never faces unrelieved crisis.
    pub max_global_tension: f64,

    /// Samples kept in the tension history ring buffer.
    pub history_capacity: usize,

    /// Minutes over which a stage's recommended tension ramps up.
    pub stage_ramp_minutes: u64,
}

impl Default for TensionConfig {
    fn default() -> Self {
        Self {
            max_global_tension: 0.8,
            history_capacity: 512,
            stage_ramp_minutes: 120,
        }
    }
}

/// Pacing rules and health scoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    /// Number of active threads the pacing score considers ideal.
    pub target_thread_density: usize,

    /// Window used for the tension trend, in game minutes.
    pub trend_window_minutes: u64,

    /// Tension slope per minute above which escalation counts as runaway.
    pub runaway_trend_per_minute: f64,

    /// Ticks of unchanged tension before a rising thread has plateaued.
    pub plateau_ticks: u32,

    /// Involvement below which a thread is considered starving.
    pub starvation_floor: f64,

    /// Ticks a thread may starve before it is flagged.
    pub starvation_grace_ticks: u32,

    /// Threads below this priority may be retired when health is critical.
    pub low_value_priority: f64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            target_thread_density: 3,
            trend_window_minutes: 60,
            runaway_trend_per_minute: 0.005,
            plateau_ticks: 30,
            starvation_floor: 0.2,
            starvation_grace_ticks: 20,
            low_value_priority: 0.4,
        }
    }
}

/// Climax scheduling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClimaxConfig {
    /// Climaxes allowed to overlap within the spacing window.
    pub max_parallel_climaxes: usize,

    /// Minimum game minutes between climaxes beyond the parallel allowance.
    pub min_climax_spacing_minutes: u64,

    /// Minutes between deciding on a climax and its earliest slot.
    pub lead_minutes: u64,

    /// Minutes a delay intervention pushes a climax back.
    pub delay_minutes: u64,

    /// Minimum tension before a rising thread is given a climax slot.
    pub min_climax_tension: f64,

    /// Minimum tension of every thread in a joint climax.
    pub joint_climax_tension: f64,

    /// Fired climaxes kept for anti-repetition and analytics.
    pub history_capacity: usize,
}

impl Default for ClimaxConfig {
    fn default() -> Self {
        Self {
            max_parallel_climaxes: 2,
            min_climax_spacing_minutes: 30,
            lead_minutes: 15,
            delay_minutes: 30,
            min_climax_tension: 0.6,
            joint_climax_tension: 0.5,
            history_capacity: 64,
        }
    }
}

/// Arc planning capacity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArcConfig {
    pub max_concurrent_arcs: usize,
}

impl Default for ArcConfig {
    fn default() -> Self {
        Self {
            max_concurrent_arcs: 3,
        }
    }
}

/// Complete director configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DirectorConfig {
    pub threads: ThreadConfig,
    pub tension: TensionConfig,
    pub pacing: PacingConfig,
    pub climax: ClimaxConfig,
    pub arcs: ArcConfig,
}

impl DirectorConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> DirectorResult<Self> {
        let config: DirectorConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject structurally broken configurations.
    pub fn validate(&self) -> DirectorResult<()> {
        if self.threads.max_active_threads == 0 {
            return Err(invalid("threads.max_active_threads must be > 0"));
        }
        if self.threads.max_beats_per_tick == 0 {
            return Err(invalid("threads.max_beats_per_tick must be > 0"));
        }
        if !unit_interval(self.threads.rising_tension_threshold)
            || !unit_interval(self.threads.resolution_significance)
        {
            return Err(invalid("threads thresholds must lie in [0, 1]"));
        }
        if !(self.threads.setup_momentum_threshold > 0.0) {
            return Err(invalid("threads.setup_momentum_threshold must be > 0"));
        }

        if !(self.tension.max_global_tension > 0.0 && self.tension.max_global_tension <= 1.0) {
            return Err(invalid("tension.max_global_tension must lie in (0, 1]"));
        }
        if self.tension.history_capacity == 0 {
            return Err(invalid("tension.history_capacity must be > 0"));
        }
        if self.tension.stage_ramp_minutes == 0 {
            return Err(invalid("tension.stage_ramp_minutes must be > 0"));
        }

        if self.pacing.target_thread_density == 0 {
            return Err(invalid("pacing.target_thread_density must be > 0"));
        }
        if self.pacing.plateau_ticks == 0 {
            return Err(invalid("pacing.plateau_ticks must be > 0"));
        }
        if !unit_interval(self.pacing.starvation_floor)
            || !unit_interval(self.pacing.low_value_priority)
        {
            return Err(invalid("pacing thresholds must lie in [0, 1]"));
        }

        if self.climax.max_parallel_climaxes == 0 {
            return Err(invalid("climax.max_parallel_climaxes must be > 0"));
        }
        if self.climax.min_climax_spacing_minutes == 0 {
            return Err(invalid("climax.min_climax_spacing_minutes must be > 0"));
        }
        if self.climax.history_capacity == 0 {
            return Err(invalid("climax.history_capacity must be > 0"));
        }
        if !unit_interval(self.climax.min_climax_tension)
            || !unit_interval(self.climax.joint_climax_tension)
        {
            return Err(invalid("climax tension thresholds must lie in [0, 1]"));
        }

        if self.arcs.max_concurrent_arcs == 0 {
            return Err(invalid("arcs.max_concurrent_arcs must be > 0"));
        }

        Ok(())
    }
}

fn unit_interval(value: f64) -> bool {
    (0.0..=1.0).contains(&value)
}

fn invalid(message: &str) -> DirectorError {
    DirectorError::InvalidConfig(message.to_string())
}
