//! # Narrative Director
//!
//! Decides *when* and *what kind* of narrative event should happen in the
//! tavern. It never writes prose; it owns the storylines ("threads"), measures
//! tension and pacing, corrects the narrative when it drifts, and reserves
//! climax slots so storylines do not collide.
//!
//! ## Core Components
//!
//! - **thread**: Story threads, beats, and convergences
//! - **manager**: Thread lifecycle and per-tick advancement
//! - **tension** / **pacing**: Global tension tracking and pacing statistics
//! - **rules**: Narrative health scoring and corrective interventions
//! - **sequencer**: Climax scheduling with spacing and parallelism limits
//! - **orchestrator**: The per-tick entry point tying everything together
//!
//! ## Design Philosophy
//!
//! - **Tick-Driven**: One synchronous call per player command, no background work
//! - **Never Stalls**: Problems with one thread are recovered locally and never abort a tick
//! - **Read-Only World**: World snapshots and patron data are inputs, never mutated

pub mod actions;
pub mod config;
pub mod error;
pub mod events;
pub mod manager;
pub mod orchestrator;
pub mod pacing;
pub mod persist;
pub mod rules;
pub mod sequencer;
pub mod tension;
pub mod thread;

pub use actions::*;
pub use config::*;
pub use error::*;
pub use events::*;
pub use manager::*;
pub use orchestrator::*;
pub use pacing::*;
pub use persist::*;
pub use rules::*;
pub use sequencer::*;
pub use tension::*;
pub use thread::*;
