//! # Tavern World
//!
//! The read-only surface of the tavern simulation that the narrative director
//! consumes: actor identities, the game clock, per-tick world snapshots, and the
//! directory of patrons whose goals and affinities weight narrative decisions.
//! This crate owns no narrative logic.

pub mod entities;
pub mod roster;
pub mod world_state;

pub use entities::*;
pub use roster::*;
pub use world_state::*;
