//! Thread model - the storylines the director manages.
//!
//! The model consists of:
//! - **Threads**: Long-lived narrative arcs with a stage, tension, and participants
//! - **Beats**: Discrete narrative events queued on a thread and fired once
//! - **Tags**: Thematic, location, and faction metadata on threads
//! - **Convergences**: Detected overlaps between threads

mod beat;
mod convergence;
mod story;
mod tag;

pub use beat::*;
pub use convergence::*;
pub use story::*;
pub use tag::*;
