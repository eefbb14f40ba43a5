//! Participant directory - read-only queries into who exists and how they feel.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::entities::{ActorId, Patron};

/// Read-only access to the psychology/relationship subsystem.
///
/// The narrative director uses this to weight convergence detection and
/// intervention targeting, and to notice collaborators that no longer exist.
/// Implementations must never be mutated through this trait.
pub trait ParticipantDirectory {
    /// Whether the actor still exists in the world.
    fn contains(&self, actor: ActorId) -> bool;

    /// One-directional affinity from `from` toward `to`, in [-1.0, 1.0].
    fn affinity(&self, from: ActorId, to: ActorId) -> f64;

    /// Current goal tags of an actor.
    fn goals(&self, actor: ActorId) -> &[String];

    /// Average of both directions of affinity.
    fn mutual_affinity(&self, a: ActorId, b: ActorId) -> f64 {
        (self.affinity(a, b) + self.affinity(b, a)) / 2.0
    }
}

/// In-memory directory of patrons.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Roster {
    patrons: HashMap<ActorId, Patron>,
}

impl Roster {
    /// Create an empty roster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a patron, returning its ID.
    pub fn add_patron(&mut self, patron: Patron) -> ActorId {
        let id = patron.id;
        self.patrons.insert(id, patron);
        id
    }

    /// Remove a patron (they left the tavern for good).
    pub fn remove_patron(&mut self, id: ActorId) -> Option<Patron> {
        self.patrons.remove(&id)
    }

    /// Get patron by ID.
    pub fn get_patron(&self, id: ActorId) -> Option<&Patron> {
        self.patrons.get(&id)
    }

    /// Number of patrons.
    pub fn len(&self) -> usize {
        self.patrons.len()
    }

    /// Whether the roster is empty.
    pub fn is_empty(&self) -> bool {
        self.patrons.is_empty()
    }
}

impl ParticipantDirectory for Roster {
    fn contains(&self, actor: ActorId) -> bool {
        self.patrons.contains_key(&actor)
    }

    fn affinity(&self, from: ActorId, to: ActorId) -> f64 {
        self.patrons
            .get(&from)
            .map(|p| p.affinity_toward(to))
            .unwrap_or(0.0)
    }

    fn goals(&self, actor: ActorId) -> &[String] {
        self.patrons
            .get(&actor)
            .map(|p| p.goals.as_slice())
            .unwrap_or(&[])
    }
}
