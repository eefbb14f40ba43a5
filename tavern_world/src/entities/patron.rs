//! Patron definitions.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{ActorId, ActorRole};

/// A patron of the tavern, as seen by the narrative layer.
///
/// The psychology subsystem owns the authoritative version of this data; the
/// director only ever reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patron {
    pub id: ActorId,
    pub name: String,
    pub title: Option<String>,
    pub role: ActorRole,

    /// What this patron is currently after, as free-form goal tags.
    pub goals: Vec<String>,

    /// Actor ID -> affinity from -1.0 (hostile) to 1.0 (devoted).
    #[serde(default)]
    pub affinities: HashMap<ActorId, f64>,
}

impl Patron {
    /// Create a new patron with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: ActorId::new(),
            name: name.into(),
            title: None,
            role: ActorRole::Regular,
            goals: Vec::new(),
            affinities: HashMap::new(),
        }
    }

    /// Set the patron's role.
    pub fn with_role(mut self, role: ActorRole) -> Self {
        self.role = role;
        self
    }

    /// Add a goal tag.
    pub fn with_goal(mut self, goal: impl Into<String>) -> Self {
        self.goals.push(goal.into());
        self
    }

    /// Record an affinity toward another actor.
    pub fn with_affinity(mut self, other: ActorId, affinity: f64) -> Self {
        self.affinities.insert(other, affinity.clamp(-1.0, 1.0));
        self
    }

    /// Affinity toward another actor, neutral when unknown.
    pub fn affinity_toward(&self, other: ActorId) -> f64 {
        self.affinities.get(&other).copied().unwrap_or(0.0)
    }

    /// Check if the patron pursues a specific goal.
    pub fn has_goal(&self, goal: &str) -> bool {
        self.goals.iter().any(|g| g == goal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_patron() {
        let patron = Patron::new("Old Marta");
        assert_eq!(patron.name, "Old Marta");
        assert_eq!(patron.role, ActorRole::Regular);
        assert!(patron.goals.is_empty());
    }

    #[test]
    fn test_affinity_clamping() {
        let friend = ActorId::new();
        let stranger = ActorId::new();
        let patron = Patron::new("Brann").with_affinity(friend, 1.7);

        assert_eq!(patron.affinity_toward(friend), 1.0);
        assert_eq!(patron.affinity_toward(stranger), 0.0);
    }

    #[test]
    fn test_goals() {
        let patron = Patron::new("Sera")
            .with_goal("revenge")
            .with_role(ActorRole::Traveller);

        assert!(patron.has_goal("revenge"));
        assert!(!patron.has_goal("romance"));
    }
}
