//! Convergences - detected overlaps between threads.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tavern_world::{ActorId, ParticipantDirectory};
use uuid::Uuid;

use super::{StoryThread, ThreadId, ThreadTag};

/// Strength added when a shared participant's goal matches a shared theme.
const GOAL_BONUS: f64 = 0.1;

/// Unique identifier for convergences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConvergenceId(pub Uuid);

impl ConvergenceId {
    /// Create a new random convergence ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConvergenceId {
    fn default() -> Self {
        Self::new()
    }
}

/// How the threads in a convergence relate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConvergenceType {
    /// Only the cast overlaps.
    SharedParticipant,
    /// The cast overlaps and the threads share a theme.
    ThematicOverlap,
    /// The cast overlaps and the threads play out in the same place.
    LocationOverlap,
}

/// Threads whose casts overlap. Recomputed on every detection pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadConvergence {
    pub id: ConvergenceId,

    /// At least two threads, in ascending ID order.
    pub thread_ids: Vec<ThreadId>,

    pub convergence_type: ConvergenceType,

    /// Actors appearing in two or more of the threads.
    pub shared_participants: BTreeSet<ActorId>,

    /// Tags carried by two or more of the threads.
    pub shared_tags: BTreeSet<ThreadTag>,

    /// How strongly the threads pull together (0.0 - 1.0).
    pub strength: f64,
}

impl ThreadConvergence {
    /// Detect convergences among the given threads.
    ///
    /// Threads are grouped by each participant they share. A group that is
    /// wholly contained in a larger one is folded into it, so three threads
    /// sharing an actor come back as one entry rather than three pairs.
    pub fn detect(threads: &[&StoryThread], directory: &dyn ParticipantDirectory) -> Vec<Self> {
        let by_id: BTreeMap<ThreadId, &StoryThread> =
            threads.iter().map(|thread| (thread.id, *thread)).collect();

        shared_participant_groups(threads)
            .into_iter()
            .map(|group| {
                let members: Vec<&StoryThread> = group
                    .iter()
                    .filter_map(|id| by_id.get(id).copied())
                    .collect();
                Self::from_members(&members, directory)
            })
            .collect()
    }

    fn from_members(members: &[&StoryThread], directory: &dyn ParticipantDirectory) -> Self {
        let shared_participants = shared_in_two_or_more(members.iter().map(|t| t.all_participants()));
        let shared_tags = shared_in_two_or_more(members.iter().map(|t| t.tags.clone()));

        let convergence_type = if shared_tags.iter().any(ThreadTag::is_location) {
            ConvergenceType::LocationOverlap
        } else if shared_tags.iter().any(|tag| matches!(tag, ThreadTag::Theme(_))) {
            ConvergenceType::ThematicOverlap
        } else {
            ConvergenceType::SharedParticipant
        };

        let cast_score = (shared_participants.len() as f64 / 2.0).min(1.0);
        let tag_score = (shared_tags.len() as f64 / 2.0).min(1.0);
        let affinity_score = (cross_thread_affinity(members, directory) + 1.0) / 2.0;
        // A shared actor who wants what the threads are about pulls them together.
        let motivated = shared_participants.iter().any(|actor| {
            directory.goals(*actor).iter().any(|goal| {
                shared_tags
                    .iter()
                    .any(|tag| matches!(tag, ThreadTag::Theme(theme) if theme == goal))
            })
        });
        let goal_bonus = if motivated { GOAL_BONUS } else { 0.0 };
        let strength = (0.5 * cast_score + 0.25 * tag_score + 0.25 * affinity_score + goal_bonus)
            .clamp(0.0, 1.0);

        Self {
            id: ConvergenceId::new(),
            thread_ids: members.iter().map(|t| t.id).collect(),
            convergence_type,
            shared_participants,
            shared_tags,
            strength,
        }
    }

    /// Check if the convergence includes a thread.
    pub fn includes(&self, thread_id: ThreadId) -> bool {
        self.thread_ids.contains(&thread_id)
    }
}

/// Group threads by shared participants, dropping groups contained in larger ones.
///
/// Every returned group has at least two threads, all of which share at least
/// one participant.
pub(crate) fn shared_participant_groups(threads: &[&StoryThread]) -> Vec<BTreeSet<ThreadId>> {
    let mut by_actor: BTreeMap<ActorId, BTreeSet<ThreadId>> = BTreeMap::new();
    for thread in threads {
        for actor in thread.all_participants() {
            by_actor.entry(actor).or_default().insert(thread.id);
        }
    }

    let groups: BTreeSet<BTreeSet<ThreadId>> = by_actor
        .into_values()
        .filter(|ids| ids.len() >= 2)
        .collect();

    groups
        .iter()
        .filter(|group| {
            !groups
                .iter()
                .any(|other| other.len() > group.len() && group.is_subset(other))
        })
        .cloned()
        .collect()
}

fn shared_in_two_or_more<T, S, I>(sets: I) -> BTreeSet<T>
where
    T: Ord,
    S: IntoIterator<Item = T>,
    I: Iterator<Item = S>,
{
    let mut counts: BTreeMap<T, usize> = BTreeMap::new();
    for set in sets {
        for item in set {
            *counts.entry(item).or_default() += 1;
        }
    }
    counts
        .into_iter()
        .filter(|(_, count)| *count >= 2)
        .map(|(item, _)| item)
        .collect()
}

/// Mean mutual affinity between primary participants of different threads.
fn cross_thread_affinity(members: &[&StoryThread], directory: &dyn ParticipantDirectory) -> f64 {
    let mut total = 0.0;
    let mut pairs = 0usize;
    for (i, a) in members.iter().enumerate() {
        for b in &members[i + 1..] {
            for &x in &a.primary_participants {
                for &y in &b.primary_participants {
                    if x != y {
                        total += directory.mutual_affinity(x, y);
                        pairs += 1;
                    }
                }
            }
        }
    }
    if pairs == 0 {
        0.0
    } else {
        total / pairs as f64
    }
}
