//! Thread tags - metadata used to type convergences.

use serde::{Deserialize, Serialize};

/// Tags describe what a thread is about and where it plays out.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ThreadTag {
    /// A theme or motif (e.g., "betrayal", "debt", "lost love").
    Theme(String),

    /// A place the thread keeps returning to (e.g., "cellar").
    Location(String),

    /// A faction or organization with a stake in the thread.
    Faction(String),
}

impl ThreadTag {
    /// Create a new theme tag.
    pub fn theme(name: impl Into<String>) -> Self {
        ThreadTag::Theme(name.into())
    }

    /// Create a new location tag.
    pub fn location(name: impl Into<String>) -> Self {
        ThreadTag::Location(name.into())
    }

    /// Create a new faction tag.
    pub fn faction(name: impl Into<String>) -> Self {
        ThreadTag::Faction(name.into())
    }

    /// Convert the tag to a string representation.
    pub fn as_string(&self) -> String {
        match self {
            ThreadTag::Theme(s) => format!("theme:{}", s),
            ThreadTag::Location(s) => format!("location:{}", s),
            ThreadTag::Faction(s) => format!("faction:{}", s),
        }
    }

    /// Get the category of this tag.
    pub fn category(&self) -> &'static str {
        match self {
            ThreadTag::Theme(_) => "theme",
            ThreadTag::Location(_) => "location",
            ThreadTag::Faction(_) => "faction",
        }
    }

    pub fn is_location(&self) -> bool {
        matches!(self, ThreadTag::Location(_))
    }
}

impl std::fmt::Display for ThreadTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_string())
    }
}
