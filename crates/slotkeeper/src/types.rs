//! Identifier newtypes shared across the engine.

use serde::{Deserialize, Serialize};

/// Normalized character identifier.
///
/// Two spellings of the same character name must map to the same slot, so the
/// raw name is normalized on construction: trimmed, lowercased, runs of
/// whitespace collapsed to a single `_`. Hyphens are folded to `_` as well so
/// the identifier never collides with snapshot file name separators.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(raw: &str) -> Self {
        let mut normalized = String::with_capacity(raw.len());
        let mut pending_sep = false;
        for c in raw.trim().chars() {
            if c.is_whitespace() || c == '-' {
                pending_sep = !normalized.is_empty();
            } else {
                if pending_sep {
                    normalized.push('_');
                    pending_sep = false;
                }
                for lower in c.to_lowercase() {
                    normalized.push(lower);
                }
            }
        }
        Self(normalized)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque conversation identifier, as reported by the context provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position of a slot in the backend's fixed-size slot sequence.
///
/// Stable identity for the process lifetime; the table is only rebuilt
/// wholesale when the backend reports a different slot count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlotIndex(usize);

impl SlotIndex {
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn get(&self) -> usize {
        self.0
    }
}

impl std::fmt::Display for SlotIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Category of a generation turn. Informational only; recorded per slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationKind {
    Normal,
    Regenerate,
    Swipe,
    Quiet,
    Continue,
}

impl GenerationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Regenerate => "regenerate",
            Self::Swipe => "swipe",
            Self::Quiet => "quiet",
            Self::Continue => "continue",
        }
    }
}
