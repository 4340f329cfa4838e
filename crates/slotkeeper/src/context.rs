//! Conversation context and the preload override pin.
//!
//! The surrounding context may lag a forced entity switch (the UI's active
//! character is not yet the one being preloaded), so the coordinator
//! consults an explicit pinned override before asking the provider.

use std::sync::{Arc, Mutex};

use crate::types::{ConversationId, EntityId};

/// Current conversation and active entity, as the host application sees them.
pub trait ContextProvider: Send + Sync {
    fn conversation_id(&self) -> ConversationId;
    fn active_entity(&self) -> Option<EntityId>;
}

/// Override slot consulted before the context provider.
#[derive(Default)]
pub struct PinnedContext {
    pinned: Mutex<Option<EntityId>>,
}

impl PinnedContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<EntityId> {
        self.pinned.lock().ok().and_then(|guard| guard.clone())
    }

    fn set(&self, entity: Option<EntityId>) {
        if let Ok(mut guard) = self.pinned.lock() {
            *guard = entity;
        }
    }
}

/// RAII pin: holds the override for one entity and clears it on drop, so
/// preload cleanup happens on every path - success, error, timeout or
/// cancellation.
#[must_use = "the pin is cleared as soon as the guard drops"]
pub struct OverrideGuard {
    pinned: Arc<PinnedContext>,
}

impl OverrideGuard {
    pub(crate) fn pin(pinned: Arc<PinnedContext>, entity: EntityId) -> Self {
        tracing::debug!(%entity, "Pinning override entity");
        pinned.set(Some(entity));
        Self { pinned }
    }
}

impl Drop for OverrideGuard {
    fn drop(&mut self) {
        tracing::debug!("Clearing override entity");
        self.pinned.set(None);
    }
}
