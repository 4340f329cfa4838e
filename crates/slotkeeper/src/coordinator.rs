//! Generation coordination protocol.
//!
//! Wraps one generation turn: resolve the requesting entity, acquire a slot
//! (evicting if needed), conditionally restore the slot's snapshot, run the
//! generation on that slot, and drive the message-count auto-save trigger.
//!
//! All slot-table mutation goes through one async mutex, so acquisition and
//! eviction decisions are strictly sequential - no two entities can ever
//! believe they own the same slot. The generation itself runs outside the
//! lock; the backend serializes work per slot.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::backend::{GenerationRequest, SlotBackend};
use crate::config::EngineConfig;
use crate::context::{ContextProvider, OverrideGuard, PinnedContext};
use crate::engine::SlotEngine;
use crate::error::{BackendError, GenerateError, SaveError};
use crate::registry::Slot;
use crate::snapshot::{self, SnapshotKey};
use crate::store::SnapshotStore;
use crate::types::{ConversationId, EntityId, GenerationKind, SlotIndex};

/// Parameters of one generation turn.
#[derive(Debug, Clone)]
pub struct TurnSpec {
    pub kind: GenerationKind,
    pub max_tokens: Option<u32>,
    /// Opaque passthrough parameters for the backend.
    pub params: serde_json::Value,
}

impl Default for TurnSpec {
    fn default() -> Self {
        Self {
            kind: GenerationKind::Normal,
            max_tokens: None,
            params: serde_json::Value::Null,
        }
    }
}

/// Outcome of one completed generation turn.
#[derive(Debug, Clone)]
pub struct TurnReport {
    pub request_id: Uuid,
    pub entity: EntityId,
    pub slot: SlotIndex,
    /// Creation time of the snapshot restored for this turn, if any.
    /// Surfaced so the presentation layer can tell the user how warm the
    /// cache is.
    pub restored_from: Option<DateTime<Utc>>,
    pub text: String,
    pub tokens: u32,
}

/// Coordinates slot allocation, snapshot restore/save and generation turns.
pub struct GenerationCoordinator {
    engine: Mutex<SlotEngine>,
    backend: Arc<dyn SlotBackend>,
    store: Arc<dyn SnapshotStore>,
    context: Arc<dyn ContextProvider>,
    config: EngineConfig,
    /// Messages observed per (conversation, entity) since the last
    /// successful auto-save. Reset only on save success, so a failed save
    /// retries at the very next message.
    counters: DashMap<(ConversationId, EntityId), u32>,
    pinned: Arc<PinnedContext>,
}

impl GenerationCoordinator {
    pub fn new(
        backend: Arc<dyn SlotBackend>,
        store: Arc<dyn SnapshotStore>,
        context: Arc<dyn ContextProvider>,
        config: EngineConfig,
    ) -> Self {
        let engine = SlotEngine::new(Arc::clone(&backend), config.clone());
        Self {
            engine: Mutex::new(engine),
            backend,
            store,
            context,
            config,
            counters: DashMap::new(),
            pinned: Arc::new(PinnedContext::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Discover the backend's slot count and (re)build the slot table.
    pub async fn sync_slots(&self) -> Result<usize, BackendError> {
        self.engine.lock().await.sync_with_backend().await
    }

    /// Pin `entity` as the override identity until the guard drops.
    ///
    /// Needed during preload: the surrounding context may not yet reflect a
    /// forced entity switch at the time the turn is issued.
    pub fn pin_entity(&self, entity: EntityId) -> OverrideGuard {
        OverrideGuard::pin(Arc::clone(&self.pinned), entity)
    }

    fn resolve_entity(&self) -> Option<EntityId> {
        self.pinned
            .current()
            .or_else(|| self.context.active_entity())
            .filter(|e| !e.is_empty())
    }

    /// Run one generation turn for the active (or pinned) entity.
    ///
    /// A restore failure degrades performance but never blocks the
    /// conversation: the turn proceeds with a cold cache.
    pub async fn generate(&self, spec: TurnSpec) -> Result<TurnReport, GenerateError> {
        let entity = self.resolve_entity().ok_or(GenerateError::NoEntity)?;
        let conversation = self.context.conversation_id();

        let (index, restored_from) = {
            let mut engine = self.engine.lock().await;
            let outcome = engine.acquire_slot(&entity, &conversation).await?;
            let index = outcome.index;

            let mut restored_from = None;
            let cache_loaded = engine
                .registry()
                .slot(index)
                .map(|s| s.cache_loaded)
                .unwrap_or(false);
            if !cache_loaded {
                restored_from = self.try_restore(&mut engine, index, &conversation, &entity).await;
            }
            engine.registry_mut().set_last_generation_kind(index, spec.kind);
            (index, restored_from)
        };

        let request = GenerationRequest {
            id: Uuid::new_v4(),
            entity: entity.clone(),
            slot: index,
            kind: spec.kind,
            max_tokens: spec.max_tokens,
            params: spec.params,
        };

        tracing::debug!(
            request = %request.id,
            %entity,
            slot = %index,
            kind = request.kind.as_str(),
            "Dispatching generation"
        );
        let outcome = self.backend.generate(&request).await?;

        Ok(TurnReport {
            request_id: request.id,
            entity,
            slot: index,
            restored_from,
            text: outcome.text,
            tokens: outcome.tokens,
        })
    }

    /// Attempt to restore the most recent snapshot for `(entity,
    /// conversation)` into `index`. Returns the snapshot's creation time on
    /// success; any failure is logged and swallowed.
    async fn try_restore(
        &self,
        engine: &mut SlotEngine,
        index: SlotIndex,
        conversation: &ConversationId,
        entity: &EntityId,
    ) -> Option<DateTime<Utc>> {
        let entries = match self.store.list().await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(%entity, error = %e, "Snapshot listing failed - generating cold");
                return None;
            }
        };

        let key = snapshot::latest_for(&entries, conversation, entity)?;
        match self.backend.restore_slot(index, &key).await {
            Ok(()) => {
                engine.registry_mut().set_cache_loaded(index, true);
                engine.registry_mut().reset_usage(index);
                tracing::info!(
                    slot = %index,
                    %entity,
                    snapshot = %key.file_name(),
                    "Restored slot cache"
                );
                Some(key.created_at)
            }
            Err(e) => {
                tracing::warn!(
                    slot = %index,
                    %entity,
                    snapshot = %key.file_name(),
                    error = %e,
                    "Snapshot restore failed - generating cold"
                );
                None
            }
        }
    }

    /// Record a completed message for `entity` and drive the auto-save
    /// trigger.
    ///
    /// Usage accounting runs here rather than at request issuance: a request
    /// may be aborted before producing output, and only observed output
    /// counts as served.
    pub async fn note_message_complete(&self, entity: &EntityId) {
        let conversation = self.context.conversation_id();

        let slot = {
            let mut engine = self.engine.lock().await;
            let slot = engine.registry().find_slot_of(entity);
            if let Some(index) = slot {
                engine.registry_mut().increment_usage(index);
            }
            slot
        };

        let count = {
            let mut entry = self
                .counters
                .entry((conversation.clone(), entity.clone()))
                .or_insert(0);
            *entry += 1;
            *entry
        };

        if count < self.config.autosave_interval {
            return;
        }
        let Some(index) = slot else {
            tracing::warn!(%entity, "Auto-save due but entity holds no slot - deferring");
            return;
        };

        let key = SnapshotKey::auto(conversation.clone(), entity.clone());
        match self.backend.save_slot(index, &key).await {
            Ok(()) => {
                tracing::info!(
                    slot = %index,
                    %entity,
                    messages = count,
                    snapshot = %key.file_name(),
                    "Auto-saved slot cache"
                );
                self.counters.insert((conversation.clone(), entity.clone()), 0);
                self.engine.lock().await.registry_mut().reset_usage(index);
                if let Err(e) = snapshot::enforce_retention(
                    self.store.as_ref(),
                    &conversation,
                    entity,
                    self.config.max_auto_snapshots,
                )
                .await
                {
                    tracing::warn!(%entity, error = %e, "Snapshot rotation failed");
                }
            }
            Err(e) => {
                // Counter stays elevated; the very next message retries.
                tracing::warn!(slot = %index, %entity, error = %e, "Auto-save failed");
            }
        }
    }

    /// Persist `entity`'s slot now, bypassing the message-count trigger.
    ///
    /// Preload uses this (warm-up turns produce no real messages to count);
    /// user-initiated saves pass a `tag` to exempt the snapshot from
    /// rotation.
    pub async fn save_entity_slot(
        &self,
        entity: &EntityId,
        tag: Option<&str>,
    ) -> Result<SnapshotKey, SaveError> {
        let conversation = self.context.conversation_id();

        let index = {
            let engine = self.engine.lock().await;
            engine
                .registry()
                .find_slot_of(entity)
                .ok_or_else(|| SaveError::NotResident(entity.clone()))?
        };

        let key = match tag {
            Some(tag) => SnapshotKey::tagged(conversation.clone(), entity.clone(), tag),
            None => SnapshotKey::auto(conversation.clone(), entity.clone()),
        };
        self.backend.save_slot(index, &key).await?;
        tracing::info!(
            slot = %index,
            %entity,
            snapshot = %key.file_name(),
            "Persisted slot cache"
        );

        self.engine.lock().await.registry_mut().reset_usage(index);
        self.counters.insert((conversation.clone(), entity.clone()), 0);

        if !key.is_tagged()
            && let Err(e) = snapshot::enforce_retention(
                self.store.as_ref(),
                &conversation,
                entity,
                self.config.max_auto_snapshots,
            )
            .await
        {
            tracing::warn!(%entity, error = %e, "Snapshot rotation failed");
        }

        Ok(key)
    }

    /// Free `entity`'s slot: drop the backend-side cache and unbind the
    /// registry entry. No-op if the entity holds no slot. The backend
    /// failure is logged and the unbind proceeds; a stale backend cache is
    /// harmless once the slot is rebound.
    pub async fn release_entity_slot(&self, entity: &EntityId) {
        let mut engine = self.engine.lock().await;
        let Some(index) = engine.registry().find_slot_of(entity) else {
            return;
        };
        if let Err(e) = self.backend.clear_slot(index).await {
            tracing::warn!(slot = %index, %entity, error = %e, "Backend slot clear failed");
        }
        engine.registry_mut().set_resident(index, None);
        engine.registry_mut().set_cache_loaded(index, false);
        engine.registry_mut().reset_usage(index);
        tracing::info!(slot = %index, %entity, "Released slot");
    }

    /// Request the backend abort the in-flight generation.
    pub async fn abort_generation(&self) {
        self.backend.abort_generation().await;
    }

    pub async fn slot_of(&self, entity: &EntityId) -> Option<SlotIndex> {
        self.engine.lock().await.registry().find_slot_of(entity)
    }

    /// Snapshot view of the slot table.
    pub async fn slots(&self) -> Vec<Slot> {
        self.engine.lock().await.registry().slots().to_vec()
    }

    /// Drop message counters for a conversation that was reset.
    pub fn reset_conversation(&self, conversation: &ConversationId) {
        self.counters.retain(|(c, _), _| c != conversation);
    }

    /// Messages observed for `(conversation, entity)` since the last
    /// successful save.
    pub fn message_count(&self, conversation: &ConversationId, entity: &EntityId) -> u32 {
        self.counters
            .get(&(conversation.clone(), entity.clone()))
            .map(|v| *v)
            .unwrap_or(0)
    }
}
