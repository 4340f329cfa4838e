//! Allocation / eviction engine.
//!
//! Victim selection and the eviction side effect are kept as separate steps:
//! [`choose_victim`] is a pure policy function, [`SlotEngine::acquire_slot`]
//! applies it and performs the threshold-gated save-before-evict.

use std::sync::Arc;

use crate::backend::SlotBackend;
use crate::config::EngineConfig;
use crate::error::{AcquireError, BackendError};
use crate::registry::SlotRegistry;
use crate::snapshot::SnapshotKey;
use crate::types::{ConversationId, EntityId, SlotIndex};

/// Victim policy: occupied slot with the lowest usage, ties broken by the
/// lowest index. Deterministic and stable under repeated calls; approximates
/// least-recently-useful without tracking wall-clock recency.
pub fn choose_victim(registry: &SlotRegistry) -> Option<SlotIndex> {
    registry
        .slots()
        .iter()
        .filter(|s| s.resident.is_some())
        .min_by_key(|s| (s.usage, s.index))
        .map(|s| s.index)
}

/// Result of a slot acquisition.
#[derive(Debug, Clone)]
pub struct AcquireOutcome {
    pub index: SlotIndex,
    /// Resident that was evicted to make room, if any.
    pub evicted: Option<EntityId>,
    /// True when the eviction issued a save-before-evict to the backend.
    pub saved_before_evict: bool,
}

/// Owns the slot table and applies the allocation policy against it.
///
/// Not internally synchronized; the coordinator serializes all access behind
/// a single async mutex so no two acquires can interleave.
pub struct SlotEngine {
    registry: SlotRegistry,
    backend: Arc<dyn SlotBackend>,
    config: EngineConfig,
}

impl SlotEngine {
    pub fn new(backend: Arc<dyn SlotBackend>, config: EngineConfig) -> Self {
        Self {
            registry: SlotRegistry::new(0),
            backend,
            config,
        }
    }

    pub fn registry(&self) -> &SlotRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut SlotRegistry {
        &mut self.registry
    }

    /// Query the backend's slot count and rebuild the table if it changed.
    /// Returns the current count.
    pub async fn sync_with_backend(&mut self) -> Result<usize, BackendError> {
        let slots = self.backend.list_slots().await?;
        self.registry.resize(slots.len());
        Ok(slots.len())
    }

    /// Bind `entity` to a slot, evicting and persisting another resident if
    /// the pool is full.
    ///
    /// A save failure during eviction is logged but never blocks the
    /// rebinding; losing an unsaved cache beats blocking generation on a
    /// storage fault.
    pub async fn acquire_slot(
        &mut self,
        entity: &EntityId,
        conversation: &ConversationId,
    ) -> Result<AcquireOutcome, AcquireError> {
        if self.registry.is_empty() {
            return Err(AcquireError::NoSlots);
        }

        // Already resident: no eviction, no usage change.
        if let Some(index) = self.registry.find_slot_of(entity) {
            tracing::debug!(slot = %index, %entity, "Entity already resident");
            return Ok(AcquireOutcome {
                index,
                evicted: None,
                saved_before_evict: false,
            });
        }

        // Free slot available: bind it.
        if let Some(index) = self
            .registry
            .slots()
            .iter()
            .find(|s| s.resident.is_none())
            .map(|s| s.index)
        {
            self.bind(index, entity);
            tracing::debug!(slot = %index, %entity, "Bound entity to free slot");
            return Ok(AcquireOutcome {
                index,
                evicted: None,
                saved_before_evict: false,
            });
        }

        // Pool full: evict the least useful resident.
        let victim_index = choose_victim(&self.registry).ok_or(AcquireError::NoSlots)?;
        let victim = self
            .registry
            .slot(victim_index)
            .and_then(|s| s.resident.clone())
            .ok_or(AcquireError::NoSlots)?;
        let victim_usage = self
            .registry
            .slot(victim_index)
            .map(|s| s.usage)
            .unwrap_or(0);

        let mut saved = false;
        if victim_usage >= self.config.min_usage_for_save {
            let key = SnapshotKey::auto(conversation.clone(), victim.clone());
            saved = true;
            match self.backend.save_slot(victim_index, &key).await {
                Ok(()) => {
                    tracing::info!(
                        slot = %victim_index,
                        entity = %victim,
                        snapshot = %key.file_name(),
                        "Persisted evicted resident"
                    );
                }
                Err(e) => {
                    // Accepted data loss: the alternative is blocking
                    // generation indefinitely on a storage fault.
                    tracing::warn!(
                        slot = %victim_index,
                        entity = %victim,
                        error = %e,
                        "Save-before-evict failed - continuing with eviction"
                    );
                }
            }
        } else {
            tracing::debug!(
                slot = %victim_index,
                entity = %victim,
                usage = victim_usage,
                threshold = self.config.min_usage_for_save,
                "Evicting without save - usage below threshold"
            );
        }

        self.bind(victim_index, entity);
        tracing::info!(slot = %victim_index, evicted = %victim, %entity, "Evicted and rebound slot");

        Ok(AcquireOutcome {
            index: victim_index,
            evicted: Some(victim),
            saved_before_evict: saved,
        })
    }

    fn bind(&mut self, index: SlotIndex, entity: &EntityId) {
        self.registry.set_resident(index, Some(entity.clone()));
        self.registry.set_cache_loaded(index, false);
        self.registry.reset_usage(index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendSlot, GenerationOutcome, GenerationRequest};
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Backend that records save calls and reports a fixed slot count.
    struct MockBackend {
        num_slots: usize,
        saves: Mutex<Vec<(SlotIndex, String)>>,
        fail_saves: bool,
        save_count: AtomicUsize,
    }

    impl MockBackend {
        fn new(num_slots: usize) -> Self {
            Self {
                num_slots,
                saves: Mutex::new(Vec::new()),
                fail_saves: false,
                save_count: AtomicUsize::new(0),
            }
        }

        fn failing_saves(mut self) -> Self {
            self.fail_saves = true;
            self
        }

        fn save_count(&self) -> usize {
            self.save_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl SlotBackend for MockBackend {
        async fn list_slots(&self) -> Result<Vec<BackendSlot>, BackendError> {
            Ok((0..self.num_slots)
                .map(|id| BackendSlot {
                    id,
                    occupied: false,
                })
                .collect())
        }

        async fn save_slot(
            &self,
            index: SlotIndex,
            key: &SnapshotKey,
        ) -> Result<(), BackendError> {
            self.save_count.fetch_add(1, Ordering::SeqCst);
            if self.fail_saves {
                return Err(BackendError::Http("disk full".to_string()));
            }
            self.saves.lock().unwrap().push((index, key.file_name()));
            Ok(())
        }

        async fn restore_slot(
            &self,
            _index: SlotIndex,
            _key: &SnapshotKey,
        ) -> Result<(), BackendError> {
            Ok(())
        }

        async fn clear_slot(&self, _index: SlotIndex) -> Result<(), BackendError> {
            Ok(())
        }

        async fn abort_generation(&self) {}

        async fn generate(
            &self,
            _request: &GenerationRequest,
        ) -> Result<GenerationOutcome, BackendError> {
            Ok(GenerationOutcome {
                text: String::new(),
                tokens: 0,
            })
        }
    }

    async fn engine_with_slots(backend: Arc<MockBackend>, config: EngineConfig) -> SlotEngine {
        let mut engine = SlotEngine::new(backend, config);
        engine.sync_with_backend().await.unwrap();
        engine
    }

    fn conv() -> ConversationId {
        ConversationId::new("c1")
    }

    /// At most one slot per resident, checked over the whole table.
    fn assert_single_resident(engine: &SlotEngine) {
        let mut seen = HashSet::new();
        for slot in engine.registry().slots() {
            if let Some(ref resident) = slot.resident {
                assert!(
                    seen.insert(resident.clone()),
                    "entity {resident} resident in more than one slot"
                );
            }
        }
    }

    #[test]
    fn choose_victim_empty_or_all_free_is_none() {
        assert!(choose_victim(&SlotRegistry::new(0)).is_none());
        assert!(choose_victim(&SlotRegistry::new(3)).is_none());
    }

    #[test]
    fn choose_victim_skips_free_slots() {
        let mut registry = SlotRegistry::new(3);
        // Slot 0 free with usage 0; slot 2 occupied with usage 5.
        registry.set_resident(SlotIndex::new(2), Some(EntityId::new("alice")));
        for _ in 0..5 {
            registry.increment_usage(SlotIndex::new(2));
        }
        assert_eq!(choose_victim(&registry), Some(SlotIndex::new(2)));
    }

    #[tokio::test]
    async fn acquire_fails_with_zero_slots() {
        let backend = Arc::new(MockBackend::new(0));
        let mut engine = engine_with_slots(backend, EngineConfig::default()).await;

        let result = engine.acquire_slot(&EntityId::new("alice"), &conv()).await;
        assert!(matches!(result, Err(AcquireError::NoSlots)));
    }

    #[tokio::test]
    async fn acquire_returns_existing_slot_without_changes() {
        let backend = Arc::new(MockBackend::new(2));
        let mut engine = engine_with_slots(Arc::clone(&backend), EngineConfig::default()).await;
        let alice = EntityId::new("alice");

        let first = engine.acquire_slot(&alice, &conv()).await.unwrap();
        engine.registry_mut().increment_usage(first.index);
        engine.registry_mut().set_cache_loaded(first.index, true);

        let second = engine.acquire_slot(&alice, &conv()).await.unwrap();
        assert_eq!(second.index, first.index);
        assert!(second.evicted.is_none());
        // Usage and cache flag untouched by a repeat acquire.
        let slot = engine.registry().slot(first.index).unwrap();
        assert_eq!(slot.usage, 1);
        assert!(slot.cache_loaded);
        assert_eq!(backend.save_count(), 0);
    }

    #[tokio::test]
    async fn acquire_never_evicts_while_free_slot_exists() {
        let backend = Arc::new(MockBackend::new(3));
        let mut engine = engine_with_slots(Arc::clone(&backend), EngineConfig::default()).await;

        for name in ["alice", "bob", "carol"] {
            let outcome = engine.acquire_slot(&EntityId::new(name), &conv()).await.unwrap();
            assert!(outcome.evicted.is_none());
            assert_single_resident(&engine);
        }
        assert_eq!(backend.save_count(), 0);
    }

    #[tokio::test]
    async fn eviction_picks_lowest_usage_then_lowest_index() {
        let backend = Arc::new(MockBackend::new(3));
        let mut engine = engine_with_slots(Arc::clone(&backend), EngineConfig::default()).await;

        let alice = EntityId::new("alice");
        let bob = EntityId::new("bob");
        let carol = EntityId::new("carol");
        let a = engine.acquire_slot(&alice, &conv()).await.unwrap().index;
        let b = engine.acquire_slot(&bob, &conv()).await.unwrap().index;
        let c = engine.acquire_slot(&carol, &conv()).await.unwrap().index;

        // usage: alice=2, bob=1, carol=2 -> bob is the victim.
        engine.registry_mut().increment_usage(a);
        engine.registry_mut().increment_usage(a);
        engine.registry_mut().increment_usage(b);
        engine.registry_mut().increment_usage(c);
        engine.registry_mut().increment_usage(c);

        let dave = EntityId::new("dave");
        let outcome = engine.acquire_slot(&dave, &conv()).await.unwrap();
        assert_eq!(outcome.index, b);
        assert_eq!(outcome.evicted, Some(bob));
        assert_single_resident(&engine);
    }

    #[tokio::test]
    async fn eviction_tie_breaks_on_lowest_index() {
        let backend = Arc::new(MockBackend::new(2));
        let mut engine = engine_with_slots(Arc::clone(&backend), EngineConfig::default()).await;

        let alice = EntityId::new("alice");
        engine.acquire_slot(&alice, &conv()).await.unwrap();
        engine.acquire_slot(&EntityId::new("bob"), &conv()).await.unwrap();

        // Equal usage everywhere; slot 0 must be chosen.
        let outcome = engine
            .acquire_slot(&EntityId::new("carol"), &conv())
            .await
            .unwrap();
        assert_eq!(outcome.index, SlotIndex::new(0));
        assert_eq!(outcome.evicted, Some(alice));
    }

    #[tokio::test]
    async fn eviction_saves_iff_usage_meets_threshold() {
        let backend = Arc::new(MockBackend::new(1));
        let config = EngineConfig::default().with_min_usage_for_save(2);
        let mut engine = engine_with_slots(Arc::clone(&backend), config).await;

        // Below threshold: evict without save.
        let a = engine
            .acquire_slot(&EntityId::new("alice"), &conv())
            .await
            .unwrap()
            .index;
        engine.registry_mut().increment_usage(a);
        let outcome = engine
            .acquire_slot(&EntityId::new("bob"), &conv())
            .await
            .unwrap();
        assert!(!outcome.saved_before_evict);
        assert_eq!(backend.save_count(), 0);

        // At threshold: save before evict.
        let b = outcome.index;
        engine.registry_mut().increment_usage(b);
        engine.registry_mut().increment_usage(b);
        let outcome = engine
            .acquire_slot(&EntityId::new("carol"), &conv())
            .await
            .unwrap();
        assert!(outcome.saved_before_evict);
        assert_eq!(backend.save_count(), 1);

        let saves = backend.saves.lock().unwrap();
        assert_eq!(saves[0].0, b);
        assert!(saves[0].1.contains("-auto-bob.bin"));
    }

    #[tokio::test]
    async fn save_failure_does_not_block_rebinding() {
        let backend = Arc::new(MockBackend::new(1).failing_saves());
        let config = EngineConfig::default().with_min_usage_for_save(1);
        let mut engine = engine_with_slots(Arc::clone(&backend), config).await;

        let a = engine
            .acquire_slot(&EntityId::new("alice"), &conv())
            .await
            .unwrap()
            .index;
        engine.registry_mut().increment_usage(a);

        let bob = EntityId::new("bob");
        let outcome = engine.acquire_slot(&bob, &conv()).await.unwrap();
        assert_eq!(backend.save_count(), 1);
        assert_eq!(engine.registry().find_slot_of(&bob), Some(outcome.index));

        let slot = engine.registry().slot(outcome.index).unwrap();
        assert_eq!(slot.usage, 0);
        assert!(!slot.cache_loaded);
    }

    #[tokio::test]
    async fn repeated_acquires_keep_single_resident_invariant() {
        let backend = Arc::new(MockBackend::new(2));
        let config = EngineConfig::default().with_min_usage_for_save(1);
        let mut engine = engine_with_slots(backend, config).await;

        let names = ["alice", "bob", "carol", "alice", "dave", "bob", "alice"];
        for (i, name) in names.iter().enumerate() {
            let outcome = engine.acquire_slot(&EntityId::new(name), &conv()).await.unwrap();
            // Vary usage so eviction ordering shifts between rounds.
            for _ in 0..(i % 3) {
                engine.registry_mut().increment_usage(outcome.index);
            }
            assert_single_resident(&engine);
        }
    }

    #[tokio::test]
    async fn sync_with_backend_resizes_on_count_change() {
        let backend = Arc::new(MockBackend::new(2));
        let mut engine = engine_with_slots(Arc::clone(&backend), EngineConfig::default()).await;
        let alice = EntityId::new("alice");
        engine.acquire_slot(&alice, &conv()).await.unwrap();

        // Same count: bindings survive.
        engine.sync_with_backend().await.unwrap();
        assert!(engine.registry().find_slot_of(&alice).is_some());
    }
}
