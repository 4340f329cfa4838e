//! Slot Registry - authoritative in-memory table of slot residency.
//!
//! Entries are created once per backend session (sized from the reported
//! slot count) and only ever rebound, never destroyed individually. All
//! mutation flows through the coordinator's single lock; the registry itself
//! does no synchronization.

use serde::Serialize;

use crate::types::{EntityId, GenerationKind, SlotIndex};

/// One entry in the fixed-size slot table.
#[derive(Debug, Clone, Serialize)]
pub struct Slot {
    pub index: SlotIndex,
    /// Entity currently bound to this slot; `None` means free.
    pub resident: Option<EntityId>,
    /// Generation turns served since the last snapshot restore or save.
    pub usage: u32,
    /// True once a durable snapshot has been restored for the current resident.
    pub cache_loaded: bool,
    /// Last requested generation category. Informational only.
    pub last_generation_kind: Option<GenerationKind>,
}

impl Slot {
    fn free(index: SlotIndex) -> Self {
        Self {
            index,
            resident: None,
            usage: 0,
            cache_loaded: false,
            last_generation_kind: None,
        }
    }
}

/// Fixed-size table mapping slots to residents.
///
/// Callers are responsible for invariant maintenance (at most one slot per
/// resident); the mutators validate nothing beyond index bounds.
#[derive(Debug)]
pub struct SlotRegistry {
    slots: Vec<Slot>,
}

impl SlotRegistry {
    pub fn new(count: usize) -> Self {
        Self {
            slots: (0..count).map(|i| Slot::free(SlotIndex::new(i))).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Ordered read view of the table.
    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn slot(&self, index: SlotIndex) -> Option<&Slot> {
        self.slots.get(index.get())
    }

    /// Linear lookup by resident equality. `None` if the entity holds no slot.
    pub fn find_slot_of(&self, entity: &EntityId) -> Option<SlotIndex> {
        self.slots
            .iter()
            .find(|s| s.resident.as_ref() == Some(entity))
            .map(|s| s.index)
    }

    pub fn set_resident(&mut self, index: SlotIndex, resident: Option<EntityId>) {
        if let Some(slot) = self.slots.get_mut(index.get()) {
            tracing::debug!(slot = %index, resident = ?resident, "Rebinding slot");
            slot.resident = resident;
        }
    }

    pub fn set_cache_loaded(&mut self, index: SlotIndex, loaded: bool) {
        if let Some(slot) = self.slots.get_mut(index.get()) {
            slot.cache_loaded = loaded;
        }
    }

    pub fn set_last_generation_kind(&mut self, index: SlotIndex, kind: GenerationKind) {
        if let Some(slot) = self.slots.get_mut(index.get()) {
            slot.last_generation_kind = Some(kind);
        }
    }

    pub fn reset_usage(&mut self, index: SlotIndex) {
        if let Some(slot) = self.slots.get_mut(index.get()) {
            slot.usage = 0;
        }
    }

    pub fn increment_usage(&mut self, index: SlotIndex) {
        if let Some(slot) = self.slots.get_mut(index.get()) {
            slot.usage = slot.usage.saturating_add(1);
        }
    }

    /// Rebuild the table for a changed backend slot count.
    ///
    /// All entity-to-slot bindings are discarded. Rare, cold event; a full
    /// reset is acceptable.
    pub fn resize(&mut self, count: usize) {
        if count == self.slots.len() {
            return;
        }
        tracing::warn!(
            old = self.slots.len(),
            new = count,
            "Backend slot count changed - resetting slot table"
        );
        self.slots = (0..count).map(|i| Slot::free(SlotIndex::new(i))).collect();
    }
}
