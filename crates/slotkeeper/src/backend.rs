//! Inference backend contract.
//!
//! The HTTP transport to the actual engine lives outside this crate; the
//! trait is the seam, which also lets the coordinator and preload paths be
//! tested against mock backends. Implementations are expected to bound each
//! operation with its own timeout and report it as [`BackendError::Timeout`]
//! so a slow backend is distinguishable from a broken one.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::BackendError;
use crate::snapshot::SnapshotKey;
use crate::types::{EntityId, GenerationKind, SlotIndex};

/// Slot metadata as reported by the backend's slot listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendSlot {
    pub id: usize,
    pub occupied: bool,
}

/// One generation request, bound to a specific slot.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationRequest {
    pub id: Uuid,
    pub entity: EntityId,
    /// Slot the backend must execute on. Threading this through is what
    /// keeps the resident's cache and the generation on the same slot.
    pub slot: SlotIndex,
    pub kind: GenerationKind,
    /// Response-length cap; preload turns set this to a minimal value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Opaque passthrough parameters for the backend.
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    pub params: serde_json::Value,
}

impl GenerationRequest {
    pub fn new(entity: EntityId, slot: SlotIndex, kind: GenerationKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity,
            slot,
            kind,
            max_tokens: None,
            params: serde_json::Value::Null,
        }
    }
}

/// Completed generation output.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerationOutcome {
    pub text: String,
    pub tokens: u32,
}

/// Slot control and generation operations the engine consumes.
#[async_trait]
pub trait SlotBackend: Send + Sync {
    /// Report the backend's slot sequence. The count fixes the registry size.
    async fn list_slots(&self) -> Result<Vec<BackendSlot>, BackendError>;

    /// Persist a slot's cache state under the key's file name.
    async fn save_slot(&self, index: SlotIndex, key: &SnapshotKey) -> Result<(), BackendError>;

    /// Restore a previously saved cache state into a slot.
    async fn restore_slot(&self, index: SlotIndex, key: &SnapshotKey) -> Result<(), BackendError>;

    /// Drop a slot's cache state on the backend side.
    async fn clear_slot(&self, index: SlotIndex) -> Result<(), BackendError>;

    /// Abort the in-flight generation, if any. Best effort, never fails.
    async fn abort_generation(&self);

    /// Run one generation turn on the request's slot.
    async fn generate(&self, request: &GenerationRequest)
    -> Result<GenerationOutcome, BackendError>;
}
