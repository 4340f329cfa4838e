//! slotkeeper: slot cache allocation, eviction and preload engine for
//! multi-character inference sessions.
//!
//! The inference backend exposes a small fixed pool of compute slots, each
//! holding one character's KV attention cache. This crate decides which
//! character occupies which slot, persists a resident's cache before it is
//! evicted, restores snapshots when a character returns, and warms a batch
//! of characters' slots ahead of use with cooperative cancellation.

mod config;
mod error;
mod registry;
mod types;

pub mod backend;
pub mod context;
pub mod coordinator;
pub mod engine;
pub mod preload;
pub mod snapshot;
pub mod store;

pub use config::EngineConfig;
pub use error::{AcquireError, BackendError, GenerateError, SaveError, StoreError};
pub use registry::{Slot, SlotRegistry};
pub use types::{ConversationId, EntityId, GenerationKind, SlotIndex};

pub use backend::{BackendSlot, GenerationOutcome, GenerationRequest, SlotBackend};
pub use context::{ContextProvider, OverrideGuard};
pub use coordinator::{GenerationCoordinator, TurnReport, TurnSpec};
pub use engine::{AcquireOutcome, SlotEngine, choose_victim};
pub use preload::{PreloadOrchestrator, PreloadProgress, PreloadReport};
pub use snapshot::SnapshotKey;
pub use store::{FsSnapshotStore, SnapshotEntry, SnapshotStore};

pub use tokio_util::sync::CancellationToken;
