//! Preload orchestrator - sequential cache warm-up across a batch of
//! entities.
//!
//! Each entity gets one minimal generation turn, raced against a per-entity
//! timeout and the caller's cancellation token in a single `select!`. The
//! losing branches are dropped by the select, so there are no timers or
//! pollers to tear down by hand. Timeout and cancellation both stop the
//! remaining batch; everything else accumulates into the final summary.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::coordinator::{GenerationCoordinator, TurnSpec};
use crate::error::GenerateError;
use crate::types::{EntityId, GenerationKind};

/// Live progress snapshot, published after every batch step.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PreloadProgress {
    pub completed: usize,
    pub total: usize,
    /// Entity currently being warmed, if any.
    pub current: Option<String>,
    pub succeeded: Vec<String>,
    pub errors: Vec<String>,
    pub cancelled: bool,
}

/// Final batch summary.
///
/// `success` means the batch did useful work: at least one entity was warmed
/// and persisted, or nothing went wrong. A timeout on one entity with an
/// earlier success still reports `success = true` with one error entry.
#[derive(Debug, Clone)]
pub struct PreloadReport {
    pub success: bool,
    pub succeeded: Vec<String>,
    pub errors: Vec<String>,
    pub cancelled: bool,
}

/// Drives the generation coordinator across a user-selected batch.
pub struct PreloadOrchestrator {
    coordinator: Arc<GenerationCoordinator>,
    progress_tx: watch::Sender<PreloadProgress>,
}

impl PreloadOrchestrator {
    pub fn new(coordinator: Arc<GenerationCoordinator>) -> Self {
        let (progress_tx, _) = watch::channel(PreloadProgress::default());
        Self {
            coordinator,
            progress_tx,
        }
    }

    /// Subscribe to live progress snapshots.
    pub fn subscribe(&self) -> watch::Receiver<PreloadProgress> {
        self.progress_tx.subscribe()
    }

    /// Warm each entity's slot in order. Cancellation is cooperative: the
    /// token is checked before each entity and raced against the in-flight
    /// turn; once observed, the backend is told to abort and no further
    /// entity is started.
    pub async fn run(
        &self,
        entities: Vec<EntityId>,
        token: CancellationToken,
    ) -> PreloadReport {
        let config = self.coordinator.config().clone();
        let total = entities.len();
        let mut progress = PreloadProgress {
            total,
            ..Default::default()
        };
        self.publish(&progress);

        tracing::info!(target: "slotkeeper::preload", total, "Starting preload batch");

        let mut stop = false;
        for entity in entities {
            if token.is_cancelled() {
                tracing::info!(target: "slotkeeper::preload", %entity, "Batch cancelled - skipping remaining entities");
                progress.cancelled = true;
                break;
            }

            progress.current = Some(entity.to_string());
            self.publish(&progress);

            match self.warm_entity(&entity, &token, &config).await {
                Ok(()) => {
                    tracing::info!(target: "slotkeeper::preload", %entity, "Preload succeeded");
                    progress.succeeded.push(entity.to_string());
                }
                Err(GenerateError::TimedOut) => {
                    tracing::warn!(target: "slotkeeper::preload", %entity, "Preload timed out - aborting generation");
                    self.coordinator.abort_generation().await;
                    progress.errors.push(format!("{entity}: generation timed out"));
                    stop = true;
                }
                Err(GenerateError::Cancelled) => {
                    tracing::info!(target: "slotkeeper::preload", %entity, "Preload cancelled - aborting generation");
                    self.coordinator.abort_generation().await;
                    progress.cancelled = true;
                    stop = true;
                }
                Err(e) => {
                    tracing::warn!(target: "slotkeeper::preload", %entity, error = %e, "Preload failed");
                    progress.errors.push(format!("{entity}: {e}"));
                }
            }

            progress.completed += 1;
            progress.current = None;
            self.publish(&progress);

            if stop {
                break;
            }
            if progress.completed < total {
                tokio::time::sleep(config.settle_delay).await;
            }
        }

        let report = PreloadReport {
            success: !progress.succeeded.is_empty() || progress.errors.is_empty(),
            succeeded: progress.succeeded.clone(),
            errors: progress.errors.clone(),
            cancelled: progress.cancelled,
        };
        self.publish(&progress);

        tracing::info!(
            target: "slotkeeper::preload",
            succeeded = report.succeeded.len(),
            errors = report.errors.len(),
            cancelled = report.cancelled,
            "Preload batch finished"
        );
        report
    }

    /// One warm-up turn for one entity: pin the override identity, race the
    /// turn against timeout and cancellation, persist the slot on success.
    /// The pin is cleared on every exit path by the guard's drop.
    async fn warm_entity(
        &self,
        entity: &EntityId,
        token: &CancellationToken,
        config: &crate::config::EngineConfig,
    ) -> Result<(), GenerateError> {
        let _guard = self.coordinator.pin_entity(entity.clone());

        let spec = TurnSpec {
            kind: GenerationKind::Quiet,
            max_tokens: Some(config.preload_max_tokens),
            params: serde_json::Value::Null,
        };

        let report = tokio::select! {
            result = self.coordinator.generate(spec) => result?,
            _ = tokio::time::sleep(config.preload_timeout) => return Err(GenerateError::TimedOut),
            _ = token.cancelled() => return Err(GenerateError::Cancelled),
        };

        tracing::debug!(
            target: "slotkeeper::preload",
            %entity,
            slot = %report.slot,
            "Warm-up turn complete - persisting slot"
        );

        // Preload produces no countable messages; persist explicitly.
        match self.coordinator.save_entity_slot(entity, None).await {
            Ok(_) => Ok(()),
            Err(crate::error::SaveError::Backend(e)) => Err(GenerateError::Backend(e)),
            Err(e @ crate::error::SaveError::NotResident(_)) => Err(GenerateError::Backend(
                crate::error::BackendError::Rejected(e.to_string()),
            )),
        }
    }

    fn publish(&self, progress: &PreloadProgress) {
        let _ = self.progress_tx.send(progress.clone());
    }
}
