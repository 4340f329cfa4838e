//! Engine configuration.

use std::time::Duration;

/// Tunables for allocation, auto-save and preload.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Minimum slot usage before an eviction persists the victim's state.
    /// Residents below the threshold barely used their slot; saving them
    /// wastes storage I/O.
    pub min_usage_for_save: u32,
    /// Completed messages per entity between automatic snapshot saves.
    pub autosave_interval: u32,
    /// Auto-saved (untagged) snapshots kept per (conversation, entity).
    pub max_auto_snapshots: usize,
    /// Per-entity bound on a preload generation turn.
    pub preload_timeout: Duration,
    /// Response-length cap for preload turns. Warm-up only, not content.
    pub preload_max_tokens: u32,
    /// Pause between preload batch steps.
    pub settle_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_usage_for_save: 3,
            autosave_interval: 5,
            max_auto_snapshots: 3,
            preload_timeout: Duration::from_secs(120),
            preload_max_tokens: 1,
            settle_delay: Duration::from_millis(250),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_usage_for_save(mut self, n: u32) -> Self {
        self.min_usage_for_save = n;
        self
    }

    pub fn with_autosave_interval(mut self, n: u32) -> Self {
        self.autosave_interval = n;
        self
    }

    pub fn with_max_auto_snapshots(mut self, n: usize) -> Self {
        self.max_auto_snapshots = n;
        self
    }

    pub fn with_preload_timeout(mut self, timeout: Duration) -> Self {
        self.preload_timeout = timeout;
        self
    }

    pub fn with_preload_max_tokens(mut self, n: u32) -> Self {
        self.preload_max_tokens = n;
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }
}
