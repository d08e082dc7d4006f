// src/config.rs
// Engine-wide tuning knobs. Deliberately not a file/env parser: spec §1
// excludes "configuration parsing" as a feature, so this is just the
// struct a host process fills in and hands to `ViewEngine::new`.

use crate::query::StaleMode;

/// Tuning knobs for a [`crate::engine::ViewEngine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Default `stale` policy applied when a query omits the option.
    pub default_stale: StaleMode,
    /// Capacity of the per-index task queue lane before `submit` blocks
    /// the caller. Keeps a runaway producer from growing the queue
    /// without bound.
    pub lane_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            default_stale: StaleMode::Update,
            lane_capacity: 256,
        }
    }
}
