//! RAII lease on a resident slot.

use std::sync::{Arc, MutexGuard};

use crate::engine::InferenceEngine;

use super::arbiter::ResourceArbiter;
use super::slot::{lock_engine, SharedEngine, SlotKey};

/// Proof that `key` is resident and will stay resident until released.
///
/// Release explicitly with [`SlotLease::release`]. A lease dropped without
/// that (early return, panic unwinding through a job) still releases, and
/// unloads the slot, so accelerator memory is never left pinned.
pub struct SlotLease {
    arbiter: Arc<ResourceArbiter>,
    key: SlotKey,
    engine: SharedEngine,
    released: bool,
}

impl SlotLease {
    pub(super) fn new(arbiter: Arc<ResourceArbiter>, key: SlotKey, engine: SharedEngine) -> Self {
        Self {
            arbiter,
            key,
            engine,
            released: false,
        }
    }

    pub fn key(&self) -> SlotKey {
        self.key
    }

    /// Exclusive access to the resident engine. Jobs of the same kind
    /// serialize here.
    pub fn engine(&self) -> MutexGuard<'_, Box<dyn InferenceEngine>> {
        lock_engine(&self.engine)
    }

    /// Hand the slot back to the arbiter; see [`ResourceArbiter`] for `auto_unload`.
    pub fn release(mut self, auto_unload: bool) {
        self.released = true;
        self.arbiter.release(self.key, auto_unload);
    }
}

impl std::fmt::Debug for SlotLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotLease")
            .field("key", &self.key)
            .field("released", &self.released)
            .finish()
    }
}

impl Drop for SlotLease {
    fn drop(&mut self) {
        if !self.released {
            tracing::warn!(slot = %self.key, "lease dropped without release; unloading");
            self.arbiter.release(self.key, true);
        }
    }
}
