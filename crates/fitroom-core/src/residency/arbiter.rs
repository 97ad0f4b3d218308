//! The process-wide residency arbiter.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use crate::engine::{EngineError, InferenceEngine};
use crate::retry::{run_with_retry, RetryPolicy};

use super::lease::SlotLease;
use super::slot::{lock_engine, ResidentSlot, SlotKey, SlotState};

/// Why a slot could not be made resident. The slot is left `Unloaded` either
/// way, so a later acquire retries from scratch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AcquireError {
    #[error("{key} engine unavailable: {message}")]
    EngineUnavailable { key: SlotKey, message: String },
    #[error("{key} engine failed to load after {attempts} attempt(s): {message}")]
    LoadFailed {
        key: SlotKey,
        message: String,
        attempts: u32,
    },
}

/// Point-in-time view of one slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotStatus {
    pub key: SlotKey,
    pub state: SlotState,
    pub leases: usize,
    pub loads: u64,
    pub unloads: u64,
    pub releases: u64,
}

/// Owns every slot sharing the capacity-1 residency budget and mediates all
/// load/evict/unload decisions. Construct once at start-up and share via `Arc`.
pub struct ResourceArbiter {
    table: Mutex<Vec<ResidentSlot>>,
    changed: Condvar,
    load_retry: RetryPolicy,
}

impl std::fmt::Debug for ResourceArbiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceArbiter")
            .field("slots", &self.status())
            .field("load_retry", &self.load_retry)
            .finish()
    }
}

impl ResourceArbiter {
    pub fn new(load_retry: RetryPolicy) -> Self {
        Self {
            table: Mutex::new(Vec::new()),
            changed: Condvar::new(),
            load_retry,
        }
    }

    /// Register the engine for `key`, replacing any previous one. Slots start `Unloaded`.
    pub fn with_slot(self, key: SlotKey, engine: Box<dyn InferenceEngine>) -> Self {
        {
            let mut table = self.lock();
            table.retain(|s| s.key != key);
            table.push(ResidentSlot::new(key, engine));
            table.sort_by_key(|s| s.key);
        }
        self
    }

    /// Make `key` resident and take a lease on it.
    ///
    /// Returns immediately when the slot is already loaded. Otherwise waits
    /// for any other resident slot to go idle, evicts it, and loads `key`.
    /// Concurrent callers for a key that is already loading wait for that one
    /// load instead of starting another.
    pub fn acquire(self: &Arc<Self>, key: SlotKey) -> Result<SlotLease, AcquireError> {
        let mut table = self.lock();
        let Some(idx) = table.iter().position(|s| s.key == key) else {
            return Err(AcquireError::EngineUnavailable {
                key,
                message: "no engine configured for this slot".to_string(),
            });
        };

        loop {
            match table[idx].state {
                SlotState::Loaded if !table[idx].draining => {
                    let slot = &mut table[idx];
                    if slot.leases == 0 && !lock_engine(&slot.engine).still_loaded() {
                        tracing::warn!(slot = %key, "resident engine lost its weights; reloading");
                        unload_slot(slot);
                        self.changed.notify_all();
                        continue;
                    }
                    slot.leases += 1;
                    return Ok(SlotLease::new(Arc::clone(self), key, Arc::clone(&slot.engine)));
                }
                SlotState::Loaded | SlotState::Loading => {
                    table = self.wait(table);
                    continue;
                }
                SlotState::Unloaded => {}
            }

            if let Some(other) = table.iter().position(|s| s.key != key && s.occupies_budget()) {
                let resident = &mut table[other];
                if resident.state == SlotState::Loaded && resident.leases == 0 {
                    tracing::info!(evicted = %resident.key, for_slot = %key, "evicting resident engine");
                    unload_slot(resident);
                    self.changed.notify_all();
                } else {
                    if !resident.draining {
                        tracing::info!(
                            resident = %resident.key,
                            leases = resident.leases,
                            for_slot = %key,
                            "waiting for resident engine to go idle"
                        );
                    }
                    resident.draining = true;
                    table = self.wait(table);
                }
                continue;
            }

            table[idx].state = SlotState::Loading;
            table[idx].draining = false;
            let engine = Arc::clone(&table[idx].engine);
            drop(table);

            tracing::info!(slot = %key, "loading engine");
            let outcome = run_with_retry(&self.load_retry, || lock_engine(&engine).load());

            table = self.lock();
            let slot = &mut table[idx];
            let result = match outcome.result {
                Ok(()) => {
                    slot.state = SlotState::Loaded;
                    slot.loads += 1;
                    slot.leases += 1;
                    tracing::info!(slot = %key, attempts = outcome.attempts, "engine loaded");
                    Ok(SlotLease::new(Arc::clone(self), key, engine))
                }
                Err(e) => {
                    // A draining mark set while loading has no resident left to evict.
                    slot.state = SlotState::Unloaded;
                    slot.draining = false;
                    tracing::error!(slot = %key, attempts = outcome.attempts, "engine load failed: {}", e);
                    Err(acquire_error(key, e, outcome.attempts))
                }
            };
            self.changed.notify_all();
            return result;
        }
    }

    /// Drop one lease on `key`. With `auto_unload`, the last lease out unloads
    /// the slot immediately; otherwise it stays resident for the next job
    /// unless the engine reports it is no longer loaded.
    pub(super) fn release(&self, key: SlotKey, auto_unload: bool) {
        let mut table = self.lock();
        if let Some(slot) = table.iter_mut().find(|s| s.key == key) {
            slot.leases = slot.leases.saturating_sub(1);
            slot.releases += 1;
            tracing::debug!(slot = %key, leases = slot.leases, auto_unload, "slot released");
            if slot.leases == 0 && slot.state == SlotState::Loaded {
                if auto_unload {
                    tracing::info!(slot = %key, "auto-unloading engine");
                    unload_slot(slot);
                } else if !lock_engine(&slot.engine).still_loaded() {
                    tracing::warn!(slot = %key, "engine lost its weights during the job; marking unloaded");
                    unload_slot(slot);
                }
            }
        }
        self.changed.notify_all();
    }

    /// Unload `key` if it is resident and idle. Returns false when it is busy
    /// or not loaded.
    pub fn unload(&self, key: SlotKey) -> bool {
        let mut table = self.lock();
        let Some(slot) = table.iter_mut().find(|s| s.key == key) else {
            return false;
        };
        if slot.state != SlotState::Loaded || slot.leases > 0 {
            return false;
        }
        tracing::info!(slot = %key, "unloading engine");
        unload_slot(slot);
        self.changed.notify_all();
        true
    }

    /// Unload every idle resident slot (process shutdown).
    pub fn shutdown(&self) {
        let mut table = self.lock();
        for slot in table.iter_mut() {
            match (slot.state, slot.leases) {
                (SlotState::Loaded, 0) => {
                    tracing::info!(slot = %slot.key, "unloading engine at shutdown");
                    unload_slot(slot);
                }
                (SlotState::Unloaded, _) => {}
                (state, leases) => {
                    tracing::warn!(slot = %slot.key, ?state, leases, "slot busy at shutdown");
                }
            }
        }
        self.changed.notify_all();
    }

    /// Current state of `key`, or None if no such slot is registered.
    pub fn state(&self, key: SlotKey) -> Option<SlotState> {
        self.lock().iter().find(|s| s.key == key).map(|s| s.state)
    }

    /// The slot currently holding the residency budget, if any.
    pub fn resident(&self) -> Option<SlotKey> {
        self.lock()
            .iter()
            .find(|s| s.state == SlotState::Loaded)
            .map(|s| s.key)
    }

    pub fn keys(&self) -> Vec<SlotKey> {
        self.lock().iter().map(|s| s.key).collect()
    }

    pub fn status(&self) -> Vec<SlotStatus> {
        self.lock()
            .iter()
            .map(|s| SlotStatus {
                key: s.key,
                state: s.state,
                leases: s.leases,
                loads: s.loads,
                unloads: s.unloads,
                releases: s.releases,
            })
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ResidentSlot>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, Vec<ResidentSlot>>) -> MutexGuard<'a, Vec<ResidentSlot>> {
        self.changed.wait(guard).unwrap_or_else(PoisonError::into_inner)
    }
}

/// Unload under the table lock so the transition is atomic for observers.
fn unload_slot(slot: &mut ResidentSlot) {
    lock_engine(&slot.engine).unload();
    slot.state = SlotState::Unloaded;
    slot.draining = false;
    slot.unloads += 1;
}

fn acquire_error(key: SlotKey, e: EngineError, attempts: u32) -> AcquireError {
    match e {
        EngineError::Unavailable(message) => AcquireError::EngineUnavailable { key, message },
        other => AcquireError::LoadFailed {
            key,
            message: other.to_string(),
            attempts,
        },
    }
}
