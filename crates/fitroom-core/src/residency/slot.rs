//! Slot identity and per-slot residency state.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::engine::InferenceEngine;

/// Identifier of a residency slot (one per pipeline).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotKey {
    Body,
    Clothing,
}

impl SlotKey {
    pub const ALL: [SlotKey; 2] = [SlotKey::Body, SlotKey::Clothing];

    pub fn as_str(self) -> &'static str {
        match self {
            SlotKey::Body => "body",
            SlotKey::Clothing => "clothing",
        }
    }

    /// Directory (under the output root) holding this pipeline's artifacts.
    pub fn output_dir_name(self) -> &'static str {
        match self {
            SlotKey::Body => "bodies",
            SlotKey::Clothing => "clothes",
        }
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SlotKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "body" => Ok(SlotKey::Body),
            "clothing" | "clothes" | "cloth" => Ok(SlotKey::Clothing),
            other => Err(format!("unknown slot {other:?}; expected body or clothing")),
        }
    }
}

/// Residency state as seen by any observer of the arbiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotState {
    Unloaded,
    Loading,
    Loaded,
}

pub(super) type SharedEngine = Arc<Mutex<Box<dyn InferenceEngine>>>;

/// One named residency unit. Only the arbiter touches these fields, always
/// under its table lock.
pub(super) struct ResidentSlot {
    pub(super) key: SlotKey,
    pub(super) state: SlotState,
    /// Outstanding leases; the slot cannot be evicted while non-zero.
    pub(super) leases: usize,
    /// Another slot is waiting to evict this one; new leases must wait too.
    pub(super) draining: bool,
    pub(super) engine: SharedEngine,
    pub(super) loads: u64,
    pub(super) unloads: u64,
    pub(super) releases: u64,
}

impl ResidentSlot {
    pub(super) fn new(key: SlotKey, engine: Box<dyn InferenceEngine>) -> Self {
        Self {
            key,
            state: SlotState::Unloaded,
            leases: 0,
            draining: false,
            engine: Arc::new(Mutex::new(engine)),
            loads: 0,
            unloads: 0,
            releases: 0,
        }
    }

    /// Resident or about to be: occupies the capacity-1 budget.
    pub(super) fn occupies_budget(&self) -> bool {
        matches!(self.state, SlotState::Loading | SlotState::Loaded)
    }
}

/// Lock an engine, recovering from a poisoned mutex (a panicking job must not
/// wedge the slot for everyone else).
pub(super) fn lock_engine(engine: &SharedEngine) -> MutexGuard<'_, Box<dyn InferenceEngine>> {
    engine.lock().unwrap_or_else(PoisonError::into_inner)
}
