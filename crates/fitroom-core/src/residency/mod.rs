//! Single-resident-slot arbitration for the shared accelerator.
//!
//! Every pipeline ("body", "clothing") owns one slot entry
//! in the [`ResourceArbiter`]. At most one of them may be resident at any
//! instant; acquiring a slot evicts the other one first. All state changes
//! happen under one mutex covering the whole slot table, so an eviction and
//! the load that follows are observed as a single transition.

mod arbiter;
mod lease;
mod slot;

pub use arbiter::{AcquireError, ResourceArbiter, SlotStatus};
pub use lease::SlotLease;
pub use slot::{SlotKey, SlotState};

#[cfg(test)]
mod tests;
