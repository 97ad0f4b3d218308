#![allow(dead_code)]

pub mod mock_engine;

use std::sync::Arc;

use fitroom_core::job::{ArtifactStore, JobRunner, RunnerSettings};
use fitroom_core::mask::{Mask, MaskCandidate};
use fitroom_core::residency::{ResourceArbiter, SlotKey};
use fitroom_core::retry::RetryPolicy;

pub use mock_engine::{MockEngine, Recorder};

/// Runner over mock engines, writing artifacts under `out`.
pub fn runner(out: &std::path::Path, engines: Vec<(SlotKey, MockEngine)>, settings: RunnerSettings) -> Arc<JobRunner> {
    let arbiter = engines
        .into_iter()
        .fold(ResourceArbiter::new(RetryPolicy::no_retry()), |arb, (key, engine)| {
            arb.with_slot(key, Box::new(engine))
        });
    Arc::new(JobRunner::new(
        Arc::new(arbiter),
        ArtifactStore::new(out, "/outputs"),
        settings,
    ))
}

/// Horizontal band of full rows starting at `top` covering about `coverage` of the image.
pub fn band(width: usize, height: usize, top: usize, coverage: f64) -> MaskCandidate {
    let rows = (height as f64 * coverage).round() as usize;
    let mut mask = Mask::new(width, height);
    mask.fill_rect(0, top, width, top + rows);
    MaskCandidate::new(mask, 0.5)
}
