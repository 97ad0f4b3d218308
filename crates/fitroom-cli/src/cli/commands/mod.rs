//! CLI command handlers, one per file.

mod check;
mod list;
mod reconstruct;

pub use check::run_check;
pub use list::run_list;
pub use reconstruct::run_reconstruct;

use anyhow::Result;
use fitroom_core::config::FitroomConfig;
use fitroom_core::engine::process::ProcessEngine;
use fitroom_core::job::{ArtifactStore, JobRunner, RunnerSettings};
use fitroom_core::residency::ResourceArbiter;
use fitroom_core::retry::RetryPolicy;
use std::sync::Arc;

/// Arbiter with one worker-process engine per configured slot.
pub(crate) fn build_arbiter(cfg: &FitroomConfig) -> Arc<ResourceArbiter> {
    let retry = RetryPolicy::from(&cfg.retry());
    let arbiter = cfg
        .engines
        .iter()
        .fold(ResourceArbiter::new(retry), |arbiter, (key, engine)| {
            arbiter.with_slot(*key, Box::new(ProcessEngine::new(*key, engine.clone())))
        });
    Arc::new(arbiter)
}

pub(crate) fn build_runner(cfg: &FitroomConfig, settings: RunnerSettings) -> Result<Arc<JobRunner>> {
    let store = ArtifactStore::new(cfg.output_root()?, cfg.url_prefix());
    Ok(Arc::new(JobRunner::new(build_arbiter(cfg), store, settings)))
}
