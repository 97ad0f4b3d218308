//! Drives one job through its stages against a leased slot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::Sender;

use crate::config::FitroomConfig;
use crate::control::{CancelToken, JobControl};
use crate::intake::InputImage;
use crate::mask::{select_mask, Mask, SelectionParams};
use crate::residency::{ResourceArbiter, SlotKey, SlotLease};

use super::error::JobError;
use super::export::{Artifact, ArtifactStore};
use super::prepare::compose_rgba;
use super::progress::ProgressEvent;
use super::{Job, JobStage};

/// Artifacts on success, the terminal error otherwise.
pub type JobOutcome = Result<Vec<Artifact>, JobError>;

#[derive(Debug, Clone, PartialEq)]
pub struct RunnerSettings {
    /// Unload the slot as soon as a job releases it.
    pub auto_unload: bool,
    /// Fixed sampling seed for every engine run.
    pub seed: u64,
    pub selection: SelectionParams,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self::from_config(&FitroomConfig::default())
    }
}

impl RunnerSettings {
    pub fn from_config(cfg: &FitroomConfig) -> Self {
        Self {
            auto_unload: cfg.residency.auto_unload,
            seed: cfg.inference.seed,
            selection: SelectionParams::default(),
        }
    }
}

/// Runs jobs end to end. One runner is shared by every job in the process;
/// the arbiter is injected, never looked up.
#[derive(Debug)]
pub struct JobRunner {
    arbiter: Arc<ResourceArbiter>,
    store: ArtifactStore,
    settings: RunnerSettings,
    control: Arc<JobControl>,
    next_id: AtomicU64,
}

impl JobRunner {
    pub fn new(arbiter: Arc<ResourceArbiter>, store: ArtifactStore, settings: RunnerSettings) -> Self {
        Self {
            arbiter,
            store,
            settings,
            control: Arc::new(JobControl::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn arbiter(&self) -> &Arc<ResourceArbiter> {
        &self.arbiter
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn settings(&self) -> &RunnerSettings {
        &self.settings
    }

    /// Registry used to cancel running jobs.
    pub fn control(&self) -> &Arc<JobControl> {
        &self.control
    }

    /// Create a queued job for an already-decoded image.
    pub fn submit(&self, kind: SlotKey, image: InputImage, source_name: impl Into<String>) -> Job {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Job::new(id, kind, image, source_name)
    }

    /// Run `job` to a terminal state, emitting progress events on `events`.
    ///
    /// Blocking: call from a worker thread. The slot lease is released exactly
    /// once per successful acquire, before the terminal event is emitted.
    pub fn run(&self, job: &mut Job, events: Option<&Sender<ProgressEvent>>) -> JobOutcome {
        let cancel = self.control.register(job.id());
        let mut emitter = Emitter { events };
        emitter.stage(job, JobStage::Queued, 0, "queued");
        tracing::info!(job_id = job.id(), kind = %job.kind(), "job started");

        let result = check_cancel(&cancel).and_then(|()| -> JobOutcome {
            let lease = self.arbiter.acquire(job.kind())?;
            let result = self.run_stages(job, &lease, &cancel, &mut emitter);
            lease.release(self.settings.auto_unload);
            result
        });
        self.control.unregister(job.id());

        match &result {
            Ok(artifacts) => {
                job.complete(artifacts.clone());
                tracing::info!(job_id = job.id(), artifacts = artifacts.len(), "job complete");
                let thumbnail = artifacts.iter().find_map(|a| a.thumbnail_url.clone());
                emitter.send(
                    ProgressEvent::complete(job.id(), artifacts.iter().map(|a| a.url.clone()).collect())
                        .with_thumbnail(thumbnail),
                );
            }
            Err(e) => {
                job.fail(e.clone());
                tracing::error!(job_id = job.id(), kind = %e.kind(), stage_progress = job.progress(), "job failed: {}", e);
                emitter.send(ProgressEvent::failed(job.id(), job.progress(), e));
            }
        }
        result
    }

    fn run_stages(
        &self,
        job: &mut Job,
        lease: &SlotLease,
        cancel: &CancelToken,
        emitter: &mut Emitter<'_>,
    ) -> JobOutcome {
        let (w, h) = (job.image().width() as usize, job.image().height() as usize);

        let mask = match job.kind() {
            SlotKey::Clothing => {
                emitter.stage(job, JobStage::Masking, 5, "segmenting garment");
                let candidates = lease.engine().segment_candidates(job.image());
                let mask = match select_mask(&candidates, w, h, &self.settings.selection) {
                    Some(mask) => mask,
                    None => {
                        tracing::warn!(job_id = job.id(), "no usable mask candidates; using full frame");
                        Mask::full(w, h)
                    }
                };
                let msg = format!("mask selected ({:.0}% coverage)", mask.coverage() * 100.0);
                emitter.stage(job, JobStage::Masking, 10, msg);
                check_cancel(cancel)?;
                mask
            }
            SlotKey::Body => Mask::full(w, h),
        };

        emitter.stage(job, JobStage::Preparation, 15, "preparing input");
        let prepared = compose_rgba(job.image(), &mask, self.settings.seed)?;
        emitter.stage(job, JobStage::Preparation, 20, "input prepared");
        check_cancel(cancel)?;

        emitter.stage(job, JobStage::Inference, 25, "starting reconstruction");
        let output = {
            let mut engine = lease.engine();
            emitter.stage(job, JobStage::Inference, 30, "running reconstruction");
            engine.run(&prepared)?
        };
        let msg = format!("reconstruction finished ({} subject(s))", output.subjects.len());
        emitter.stage(job, JobStage::Inference, 70, msg);
        check_cancel(cancel)?;

        emitter.stage(job, JobStage::Export, 75, "exporting meshes");
        let artifacts = self.store.export(job.kind(), job.source_name(), job.image(), &output)?;
        Ok(artifacts)
    }
}

fn check_cancel(cancel: &CancelToken) -> Result<(), JobError> {
    if cancel.is_cancelled() {
        Err(JobError::Cancelled)
    } else {
        Ok(())
    }
}

/// Sends events for one job. A dropped receiver is not an error for the job.
struct Emitter<'a> {
    events: Option<&'a Sender<ProgressEvent>>,
}

impl Emitter<'_> {
    fn stage(&mut self, job: &mut Job, stage: JobStage, progress: u8, message: impl Into<String>) {
        job.advance(stage, progress);
        let message = message.into();
        tracing::debug!(job_id = job.id(), stage = %stage, progress = job.progress(), "{}", message);
        self.send(ProgressEvent::stage(job.id(), stage, job.progress(), message));
    }

    fn send(&mut self, event: ProgressEvent) {
        if let Some(tx) = self.events {
            if tx.blocking_send(event).is_err() {
                tracing::debug!("progress receiver gone; event dropped");
                self.events = None;
            }
        }
    }
}
