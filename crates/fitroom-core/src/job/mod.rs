//! One reconstruction job and the stage machine that drives it.
//!
//! Stages run strictly in order: `Queued → Masking → Preparation → Inference
//! → Export → Complete`. Body jobs skip `Masking`. Any stage may end in
//! `Failed`. Both terminal states release the slot lease first.

pub mod error;
pub mod export;
mod prepare;
pub mod progress;
mod runner;

use serde::{Deserialize, Serialize};

use crate::intake::InputImage;
use crate::residency::SlotKey;

pub use error::{ErrorKind, JobError};
pub use export::{Artifact, ArtifactStore, ExportError};
pub use prepare::compose_rgba;
pub use progress::ProgressEvent;
pub use runner::{JobOutcome, JobRunner, RunnerSettings};

pub type JobId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    Queued,
    Masking,
    Preparation,
    Inference,
    Export,
    Complete,
    Failed,
}

impl JobStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStage::Complete | JobStage::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStage::Queued => "queued",
            JobStage::Masking => "masking",
            JobStage::Preparation => "preparation",
            JobStage::Inference => "inference",
            JobStage::Export => "export",
            JobStage::Complete => "complete",
            JobStage::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A submitted job. Owned by whoever is running it; observers get a [`JobSnapshot`].
#[derive(Debug, Clone)]
pub struct Job {
    id: JobId,
    kind: SlotKey,
    /// Upload filename, used to name the exported artifacts.
    source_name: String,
    image: InputImage,
    stage: JobStage,
    progress: u8,
    artifacts: Vec<Artifact>,
    error: Option<JobError>,
}

impl Job {
    pub(crate) fn new(id: JobId, kind: SlotKey, image: InputImage, source_name: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            source_name: source_name.into(),
            image,
            stage: JobStage::Queued,
            progress: 0,
            artifacts: Vec::new(),
            error: None,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn kind(&self) -> SlotKey {
        self.kind
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn image(&self) -> &InputImage {
        &self.image
    }

    pub fn stage(&self) -> JobStage {
        self.stage
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    /// Exported artifacts; non-empty only once `Complete`.
    pub fn artifacts(&self) -> &[Artifact] {
        &self.artifacts
    }

    /// Set only once `Failed`.
    pub fn error(&self) -> Option<&JobError> {
        self.error.as_ref()
    }

    /// Move to `stage` at `progress`; progress never goes backwards.
    pub(crate) fn advance(&mut self, stage: JobStage, progress: u8) {
        self.stage = stage;
        self.progress = self.progress.max(progress.min(100));
    }

    pub(crate) fn complete(&mut self, artifacts: Vec<Artifact>) {
        self.advance(JobStage::Complete, 100);
        self.artifacts = artifacts;
    }

    pub(crate) fn fail(&mut self, error: JobError) {
        self.stage = JobStage::Failed;
        self.error = Some(error);
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id,
            kind: self.kind,
            stage: self.stage,
            progress: self.progress,
            artifact_urls: self.artifacts.iter().map(|a| a.url.clone()).collect(),
            error: self.error.as_ref().map(|e| e.to_string()),
        }
    }
}

/// Read-only view of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub kind: SlotKey,
    pub stage: JobStage,
    pub progress: u8,
    pub artifact_urls: Vec<String>,
    pub error: Option<String>,
}
