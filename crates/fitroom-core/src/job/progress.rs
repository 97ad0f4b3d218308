//! Progress events streamed from a running job to the client.

use serde::{Deserialize, Serialize};

use super::error::{ErrorKind, JobError};
use super::{JobId, JobStage};

/// One progress update. Serialized one JSON object per line on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub job_id: JobId,
    pub stage: JobStage,
    /// 0..=100, non-decreasing within a job.
    pub progress: u8,
    pub message: String,
    /// First artifact on `Complete`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_url: Option<String>,
    /// Every artifact on `Complete`, in detection order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifact_urls: Vec<String>,
    /// Preview image of the source on `Complete`, when the export wrote one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_text: Option<String>,
}

impl ProgressEvent {
    pub fn stage(job_id: JobId, stage: JobStage, progress: u8, message: impl Into<String>) -> Self {
        Self {
            job_id,
            stage,
            progress: progress.min(100),
            message: message.into(),
            artifact_url: None,
            artifact_urls: Vec::new(),
            thumbnail_url: None,
            error_kind: None,
            error_text: None,
        }
    }

    pub fn complete(job_id: JobId, artifact_urls: Vec<String>) -> Self {
        let message = match artifact_urls.len() {
            1 => "reconstruction complete".to_string(),
            n => format!("reconstruction complete ({n} artifacts)"),
        };
        Self {
            artifact_url: artifact_urls.first().cloned(),
            artifact_urls,
            ..Self::stage(job_id, JobStage::Complete, 100, message)
        }
    }

    pub fn with_thumbnail(mut self, thumbnail_url: Option<String>) -> Self {
        self.thumbnail_url = thumbnail_url;
        self
    }

    /// Terminal failure. `progress` is the last value already emitted for the job.
    pub fn failed(job_id: JobId, progress: u8, error: &JobError) -> Self {
        Self::failure(job_id, progress, error.kind(), error.to_string())
    }

    pub fn failure(job_id: JobId, progress: u8, kind: ErrorKind, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            error_kind: Some(kind),
            error_text: Some(text.clone()),
            ..Self::stage(job_id, JobStage::Failed, progress, text)
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }
}
