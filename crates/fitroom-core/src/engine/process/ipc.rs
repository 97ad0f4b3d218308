//! JSON Lines protocol between the arbiter process and an engine worker.
//!
//! One request per line on the worker's stdin, one reply per line on its
//! stdout. Replies echo the request id.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::engine::SubjectMesh;

#[derive(Debug, Serialize, Deserialize)]
pub(super) struct EngineRequest {
    pub id: u64,
    #[serde(flatten)]
    pub command: EngineCommand,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(super) enum EngineCommand {
    /// Load weights from `checkpoint` and keep them resident.
    Load { checkpoint: PathBuf },
    /// Propose segmentation candidates for the RGB PNG at `image`.
    Segment { image: PathBuf },
    /// Reconstruct from the RGBA PNG at `image` (alpha = foreground mask).
    Run { image: PathBuf, seed: u64 },
    /// Free everything and exit.
    Shutdown,
}

#[derive(Debug, Serialize, Deserialize)]
pub(super) struct EngineReply {
    pub id: u64,
    #[serde(flatten)]
    pub payload: EnginePayload,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(super) enum EnginePayload {
    Loaded,
    Candidates {
        width: usize,
        height: usize,
        candidates: Vec<WireCandidate>,
    },
    Output {
        subjects: Vec<SubjectMesh>,
    },
    Error {
        message: String,
    },
}

impl EnginePayload {
    pub fn name(&self) -> &'static str {
        match self {
            EnginePayload::Loaded => "loaded",
            EnginePayload::Candidates { .. } => "candidates",
            EnginePayload::Output { .. } => "output",
            EnginePayload::Error { .. } => "error",
        }
    }
}

/// Candidate mask as alternating unset/set run lengths, row-major, starting unset.
#[derive(Debug, Serialize, Deserialize)]
pub(super) struct WireCandidate {
    pub runs: Vec<u32>,
    #[serde(default)]
    pub score: f32,
}
