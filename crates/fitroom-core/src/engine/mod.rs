//! Capability interface for the external reconstruction engines.
//!
//! The neural forward pass, mesh extraction and texture baking are opaque to
//! this crate. An engine only has to load/unload its weights, run one
//! prepared input, and (for clothing) propose segmentation candidates.

pub mod process;

use serde::{Deserialize, Serialize};

use crate::intake::InputImage;
use crate::mask::MaskCandidate;

/// Failure reported by an engine hook.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// Weights/checkpoints or the engine executable are missing. Needs an operator fix.
    #[error("engine unavailable: {0}")]
    Unavailable(String),
    /// Any other initialization failure; worth retrying.
    #[error("engine initialization failed: {0}")]
    Init(String),
    /// The engine ran but reported a failure for this input.
    #[error("inference failed: {0}")]
    Run(String),
    /// The engine replied with something we could not interpret.
    #[error("engine protocol error: {0}")]
    Protocol(String),
}

/// Engine input after mask compositing: RGBA8, row-major, alpha = mask.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedInput {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
    /// Sampling seed; fixed per deployment so identical input gives identical output.
    pub seed: u64,
}

impl PreparedInput {
    /// Fraction of pixels with non-zero alpha.
    pub fn alpha_coverage(&self) -> f64 {
        let pixels = self.rgba.len() / 4;
        if pixels == 0 {
            return 0.0;
        }
        let opaque = self.rgba.chunks_exact(4).filter(|px| px[3] != 0).count();
        opaque as f64 / pixels as f64
    }
}

/// One reconstructed subject: triangle mesh in engine coordinates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubjectMesh {
    pub vertices: Vec<[f32; 3]>,
    #[serde(default)]
    pub faces: Vec<[u32; 3]>,
}

impl SubjectMesh {
    pub fn is_renderable(&self) -> bool {
        !self.vertices.is_empty()
    }
}

/// Raw engine output: subjects in detection order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawOutput {
    pub subjects: Vec<SubjectMesh>,
}

/// An inference engine whose weights can be made resident on the shared accelerator.
///
/// Hooks take `&mut self`; the residency arbiter guarantees `load`/`unload`
/// are never interleaved with `run` on the same engine.
pub trait InferenceEngine: Send {
    /// Make weights resident. Called only from the Loading state.
    fn load(&mut self) -> Result<(), EngineError>;

    /// Release accelerator memory. Must be safe to call when nothing is loaded.
    fn unload(&mut self);

    /// Run one prepared input on the resident weights.
    fn run(&mut self, input: &PreparedInput) -> Result<RawOutput, EngineError>;

    /// Segmentation candidates for `image`. Engines without a segmentation
    /// capability return none, which the mask selector treats as "no mask".
    fn segment_candidates(&mut self, _image: &InputImage) -> Vec<MaskCandidate> {
        Vec::new()
    }

    /// False once the weights are gone without an `unload`, e.g. a crashed
    /// worker. The arbiter then treats the slot as unloaded.
    fn still_loaded(&mut self) -> bool {
        true
    }
}
