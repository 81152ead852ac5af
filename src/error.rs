use crate::pipeline::TetMeshOutput;
use thiserror::Error;

/// Pipeline-level failure modes. Local operation rejections never surface
/// here; they are silently discarded and the pass continues.
#[derive(Error, Debug)]
pub enum MeshError {
    /// NaN/Inf coordinates, an empty face list, or a degenerate bounding box.
    #[error("invalid input mesh: {0}")]
    InputInvalid(String),

    /// Preprocessing removed every triangle of the soup.
    #[error("preprocessing left an empty surface")]
    EmptyInput,

    /// The surface could not be kept inside the envelope at the smallest
    /// allowed tolerance. Carries the last valid intermediate mesh for
    /// debugging; retrying with a larger `eps_rel` (or higher `stage`) may
    /// succeed.
    #[error("could not keep the surface inside the envelope")]
    EnvelopeInfeasible(Box<TetMeshOutput>),
}

/// Non-fatal conditions reported on a successful output.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MeshWarning {
    /// The optimization pass budget ran out before the energy threshold was
    /// reached; the mesh is valid but of lower quality than requested.
    PassLimitExceeded,
}
