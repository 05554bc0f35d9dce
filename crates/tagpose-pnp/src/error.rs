use thiserror::Error;

/// Error types for the pose solver.
#[derive(Debug, Error, PartialEq)]
pub enum PnPError {
    /// Singular value decomposition failed.
    #[error("SVD computation failed: {0}")]
    SvdFailed(String),

    /// The four correspondences do not define a homography.
    #[error("Degenerate homography, determinant {0:e}")]
    DegenerateHomography(f64),

    /// The recovered pose is not usable.
    #[error("Invalid pose: {0}")]
    InvalidPose(&'static str),

    /// The camera intrinsics are not usable.
    #[error("Invalid camera intrinsics: {0}")]
    InvalidIntrinsics(String),
}
