use std::path::PathBuf;

use tagpose_apriltag::errors::AprilTagError;
use tagpose_image::ImageError;
use tagpose_pnp::PnPError;

/// Errors raised by a [`crate::VisionEngine`] while processing one request.
///
/// The detector never hands these to the caller; they are logged and the
/// request resolves to [`crate::DetectionOutcome::NotFound`].
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Error related to the image buffers.
    #[error(transparent)]
    Image(#[from] ImageError),

    /// Error raised by the tag decoder.
    #[error(transparent)]
    AprilTag(#[from] AprilTagError),

    /// Error raised by the pose solver.
    #[error(transparent)]
    Pose(#[from] PnPError),

    /// The physical tag size is not a positive number.
    #[error("Tag size must be positive, got {0}")]
    InvalidTagSize(f64),

    /// The solved pose does not reproject onto the detected corners.
    #[error("Reprojection error {rmse:.2} px exceeds {max:.2} px")]
    Reprojection {
        /// RMS error of the solved pose, in pixels.
        rmse: f64,
        /// Largest accepted error, in pixels.
        max: f64,
    },
}

/// Errors raised while building a detector or loading its inputs.
#[derive(Debug, thiserror::Error)]
pub enum DetectorError {
    /// The engine could not be built.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The worker thread could not be started.
    #[error("Failed to spawn the detection worker: {0}")]
    WorkerSpawn(std::io::Error),

    /// A configuration value is out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The configuration JSON is malformed.
    #[error("Failed to parse the detector configuration: {0}")]
    Config(serde_json::Error),

    /// The field layout JSON is malformed.
    #[error("Failed to parse the field layout: {0}")]
    FieldLayout(serde_json::Error),

    /// A file could not be read.
    #[error("Failed to read {path}: {source}")]
    Io {
        /// Path of the file.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
}
