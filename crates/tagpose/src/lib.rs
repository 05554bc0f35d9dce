#![deny(missing_docs)]
//! # tagpose
//!
//! Asynchronous AprilTag detection with pose estimation.
//!
//! A [`Detector`] takes a camera image, two camera parameters and the id of
//! the tag to look for, and resolves every request exactly once to either a
//! [`Detection`] carrying the tag pose or [`DetectionOutcome::NotFound`].
//!
//! ```no_run
//! use tagpose::{Detector, DetectorConfig, PoseShape};
//! use tagpose_image::io::read_image_png_rgb8;
//!
//! let config = DetectorConfig::default().with_pose_shape(PoseShape::Translation);
//! let detector = Detector::new(config)?;
//!
//! let image = read_image_png_rgb8("frame.png")?;
//! let outcome = detector.detect(Some(image), 920.0, 920.0, 3).wait();
//!
//! if let Some(pose) = outcome.pose() {
//!     println!("tag 3 at {:?}", pose.translation());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

/// Drawing detections onto images.
pub mod annotate;

/// Detector configuration.
pub mod config;

/// The asynchronous detector.
pub mod detector;

/// The engine seam and the default AprilTag engine.
pub mod engine;

/// Error types.
pub mod error;

/// Field layouts and camera localization.
pub mod field;

/// Rate limiting of detection requests.
pub mod scheduler;

/// Result and parameter types.
pub mod types;

pub use config::DetectorConfig;
pub use detector::{DetectionHandle, Detector};
pub use engine::{AprilTagEngine, EngineDetection, VisionEngine};
pub use error::{DetectorError, EngineError};
pub use field::{FieldLayout, FieldPose};
pub use scheduler::DetectionScheduler;
pub use types::{CameraParams, Detection, DetectionOutcome, Pose, PoseShape, RotationMatrix, Translation};
