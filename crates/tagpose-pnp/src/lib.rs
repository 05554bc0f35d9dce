#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! The pose of a square marker is recovered from the homography between the
//! marker plane and the normalized image plane.
//!
//! ```rust
//! use tagpose_pnp::{CameraIntrinsics, SquarePose};
//!
//! let k = CameraIntrinsics::new(500.0, 500.0, 320.0, 240.0);
//! // a 0.2 m square facing the camera 1 m away
//! let corners = [[270.0, 290.0], [370.0, 290.0], [370.0, 190.0], [270.0, 190.0]];
//! let pose = SquarePose::solve(&corners, &k, 0.2)?;
//! assert!((pose.translation[2] - 1.0).abs() < 1e-6);
//! # Ok::<(), tagpose_pnp::PnPError>(())
//! ```

mod error;
pub use error::PnPError;

/// Pinhole camera intrinsics.
pub mod camera;
pub use camera::CameraIntrinsics;

/// Homography estimation from four correspondences.
pub mod homography;
pub use homography::homography_4pt;

/// Rotation representation conversions.
pub mod rotation;

/// Square marker pose.
pub mod square;
pub use square::{PoseSolution, SquarePose};
