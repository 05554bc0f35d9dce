use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tagpose_image::{Image, ImageSize};
use tagpose_pnp::{rotation, CameraIntrinsics};

use crate::error::DetectorError;

/// Which pose representation a successful detection carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoseShape {
    /// Only the `x, y, z` position of the tag center.
    PositionOnly,
    /// The translation vector of the tag center.
    Translation,
    /// The translation vector and the rotation matrix of the tag.
    #[default]
    TranslationAndRotation,
}

impl FromStr for PoseShape {
    type Err = DetectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "position" | "position_only" | "xyz" => Ok(Self::PositionOnly),
            "translation" => Ok(Self::Translation),
            "full" | "translation_and_rotation" => Ok(Self::TranslationAndRotation),
            other => Err(DetectorError::InvalidConfig(format!(
                "unknown pose shape: {other}"
            ))),
        }
    }
}

/// Position of the tag center in the camera frame, in meters.
///
/// The camera frame has x to the right, y down and z along the optical axis.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Translation {
    /// Offset along the camera x axis.
    pub x: f64,
    /// Offset along the camera y axis.
    pub y: f64,
    /// Offset along the optical axis.
    pub z: f64,
}

impl Translation {
    /// Creates a translation from its components.
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Returns the components as an array.
    pub fn to_array(self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }

    /// Euclidean length of the vector.
    pub fn norm(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

impl From<[f64; 3]> for Translation {
    fn from(v: [f64; 3]) -> Self {
        Self::new(v[0], v[1], v[2])
    }
}

impl std::ops::Add for Translation {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl std::ops::Neg for Translation {
    type Output = Self;

    fn neg(self) -> Self {
        Self::new(-self.x, -self.y, -self.z)
    }
}

/// Row-major 3x3 rotation matrix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RotationMatrix(pub [[f64; 3]; 3]);

impl Default for RotationMatrix {
    fn default() -> Self {
        Self::identity()
    }
}

impl RotationMatrix {
    /// The identity rotation.
    pub const fn identity() -> Self {
        Self([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]])
    }

    /// Builds the rotation of a unit quaternion `[w, x, y, z]`.
    pub fn from_quaternion(q: [f64; 4]) -> Self {
        Self(rotation::quaternion_to_matrix(q))
    }

    /// Returns the unit quaternion `[w, x, y, z]` with `w >= 0`.
    pub fn to_quaternion(&self) -> [f64; 4] {
        rotation::matrix_to_quaternion(&self.0)
    }

    /// Returns the transpose, which is also the inverse rotation.
    pub fn transpose(&self) -> Self {
        let m = &self.0;
        Self(std::array::from_fn(|i| std::array::from_fn(|j| m[j][i])))
    }

    /// Rotates a vector.
    pub fn mul_vec(&self, v: Translation) -> Translation {
        let m = &self.0;
        Translation::new(
            m[0][0] * v.x + m[0][1] * v.y + m[0][2] * v.z,
            m[1][0] * v.x + m[1][1] * v.y + m[1][2] * v.z,
            m[2][0] * v.x + m[2][1] * v.y + m[2][2] * v.z,
        )
    }

    /// Composes two rotations, `self` applied after `rhs`.
    pub fn mul(&self, rhs: &Self) -> Self {
        let (a, b) = (&self.0, &rhs.0);
        Self(std::array::from_fn(|i| {
            std::array::from_fn(|j| (0..3).map(|k| a[i][k] * b[k][j]).sum())
        }))
    }
}

/// Pose of a detected tag in the camera frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Pose {
    /// Position of the tag center only.
    PositionOnly {
        /// Offset along the camera x axis.
        x: f64,
        /// Offset along the camera y axis.
        y: f64,
        /// Offset along the optical axis.
        z: f64,
    },
    /// Translation vector of the tag center.
    Translation(Translation),
    /// Full pose, the rotation mapping tag axes to camera axes.
    TranslationAndRotation {
        /// Translation vector of the tag center.
        translation: Translation,
        /// Orientation of the tag.
        rotation: RotationMatrix,
    },
}

impl Pose {
    /// Builds the pose of the requested shape from a solved pose.
    pub fn from_solution(shape: PoseShape, translation: Translation, rotation: RotationMatrix) -> Self {
        match shape {
            PoseShape::PositionOnly => Self::PositionOnly {
                x: translation.x,
                y: translation.y,
                z: translation.z,
            },
            PoseShape::Translation => Self::Translation(translation),
            PoseShape::TranslationAndRotation => Self::TranslationAndRotation {
                translation,
                rotation,
            },
        }
    }

    /// Returns the shape of this pose.
    pub fn shape(&self) -> PoseShape {
        match self {
            Self::PositionOnly { .. } => PoseShape::PositionOnly,
            Self::Translation(_) => PoseShape::Translation,
            Self::TranslationAndRotation { .. } => PoseShape::TranslationAndRotation,
        }
    }

    /// Returns the position of the tag center, available for every shape.
    pub fn translation(&self) -> Translation {
        match *self {
            Self::PositionOnly { x, y, z } => Translation::new(x, y, z),
            Self::Translation(t) => t,
            Self::TranslationAndRotation { translation, .. } => translation,
        }
    }

    /// Returns the rotation if this pose carries one.
    pub fn rotation(&self) -> Option<RotationMatrix> {
        match self {
            Self::TranslationAndRotation { rotation, .. } => Some(*rotation),
            _ => None,
        }
    }
}

/// Camera parameters passed along with every request.
///
/// `px` and `py` are opaque to the detector. The default engine reads them as
/// the focal lengths in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraParams {
    /// First camera parameter, the horizontal focal length for the default engine.
    pub px: f32,
    /// Second camera parameter, the vertical focal length for the default engine.
    pub py: f32,
    /// Principal point in pixels; the image center when absent.
    pub principal_point: Option<[f32; 2]>,
}

impl CameraParams {
    /// Creates camera parameters with the principal point at the image center.
    pub fn new(px: f32, py: f32) -> Self {
        Self {
            px,
            py,
            principal_point: None,
        }
    }

    /// Sets the principal point.
    pub fn with_principal_point(mut self, principal_point: Option<[f32; 2]>) -> Self {
        self.principal_point = principal_point;
        self
    }

    /// Pinhole intrinsics for an image of `size`.
    pub fn intrinsics(&self, size: ImageSize) -> CameraIntrinsics {
        match self.principal_point {
            Some([cx, cy]) => {
                CameraIntrinsics::new(self.px as f64, self.py as f64, cx as f64, cy as f64)
            }
            None => CameraIntrinsics::from_focal(self.px as f64, self.py as f64, size.width, size.height),
        }
    }
}

/// A successful detection of the requested tag.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// The output image, annotated when enabled in the configuration.
    pub image: Option<Image<u8, 3>>,
    /// Pose of the tag in the configured shape.
    pub pose: Pose,
    /// Id of the detected tag.
    pub tag_id: u32,
    /// Image corners of the tag border, counter-clockwise from the tag's bottom-left.
    pub corners: [[f32; 2]; 4],
    /// Detection confidence.
    pub decision_margin: f32,
    /// Number of corrected bits.
    pub hamming: u8,
}

/// Result of one detection request, delivered exactly once.
#[derive(Debug, Clone, PartialEq)]
pub enum DetectionOutcome {
    /// The requested tag was found.
    Detected(Detection),
    /// The tag was not found or the request could not be processed.
    NotFound,
}

impl DetectionOutcome {
    /// Whether the tag was found.
    pub fn is_detected(&self) -> bool {
        matches!(self, Self::Detected(_))
    }

    /// The output image, absent when the tag was not found.
    pub fn image(&self) -> Option<&Image<u8, 3>> {
        match self {
            Self::Detected(detection) => detection.image.as_ref(),
            Self::NotFound => None,
        }
    }

    /// The pose of the detected tag.
    pub fn pose(&self) -> Option<&Pose> {
        match self {
            Self::Detected(detection) => Some(&detection.pose),
            Self::NotFound => None,
        }
    }

    /// Consumes the outcome, returning the detection if any.
    pub fn into_detection(self) -> Option<Detection> {
        match self {
            Self::Detected(detection) => Some(detection),
            Self::NotFound => None,
        }
    }
}
