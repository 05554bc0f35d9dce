use std::{fs, path::Path};

use serde::{Deserialize, Serialize};
use tagpose_apriltag::family::{TagFamily, TagFamilyKind, MAX_CORRECTABLE_HAMMING};

use crate::{
    error::{DetectorError, EngineError},
    types::PoseShape,
};

/// Configuration of a [`crate::Detector`] and its default engine.
///
/// Every field has a default, so a JSON file only needs the fields it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Built-in family name (`tag16h5`, `tag25h9`) or path to a family JSON file.
    pub family: String,
    /// Side of the black tag border in meters.
    pub tag_size: f64,
    /// Factor the image is downscaled by before quad detection.
    pub decimate: usize,
    /// Principal point in pixels; the image center when absent.
    pub principal_point: Option<[f32; 2]>,
    /// Draw the tag outline and axes onto the output image.
    pub annotate: bool,
    /// Attach the output image to successful detections.
    pub return_image: bool,
    /// Maximum number of corrected bits, at most 3.
    pub max_hamming: u8,
    /// Detections below this decision margin are ignored.
    pub min_decision_margin: f32,
    /// Refine quad edges on the full resolution image.
    pub refine_edges: bool,
    /// Poses whose corners reproject further than this, in pixels, are rejected.
    pub max_reprojection_rmse: f64,
    /// Shape of the pose reported for a detection.
    pub pose_shape: PoseShape,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            family: TagFamilyKind::Tag25H9.name().to_string(),
            tag_size: 0.1651,
            decimate: 2,
            principal_point: None,
            annotate: true,
            return_image: true,
            max_hamming: 1,
            min_decision_margin: 10.0,
            refine_edges: true,
            max_reprojection_rmse: 4.0,
            pose_shape: PoseShape::default(),
        }
    }
}

impl DetectorConfig {
    /// Parses a configuration from JSON.
    pub fn from_json_str(json: &str) -> Result<Self, DetectorError> {
        serde_json::from_str(json).map_err(DetectorError::Config)
    }

    /// Loads a configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, DetectorError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| DetectorError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    /// Serializes the configuration as pretty JSON.
    pub fn to_json_string(&self) -> Result<String, DetectorError> {
        serde_json::to_string_pretty(self).map_err(DetectorError::Config)
    }

    /// Sets the tag family.
    pub fn with_family(mut self, family: impl Into<String>) -> Self {
        self.family = family.into();
        self
    }

    /// Sets the tag size in meters.
    pub fn with_tag_size(mut self, tag_size: f64) -> Self {
        self.tag_size = tag_size;
        self
    }

    /// Sets the reported pose shape.
    pub fn with_pose_shape(mut self, pose_shape: PoseShape) -> Self {
        self.pose_shape = pose_shape;
        self
    }

    /// Enables or disables annotation of the output image.
    pub fn with_annotate(mut self, annotate: bool) -> Self {
        self.annotate = annotate;
        self
    }

    /// Sets the principal point.
    pub fn with_principal_point(mut self, principal_point: Option<[f32; 2]>) -> Self {
        self.principal_point = principal_point;
        self
    }

    /// Sets the decimation factor.
    pub fn with_decimate(mut self, decimate: usize) -> Self {
        self.decimate = decimate;
        self
    }

    /// Checks that every value is in range.
    pub fn validate(&self) -> Result<(), DetectorError> {
        if !(self.tag_size.is_finite() && self.tag_size > 0.0) {
            return Err(DetectorError::InvalidConfig(format!(
                "tag_size must be positive, got {}",
                self.tag_size
            )));
        }
        if self.decimate == 0 {
            return Err(DetectorError::InvalidConfig(
                "decimate must be at least 1".to_string(),
            ));
        }
        if !(self.max_reprojection_rmse.is_finite() && self.max_reprojection_rmse > 0.0) {
            return Err(DetectorError::InvalidConfig(format!(
                "max_reprojection_rmse must be positive, got {}",
                self.max_reprojection_rmse
            )));
        }
        if self.max_hamming > MAX_CORRECTABLE_HAMMING {
            return Err(DetectorError::InvalidConfig(format!(
                "max_hamming must be at most {MAX_CORRECTABLE_HAMMING}, got {}",
                self.max_hamming
            )));
        }
        Ok(())
    }

    /// Resolves [`DetectorConfig::family`] to a tag family.
    ///
    /// Built-in names take precedence; anything else is read as a family file.
    pub fn family_kind(&self) -> Result<TagFamilyKind, DetectorError> {
        if let Ok(kind) = self.family.parse::<TagFamilyKind>() {
            return Ok(kind);
        }

        let family = TagFamily::from_json_file(&self.family).map_err(EngineError::from)?;
        log::info!(
            "loaded tag family {} with {} codes from {}",
            family.name,
            family.codes.len(),
            self.family
        );
        Ok(family.into())
    }
}
