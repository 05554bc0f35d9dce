use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    error::DetectorError,
    types::{Pose, RotationMatrix, Translation},
};

/// Unit quaternion as stored in field layout files.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    /// Scalar part.
    #[serde(rename = "W")]
    pub w: f64,
    /// First vector component.
    #[serde(rename = "X")]
    pub x: f64,
    /// Second vector component.
    #[serde(rename = "Y")]
    pub y: f64,
    /// Third vector component.
    #[serde(rename = "Z")]
    pub z: f64,
}

impl Quaternion {
    /// Returns the quaternion as `[w, x, y, z]`.
    pub fn to_array(self) -> [f64; 4] {
        [self.w, self.x, self.y, self.z]
    }

    fn from_array(q: [f64; 4]) -> Self {
        Self {
            w: q[0],
            x: q[1],
            y: q[2],
            z: q[3],
        }
    }
}

/// Orientation entry of a field pose.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldRotation {
    /// The orientation as a quaternion.
    pub quaternion: Quaternion,
}

/// A pose in the field frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldPose {
    /// Position in meters.
    pub translation: Translation,
    /// Orientation.
    pub rotation: FieldRotation,
}

impl FieldPose {
    /// Creates a pose from a translation and a rotation matrix.
    pub fn new(translation: Translation, rotation: &RotationMatrix) -> Self {
        Self {
            translation,
            rotation: FieldRotation {
                quaternion: Quaternion::from_array(rotation.to_quaternion()),
            },
        }
    }

    /// The orientation as a rotation matrix.
    pub fn rotation_matrix(&self) -> RotationMatrix {
        RotationMatrix::from_quaternion(self.rotation.quaternion.to_array())
    }
}

/// A tag placed on the field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldTag {
    /// Tag id.
    #[serde(rename = "ID")]
    pub id: u32,
    /// Pose of the tag in the field frame.
    pub pose: FieldPose,
}

/// Size of the field in meters.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FieldDimensions {
    /// Extent along the field x axis.
    pub length: f64,
    /// Extent along the field y axis.
    pub width: f64,
}

/// Known tag poses on a field.
///
/// Tag orientations follow the common field layout convention: the tag x axis
/// points out of the tag face and z points up. Detected poses use x right,
/// y down and z into the tag, see [`DETECTION_TO_FIELD_TAG`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldLayout {
    /// The tags on the field.
    pub tags: Vec<FieldTag>,
    /// Field dimensions.
    pub field: FieldDimensions,
}

/// Rotation from the detection tag frame to the field layout tag frame.
pub const DETECTION_TO_FIELD_TAG: RotationMatrix =
    RotationMatrix([[0.0, 0.0, -1.0], [1.0, 0.0, 0.0], [0.0, -1.0, 0.0]]);

impl FieldLayout {
    /// Parses a layout from JSON.
    pub fn from_json_str(json: &str) -> Result<Self, DetectorError> {
        serde_json::from_str(json).map_err(DetectorError::FieldLayout)
    }

    /// Loads a layout from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, DetectorError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| DetectorError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let layout = Self::from_json_str(&raw)?;
        log::debug!("loaded {} field tags from {}", layout.len(), path.display());
        Ok(layout)
    }

    /// Looks up a tag by id.
    pub fn tag(&self, id: u32) -> Option<&FieldTag> {
        self.tags.iter().find(|t| t.id == id)
    }

    /// Number of tags.
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// Whether the layout has no tags.
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Locates the camera on the field from the detected pose of tag `tag_id`.
    ///
    /// The returned rotation maps camera axes (x right, y down, z forward) to
    /// field axes.
    ///
    /// # Returns
    ///
    /// `None` when the tag is not in the layout or the pose has no rotation.
    pub fn camera_pose(&self, tag_id: u32, pose: &Pose) -> Option<FieldPose> {
        let tag = self.tag(tag_id)?;
        let cam_from_tag = pose.rotation()?;

        // tag from camera
        let tag_from_cam = cam_from_tag.transpose();
        let cam_in_tag = -tag_from_cam.mul_vec(pose.translation());

        let field_from_tag = tag.pose.rotation_matrix().mul(&DETECTION_TO_FIELD_TAG);
        let rotation = field_from_tag.mul(&tag_from_cam);
        let translation = field_from_tag.mul_vec(cam_in_tag) + tag.pose.translation;

        Some(FieldPose::new(translation, &rotation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const LAYOUT: &str = r#"{
        "tags": [
            {
                "ID": 1,
                "pose": {
                    "translation": { "x": 0.0, "y": 0.0, "z": 1.0 },
                    "rotation": { "quaternion": { "W": 1.0, "X": 0.0, "Y": 0.0, "Z": 0.0 } }
                }
            },
            {
                "ID": 7,
                "pose": {
                    "translation": { "x": 16.0, "y": 4.0, "z": 1.5 },
                    "rotation": { "quaternion": { "W": 0.0, "X": 0.0, "Y": 0.0, "Z": 1.0 } }
                }
            }
        ],
        "field": { "length": 16.541, "width": 8.211 }
    }"#;

    #[test]
    fn test_parse_layout() -> Result<(), Box<dyn std::error::Error>> {
        let layout = FieldLayout::from_json_str(LAYOUT)?;
        assert_eq!(layout.len(), 2);
        assert!(!layout.is_empty());
        assert_eq!(layout.field.length, 16.541);
        assert_eq!(layout.tag(7).map(|t| t.pose.translation.x), Some(16.0));
        assert!(layout.tag(3).is_none());

        assert!(matches!(
            FieldLayout::from_json_str(r#"{ "tags": [ { "id": 1 } ] }"#),
            Err(DetectorError::FieldLayout(_))
        ));

        Ok(())
    }

    #[test]
    fn test_layout_from_file() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("field.json");
        std::fs::write(&path, LAYOUT)?;

        let layout = FieldLayout::from_file(&path)?;
        assert_eq!(layout, FieldLayout::from_json_str(LAYOUT)?);

        Ok(())
    }

    #[test]
    fn test_camera_facing_tag() -> Result<(), Box<dyn std::error::Error>> {
        let layout = FieldLayout::from_json_str(LAYOUT)?;

        // tag 1 two meters straight ahead
        let pose = Pose::TranslationAndRotation {
            translation: Translation::new(0.0, 0.0, 2.0),
            rotation: RotationMatrix::identity(),
        };
        let camera = layout.camera_pose(1, &pose).ok_or("no pose")?;

        assert_relative_eq!(camera.translation.x, 2.0, epsilon = 1e-12);
        assert_relative_eq!(camera.translation.y, 0.0, epsilon = 1e-12);
        assert_relative_eq!(camera.translation.z, 1.0, epsilon = 1e-12);

        // the optical axis looks back along the field x axis
        let r = camera.rotation_matrix();
        let forward = r.mul_vec(Translation::new(0.0, 0.0, 1.0));
        assert_relative_eq!(forward.x, -1.0, epsilon = 1e-9);

        // tag 7 is turned half around, so the camera sits on the -x side of it
        let camera = layout.camera_pose(7, &pose).ok_or("no pose")?;
        assert_relative_eq!(camera.translation.x, 14.0, epsilon = 1e-9);
        assert_relative_eq!(camera.translation.y, 4.0, epsilon = 1e-9);

        Ok(())
    }

    #[test]
    fn test_camera_pose_requires_rotation() -> Result<(), Box<dyn std::error::Error>> {
        let layout = FieldLayout::from_json_str(LAYOUT)?;
        let pose = Pose::Translation(Translation::new(0.0, 0.0, 2.0));
        assert!(layout.camera_pose(1, &pose).is_none());

        let full = Pose::TranslationAndRotation {
            translation: Translation::new(0.0, 0.0, 2.0),
            rotation: RotationMatrix::identity(),
        };
        assert!(layout.camera_pose(99, &full).is_none());

        Ok(())
    }
}
