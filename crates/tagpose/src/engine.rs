use tagpose_apriltag::{family::TagFamilyKind, AprilTagDecoder, DecodeTagsConfig};
use tagpose_image::{color::gray_from_rgb_u8, Image};
use tagpose_pnp::SquarePose;

use crate::{
    config::DetectorConfig,
    error::{DetectorError, EngineError},
    types::CameraParams,
};

/// The requested tag as found by an engine, with its pose in the camera frame.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineDetection {
    /// Image corners counter-clockwise from the tag's bottom-left.
    pub corners: [[f32; 2]; 4],
    /// Image position of the tag center.
    pub center: [f32; 2],
    /// Detection confidence.
    pub decision_margin: f32,
    /// Number of corrected bits.
    pub hamming: u8,
    /// Row-major rotation mapping tag axes to camera axes.
    pub rotation: [[f64; 3]; 3],
    /// Tag center in the camera frame, in meters.
    pub translation: [f64; 3],
    /// RMS reprojection error of the corners in pixels.
    pub reprojection_rmse: f64,
}

/// A marker detection and pose estimation backend.
///
/// The detector owns its engine on a single worker thread, so implementations
/// need not be reentrant.
pub trait VisionEngine: Send + 'static {
    /// Looks for the tag `tag_id` in `image`.
    ///
    /// # Returns
    ///
    /// `Ok(None)` when the tag is not in the image.
    fn detect(
        &mut self,
        image: &Image<u8, 3>,
        camera: &CameraParams,
        tag_id: u32,
    ) -> Result<Option<EngineDetection>, EngineError>;
}

impl<F> VisionEngine for F
where
    F: FnMut(&Image<u8, 3>, &CameraParams, u32) -> Result<Option<EngineDetection>, EngineError>
        + Send
        + 'static,
{
    fn detect(
        &mut self,
        image: &Image<u8, 3>,
        camera: &CameraParams,
        tag_id: u32,
    ) -> Result<Option<EngineDetection>, EngineError> {
        self(image, camera, tag_id)
    }
}

/// The default engine: AprilTag decoding followed by a square marker pose solve.
///
/// The decoder and the grayscale buffer are kept between calls and rebuilt
/// only when the image size changes.
pub struct AprilTagEngine {
    config: DecodeTagsConfig,
    tag_size: f64,
    min_decision_margin: f32,
    max_reprojection_rmse: f64,
    decoder: Option<AprilTagDecoder>,
    gray: Option<Image<u8, 1>>,
}

impl AprilTagEngine {
    /// Creates an engine for one family and a tag of `tag_size` meters.
    pub fn new(family: TagFamilyKind, tag_size: f64) -> Result<Self, EngineError> {
        if !(tag_size.is_finite() && tag_size > 0.0) {
            return Err(EngineError::InvalidTagSize(tag_size));
        }

        Ok(Self {
            config: DecodeTagsConfig::new(vec![family]),
            tag_size,
            min_decision_margin: 0.0,
            max_reprojection_rmse: f64::INFINITY,
            decoder: None,
            gray: None,
        })
    }

    /// Creates the engine described by a detector configuration.
    pub fn from_config(config: &DetectorConfig) -> Result<Self, DetectorError> {
        config.validate()?;

        let mut engine = Self::new(config.family_kind()?, config.tag_size)?;
        engine.config = engine
            .config
            .with_downscale_factor(config.decimate)
            .with_max_hamming(config.max_hamming);
        engine.config.refine_edges_enabled = config.refine_edges;
        engine.min_decision_margin = config.min_decision_margin;
        engine.max_reprojection_rmse = config.max_reprojection_rmse;

        Ok(engine)
    }

    /// Sets the minimum decision margin for a detection to count.
    pub fn with_min_decision_margin(mut self, min_decision_margin: f32) -> Self {
        self.min_decision_margin = min_decision_margin;
        self
    }

    /// Sets the largest accepted corner reprojection error, in pixels.
    pub fn with_max_reprojection_rmse(mut self, max_reprojection_rmse: f64) -> Self {
        self.max_reprojection_rmse = max_reprojection_rmse;
        self
    }

    /// Returns the decoder configuration.
    pub fn decode_config(&self) -> &DecodeTagsConfig {
        &self.config
    }

    /// Side of the tag in meters.
    pub fn tag_size(&self) -> f64 {
        self.tag_size
    }
}

impl VisionEngine for AprilTagEngine {
    fn detect(
        &mut self,
        image: &Image<u8, 3>,
        camera: &CameraParams,
        tag_id: u32,
    ) -> Result<Option<EngineDetection>, EngineError> {
        let size = image.size();

        let mut gray = match self.gray.take() {
            Some(gray) if gray.size() == size => gray,
            _ => Image::from_size_val(size, 0)?,
        };
        gray_from_rgb_u8(image, &mut gray)?;

        if self.decoder.as_ref().map(|d| d.img_size()) != Some(size) {
            log::debug!("building apriltag decoder for {size}");
            self.decoder = Some(AprilTagDecoder::new(self.config.clone(), size)?);
        }

        let detections = match self.decoder.as_mut() {
            Some(decoder) => decoder.decode(&gray)?,
            None => Vec::new(),
        };
        self.gray = Some(gray);

        let total = detections.len();
        let best = detections
            .into_iter()
            .filter(|d| u32::from(d.id) == tag_id)
            .filter(|d| d.decision_margin >= self.min_decision_margin)
            .max_by(|a, b| a.decision_margin.total_cmp(&b.decision_margin));

        let Some(det) = best else {
            log::debug!("tag {tag_id} not among {total} detections");
            return Ok(None);
        };

        let intrinsics = camera.intrinsics(size);
        let corners = det.corners.map(|c| [c.x as f64, c.y as f64]);
        let pose = SquarePose::solve(&corners, &intrinsics, self.tag_size)?;

        log::debug!(
            "tag {tag_id}: margin {:.1}, t = {:?}, rmse {:.3} px",
            det.decision_margin,
            pose.translation,
            pose.reproj_rmse
        );

        if pose.reproj_rmse.is_nan() || pose.reproj_rmse > self.max_reprojection_rmse {
            return Err(EngineError::Reprojection {
                rmse: pose.reproj_rmse,
                max: self.max_reprojection_rmse,
            });
        }

        Ok(Some(EngineDetection {
            corners: det.corners.map(|c| [c.x, c.y]),
            center: [det.center.x, det.center.y],
            decision_margin: det.decision_margin,
            hamming: det.hamming,
            rotation: pose.rotation,
            translation: pose.translation,
            reprojection_rmse: pose.reproj_rmse,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tagpose_apriltag::render::render_tag;
    use tagpose_image::color::rgb_from_gray_u8;
    use tagpose_pnp::PnPError;

    fn rendered_rgb(kind: &TagFamilyKind, id: usize) -> Result<Image<u8, 3>, Box<dyn std::error::Error>> {
        let tag = render_tag(&kind.to_family(), id, 10)?;
        let side = tag.width() + 40;
        let mut data = vec![255u8; side * side];
        tag.as_slice()
            .chunks_exact(tag.width())
            .enumerate()
            .for_each(|(y, row)| {
                let start = (y + 20) * side + 20;
                data[start..start + row.len()].copy_from_slice(row);
            });
        let gray = Image::new([side, side].into(), data)?;
        let mut rgb = Image::from_size_val(gray.size(), 0)?;
        rgb_from_gray_u8(&gray, &mut rgb)?;
        Ok(rgb)
    }

    #[test]
    fn test_engine_finds_requested_tag() -> Result<(), Box<dyn std::error::Error>> {
        let kind = TagFamilyKind::Tag16H5;
        let img = rendered_rgb(&kind, 6)?;
        let mut engine = AprilTagEngine::new(kind, 0.1)?;
        let camera = CameraParams::new(400.0, 400.0);

        let found = engine.detect(&img, &camera, 6)?.ok_or("tag not found")?;
        assert_eq!(found.hamming, 0);
        assert!(found.translation[2] > 0.0);
        assert!(found.reprojection_rmse < 1.0);

        assert!(engine.detect(&img, &camera, 7)?.is_none());

        Ok(())
    }

    #[test]
    fn test_engine_rebuilds_on_size_change() -> Result<(), Box<dyn std::error::Error>> {
        let kind = TagFamilyKind::Tag25H9;
        let mut engine = AprilTagEngine::new(kind.clone(), 0.1)?;
        let camera = CameraParams::new(400.0, 400.0);

        let small = rendered_rgb(&kind, 1)?;
        let blank = Image::<u8, 3>::from_size_val([320, 240].into(), 200)?;

        assert!(engine.detect(&small, &camera, 1)?.is_some());
        assert!(engine.detect(&blank, &camera, 1)?.is_none());
        assert!(engine.detect(&small, &camera, 1)?.is_some());

        Ok(())
    }

    #[test]
    fn test_engine_errors() -> Result<(), Box<dyn std::error::Error>> {
        assert!(matches!(
            AprilTagEngine::new(TagFamilyKind::Tag16H5, -1.0),
            Err(EngineError::InvalidTagSize(_))
        ));

        let kind = TagFamilyKind::Tag16H5;
        let img = rendered_rgb(&kind, 2)?;
        let mut engine = AprilTagEngine::new(kind, 0.1)?;

        // zero focal length
        let result = engine.detect(&img, &CameraParams::new(0.0, 400.0), 2);
        assert!(matches!(result, Err(EngineError::Pose(_))));

        // mirrored camera
        let result = engine.detect(&img, &CameraParams::new(-1.0, 400.0), 2);
        assert!(matches!(result, Err(EngineError::Pose(PnPError::InvalidIntrinsics(_)))));

        let tiny = Image::<u8, 3>::from_size_val([4, 4].into(), 0)?;
        let result = engine.detect(&tiny, &CameraParams::new(400.0, 400.0), 2);
        assert!(matches!(result, Err(EngineError::AprilTag(_))));

        Ok(())
    }

    #[test]
    fn test_min_decision_margin() -> Result<(), Box<dyn std::error::Error>> {
        let kind = TagFamilyKind::Tag16H5;
        let img = rendered_rgb(&kind, 4)?;
        let mut engine = AprilTagEngine::new(kind, 0.1)?.with_min_decision_margin(1000.0);

        assert!(engine.detect(&img, &CameraParams::new(400.0, 400.0), 4)?.is_none());

        Ok(())
    }

    #[test]
    fn test_reprojection_gate() -> Result<(), Box<dyn std::error::Error>> {
        let kind = TagFamilyKind::Tag16H5;
        let img = rendered_rgb(&kind, 6)?;
        let camera = CameraParams::new(400.0, 400.0);

        let mut engine = AprilTagEngine::new(kind.clone(), 0.1)?.with_max_reprojection_rmse(4.0);
        let found = engine.detect(&img, &camera, 6)?.ok_or("tag not found")?;

        // just below the error of the same solve
        let mut strict = AprilTagEngine::new(kind, 0.1)?
            .with_max_reprojection_rmse(found.reprojection_rmse - 1e-6);
        assert!(matches!(
            strict.detect(&img, &camera, 6),
            Err(EngineError::Reprojection { .. })
        ));

        Ok(())
    }
}
