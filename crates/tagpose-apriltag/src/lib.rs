#![deny(missing_docs)]
//! # AprilTag detection
//!
//! Detects and decodes AprilTag fiducial markers in grayscale images.
//!
//! ```
//! use tagpose_apriltag::{family::TagFamilyKind, AprilTagDecoder, DecodeTagsConfig};
//!
//! let config = DecodeTagsConfig::new(vec![TagFamilyKind::Tag16H5]);
//! let mut decoder = AprilTagDecoder::new(config, [64, 64].into()).unwrap();
//! let img = tagpose_image::Image::<u8, 1>::from_size_val([64, 64].into(), 200).unwrap();
//! assert!(decoder.decode(&img).unwrap().is_empty());
//! ```

use tagpose_image::{Image, ImageSize};

use crate::{
    decoder::{decode_tags, DecodeOptions, FamilyDecoder},
    errors::AprilTagError,
    family::{TagFamily, TagFamilyKind},
    quad::{fit_quads, FitQuadConfig, QuadSearch},
    segmentation::{find_connected_components, find_gradient_clusters, Clusters},
    threshold::{adaptive_threshold, TileMinMax},
    union_find::UnionFind,
    utils::{decimate, Pixel},
};

/// Error types for AprilTag detection.
pub mod errors;

/// Pixel types, homographies and sampling helpers.
pub mod utils;

/// Adaptive thresholding.
pub mod threshold;

/// Union-find used to label connected components.
pub mod union_find;

/// Connected components and boundary clusters.
pub mod segmentation;

/// Tag family definitions and code lookup.
pub mod family;

/// Quad fitting.
pub mod quad;

/// Edge refinement and bit decoding.
pub mod decoder;

/// Synthetic tag rendering.
pub mod render;

pub use decoder::Detection;

/// Side length of the threshold tiles in pixels.
const TILE_SIZE: usize = 4;

/// Configuration for decoding AprilTags.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeTagsConfig {
    /// Tag families to detect.
    pub tag_families: Vec<TagFamilyKind>,
    /// Configuration for quad fitting.
    pub fit_quad_config: FitQuadConfig,
    /// Whether to refine edges on the full resolution image before decoding.
    pub refine_edges_enabled: bool,
    /// Sharpening factor applied to the sampled bits.
    pub decode_sharpening: f32,
    /// Minimum difference between white and black pixels for thresholding.
    pub min_white_black_difference: u8,
    /// Factor the image is downscaled by before quad detection; `1` disables it.
    pub downscale_factor: usize,
    /// Maximum number of bit errors corrected while decoding, at most 3.
    pub max_hamming: u8,
}

impl DecodeTagsConfig {
    /// Creates a configuration for the given families with default settings.
    pub fn new(tag_families: Vec<TagFamilyKind>) -> Self {
        Self {
            tag_families,
            fit_quad_config: FitQuadConfig::default(),
            refine_edges_enabled: true,
            decode_sharpening: 0.25,
            min_white_black_difference: 5,
            downscale_factor: 2,
            max_hamming: 1,
        }
    }

    /// Creates a configuration for all built-in families.
    pub fn all() -> Self {
        Self::new(TagFamilyKind::all())
    }

    /// Adds a tag family.
    pub fn add(&mut self, family: TagFamilyKind) {
        self.tag_families.push(family);
    }

    /// Sets the downscale factor.
    pub fn with_downscale_factor(mut self, downscale_factor: usize) -> Self {
        self.downscale_factor = downscale_factor.max(1);
        self
    }

    /// Sets the maximum number of corrected bits.
    pub fn with_max_hamming(mut self, max_hamming: u8) -> Self {
        self.max_hamming = max_hamming;
        self
    }
}

/// Decoder for AprilTag detection and decoding.
///
/// All buffers are allocated for one image size and reused between calls.
pub struct AprilTagDecoder {
    config: DecodeTagsConfig,
    img_size: ImageSize,
    downscale_img: Option<Image<u8, 1>>,
    bin_img: Image<Pixel, 1>,
    tile_min_max: TileMinMax,
    uf: UnionFind,
    clusters: Clusters,
    families: Vec<FamilyDecoder>,
    search: QuadSearch,
}

impl AprilTagDecoder {
    /// Creates a new `AprilTagDecoder` for images of `img_size`.
    ///
    /// # Arguments
    ///
    /// * `config` - The configuration for decoding AprilTags.
    /// * `img_size` - The size of the images to be processed.
    ///
    /// # Returns
    ///
    /// The decoder, or an error if a family is invalid or the image is too small.
    pub fn new(config: DecodeTagsConfig, img_size: ImageSize) -> Result<Self, AprilTagError> {
        if config.tag_families.is_empty() {
            return Err(AprilTagError::InvalidFamily("no tag families configured".to_string()));
        }

        let factor = config.downscale_factor.max(1);
        let work_size = ImageSize {
            width: img_size.width / factor,
            height: img_size.height / factor,
        };

        if work_size.width < TILE_SIZE || work_size.height < TILE_SIZE {
            return Err(AprilTagError::InvalidImageSize(TILE_SIZE * factor));
        }

        let families = config
            .tag_families
            .iter()
            .map(|kind| FamilyDecoder::new(kind.clone(), config.max_hamming))
            .collect::<Result<Vec<_>, _>>()?;

        let min_tag_width = families
            .iter()
            .map(|f| f.family().width_at_border)
            .min()
            .unwrap_or(TILE_SIZE);

        let search = QuadSearch {
            min_tag_width: (min_tag_width / factor).max(3),
            normal_border: families.iter().any(|f| !f.family().reversed_border),
            reversed_border: families.iter().any(|f| f.family().reversed_border),
            downscale_factor: factor,
        };

        let downscale_img = if factor > 1 {
            Some(Image::from_size_val(work_size, 0)?)
        } else {
            None
        };

        log::debug!(
            "apriltag decoder for {img_size} (working size {work_size}), families: {:?}",
            config.tag_families.iter().map(|k| k.name()).collect::<Vec<_>>()
        );

        Ok(Self {
            config,
            img_size,
            downscale_img,
            bin_img: Image::from_size_val(work_size, Pixel::Skip)?,
            tile_min_max: TileMinMax::new(work_size, TILE_SIZE),
            uf: UnionFind::new(work_size.area()),
            clusters: Clusters::new(),
            families,
            search,
        })
    }

    /// Returns a reference to the decoder configuration.
    #[inline]
    pub fn config(&self) -> &DecodeTagsConfig {
        &self.config
    }

    /// Returns the image size the decoder was built for.
    #[inline]
    pub fn img_size(&self) -> ImageSize {
        self.img_size
    }

    /// Returns the tag families configured for detection.
    pub fn tag_families(&self) -> Vec<&TagFamily> {
        self.families.iter().map(|f| f.family()).collect()
    }

    /// Decodes AprilTags from the provided grayscale image.
    ///
    /// # Arguments
    ///
    /// * `src` - The source grayscale image, of the size the decoder was built for.
    ///
    /// # Returns
    ///
    /// The detected tags.
    pub fn decode(&mut self, src: &Image<u8, 1>) -> Result<Vec<Detection>, AprilTagError> {
        if src.size() != self.img_size {
            return Err(AprilTagError::ImageSizeMismatch {
                expected: self.img_size,
                actual: src.size(),
            });
        }

        self.clear();

        let work_img = match self.downscale_img.as_mut() {
            Some(downscale_img) => {
                decimate(src, downscale_img, self.search.downscale_factor)?;
                &*downscale_img
            }
            None => src,
        };

        adaptive_threshold(
            work_img,
            &mut self.bin_img,
            &mut self.tile_min_max,
            self.config.min_white_black_difference,
        )?;

        find_connected_components(&self.bin_img, &mut self.uf)?;
        find_gradient_clusters(&self.bin_img, &mut self.uf, &mut self.clusters);

        let mut quads = fit_quads(
            work_img,
            &mut self.clusters,
            &self.config.fit_quad_config,
            &self.search,
        );

        let options = DecodeOptions {
            refine_edges: self.config.refine_edges_enabled,
            decode_sharpening: self.config.decode_sharpening,
            downscale_factor: self.search.downscale_factor,
        };

        let detections = decode_tags(src, &mut quads, &mut self.families, &options);

        log::debug!(
            "{} clusters, {} quads, {} detections",
            self.clusters.len(),
            quads.len(),
            detections.len()
        );

        Ok(detections)
    }

    /// Clears the per-frame state. [`AprilTagDecoder::decode`] calls it before each frame.
    pub fn clear(&mut self) {
        self.uf.reset();
        self.clusters.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::render_tag;

    fn padded(img: &Image<u8, 1>, pad: usize) -> Result<Image<u8, 1>, AprilTagError> {
        let side = img.width() + 2 * pad;
        let mut data = vec![255u8; side * side];
        img.as_slice()
            .chunks_exact(img.width())
            .enumerate()
            .for_each(|(y, row)| {
                let start = (y + pad) * side + pad;
                data[start..start + row.len()].copy_from_slice(row);
            });
        Ok(Image::new([side, side].into(), data)?)
    }

    #[test]
    fn test_decode_rendered_tags() -> Result<(), Box<dyn std::error::Error>> {
        for kind in TagFamilyKind::all() {
            let family = kind.to_family();
            let ids = [0, 5, family.codes.len() - 1];

            for id in ids {
                let img = padded(&render_tag(&family, id, 8)?, 16)?;
                let config = DecodeTagsConfig::new(vec![kind.clone()]);
                let mut decoder = AprilTagDecoder::new(config, img.size())?;

                let detections = decoder.decode(&img)?;
                assert_eq!(detections.len(), 1, "{} id {id}", family.name);

                let det = &detections[0];
                assert_eq!(det.id as usize, id);
                assert_eq!(det.hamming, 0);
                assert_eq!(det.family, kind);

                // the border square starts one cell into the tag
                let lo = 16.0 + 8.0;
                let hi = lo + 8.0 * family.width_at_border as f32;
                let expected = [(lo, hi), (hi, hi), (hi, lo), (lo, lo)];
                for (corner, (ex, ey)) in det.corners.iter().zip(expected) {
                    assert!((corner.x - ex).abs() < 0.5, "{corner:?} vs ({ex}, {ey})");
                    assert!((corner.y - ey).abs() < 0.5, "{corner:?} vs ({ex}, {ey})");
                }

                let mid = (lo + hi) / 2.0;
                assert!((det.center.x - mid).abs() < 0.5);
                assert!((det.center.y - mid).abs() < 0.5);
            }
        }

        Ok(())
    }

    #[test]
    fn test_decode_reuses_buffers() -> Result<(), Box<dyn std::error::Error>> {
        let family = TagFamily::tag16h5();
        let img = padded(&render_tag(&family, 11, 6)?, 10)?;
        let mut decoder = AprilTagDecoder::new(DecodeTagsConfig::new(vec![TagFamilyKind::Tag16H5]), img.size())?;

        for _ in 0..3 {
            let detections = decoder.decode(&img)?;
            assert_eq!(detections.len(), 1);
            assert_eq!(detections[0].id, 11);
        }

        Ok(())
    }

    #[test]
    fn test_decoder_errors() -> Result<(), Box<dyn std::error::Error>> {
        let config = DecodeTagsConfig::new(vec![TagFamilyKind::Tag16H5]);

        assert!(matches!(
            AprilTagDecoder::new(config.clone(), [6, 6].into()),
            Err(AprilTagError::InvalidImageSize(8))
        ));
        assert!(matches!(
            AprilTagDecoder::new(DecodeTagsConfig::new(vec![]), [64, 64].into()),
            Err(AprilTagError::InvalidFamily(_))
        ));

        let mut decoder = AprilTagDecoder::new(config, [64, 64].into())?;
        let wrong = Image::<u8, 1>::from_size_val([32, 32].into(), 0)?;
        assert!(matches!(
            decoder.decode(&wrong),
            Err(AprilTagError::ImageSizeMismatch { .. })
        ));

        Ok(())
    }
}
