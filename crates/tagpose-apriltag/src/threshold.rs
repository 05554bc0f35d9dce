use crate::{errors::AprilTagError, utils::Pixel};
use tagpose_image::{Image, ImageSize};

/// Per-tile grayscale extrema used by [`adaptive_threshold`].
///
/// The buffers are sized once for an image size and reused between frames.
#[derive(Debug, Clone, PartialEq)]
pub struct TileMinMax {
    img_size: ImageSize,
    tile_size: usize,
    tiles_x: usize,
    tiles_y: usize,
    min: Vec<u8>,
    max: Vec<u8>,
    neighbor_min: Vec<u8>,
    neighbor_max: Vec<u8>,
}

impl TileMinMax {
    /// Creates the tile buffers for images of `img_size` split into `tile_size` squares.
    ///
    /// Partial tiles at the right and bottom edges are kept as their own tiles.
    pub fn new(img_size: ImageSize, tile_size: usize) -> Self {
        let tile_size = tile_size.max(1);
        let tiles_x = img_size.width.div_ceil(tile_size);
        let tiles_y = img_size.height.div_ceil(tile_size);
        let len = tiles_x * tiles_y;

        Self {
            img_size,
            tile_size,
            tiles_x,
            tiles_y,
            min: vec![0; len],
            max: vec![0; len],
            neighbor_min: vec![0; len],
            neighbor_max: vec![0; len],
        }
    }

    /// Returns the tile side length in pixels.
    pub fn tile_size(&self) -> usize {
        self.tile_size
    }

    /// Returns the number of tiles along x and y.
    pub fn tiles(&self) -> (usize, usize) {
        (self.tiles_x, self.tiles_y)
    }

    fn compute_extrema(&mut self, src: &Image<u8, 1>) {
        self.min.fill(u8::MAX);
        self.max.fill(u8::MIN);

        let width = src.width();
        src.as_slice()
            .chunks_exact(width)
            .enumerate()
            .for_each(|(y, row)| {
                let tile_row = (y / self.tile_size) * self.tiles_x;
                row.chunks(self.tile_size)
                    .enumerate()
                    .for_each(|(tx, tile_px)| {
                        let idx = tile_row + tx;
                        tile_px.iter().for_each(|&v| {
                            self.min[idx] = self.min[idx].min(v);
                            self.max[idx] = self.max[idx].max(v);
                        });
                    });
            });

        // widen each tile's range with its 3x3 neighborhood so that
        // edges falling on tile boundaries are still classified
        (0..self.tiles_y).for_each(|ty| {
            (0..self.tiles_x).for_each(|tx| {
                let mut lo = u8::MAX;
                let mut hi = u8::MIN;

                (ty.saturating_sub(1)..(ty + 2).min(self.tiles_y)).for_each(|ny| {
                    (tx.saturating_sub(1)..(tx + 2).min(self.tiles_x)).for_each(|nx| {
                        let idx = ny * self.tiles_x + nx;
                        lo = lo.min(self.min[idx]);
                        hi = hi.max(self.max[idx]);
                    });
                });

                let idx = ty * self.tiles_x + tx;
                self.neighbor_min[idx] = lo;
                self.neighbor_max[idx] = hi;
            });
        });
    }
}

/// Binarizes a grayscale image with a tile based adaptive threshold.
///
/// Each pixel is compared against the midpoint of the extrema of its tile neighborhood.
/// Neighborhoods whose contrast is below `min_white_black_difference` are marked as
/// [`Pixel::Skip`] since no edge can be located reliably there.
///
/// # Arguments
///
/// * `src` - The grayscale source image.
/// * `dst` - The binarized output image, same size as `src`.
/// * `tile_min_max` - Reusable tile buffers created for `src.size()`.
/// * `min_white_black_difference` - Minimum contrast required to classify a pixel.
pub fn adaptive_threshold(
    src: &Image<u8, 1>,
    dst: &mut Image<Pixel, 1>,
    tile_min_max: &mut TileMinMax,
    min_white_black_difference: u8,
) -> Result<(), AprilTagError> {
    if src.size() != dst.size() || src.size() != tile_min_max.img_size {
        return Err(AprilTagError::ImageSizeMismatch {
            expected: tile_min_max.img_size,
            actual: src.size(),
        });
    }

    if src.width() < tile_min_max.tile_size || src.height() < tile_min_max.tile_size {
        return Err(AprilTagError::InvalidImageSize(tile_min_max.tile_size));
    }

    tile_min_max.compute_extrema(src);

    let width = src.width();
    let tile_size = tile_min_max.tile_size;
    let tiles_x = tile_min_max.tiles_x;

    src.as_slice()
        .chunks_exact(width)
        .zip(dst.as_slice_mut().chunks_exact_mut(width))
        .enumerate()
        .for_each(|(y, (src_row, dst_row))| {
            let tile_row = (y / tile_size) * tiles_x;

            src_row
                .iter()
                .zip(dst_row.iter_mut())
                .enumerate()
                .for_each(|(x, (&v, out))| {
                    let idx = tile_row + x / tile_size;
                    let lo = tile_min_max.neighbor_min[idx];
                    let hi = tile_min_max.neighbor_max[idx];

                    *out = if hi - lo < min_white_black_difference {
                        Pixel::Skip
                    } else if v > lo + (hi - lo) / 2 {
                        Pixel::White
                    } else {
                        Pixel::Black
                    };
                });
        });

    Ok(())
}
