use glam::{Mat3, Vec2};
use tagpose_image::Image;

use crate::errors::AprilTagError;

/// Represents a pixel of the binarized image that can be white, black, or skipped.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Pixel {
    /// A white pixel.
    White = 255,
    /// A black pixel.
    Black = 0,
    /// A pixel without enough local contrast to be classified.
    #[default]
    Skip = 127,
}

impl Pixel {
    /// Returns the numeric value of the pixel.
    #[inline]
    pub fn value(&self) -> u8 {
        *self as u8
    }

    /// Returns `true` when the two pixels are one black and one white.
    #[inline]
    pub fn is_opposite(&self, other: &Pixel) -> bool {
        self.value() as u16 + other.value() as u16 == 255
    }
}

/// A 2D point with integer coordinates.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Point2d<T = usize> {
    /// The x coordinate.
    pub x: T,
    /// The y coordinate.
    pub y: T,
}

/// Computes the homography mapping four source points onto four destination points.
///
/// Each correspondence is `[x, y, u, v]` with `(x, y)` the source and `(u, v)` the destination.
/// The 8x8 system is solved with Gaussian elimination and partial pivoting, fixing `h22 = 1`.
///
/// # Returns
///
/// `None` if the correspondences are degenerate.
pub fn homography_compute(corr: [[f32; 4]; 4]) -> Option<Mat3> {
    let mut a = [[0.0f64; 9]; 8];

    corr.into_iter().enumerate().for_each(|(i, c)| {
        let [x, y, u, v] = c.map(f64::from);
        a[2 * i] = [x, y, 1.0, 0.0, 0.0, 0.0, -x * u, -y * u, u];
        a[2 * i + 1] = [0.0, 0.0, 0.0, x, y, 1.0, -x * v, -y * v, v];
    });

    for col in 0..8 {
        let pivot = (col..8).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < 1e-10 {
            return None;
        }
        a.swap(col, pivot);

        for row in (col + 1)..8 {
            let f = a[row][col] / a[col][col];
            for k in col..9 {
                a[row][k] -= f * a[col][k];
            }
        }
    }

    let mut h = [0.0f64; 8];
    for col in (0..8).rev() {
        let mut acc = a[col][8];
        for k in (col + 1)..8 {
            acc -= a[col][k] * h[k];
        }
        h[col] = acc / a[col][col];
    }

    let h = h.map(|v| v as f32);

    // column-major
    Some(Mat3::from_cols_array(&[
        h[0], h[3], h[6], //
        h[1], h[4], h[7], //
        h[2], h[5], 1.0,
    ]))
}

/// Projects `(x, y)` through the homography `h`.
#[inline]
pub fn homography_project(h: &Mat3, x: f32, y: f32) -> Vec2 {
    let p = *h * glam::Vec3::new(x, y, 1.0);
    Vec2::new(p.x / p.z, p.y / p.z)
}

/// Bilinearly samples the image at `p`, where pixel `(i, j)` covers `[i, i+1) x [j, j+1)`.
///
/// Returns `None` when any of the four neighbors falls outside the image.
pub fn value_for_pixel(src: &Image<u8, 1>, p: Vec2) -> Option<f32> {
    let x = p.x - 0.5;
    let y = p.y - 0.5;

    let x1 = x.floor();
    let y1 = y.floor();

    if x1 < 0.0 || y1 < 0.0 {
        return None;
    }

    let (x1i, y1i) = (x1 as usize, y1 as usize);
    let x2i = x.ceil() as usize;
    let y2i = y.ceil() as usize;

    if x2i >= src.width() || y2i >= src.height() {
        return None;
    }

    let a = x - x1;
    let b = y - y1;
    let data = src.as_slice();
    let w = src.width();

    Some(
        data[y1i * w + x1i] as f32 * (1.0 - a) * (1.0 - b)
            + data[y1i * w + x2i] as f32 * a * (1.0 - b)
            + data[y2i * w + x1i] as f32 * (1.0 - a) * b
            + data[y2i * w + x2i] as f32 * a * b,
    )
}

/// Downscales `src` into `dst` by keeping every `factor`-th pixel.
///
/// `dst` must be `src.size() / factor` (floored) on both axes.
pub fn decimate(
    src: &Image<u8, 1>,
    dst: &mut Image<u8, 1>,
    factor: usize,
) -> Result<(), AprilTagError> {
    if dst.width() != src.width() / factor || dst.height() != src.height() / factor {
        return Err(tagpose_image::ImageError::InvalidImageSize(
            src.width() / factor,
            src.height() / factor,
            dst.width(),
            dst.height(),
        )
        .into());
    }

    let src_width = src.width();
    let src_data = src.as_slice();
    let dst_width = dst.width();
    if dst_width == 0 {
        return Ok(());
    }

    dst.as_slice_mut()
        .chunks_exact_mut(dst_width)
        .enumerate()
        .for_each(|(y, row)| {
            let src_row = &src_data[y * factor * src_width..];
            row.iter_mut()
                .enumerate()
                .for_each(|(x, px)| *px = src_row[x * factor]);
        });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_pixel_opposite() {
        assert!(Pixel::White.is_opposite(&Pixel::Black));
        assert!(Pixel::Black.is_opposite(&Pixel::White));
        assert!(!Pixel::Skip.is_opposite(&Pixel::White));
        assert!(!Pixel::Black.is_opposite(&Pixel::Black));
    }

    #[test]
    fn test_homography_compute() -> Result<(), Box<dyn std::error::Error>> {
        let corr = [
            [-1.0, -1.0, 10.0, 20.0],
            [1.0, -1.0, 50.0, 22.0],
            [1.0, 1.0, 48.0, 60.0],
            [-1.0, 1.0, 12.0, 58.0],
        ];
        let h = homography_compute(corr).ok_or("degenerate")?;

        for c in corr {
            let p = homography_project(&h, c[0], c[1]);
            assert_relative_eq!(p.x, c[2], epsilon = 1e-3);
            assert_relative_eq!(p.y, c[3], epsilon = 1e-3);
        }

        Ok(())
    }

    #[test]
    fn test_homography_degenerate() {
        let corr = [[0.0, 0.0, 1.0, 1.0]; 4];
        assert!(homography_compute(corr).is_none());
    }

    #[test]
    fn test_value_for_pixel() -> Result<(), Box<dyn std::error::Error>> {
        let img = Image::<u8, 1>::new([2, 2].into(), vec![0, 100, 100, 200])?;

        assert_eq!(value_for_pixel(&img, Vec2::new(0.5, 0.5)), Some(0.0));
        assert_eq!(value_for_pixel(&img, Vec2::new(1.0, 1.0)), Some(100.0));
        assert_eq!(value_for_pixel(&img, Vec2::new(0.2, 0.5)), None);
        assert_eq!(value_for_pixel(&img, Vec2::new(1.6, 1.0)), None);

        Ok(())
    }

    #[test]
    fn test_decimate() -> Result<(), Box<dyn std::error::Error>> {
        let src = Image::<u8, 1>::new([5, 4].into(), (0..20).collect())?;
        let mut dst = Image::<u8, 1>::from_size_val([2, 2].into(), 0)?;
        decimate(&src, &mut dst, 2)?;
        assert_eq!(dst.as_slice(), &[0, 2, 10, 12]);

        let mut wrong = Image::<u8, 1>::from_size_val([3, 2].into(), 0)?;
        assert!(decimate(&src, &mut wrong, 2).is_err());

        Ok(())
    }
}
