use std::{f32::consts::PI, ops::ControlFlow};

use glam::{Mat3, Vec2};
use tagpose_image::Image;

use crate::{
    segmentation::{Clusters, GradientInfo},
    utils::{homography_compute, homography_project},
};

const SLOPE_OFFSET_BASE: f32 = (2 << 15) as f32;

/// Offsets that make the slope key monotonic around the full circle.
const QUADRANTS: [[f32; 2]; 2] = [
    [-SLOPE_OFFSET_BASE, 0.0],
    [2.0 * SLOPE_OFFSET_BASE, SLOPE_OFFSET_BASE],
];

/// Options for fitting quadrilaterals to clusters of boundary points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitQuadConfig {
    /// Cosine of the critical angle; corners sharper or flatter than it are rejected.
    pub cos_critical_rad: f32,
    /// Maximum mean squared error allowed for a fitted edge.
    pub max_line_fit_mse: f32,
    /// Maximum number of corner candidates to consider.
    pub max_nmaxima: usize,
    /// Minimum number of points a cluster needs to be considered.
    pub min_cluster_pixels: usize,
}

impl Default for FitQuadConfig {
    fn default() -> Self {
        Self {
            cos_critical_rad: (10.0 * PI / 180.0).cos(),
            max_line_fit_mse: 10.0,
            max_nmaxima: 10,
            min_cluster_pixels: 5,
        }
    }
}

/// A candidate tag outline.
#[derive(Debug, Clone, PartialEq)]
pub struct Quad {
    /// The four corners in full resolution image coordinates.
    ///
    /// Before decoding they wind clockwise on screen from an arbitrary start.
    /// After decoding they are ordered bottom-left, bottom-right, top-right, top-left
    /// in tag space, i.e. tag coordinates `(-1, 1), (1, 1), (1, -1), (-1, -1)`.
    pub corners: [Vec2; 4],
    /// Whether the border is white on black instead of black on white.
    pub reversed_border: bool,
    /// Homography mapping tag coordinates in `[-1, 1]` to image coordinates.
    pub homography: Mat3,
}

impl Default for Quad {
    fn default() -> Self {
        Self {
            corners: [Vec2::ZERO; 4],
            reversed_border: false,
            homography: Mat3::ZERO,
        }
    }
}

impl Quad {
    /// Projects a point from tag coordinates to image coordinates.
    #[inline]
    pub fn homography_project(&self, x: f32, y: f32) -> Vec2 {
        homography_project(&self.homography, x, y)
    }

    /// Recomputes the homography from the current corners.
    ///
    /// Returns `false` if the corners are degenerate.
    pub fn update_homography(&mut self) -> bool {
        let c = &self.corners;
        let corr = [
            [-1.0, -1.0, c[0].x, c[0].y],
            [1.0, -1.0, c[1].x, c[1].y],
            [1.0, 1.0, c[2].x, c[2].y],
            [-1.0, 1.0, c[3].x, c[3].y],
        ];

        match homography_compute(corr) {
            Some(h) => {
                self.homography = h;
                true
            }
            None => false,
        }
    }

    /// Area of the quad computed as the sum of two triangles.
    pub fn area(&self) -> f32 {
        let c = &self.corners;
        let tri = |a: Vec2, b: Vec2, d: Vec2| 0.5 * ((b - a).perp_dot(d - a)).abs();
        tri(c[0], c[1], c[2]) + tri(c[2], c[3], c[0])
    }
}

/// Parameters shared by every cluster of a frame.
#[derive(Debug, Clone, Copy)]
pub struct QuadSearch {
    /// Minimum black border width in working image pixels.
    pub min_tag_width: usize,
    /// Whether black on white borders are wanted.
    pub normal_border: bool,
    /// Whether white on black borders are wanted.
    pub reversed_border: bool,
    /// Factor the working image was downscaled by.
    pub downscale_factor: usize,
}

/// Fits quadrilaterals to the boundary clusters of a frame.
///
/// # Arguments
///
/// * `src` - The grayscale working image (possibly downscaled), used to weight points.
/// * `clusters` - Boundary clusters from [`find_gradient_clusters`](crate::segmentation::find_gradient_clusters).
/// * `config` - Quad fitting thresholds.
/// * `search` - Frame level search parameters.
///
/// # Returns
///
/// The detected quads, with corners scaled back to full resolution.
pub fn fit_quads(
    src: &Image<u8, 1>,
    clusters: &mut Clusters,
    config: &FitQuadConfig,
    search: &QuadSearch,
) -> Vec<Quad> {
    let max_cluster_len = 8 * (src.width() + src.height());

    let mut quads = Vec::new();

    clusters.values_mut().for_each(|cluster| {
        if cluster.len() < config.min_cluster_pixels || cluster.len() > max_cluster_len {
            return;
        }

        let Some(mut quad) = fit_single_quad(src, cluster, config, search) else {
            return;
        };

        if search.downscale_factor > 1 {
            let factor = search.downscale_factor as f32;
            quad.corners
                .iter_mut()
                .for_each(|c| *c = (*c - 0.5) * factor + 0.5);
        }

        quads.push(quad);
    });

    log::trace!("fitted {} quads from {} clusters", quads.len(), clusters.len());

    quads
}

fn fit_single_quad(
    src: &Image<u8, 1>,
    cluster: &mut [GradientInfo],
    config: &FitQuadConfig,
    search: &QuadSearch,
) -> Option<Quad> {
    if cluster.len() < 24 {
        return None;
    }

    let (mut x_min, mut x_max) = (i32::MAX, i32::MIN);
    let (mut y_min, mut y_max) = (i32::MAX, i32::MIN);
    cluster.iter().for_each(|g| {
        x_min = x_min.min(g.pos.x);
        x_max = x_max.max(g.pos.x);
        y_min = y_min.min(g.pos.y);
        y_max = y_max.max(g.pos.y);
    });

    if ((x_max - x_min) * (y_max - y_min)) < search.min_tag_width as i32 {
        return None;
    }

    // small offsets keep points from sitting exactly on an axis through the center
    let cx = (x_min + x_max) as f32 * 0.5 + 0.05118;
    let cy = (y_min + y_max) as f32 * 0.5 - 0.028581;

    let mut dot = 0.0f32;

    cluster.iter_mut().for_each(|g| {
        let mut dx = g.pos.x as f32 - cx;
        let mut dy = g.pos.y as f32 - cy;

        dot += dx * g.gx as f32 + dy * g.gy as f32;

        let quadrant = QUADRANTS[(dy > 0.0) as usize][(dx > 0.0) as usize];

        if dy < 0.0 {
            dy = -dy;
            dx = -dx;
        }

        if dx < 0.0 {
            let tmp = dx;
            dx = dy;
            dy = -tmp;
        }

        g.slope = quadrant + dy / dx;
    });

    let reversed_border = dot < 0.0;
    if (reversed_border && !search.reversed_border) || (!reversed_border && !search.normal_border) {
        return None;
    }

    cluster.sort_by(|a, b| a.slope.total_cmp(&b.slope));

    let lfps = compute_line_fit_prefix_sums(src, cluster);
    let indices = quad_segment_maxima(&lfps, config)?;

    let mut lines = [[0.0f32; 4]; 4];
    for i in 0..4 {
        let fit = fit_line(&lfps, indices[i], indices[(i + 1) & 3])?;
        if fit.mse > config.max_line_fit_mse {
            return None;
        }
        lines[i] = fit.params;
    }

    let mut quad = Quad {
        reversed_border,
        ..Default::default()
    };

    for i in 0..4 {
        quad.corners[i] = intersect_lines(&lines[i], &lines[(i + 1) & 3])?;
    }

    let min_width = search.min_tag_width as f32;
    if quad.area() < 0.95 * min_width * min_width {
        return None;
    }

    let angles_ok = (0..4).try_for_each(|i| {
        let d1 = quad.corners[(i + 1) & 3] - quad.corners[i];
        let d2 = quad.corners[(i + 2) & 3] - quad.corners[(i + 1) & 3];

        let cos_dtheta = d1.dot(d2) / (d1.length_squared() * d2.length_squared()).sqrt();

        if !(-config.cos_critical_rad..=config.cos_critical_rad).contains(&cos_dtheta)
            || d1.perp_dot(d2) < 0.0
        {
            return ControlFlow::Break(());
        }

        ControlFlow::Continue(())
    });

    if angles_ok.is_break() {
        return None;
    }

    Some(quad)
}

/// Intersects two lines given as `[ex, ey, nx, ny]` (a point and a unit normal).
pub(crate) fn intersect_lines(a: &[f32; 4], b: &[f32; 4]) -> Option<Vec2> {
    let a00 = a[3];
    let a01 = -b[3];
    let a10 = -a[2];
    let a11 = b[2];
    let b0 = -a[0] + b[0];
    let b1 = -a[1] + b[1];

    let det = a00 * a11 - a10 * a01;
    if det.abs() < 0.001 {
        return None;
    }

    let l0 = (a11 * b0 - a01 * b1) / det;

    Some(Vec2::new(a[0] + l0 * a00, a[1] + l0 * a10))
}

/// Prefix sums of the weighted second moments of a sorted cluster.
#[derive(Default, Debug, Clone, Copy)]
struct LineFitMoments {
    mx: f32,
    my: f32,
    mxx: f32,
    mxy: f32,
    myy: f32,
    w: f32,
}

impl std::ops::Sub for LineFitMoments {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self {
            mx: self.mx - rhs.mx,
            my: self.my - rhs.my,
            mxx: self.mxx - rhs.mxx,
            mxy: self.mxy - rhs.mxy,
            myy: self.myy - rhs.myy,
            w: self.w - rhs.w,
        }
    }
}

impl std::ops::Add for LineFitMoments {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            mx: self.mx + rhs.mx,
            my: self.my + rhs.my,
            mxx: self.mxx + rhs.mxx,
            mxy: self.mxy + rhs.mxy,
            myy: self.myy + rhs.myy,
            w: self.w + rhs.w,
        }
    }
}

/// Result of a weighted line fit.
#[derive(Debug, Clone, Copy, PartialEq)]
struct LineFit {
    /// `[ex, ey, nx, ny]`: the weighted centroid and the unit normal.
    params: [f32; 4],
    /// Sum of squared residuals, `n * mse`.
    err: f32,
    /// Mean squared residual.
    mse: f32,
}

fn compute_line_fit_prefix_sums(src: &Image<u8, 1>, cluster: &[GradientInfo]) -> Vec<LineFitMoments> {
    let width = src.width();
    let height = src.height();
    let data = src.as_slice();

    let mut acc = LineFitMoments::default();

    cluster
        .iter()
        .map(|g| {
            // undo the doubled coordinates, moving onto the pixel grid
            let x = g.pos.x as f32 * 0.5 + 0.5;
            let y = g.pos.y as f32 * 0.5 + 0.5;
            let ix = x as usize;
            let iy = y as usize;

            let mut w = 1.0f32;
            if ix > 0 && ix + 1 < width && iy > 0 && iy + 1 < height {
                let grad_x = data[iy * width + ix + 1] as f32 - data[iy * width + ix - 1] as f32;
                let grad_y = data[(iy + 1) * width + ix] as f32 - data[(iy - 1) * width + ix] as f32;
                w = (grad_x * grad_x + grad_y * grad_y).sqrt() + 1.0;
            }

            acc.mx += w * x;
            acc.my += w * y;
            acc.mxx += w * x * x;
            acc.mxy += w * x * y;
            acc.myy += w * y * y;
            acc.w += w;

            acc
        })
        .collect()
}

/// Fits a line to the points `i0..=i1`, wrapping around the end of the cluster.
fn fit_line(lfps: &[LineFitMoments], i0: usize, i1: usize) -> Option<LineFit> {
    let len = lfps.len();
    if i0 == i1 || i0 >= len || i1 >= len {
        return None;
    }

    let (m, n) = if i0 < i1 {
        let m = if i0 > 0 {
            lfps[i1] - lfps[i0 - 1]
        } else {
            lfps[i1]
        };
        (m, i1 - i0 + 1)
    } else {
        let tail = if i0 > 0 {
            lfps[len - 1] - lfps[i0 - 1]
        } else {
            lfps[len - 1]
        };
        (tail + lfps[i1], len - i0 + i1 + 1)
    };

    if m.w <= 0.0 {
        return None;
    }

    let ex = m.mx / m.w;
    let ey = m.my / m.w;
    let cxx = m.mxx / m.w - ex * ex;
    let cxy = m.mxy / m.w - ex * ey;
    let cyy = m.myy / m.w - ey * ey;

    let root = ((cxx - cyy) * (cxx - cyy) + 4.0 * cxy * cxy).sqrt();
    let eig_small = 0.5 * (cxx + cyy - root);
    let eig = 0.5 * (cxx + cyy + root);

    // rows of (C - eig I) are orthogonal to the principal direction
    let (nx1, ny1) = (cxx - eig, cxy);
    let (nx2, ny2) = (cxy, cyy - eig);
    let (nx, ny) = if nx1 * nx1 + ny1 * ny1 > nx2 * nx2 + ny2 * ny2 {
        (nx1, ny1)
    } else {
        (nx2, ny2)
    };

    let length = (nx * nx + ny * ny).sqrt();
    let (nx, ny) = if length < 1e-12 {
        (0.0, 0.0)
    } else {
        (nx / length, ny / length)
    };

    Some(LineFit {
        params: [ex, ey, nx, ny],
        err: n as f32 * eig_small,
        mse: eig_small,
    })
}

/// Unnormalized gaussian taps used to smooth the fit error signal.
fn error_smoothing_kernel() -> Vec<f32> {
    const SIGMA: f32 = 1.0;
    const CUTOFF: f32 = 0.05;

    let half = ((-CUTOFF.ln() * 2.0 * SIGMA * SIGMA).sqrt() + 1.0) as i32;
    (-half..=half)
        .map(|j| (-(j * j) as f32 / (2.0 * SIGMA * SIGMA)).exp())
        .collect()
}

/// Picks four corner indices along the sorted cluster.
///
/// Corners show up as maxima of the error of short line fits centered on each
/// point. Every combination of four maxima is scored by the total error of the
/// four resulting edges and the best one is kept.
fn quad_segment_maxima(lfps: &[LineFitMoments], config: &FitQuadConfig) -> Option<[usize; 4]> {
    let len = lfps.len();
    let window = 20.min(len / 12);

    if window < 2 {
        return None;
    }

    let errors = (0..len)
        .map(|i| {
            fit_line(lfps, (i + len - window) % len, (i + window) % len)
                .map(|f| f.err)
                .unwrap_or(0.0)
        })
        .collect::<Vec<_>>();

    let kernel = error_smoothing_kernel();
    let half = kernel.len() / 2;
    let smoothed = (0..len)
        .map(|i| {
            kernel
                .iter()
                .enumerate()
                .map(|(k, w)| errors[(i + k + len * kernel.len() - half) % len] * w)
                .sum::<f32>()
        })
        .collect::<Vec<_>>();

    let mut maxima = (0..len)
        .filter(|&i| smoothed[i] > smoothed[(i + 1) % len] && smoothed[i] > smoothed[(i + len - 1) % len])
        .collect::<Vec<_>>();

    if maxima.len() < 4 {
        return None;
    }

    if maxima.len() > config.max_nmaxima {
        let mut errs = maxima.iter().map(|&i| smoothed[i]).collect::<Vec<_>>();
        errs.sort_by(|a, b| b.total_cmp(a));
        let thresh = errs[config.max_nmaxima];
        maxima.retain(|&i| smoothed[i] > thresh);

        if maxima.len() < 4 {
            return None;
        }
    }

    let n = maxima.len();
    let mut best = None;
    let mut best_error = f32::INFINITY;

    for m0 in 0..n - 3 {
        let i0 = maxima[m0];

        for m1 in (m0 + 1)..(n - 2) {
            let i1 = maxima[m1];
            let Some(f01) = fit_line(lfps, i0, i1) else {
                continue;
            };
            if f01.mse > config.max_line_fit_mse {
                continue;
            }

            for m2 in (m1 + 1)..(n - 1) {
                let i2 = maxima[m2];
                let Some(f12) = fit_line(lfps, i1, i2) else {
                    continue;
                };
                if f12.mse > config.max_line_fit_mse {
                    continue;
                }

                let dot = f01.params[2] * f12.params[2] + f01.params[3] * f12.params[3];
                if dot.abs() > config.cos_critical_rad {
                    continue;
                }

                for &i3 in &maxima[(m2 + 1)..n] {
                    let Some(f23) = fit_line(lfps, i2, i3) else {
                        continue;
                    };
                    if f23.mse > config.max_line_fit_mse {
                        continue;
                    }

                    let Some(f30) = fit_line(lfps, i3, i0) else {
                        continue;
                    };
                    if f30.mse > config.max_line_fit_mse {
                        continue;
                    }

                    let err = f01.err + f12.err + f23.err + f30.err;
                    if err < best_error {
                        best_error = err;
                        best = Some([i0, i1, i2, i3]);
                    }
                }
            }
        }
    }

    let best = best?;

    if best_error / len as f32 >= config.max_line_fit_mse {
        return None;
    }

    Some(best)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        segmentation::{find_connected_components, find_gradient_clusters},
        threshold::{adaptive_threshold, TileMinMax},
        union_find::UnionFind,
        utils::Pixel,
    };
    use approx::assert_relative_eq;

    fn moments(points: &[(f32, f32)]) -> Vec<LineFitMoments> {
        let mut acc = LineFitMoments::default();
        points
            .iter()
            .map(|&(x, y)| {
                acc = acc
                    + LineFitMoments {
                        mx: x,
                        my: y,
                        mxx: x * x,
                        mxy: x * y,
                        myy: y * y,
                        w: 1.0,
                    };
                acc
            })
            .collect()
    }

    #[test]
    fn test_fit_line() -> Result<(), Box<dyn std::error::Error>> {
        let lfps = moments(&[(0.0, 0.0), (1.0, 1.0), (2.0, 2.0), (3.0, 3.0)]);

        let fit = fit_line(&lfps, 0, 3).ok_or("no fit")?;
        assert_relative_eq!(fit.params[0], 1.5);
        assert_relative_eq!(fit.params[1], 1.5);
        // the normal of the diagonal is perpendicular to (1, 1)
        assert_relative_eq!(fit.params[2] + fit.params[3], 0.0, epsilon = 1e-5);
        assert_relative_eq!(fit.mse, 0.0, epsilon = 1e-5);

        assert!(fit_line(&lfps, 1, 1).is_none());
        assert!(fit_line(&lfps, 0, 10).is_none());

        // wrapped segment 3, 0, 1 is still on the diagonal
        let wrapped = fit_line(&lfps, 3, 1).ok_or("no fit")?;
        assert_relative_eq!(wrapped.mse, 0.0, epsilon = 1e-5);

        Ok(())
    }

    #[test]
    fn test_intersect_lines() -> Result<(), Box<dyn std::error::Error>> {
        // horizontal line y = 2 and vertical line x = 5
        let horizontal = [0.0, 2.0, 0.0, 1.0];
        let vertical = [5.0, 0.0, 1.0, 0.0];
        let p = intersect_lines(&horizontal, &vertical).ok_or("parallel")?;
        assert_relative_eq!(p.x, 5.0);
        assert_relative_eq!(p.y, 2.0);

        assert!(intersect_lines(&horizontal, &horizontal).is_none());

        Ok(())
    }

    #[test]
    fn test_quad_segment_maxima_too_few_points() {
        let lfps = moments(&[(0.0, 0.0); 20]);
        assert!(quad_segment_maxima(&lfps, &FitQuadConfig::default()).is_none());
        assert!(quad_segment_maxima(&[], &FitQuadConfig::default()).is_none());
    }

    #[test]
    fn test_fit_quads_on_square() -> Result<(), Box<dyn std::error::Error>> {
        // a dark 30x30 square on a bright 60x60 canvas
        let size = 60usize;
        let data = (0..size * size)
            .map(|i| {
                let (x, y) = (i % size, i / size);
                if (15..45).contains(&x) && (15..45).contains(&y) {
                    30
                } else {
                    220
                }
            })
            .collect();
        let src = Image::<u8, 1>::new([size, size].into(), data)?;

        let mut bin = Image::from_size_val(src.size(), Pixel::Skip)?;
        let mut tmm = TileMinMax::new(src.size(), 4);
        let mut uf = UnionFind::new(size * size);
        let mut clusters = Clusters::new();

        adaptive_threshold(&src, &mut bin, &mut tmm, 5)?;
        find_connected_components(&bin, &mut uf)?;
        find_gradient_clusters(&bin, &mut uf, &mut clusters);

        let search = QuadSearch {
            min_tag_width: 3,
            normal_border: true,
            reversed_border: false,
            downscale_factor: 1,
        };
        let quads = fit_quads(&src, &mut clusters, &FitQuadConfig::default(), &search);

        assert_eq!(quads.len(), 1);
        let quad = &quads[0];
        assert!(!quad.reversed_border);

        let expected = [(15.0, 15.0), (45.0, 15.0), (45.0, 45.0), (15.0, 45.0)];
        for (ex, ey) in expected {
            let found = quad
                .corners
                .iter()
                .any(|c| (c.x - ex).abs() < 1.0 && (c.y - ey).abs() < 1.0);
            assert!(found, "corner ({ex}, {ey}) not in {:?}", quad.corners);
        }

        assert_relative_eq!(quad.area(), 900.0, max_relative = 0.1);

        Ok(())
    }
}
