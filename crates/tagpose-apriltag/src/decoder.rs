use std::f32::consts::PI;

use glam::{DMat3, DVec3, Mat3, Vec2};
use tagpose_image::Image;

use crate::{
    errors::AprilTagError,
    family::{CodeBook, CodeMatch, TagFamily, TagFamilyKind},
    quad::{intersect_lines, Quad},
    utils::value_for_pixel,
};

/// A planar model `f(x, y) = c0 * x + c1 * y + c2` of the border intensity,
/// fitted by least squares in tag coordinates.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct GrayModel {
    a: DMat3,
    b: DVec3,
    c: DVec3,
}

impl GrayModel {
    fn add(&mut self, x: f64, y: f64, gray: f64) {
        let v = DVec3::new(x, y, 1.0);
        // outer product, symmetric
        self.a += DMat3::from_cols(v * v.x, v * v.y, v);
        self.b += v * gray;
    }

    fn solve(&mut self) -> Option<()> {
        if self.a.determinant().abs() < 1e-9 {
            return None;
        }
        self.c = self.a.inverse() * self.b;
        Some(())
    }

    fn interpolate(&self, x: f64, y: f64) -> f64 {
        self.c.x * x + self.c.y * y + self.c.z
    }
}

/// Per-family decoding state: the family, its code lookup and scratch buffers
/// for the sampled bit values.
#[derive(Debug, Clone)]
pub struct FamilyDecoder {
    kind: TagFamilyKind,
    family: TagFamily,
    code_book: CodeBook,
    values: Vec<f32>,
    sharpened: Vec<f32>,
}

impl FamilyDecoder {
    /// Prepares the decoding state of a family.
    pub fn new(kind: TagFamilyKind, max_hamming: u8) -> Result<Self, AprilTagError> {
        let family = kind.to_family();
        family.validate()?;
        let code_book = CodeBook::new(&family, max_hamming)?;
        let len = family.total_width * family.total_width;

        Ok(Self {
            kind,
            family,
            code_book,
            values: vec![0.0; len],
            sharpened: vec![0.0; len],
        })
    }

    /// The family description.
    pub fn family(&self) -> &TagFamily {
        &self.family
    }

    /// The family selector this decoder was built from.
    pub fn kind(&self) -> &TagFamilyKind {
        &self.kind
    }
}

/// A decoded tag.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// The family the tag belongs to.
    pub family: TagFamilyKind,
    /// The decoded tag id.
    pub id: u16,
    /// Number of corrected bit errors.
    pub hamming: u8,
    /// Minimum of the average white and black bit contrast; higher is more confident.
    pub decision_margin: f32,
    /// The tag center in image coordinates.
    pub center: Vec2,
    /// Corners for tag coordinates `(-1, 1), (1, 1), (1, -1), (-1, -1)`, i.e.
    /// bottom-left, bottom-right, top-right and top-left of the upright tag.
    pub corners: [Vec2; 4],
    /// Homography mapping tag coordinates in `[-1, 1]` to image coordinates.
    pub homography: Mat3,
}

/// Options for [`decode_tags`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodeOptions {
    /// Whether to refine the quad edges on the full resolution image first.
    pub refine_edges: bool,
    /// Strength of the Laplacian sharpening applied to the sampled bits.
    pub decode_sharpening: f32,
    /// Factor the quads were detected at, which bounds the edge search range.
    pub downscale_factor: usize,
}

/// Decodes every quad against every family whose border polarity matches.
///
/// # Arguments
///
/// * `src` - The full resolution grayscale image.
/// * `quads` - Candidate quads, refined in place when edge refinement is on.
/// * `families` - The families to decode against.
/// * `options` - Decoding options.
///
/// # Returns
///
/// The detections, with duplicates of the same tag removed.
pub fn decode_tags(
    src: &Image<u8, 1>,
    quads: &mut [Quad],
    families: &mut [FamilyDecoder],
    options: &DecodeOptions,
) -> Vec<Detection> {
    let mut detections = Vec::new();

    quads.iter_mut().for_each(|quad| {
        if options.refine_edges {
            refine_edges(src, quad, options.downscale_factor);
        }

        if !quad.update_homography() {
            return;
        }

        families.iter_mut().for_each(|decoder| {
            if decoder.family.reversed_border != quad.reversed_border {
                return;
            }

            let Some((matched, decision_margin)) =
                quad_decode(src, decoder, quad, options.decode_sharpening)
            else {
                return;
            };

            if decision_margin < 0.0 {
                return;
            }

            let theta = matched.rotation as f32 * PI / 2.0;
            let (s, c) = theta.sin_cos();
            let rotation = Mat3::from_cols_array(&[c, s, 0.0, -s, c, 0.0, 0.0, 0.0, 1.0]);
            let homography = quad.homography * rotation;

            let project = |x: f32, y: f32| crate::utils::homography_project(&homography, x, y);

            detections.push(Detection {
                family: decoder.kind.clone(),
                id: matched.id,
                hamming: matched.hamming,
                decision_margin,
                center: project(0.0, 0.0),
                corners: [
                    project(-1.0, 1.0),
                    project(1.0, 1.0),
                    project(1.0, -1.0),
                    project(-1.0, -1.0),
                ],
                homography,
            });
        });
    });

    remove_duplicates(detections)
}

/// Keeps one detection per overlapping group of the same tag, preferring the
/// lowest hamming distance and then the highest decision margin.
fn remove_duplicates(detections: Vec<Detection>) -> Vec<Detection> {
    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());

    for det in detections {
        let duplicate = kept.iter_mut().find(|other| {
            if other.id != det.id || other.family != det.family {
                return false;
            }
            let half_edge = 0.5 * (other.corners[0] - other.corners[1]).length();
            other.center.distance(det.center) < half_edge
        });

        match duplicate {
            Some(other) => {
                let better = det.hamming < other.hamming
                    || (det.hamming == other.hamming && det.decision_margin > other.decision_margin);
                if better {
                    *other = det;
                }
            }
            None => kept.push(det),
        }
    }

    kept
}

/// Bilinear sample at a pixel center aligned position, `None` outside the image.
fn sample_bilinear(src: &Image<u8, 1>, x: f32, y: f32) -> Option<f32> {
    let (xi, yi) = (x.floor(), y.floor());
    if xi < 0.0 || yi < 0.0 || xi + 1.0 >= src.width() as f32 || yi + 1.0 >= src.height() as f32 {
        return None;
    }

    let (a, b) = (x - xi, y - yi);
    let (xi, yi) = (xi as usize, yi as usize);
    let width = src.width();
    let data = src.as_slice();
    let top = yi * width + xi;
    let bottom = top + width;

    Some(
        (1.0 - a) * (1.0 - b) * data[top] as f32
            + a * (1.0 - b) * data[top + 1] as f32
            + (1.0 - a) * b * data[bottom] as f32
            + a * b * data[bottom + 1] as f32,
    )
}

/// Moves the quad corners onto the strongest nearby edges of the full resolution image.
///
/// Each edge is sampled at regular intervals; along the edge normal, the offset with
/// the largest weighted intensity step is taken as the true edge position. A line is
/// fitted through these positions and adjacent lines are intersected to get the new corners.
fn refine_edges(src: &Image<u8, 1>, quad: &mut Quad, downscale_factor: usize) {
    const STEP: f32 = 0.25;
    const GRANGE: f32 = 1.0;

    let range = downscale_factor.max(1) as f32 + 1.0;
    let steps = (2.0 * range / STEP) as usize + 1;
    let mut lines = [[0.0f32; 4]; 4];

    for (edge, line) in lines.iter_mut().enumerate() {
        let a = quad.corners[edge];
        let b = quad.corners[(edge + 1) & 3];

        let mut normal = Vec2::new(b.y - a.y, -(b.x - a.x));
        let mag = normal.length();
        if mag <= f32::EPSILON {
            return;
        }
        normal /= mag;

        if quad.reversed_border {
            normal = -normal;
        }

        let nsamples = 16.max((mag / 8.0) as usize);

        let (mut mx, mut my, mut mxx, mut mxy, mut myy) = (0.0, 0.0, 0.0, 0.0, 0.0);
        let mut count = 0usize;

        (0..nsamples).for_each(|s| {
            let alpha = (1 + s) as f32 / (nsamples + 1) as f32;
            let p0 = a * alpha + b * (1.0 - alpha);

            let mut weighted = 0.0;
            let mut total = 0.0;

            (0..steps).for_each(|step| {
                let n = -range + STEP * step as f32;

                // the white side lies along the normal
                let p1 = p0 + normal * (n + GRANGE) - 0.5;
                let p2 = p0 + normal * (n - GRANGE) - 0.5;

                let (Some(g1), Some(g2)) = (
                    sample_bilinear(src, p1.x, p1.y),
                    sample_bilinear(src, p2.x, p2.y),
                ) else {
                    return;
                };

                if g1 < g2 {
                    return;
                }

                let weight = (g2 - g1) * (g2 - g1);
                weighted += weight * n;
                total += weight;
            });

            if total <= 0.0 {
                return;
            }

            let best = p0 + normal * (weighted / total);
            mx += best.x;
            my += best.y;
            mxx += best.x * best.x;
            mxy += best.x * best.y;
            myy += best.y * best.y;
            count += 1;
        });

        if count < 2 {
            return;
        }

        let n = count as f32;
        let ex = mx / n;
        let ey = my / n;
        let cxx = mxx / n - ex * ex;
        let cxy = mxy / n - ex * ey;
        let cyy = myy / n - ey * ey;

        let normal_theta = 0.5 * (-2.0 * cxy).atan2(cyy - cxx);
        *line = [ex, ey, normal_theta.cos(), normal_theta.sin()];
    }

    (0..4).for_each(|i| {
        if let Some(p) = intersect_lines(&lines[i], &lines[(i + 1) & 3]) {
            quad.corners[(i + 1) & 3] = p;
        }
    });
}

/// Samples the bits of a quad and matches them against the family codes.
///
/// Returns the match and the decision margin, or `None` when the border does not
/// have the expected polarity or the code is too far from every valid code.
fn quad_decode(
    src: &Image<u8, 1>,
    decoder: &mut FamilyDecoder,
    quad: &Quad,
    decode_sharpening: f32,
) -> Option<(CodeMatch, f32)> {
    let family = &decoder.family;
    let wab = family.width_at_border as f32;

    // (start_x, start_y, step_x, step_y, is_white) in cell units
    #[rustfmt::skip]
    let patterns = [
        (-0.5, 0.5, 0.0, 1.0, true),
        (0.5, 0.5, 0.0, 1.0, false),
        (wab + 0.5, 0.5, 0.0, 1.0, true),
        (wab - 0.5, 0.5, 0.0, 1.0, false),
        (0.5, -0.5, 1.0, 0.0, true),
        (0.5, 0.5, 1.0, 0.0, false),
        (0.5, wab + 0.5, 1.0, 0.0, true),
        (0.5, wab - 0.5, 1.0, 0.0, false),
    ];

    let mut white = GrayModel::default();
    let mut black = GrayModel::default();
    let data = src.as_slice();

    for (start_x, start_y, step_x, step_y, is_white) in patterns {
        (0..family.width_at_border).for_each(|i| {
            let tag_x = 2.0 * ((start_x + i as f32 * step_x) / wab - 0.5);
            let tag_y = 2.0 * ((start_y + i as f32 * step_y) / wab - 0.5);

            let p = quad.homography_project(tag_x, tag_y);
            if p.x < 0.0 || p.y < 0.0 {
                return;
            }

            let (ix, iy) = (p.x as usize, p.y as usize);
            if ix >= src.width() || iy >= src.height() {
                return;
            }

            let v = data[iy * src.width() + ix] as f64;
            let model = if is_white { &mut white } else { &mut black };
            model.add(tag_x as f64, tag_y as f64, v);
        });
    }

    white.solve()?;
    if family.width_at_border > 1 {
        black.solve()?;
    } else {
        black.c = DVec3::new(0.0, 0.0, black.b.z / 4.0);
    }

    if (white.interpolate(0.0, 0.0) - black.interpolate(0.0, 0.0) < 0.0) != family.reversed_border {
        return None;
    }

    let total_width = family.total_width as i32;
    let min_coord = family.min_coord();
    let index = |bx: i8, by: i8| ((by as i32 - min_coord) * total_width + bx as i32 - min_coord) as usize;

    decoder.values.fill(0.0);

    family
        .bit_x
        .iter()
        .zip(family.bit_y.iter())
        .for_each(|(&bx, &by)| {
            let tag_x = 2.0 * ((bx as f32 + 0.5) / wab - 0.5);
            let tag_y = 2.0 * ((by as f32 + 0.5) / wab - 0.5);

            let Some(v) = value_for_pixel(src, quad.homography_project(tag_x, tag_y)) else {
                return;
            };

            let (tx, ty) = (tag_x as f64, tag_y as f64);
            let thresh = (black.interpolate(tx, ty) + white.interpolate(tx, ty)) / 2.0;
            decoder.values[index(bx, by)] = v - thresh as f32;
        });

    sharpen(
        &mut decoder.values,
        &mut decoder.sharpened,
        decode_sharpening,
        family.total_width,
    );

    let mut rcode = 0u64;
    let (mut white_score, mut white_count) = (0.0f32, 1usize);
    let (mut black_score, mut black_count) = (0.0f32, 1usize);

    family
        .bit_x
        .iter()
        .zip(family.bit_y.iter())
        .for_each(|(&bx, &by)| {
            rcode <<= 1;
            let v = decoder.values[index(bx, by)];

            if v > 0.0 {
                white_score += v;
                white_count += 1;
                rcode |= 1;
            } else {
                black_score -= v;
                black_count += 1;
            }
        });

    let matched = decoder.code_book.decode(family, rcode)?;
    let margin = (white_score / white_count as f32).min(black_score / black_count as f32);

    Some((matched, margin))
}

/// Sharpens a square buffer of bit values in place with a Laplacian kernel.
///
/// # Arguments
///
/// * `values` - The `size * size` values, updated in place.
/// * `scratch` - A buffer of the same length for the filter response.
/// * `decode_sharpening` - The weight of the filter response.
/// * `size` - The side length of the buffer.
pub fn sharpen(values: &mut [f32], scratch: &mut [f32], decode_sharpening: f32, size: usize) {
    #[rustfmt::skip]
    const KERNEL: [[f32; 3]; 3] = [
        [ 0.0, -1.0,  0.0],
        [-1.0,  4.0, -1.0],
        [ 0.0, -1.0,  0.0],
    ];

    let size = size as i64;

    (0..size).for_each(|y| {
        (0..size).for_each(|x| {
            let mut acc = 0.0;
            for (ky, row) in KERNEL.iter().enumerate() {
                let yy = y + ky as i64 - 1;
                if !(0..size).contains(&yy) {
                    continue;
                }
                for (kx, k) in row.iter().enumerate() {
                    let xx = x + kx as i64 - 1;
                    if !(0..size).contains(&xx) {
                        continue;
                    }
                    acc += values[(yy * size + xx) as usize] * k;
                }
            }
            scratch[(y * size + x) as usize] = acc;
        });
    });

    values
        .iter_mut()
        .zip(scratch.iter())
        .for_each(|(v, s)| *v += decode_sharpening * s);
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_gray_model() -> Result<(), Box<dyn std::error::Error>> {
        let mut model = GrayModel::default();
        for (x, y) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0), (0.0, 0.5)] {
            model.add(x, y, 10.0 * x - 4.0 * y + 100.0);
        }
        model.solve().ok_or("singular")?;

        assert_relative_eq!(model.c.x, 10.0, epsilon = 1e-9);
        assert_relative_eq!(model.c.y, -4.0, epsilon = 1e-9);
        assert_relative_eq!(model.interpolate(0.0, 0.0), 100.0, epsilon = 1e-9);

        Ok(())
    }

    #[test]
    fn test_gray_model_underdetermined() {
        let mut model = GrayModel::default();
        model.add(0.0, 0.0, 1.0);
        model.add(1.0, 0.0, 1.0);
        assert!(model.solve().is_none());
    }

    #[test]
    fn test_sharpen() {
        let mut values = vec![0.0; 9];
        values[4] = 1.0;
        let mut scratch = vec![0.0; 9];

        sharpen(&mut values, &mut scratch, 0.25, 3);

        assert_relative_eq!(values[4], 2.0);
        assert_relative_eq!(values[1], -0.25);
        assert_relative_eq!(values[0], 0.0);
    }

    #[test]
    fn test_remove_duplicates() {
        let det = |hamming: u8, margin: f32, offset: f32| Detection {
            family: TagFamilyKind::Tag16H5,
            id: 3,
            hamming,
            decision_margin: margin,
            center: Vec2::new(10.0 + offset, 10.0),
            corners: [
                Vec2::new(0.0, 20.0),
                Vec2::new(20.0, 20.0),
                Vec2::new(20.0, 0.0),
                Vec2::new(0.0, 0.0),
            ],
            homography: Mat3::IDENTITY,
        };

        let kept = remove_duplicates(vec![det(1, 50.0, 0.0), det(0, 20.0, 1.0), det(0, 30.0, 0.5)]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].hamming, 0);
        assert_relative_eq!(kept[0].decision_margin, 30.0);

        let apart = remove_duplicates(vec![det(0, 50.0, 0.0), det(0, 50.0, 100.0)]);
        assert_eq!(apart.len(), 2);
    }

    #[test]
    fn test_family_decoder_rejects_large_hamming() {
        assert!(matches!(
            FamilyDecoder::new(TagFamilyKind::Tag16H5, 5),
            Err(AprilTagError::InvalidMaxHamming(5))
        ));
    }
}
