use crate::image::Image;

#[inline]
fn set_pixel<const C: usize>(img: &mut Image<u8, C>, x: i64, y: i64, color: [u8; C]) {
    if x < 0 || y < 0 || x >= img.cols() as i64 || y >= img.rows() as i64 {
        return;
    }
    let start = (y as usize * img.cols() + x as usize) * C;
    img.as_slice_mut()[start..start + C].copy_from_slice(&color);
}

/// Clips the segment `p0`-`p1` to the rectangle `[min, max]` (Liang-Barsky).
///
/// Returns `None` when no part of the segment lies inside.
fn clip_segment(p0: (i64, i64), p1: (i64, i64), min: f64, max: (f64, f64)) -> Option<((i64, i64), (i64, i64))> {
    let (x0, y0) = (p0.0 as f64, p0.1 as f64);
    let (dx, dy) = (p1.0 as f64 - x0, p1.1 as f64 - y0);

    let (mut t0, mut t1) = (0.0f64, 1.0f64);
    for (p, q) in [(-dx, x0 - min), (dx, max.0 - x0), (-dy, y0 - min), (dy, max.1 - y0)] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }

        let r = q / p;
        if p < 0.0 {
            if r > t1 {
                return None;
            }
            t0 = t0.max(r);
        } else {
            if r < t0 {
                return None;
            }
            t1 = t1.min(r);
        }
    }

    let at = |t: f64| ((x0 + t * dx).round() as i64, (y0 + t * dy).round() as i64);
    Some((if t0 > 0.0 { at(t0) } else { p0 }, if t1 < 1.0 { at(t1) } else { p1 }))
}

/// Draws a line on an image inplace using Bresenham's line algorithm.
///
/// The segment is clipped to the image first, so far away endpoints cost
/// nothing extra.
///
/// # Arguments
///
/// * `img` - The image to draw on.
/// * `p0` - The start point of the line as a tuple of (x, y).
/// * `p1` - The end point of the line as a tuple of (x, y).
/// * `color` - The color of the line as an array of `C` elements.
/// * `thickness` - The thickness of the line; values above one are drawn as a square brush.
pub fn draw_line<const C: usize>(
    img: &mut Image<u8, C>,
    p0: (i64, i64),
    p1: (i64, i64),
    color: [u8; C],
    thickness: usize,
) {
    if img.cols() == 0 || img.rows() == 0 {
        return;
    }

    let half = (thickness.max(1) as i64 - 1) / 2;
    let max = ((img.cols() as i64 - 1 + half) as f64, (img.rows() as i64 - 1 + half) as f64);
    let Some(((mut x0, mut y0), (x1, y1))) = clip_segment(p0, p1, -half as f64, max) else {
        return;
    };

    let dx = (x1 - x0).abs();
    let dy = (y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };

    let mut err = dx - dy;

    loop {
        for i in -half..=half {
            for j in -half..=half {
                set_pixel(img, x0 + i, y0 + j, color);
            }
        }

        if x0 == x1 && y0 == y1 {
            break;
        }

        let e2 = 2 * err;

        if e2 > -dy {
            err -= dy;
            x0 += sx;
        }
        if e2 < dx {
            err += dx;
            y0 += sy;
        }
    }
}

/// Draws a closed polygon outline through the given points.
///
/// # Arguments
///
/// * `img` - The image to draw on.
/// * `points` - The polygon vertices in drawing order.
/// * `color` - The color of the outline.
/// * `thickness` - The thickness of the outline.
pub fn draw_polygon<const C: usize>(
    img: &mut Image<u8, C>,
    points: &[(i64, i64)],
    color: [u8; C],
    thickness: usize,
) {
    if points.len() < 2 {
        return;
    }

    (0..points.len()).for_each(|i| {
        let next = (i + 1) % points.len();
        draw_line(img, points[i], points[next], color, thickness);
    });
}

/// Draws a cross marker centered at `center`.
///
/// # Arguments
///
/// * `img` - The image to draw on.
/// * `center` - The center of the cross as (x, y).
/// * `half_size` - Length of each arm in pixels.
/// * `color` - The color of the cross.
pub fn draw_cross<const C: usize>(
    img: &mut Image<u8, C>,
    center: (i64, i64),
    half_size: i64,
    color: [u8; C],
) {
    let (cx, cy) = center;
    draw_line(img, (cx.saturating_sub(half_size), cy), (cx.saturating_add(half_size), cy), color, 1);
    draw_line(img, (cx, cy.saturating_sub(half_size)), (cx, cy.saturating_add(half_size)), color, 1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ImageSize;

    #[test]
    fn test_draw_line() -> Result<(), Box<dyn std::error::Error>> {
        let mut img = Image::<u8, 1>::new(
            ImageSize {
                width: 5,
                height: 5,
            },
            vec![0; 25],
        )?;
        draw_line(&mut img, (0, 0), (4, 4), [255], 1);

        #[rustfmt::skip]
        assert_eq!(
            img.as_slice(),
            vec![
                255, 0, 0, 0, 0,
                0, 255, 0, 0, 0,
                0, 0, 255, 0, 0,
                0, 0, 0, 255, 0,
                0, 0, 0, 0, 255,
            ]
        );

        Ok(())
    }

    #[test]
    fn test_draw_line_clipped() -> Result<(), Box<dyn std::error::Error>> {
        let mut img = Image::<u8, 3>::from_size_val([4, 4].into(), 0)?;
        draw_line(&mut img, (-10, 1), (10, 1), [1, 2, 3], 1);

        (0..4).for_each(|x| {
            assert_eq!(img.pixel(x, 1), Some(&[1u8, 2, 3][..]));
            assert_eq!(img.pixel(x, 0), Some(&[0u8, 0, 0][..]));
        });

        Ok(())
    }

    #[test]
    fn test_draw_line_far_endpoints() -> Result<(), Box<dyn std::error::Error>> {
        let mut img = Image::<u8, 1>::from_size_val([4, 4].into(), 0)?;
        draw_line(&mut img, (1, 1), (i64::MAX, 1), [5], 1);
        draw_line(&mut img, (-1_000_000_000_000, -1_000_000_000_000), (1_000_000_000_000, 1_000_000_000_000), [7], 1);
        // entirely outside
        draw_line(&mut img, (-3_000_000_000_000, -5), (9_000_000_000_000, -5), [9], 3);

        #[rustfmt::skip]
        assert_eq!(
            img.as_slice(),
            vec![
                7, 0, 0, 0,
                0, 7, 5, 5,
                0, 0, 7, 0,
                0, 0, 0, 7,
            ]
        );

        Ok(())
    }

    #[test]
    fn test_draw_thick_line_near_border() -> Result<(), Box<dyn std::error::Error>> {
        let mut img = Image::<u8, 1>::from_size_val([5, 5].into(), 0)?;
        // the centerline is outside, the brush still reaches row 0
        draw_line(&mut img, (-100, -1), (100, -1), [3], 3);

        assert_eq!(&img.as_slice()[..5], &[3, 3, 3, 3, 3]);
        assert!(img.as_slice()[5..].iter().all(|&v| v == 0));

        Ok(())
    }

    #[test]
    fn test_draw_polygon_closes() -> Result<(), Box<dyn std::error::Error>> {
        let mut img = Image::<u8, 1>::from_size_val([6, 6].into(), 0)?;
        draw_polygon(&mut img, &[(1, 1), (4, 1), (4, 4), (1, 4)], [9], 1);

        #[rustfmt::skip]
        assert_eq!(
            img.as_slice(),
            vec![
                0, 0, 0, 0, 0, 0,
                0, 9, 9, 9, 9, 0,
                0, 9, 0, 0, 9, 0,
                0, 9, 0, 0, 9, 0,
                0, 9, 9, 9, 9, 0,
                0, 0, 0, 0, 0, 0,
            ]
        );

        Ok(())
    }

    #[test]
    fn test_draw_cross() -> Result<(), Box<dyn std::error::Error>> {
        let mut img = Image::<u8, 1>::from_size_val([5, 5].into(), 0)?;
        draw_cross(&mut img, (2, 2), 1, [7]);

        let lit: usize = img.as_slice().iter().filter(|&&v| v == 7).count();
        assert_eq!(lit, 5);
        assert_eq!(img.get_pixel(2, 2, 0)?, 7);

        Ok(())
    }
}
