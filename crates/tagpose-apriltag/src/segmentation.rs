use std::collections::HashMap;

use crate::{
    errors::AprilTagError,
    union_find::UnionFind,
    utils::{Pixel, Point2d},
};
use tagpose_image::Image;

/// Components smaller than this are too small to be part of a tag border.
pub const MIN_COMPONENT_SIZE: usize = 25;

/// A boundary sample between a black and a white component.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct GradientInfo {
    /// Position in doubled pixel coordinates, midway between the two pixels.
    pub pos: Point2d<i32>,
    /// Horizontal gradient, positive when white lies towards +x.
    pub gx: i32,
    /// Vertical gradient, positive when white lies towards +y.
    pub gy: i32,
    /// Sorting key around the cluster center, filled during quad fitting.
    pub slope: f32,
}

/// Boundary clusters keyed by the pair of component representatives they separate.
pub type Clusters = HashMap<(usize, usize), Vec<GradientInfo>>;

/// Finds connected components in a binary image using union-find.
///
/// Black pixels are 4-connected and white pixels are 8-connected, so a black
/// border cannot leak through a diagonal gap in the white background.
///
/// # Arguments
///
/// * `src` - The binarized image.
/// * `uf` - A union-find with one slot per pixel; it should be freshly reset.
pub fn find_connected_components(
    src: &Image<Pixel, 1>,
    uf: &mut UnionFind,
) -> Result<(), AprilTagError> {
    let width = src.width();
    let height = src.height();
    let data = src.as_slice();

    if uf.len() != data.len() {
        return Err(tagpose_image::ImageError::InvalidChannelShape(uf.len(), data.len()).into());
    }

    data.iter().enumerate().for_each(|(i, pixel)| {
        if *pixel == Pixel::Skip {
            return;
        }

        let x = i % width;
        let y = i / width;
        let white = *pixel == Pixel::White;

        if x + 1 < width {
            if *pixel == data[i + 1] {
                uf.connect(i, i + 1);
            }

            if white && y > 0 && data[i - width + 1] == Pixel::White {
                uf.connect(i, i - width + 1);
            }
        }

        if white && x > 0 && y > 0 && data[i - width - 1] == Pixel::White {
            uf.connect(i, i - width - 1);
        }

        if y + 1 < height && *pixel == data[i + width] {
            uf.connect(i, i + width);
        }
    });

    Ok(())
}

/// Collects the boundary points between every pair of adjacent black and white components.
///
/// Each boundary point is stored at twice the pixel resolution, halfway between
/// the two pixels, together with the direction of the black to white transition.
///
/// # Arguments
///
/// * `src` - The binarized image.
/// * `uf` - The union-find produced by [`find_connected_components`].
/// * `clusters` - Output map, cleared by the caller between frames.
pub fn find_gradient_clusters(src: &Image<Pixel, 1>, uf: &mut UnionFind, clusters: &mut Clusters) {
    const NEIGHBORS: [(i32, i32); 4] = [(1, 0), (0, 1), (-1, 1), (1, 1)];

    let width = src.width();
    let height = src.height();
    let data = src.as_slice();

    if width < 3 || height < 3 {
        return;
    }

    (1..height - 1).for_each(|y| {
        (1..width - 1).for_each(|x| {
            let i0 = y * width + x;
            let v0 = data[i0];

            if v0 == Pixel::Skip {
                return;
            }

            let rep0 = uf.get_representative(i0);
            if uf.get_set_size(rep0) < MIN_COMPONENT_SIZE {
                return;
            }

            NEIGHBORS.iter().for_each(|&(dx, dy)| {
                let i1 = ((y as i32 + dy) as usize) * width + (x as i32 + dx) as usize;
                let v1 = data[i1];

                if !v0.is_opposite(&v1) {
                    return;
                }

                let rep1 = uf.get_representative(i1);
                if uf.get_set_size(rep1) < MIN_COMPONENT_SIZE {
                    return;
                }

                let key = if rep0 < rep1 { (rep0, rep1) } else { (rep1, rep0) };
                let delta = v1.value() as i32 - v0.value() as i32;

                clusters.entry(key).or_default().push(GradientInfo {
                    pos: Point2d {
                        x: 2 * x as i32 + dx,
                        y: 2 * y as i32 + dy,
                    },
                    gx: dx * delta,
                    gy: dy * delta,
                    slope: 0.0,
                });
            });
        });
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tagpose_image::ImageSize;

    fn square_image(size: usize, lo: usize, hi: usize) -> Result<Image<Pixel, 1>, AprilTagError> {
        let data = (0..size * size)
            .map(|i| {
                let (x, y) = (i % size, i / size);
                if (lo..hi).contains(&x) && (lo..hi).contains(&y) {
                    Pixel::Black
                } else {
                    Pixel::White
                }
            })
            .collect();

        Ok(Image::new(
            ImageSize {
                width: size,
                height: size,
            },
            data,
        )?)
    }

    #[test]
    fn test_connected_components() -> Result<(), Box<dyn std::error::Error>> {
        let bin = square_image(20, 5, 15)?;
        let mut uf = UnionFind::new(400);
        find_connected_components(&bin, &mut uf)?;

        // black square
        assert_eq!(uf.get_set_size(5 * 20 + 5), 100);
        // white background
        assert_eq!(uf.get_set_size(0), 300);
        assert_ne!(uf.get_representative(0), uf.get_representative(5 * 20 + 5));

        Ok(())
    }

    #[test]
    fn test_black_is_four_connected() -> Result<(), Box<dyn std::error::Error>> {
        #[rustfmt::skip]
        let data = vec![
            Pixel::Black, Pixel::White,
            Pixel::White, Pixel::Black,
        ];
        let bin = Image::new([2, 2].into(), data)?;
        let mut uf = UnionFind::new(4);
        find_connected_components(&bin, &mut uf)?;

        assert_ne!(uf.get_representative(0), uf.get_representative(3));
        assert_eq!(uf.get_representative(1), uf.get_representative(2));

        Ok(())
    }

    #[test]
    fn test_gradient_clusters() -> Result<(), Box<dyn std::error::Error>> {
        let bin = square_image(20, 5, 15)?;
        let mut uf = UnionFind::new(400);
        let mut clusters = Clusters::new();

        find_connected_components(&bin, &mut uf)?;
        find_gradient_clusters(&bin, &mut uf, &mut clusters);

        assert_eq!(clusters.len(), 1);
        let cluster = clusters.values().next().ok_or("no cluster")?;
        assert!(cluster.len() >= 4 * 10);

        // gradients point from black towards white, i.e. away from the square center (20, 20)
        cluster.iter().for_each(|g| {
            let dot = (g.pos.x - 20) * g.gx + (g.pos.y - 20) * g.gy;
            assert!(dot >= 0, "{g:?}");
        });

        Ok(())
    }

    #[test]
    fn test_small_components_are_ignored() -> Result<(), Box<dyn std::error::Error>> {
        let bin = square_image(20, 8, 11)?;
        let mut uf = UnionFind::new(400);
        let mut clusters = Clusters::new();

        find_connected_components(&bin, &mut uf)?;
        find_gradient_clusters(&bin, &mut uf, &mut clusters);

        assert!(clusters.is_empty());

        Ok(())
    }
}
