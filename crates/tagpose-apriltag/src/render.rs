use glam::{Mat3, Vec2};
use tagpose_image::{Image, ImageSize};

use crate::{
    errors::AprilTagError,
    family::TagFamily,
    utils::{homography_compute, homography_project},
};

/// Lays out the cells of a tag, `true` meaning white, row-major over
/// `total_width * total_width` cells.
///
/// The outer ring of a normal family is white and the border inside it black.
/// Reversed families get a white ring on the border itself.
pub fn tag_cells(family: &TagFamily, id: usize) -> Result<Vec<bool>, AprilTagError> {
    let code = family.code(id)?;
    let tw = family.total_width;
    let mut cells = vec![false; tw * tw];

    let ring_width = family.width_at_border + if family.reversed_border { 0 } else { 2 };
    let start = (tw - ring_width.min(tw)) / 2;
    let end = start + ring_width.min(tw) - 1;

    (start..=end).for_each(|i| {
        cells[start * tw + i] = true;
        cells[end * tw + i] = true;
        cells[i * tw + start] = true;
        cells[i * tw + end] = true;
    });

    let offset = -family.min_coord();
    family
        .bit_x
        .iter()
        .zip(family.bit_y.iter())
        .enumerate()
        .for_each(|(i, (&bx, &by))| {
            let x = (bx as i32 + offset) as usize;
            let y = (by as i32 + offset) as usize;
            cells[y * tw + x] = (code >> (family.nbits - 1 - i)) & 1 == 1;
        });

    Ok(cells)
}

/// Renders an upright tag with `pixels_per_cell` pixels per cell.
///
/// The image covers the whole tag including its outer ring, so it is
/// `total_width * pixels_per_cell` pixels wide.
pub fn render_tag(
    family: &TagFamily,
    id: usize,
    pixels_per_cell: usize,
) -> Result<Image<u8, 1>, AprilTagError> {
    let cells = tag_cells(family, id)?;
    let tw = family.total_width;
    let side = tw * pixels_per_cell.max(1);
    let ppc = pixels_per_cell.max(1);

    let data = (0..side * side)
        .map(|i| {
            let (x, y) = ((i % side) / ppc, (i / side) / ppc);
            if cells[y * tw + x] {
                255
            } else {
                0
            }
        })
        .collect();

    Ok(Image::new([side, side].into(), data)?)
}

/// Renders a tag seen under a perspective transform onto a uniform background.
///
/// `border_corners` are the image positions of the outer corners of the tag border,
/// i.e. tag coordinates `(-1, -1), (1, -1), (1, 1), (-1, 1)`: top-left, top-right,
/// bottom-right and bottom-left of the upright tag. Each pixel is averaged over
/// four sub-samples.
///
/// # Arguments
///
/// * `family` - The tag family.
/// * `id` - The tag id.
/// * `border_corners` - Where the corners of the border land in the image.
/// * `size` - The output image size.
/// * `background` - The gray level outside the tag.
pub fn render_tag_warped(
    family: &TagFamily,
    id: usize,
    border_corners: [Vec2; 4],
    size: ImageSize,
    background: u8,
) -> Result<Image<u8, 1>, AprilTagError> {
    let cells = tag_cells(family, id)?;
    let tw = family.total_width as i32;
    let wab = family.width_at_border as f32;
    let min_coord = family.min_coord();

    let tag = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)];
    let mut corr = [[0.0f32; 4]; 4];
    tag.iter()
        .zip(border_corners.iter())
        .zip(corr.iter_mut())
        .for_each(|((&(tx, ty), c), row)| *row = [tx, ty, c.x, c.y]);

    let to_image = homography_compute(corr).ok_or(AprilTagError::DegeneratePlacement)?;
    let to_tag: Mat3 = to_image.inverse();

    let shade = |p: Vec2| -> f32 {
        let t = homography_project(&to_tag, p.x, p.y);
        let cx = ((t.x + 1.0) * 0.5 * wab).floor() as i32 - min_coord;
        let cy = ((t.y + 1.0) * 0.5 * wab).floor() as i32 - min_coord;

        if !(0..tw).contains(&cx) || !(0..tw).contains(&cy) {
            return background as f32;
        }

        if cells[(cy * tw + cx) as usize] {
            255.0
        } else {
            0.0
        }
    };

    const SUBSAMPLES: [f32; 2] = [0.25, 0.75];

    let data = (0..size.area())
        .map(|i| {
            let (x, y) = ((i % size.width) as f32, (i / size.width) as f32);
            let sum: f32 = SUBSAMPLES
                .iter()
                .flat_map(|&dy| SUBSAMPLES.iter().map(move |&dx| Vec2::new(x + dx, y + dy)))
                .map(shade)
                .sum();
            (sum / 4.0).round() as u8
        })
        .collect();

    Ok(Image::new(size, data)?)
}
