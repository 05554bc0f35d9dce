use tagpose_image::{
    draw::{draw_cross, draw_line, draw_polygon},
    Image,
};
use tagpose_pnp::CameraIntrinsics;

use crate::engine::EngineDetection;

const OUTLINE_COLOR: [u8; 3] = [255, 255, 0];
const CENTER_COLOR: [u8; 3] = [255, 0, 255];
const AXIS_COLORS: [[u8; 3]; 3] = [[255, 0, 0], [0, 255, 0], [0, 0, 255]];
/// Axis tips closer to the camera plane than this fraction of the tag depth are not drawn.
const MIN_TIP_DEPTH_RATIO: f64 = 0.25;

fn to_pixel(p: [f64; 2]) -> (i64, i64) {
    (p[0].floor() as i64, p[1].floor() as i64)
}

/// Draws a detection onto an image: the tag outline, its center and the tag
/// axes projected with `camera` (x red, y green, z blue).
///
/// The axes are `tag_size / 2` long and start at the tag center. The z axis
/// points into the tag, away from the camera. Axes whose tip comes close to
/// the camera plane are skipped.
pub fn draw_detection(
    img: &mut Image<u8, 3>,
    detection: &EngineDetection,
    camera: &CameraIntrinsics,
    tag_size: f64,
) {
    let thickness = (img.width().max(img.height()) / 400).max(1) * 2 + 1;

    let outline = detection
        .corners
        .map(|c| to_pixel([c[0] as f64, c[1] as f64]));
    draw_polygon(img, &outline, OUTLINE_COLOR, thickness);

    let center = to_pixel([detection.center[0] as f64, detection.center[1] as f64]);
    draw_cross(img, center, thickness as i64 * 3, CENTER_COLOR);

    let r = &detection.rotation;
    let t = &detection.translation;
    let half = tag_size / 2.0;

    let Some(origin) = camera.project(*t) else {
        return;
    };

    (0..3).for_each(|axis| {
        let tip: [f64; 3] = std::array::from_fn(|row| t[row] + r[row][axis] * half);
        if tip[2] < t[2] * MIN_TIP_DEPTH_RATIO {
            return;
        }
        if let Some(tip) = camera.project(tip) {
            draw_line(img, to_pixel(origin), to_pixel(tip), AXIS_COLORS[axis], thickness);
        }
    });
}
