use nalgebra::{Matrix3, Vector3};

use crate::{camera::CameraIntrinsics, homography::homography_4pt, rotation, PnPError};

/// The pose of a square marker in the camera frame.
///
/// The marker frame has x to the right, y down and z into the marker, with the
/// origin at the marker center.
#[derive(Debug, Clone, PartialEq)]
pub struct PoseSolution {
    /// Row-major rotation mapping marker coordinates to camera coordinates.
    pub rotation: [[f64; 3]; 3],
    /// Marker center in the camera frame, in the units of the side length.
    pub translation: [f64; 3],
    /// Rotation vector (axis times angle) of `rotation`.
    pub rvec: [f64; 3],
    /// Root-mean-square reprojection error of the four corners, in pixels.
    pub reproj_rmse: f64,
}

impl PoseSolution {
    /// Maps a point from the marker frame to the camera frame.
    pub fn transform_point(&self, p: [f64; 3]) -> [f64; 3] {
        let r = &self.rotation;
        let t = &self.translation;
        [
            r[0][0] * p[0] + r[0][1] * p[1] + r[0][2] * p[2] + t[0],
            r[1][0] * p[0] + r[1][1] * p[1] + r[1][2] * p[2] + t[1],
            r[2][0] * p[0] + r[2][1] * p[1] + r[2][2] * p[2] + t[2],
        ]
    }

    /// The rotation as a unit quaternion `[w, x, y, z]`.
    pub fn quaternion(&self) -> [f64; 4] {
        rotation::matrix_to_quaternion(&self.rotation)
    }
}

/// Pose solver for a square planar marker seen through its four corners.
pub struct SquarePose;

impl SquarePose {
    /// The marker corners in the marker frame, for a square of side `side`.
    ///
    /// The order is bottom-left, bottom-right, top-right, top-left:
    ///  - p0 = [-s/2,  s/2, 0]
    ///  - p1 = [ s/2,  s/2, 0]
    ///  - p2 = [ s/2, -s/2, 0]
    ///  - p3 = [-s/2, -s/2, 0]
    pub fn object_points(side: f64) -> [[f64; 3]; 4] {
        let h = side / 2.0;
        [[-h, h, 0.0], [h, h, 0.0], [h, -h, 0.0], [-h, -h, 0.0]]
    }

    /// Estimates the marker pose from its corners in pixels.
    ///
    /// # Arguments
    ///
    /// * `corners` - The image corners, in the order of [`SquarePose::object_points`].
    /// * `intrinsics` - The camera intrinsics.
    /// * `side` - The side length of the marker; the translation is in the same unit.
    ///
    /// # Returns
    ///
    /// The pose with the marker in front of the camera.
    pub fn solve(
        corners: &[[f64; 2]; 4],
        intrinsics: &CameraIntrinsics,
        side: f64,
    ) -> Result<PoseSolution, PnPError> {
        intrinsics.validate()?;
        if !(side.is_finite() && side > 0.0) {
            return Err(PnPError::InvalidPose("side length must be positive"));
        }

        let object = Self::object_points(side);
        let src = object.map(|p| [p[0], p[1]]);
        let dst = corners.map(|c| intrinsics.normalize(c));

        let mut h = homography_4pt(&src, &dst)?;

        // the marker center must have positive depth
        if h[2][2].abs() < f64::EPSILON {
            return Err(PnPError::InvalidPose("marker plane passes through the camera center"));
        }
        if h[2][2] < 0.0 {
            h.iter_mut().flatten().for_each(|v| *v = -*v);
        }

        let (rotation, translation) = decompose_homography(&h)?;

        let pose = PoseSolution {
            rvec: rotation::matrix_to_rvec(&rotation),
            rotation,
            translation,
            reproj_rmse: 0.0,
        };

        let mut sum_sq = 0.0;
        for (p, c) in object.iter().zip(corners.iter()) {
            let projected = intrinsics
                .project(pose.transform_point(*p))
                .ok_or(PnPError::InvalidPose("marker corner behind the camera"))?;
            let (du, dv) = (projected[0] - c[0], projected[1] - c[1]);
            sum_sq += du * du + dv * dv;
        }

        let reproj_rmse = (sum_sq / object.len() as f64).sqrt();
        log::trace!("square pose t={translation:?} rmse={reproj_rmse:.4}px");

        Ok(PoseSolution {
            reproj_rmse,
            ..pose
        })
    }
}

/// Splits a plane to normalized image homography into rotation and translation.
///
/// The first two columns are the scaled rotation axes; the rotation is completed
/// with their cross product and projected onto SO(3).
fn decompose_homography(h: &[[f64; 3]; 3]) -> Result<([[f64; 3]; 3], [f64; 3]), PnPError> {
    let h1 = Vector3::new(h[0][0], h[1][0], h[2][0]);
    let h2 = Vector3::new(h[0][1], h[1][1], h[2][1]);
    let h3 = Vector3::new(h[0][2], h[1][2], h[2][2]);

    let scale = (h1.norm() * h2.norm()).sqrt();
    if scale < f64::EPSILON {
        return Err(PnPError::InvalidPose("homography has vanishing rotation columns"));
    }
    let s = 1.0 / scale;

    let r1 = h1 * s;
    let r2 = h2 * s;
    let r3 = r1.cross(&r2);

    let stacked = Matrix3::from_columns(&[r1, r2, r3]);
    let svd = stacked.svd(true, true);
    let (Some(u), Some(v_t)) = (svd.u, svd.v_t) else {
        return Err(PnPError::SvdFailed("rotation projection".to_string()));
    };

    let mut r = u * v_t;
    if r.determinant() < 0.0 {
        let mut u = u;
        u.column_mut(2).neg_mut();
        r = u * v_t;
    }

    let t = h3 * s;

    let rotation = [
        [r[(0, 0)], r[(0, 1)], r[(0, 2)]],
        [r[(1, 0)], r[(1, 1)], r[(1, 2)]],
        [r[(2, 0)], r[(2, 1)], r[(2, 2)]],
    ];

    Ok((rotation, [t.x, t.y, t.z]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_facing_square() -> Result<(), Box<dyn std::error::Error>> {
        // normalized coordinates equal to the object plane put the square 1 unit away
        let k = CameraIntrinsics::new(1.0, 1.0, 0.0, 0.0);
        let corners = [[-0.5, 0.5], [0.5, 0.5], [0.5, -0.5], [-0.5, -0.5]];

        let pose = SquarePose::solve(&corners, &k, 1.0)?;

        (0..3).for_each(|i| {
            (0..3).for_each(|j| {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_relative_eq!(pose.rotation[i][j], expected, epsilon = 1e-9);
            });
        });
        assert_relative_eq!(pose.translation[0], 0.0, epsilon = 1e-9);
        assert_relative_eq!(pose.translation[1], 0.0, epsilon = 1e-9);
        assert_relative_eq!(pose.translation[2], 1.0, epsilon = 1e-9);
        assert_relative_eq!(pose.reproj_rmse, 0.0, epsilon = 1e-9);
        assert_relative_eq!(pose.quaternion()[0], 1.0, epsilon = 1e-9);

        Ok(())
    }

    #[test]
    fn test_invalid_inputs() {
        let k = CameraIntrinsics::new(500.0, 500.0, 320.0, 240.0);
        let corners = [[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 10.0]];

        assert!(matches!(
            SquarePose::solve(&corners, &k, 0.0),
            Err(PnPError::InvalidPose(_))
        ));
        assert!(matches!(
            SquarePose::solve(&corners, &CameraIntrinsics::new(0.0, 1.0, 0.0, 0.0), 1.0),
            Err(PnPError::InvalidIntrinsics(_))
        ));

        let collapsed = [[5.0, 5.0]; 4];
        assert!(SquarePose::solve(&collapsed, &k, 1.0).is_err());
    }
}
