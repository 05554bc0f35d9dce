use crate::PnPError;

/// Intrinsic parameters of a pinhole camera without distortion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraIntrinsics {
    /// Focal length in x direction, in pixels.
    pub fx: f64,
    /// Focal length in y direction, in pixels.
    pub fy: f64,
    /// Principal point x coordinate.
    pub cx: f64,
    /// Principal point y coordinate.
    pub cy: f64,
}

impl CameraIntrinsics {
    /// Creates intrinsics from focal lengths and principal point.
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self { fx, fy, cx, cy }
    }

    /// Creates intrinsics from focal lengths, with the principal point at the
    /// center of an image of `width` x `height` pixels.
    pub fn from_focal(fx: f64, fy: f64, width: usize, height: usize) -> Self {
        Self::new(fx, fy, width as f64 / 2.0, height as f64 / 2.0)
    }

    /// Creates intrinsics from a 3x3 row-major matrix `[[fx, 0, cx], [0, fy, cy], [0, 0, 1]]`.
    pub fn from_matrix(k: &[[f64; 3]; 3]) -> Result<Self, PnPError> {
        if k[0][1] != 0.0 || k[1][0] != 0.0 || k[2][0] != 0.0 || k[2][1] != 0.0 || k[2][2] != 1.0 {
            return Err(PnPError::InvalidIntrinsics(
                "matrix must have the form [[fx, 0, cx], [0, fy, cy], [0, 0, 1]]".to_string(),
            ));
        }

        let intrinsics = Self::new(k[0][0], k[1][1], k[0][2], k[1][2]);
        intrinsics.validate()?;
        Ok(intrinsics)
    }

    /// Converts to a 3x3 row-major matrix.
    pub fn to_matrix(&self) -> [[f64; 3]; 3] {
        [
            [self.fx, 0.0, self.cx],
            [0.0, self.fy, self.cy],
            [0.0, 0.0, 1.0],
        ]
    }

    /// Checks that every value is finite and the focal lengths are positive.
    pub fn validate(&self) -> Result<(), PnPError> {
        let values = [self.fx, self.fy, self.cx, self.cy];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(PnPError::InvalidIntrinsics(format!("non-finite value in {self:?}")));
        }
        if self.fx < f64::EPSILON || self.fy < f64::EPSILON {
            return Err(PnPError::InvalidIntrinsics(format!(
                "focal lengths must be positive: fx {}, fy {}",
                self.fx, self.fy
            )));
        }
        Ok(())
    }

    /// Maps a pixel to normalized image coordinates, i.e. applies `K^-1`.
    #[inline]
    pub fn normalize(&self, point: [f64; 2]) -> [f64; 2] {
        [(point[0] - self.cx) / self.fx, (point[1] - self.cy) / self.fy]
    }

    /// Projects a point in the camera frame to pixels.
    ///
    /// Returns `None` for points at or behind the camera center.
    #[inline]
    pub fn project(&self, point: [f64; 3]) -> Option<[f64; 2]> {
        if point[2] <= f64::EPSILON {
            return None;
        }
        Some([
            self.fx * point[0] / point[2] + self.cx,
            self.fy * point[1] / point[2] + self.cy,
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_normalize_project() -> Result<(), Box<dyn std::error::Error>> {
        let k = CameraIntrinsics::from_focal(600.0, 610.0, 640, 480);
        assert_eq!((k.cx, k.cy), (320.0, 240.0));

        let p = k.project([0.1, -0.2, 2.0]).ok_or("behind camera")?;
        let n = k.normalize(p);
        assert_relative_eq!(n[0], 0.05, epsilon = 1e-12);
        assert_relative_eq!(n[1], -0.1, epsilon = 1e-12);

        assert!(k.project([0.0, 0.0, -1.0]).is_none());

        Ok(())
    }

    #[test]
    fn test_from_matrix() -> Result<(), Box<dyn std::error::Error>> {
        let k = CameraIntrinsics::new(500.0, 500.0, 10.0, 20.0);
        assert_eq!(CameraIntrinsics::from_matrix(&k.to_matrix())?, k);

        let mut skewed = k.to_matrix();
        skewed[0][1] = 1.0;
        assert!(CameraIntrinsics::from_matrix(&skewed).is_err());

        let zero = CameraIntrinsics::new(0.0, 500.0, 0.0, 0.0);
        assert!(zero.validate().is_err());

        Ok(())
    }

    #[test]
    fn test_negative_focal_rejected() {
        // a mirrored axis is not a pinhole camera
        for (fx, fy) in [(-1.0, 400.0), (400.0, -400.0), (-400.0, -400.0)] {
            assert!(matches!(
                CameraIntrinsics::new(fx, fy, 32.0, 32.0).validate(),
                Err(PnPError::InvalidIntrinsics(_))
            ));
        }
        assert!(CameraIntrinsics::from_matrix(&[[-500.0, 0.0, 1.0], [0.0, 500.0, 1.0], [0.0, 0.0, 1.0]]).is_err());
    }
}
