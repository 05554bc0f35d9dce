use nalgebra::SMatrix;

use crate::PnPError;

/// Computes the homography mapping four source points onto four destination points.
///
/// The direct linear transform system is solved through the null space of its
/// SVD; the result is scaled to unit Frobenius norm.
///
/// # Arguments
///
/// * `src` - The source points.
/// * `dst` - The destination points.
///
/// # Returns
///
/// The row-major homography `H` with `dst ~ H * src`.
pub fn homography_4pt(src: &[[f64; 2]; 4], dst: &[[f64; 2]; 4]) -> Result<[[f64; 3]; 3], PnPError> {
    // the ninth row stays zero so that the SVD is square and exposes the null vector
    let mut a = SMatrix::<f64, 9, 9>::zeros();
    for (i, (s, d)) in src.iter().zip(dst.iter()).enumerate() {
        let (x, y) = (s[0], s[1]);
        let (u, v) = (d[0], d[1]);

        let r0 = 2 * i;
        a[(r0, 0)] = x;
        a[(r0, 1)] = y;
        a[(r0, 2)] = 1.0;
        a[(r0, 6)] = -u * x;
        a[(r0, 7)] = -u * y;
        a[(r0, 8)] = -u;

        let r1 = 2 * i + 1;
        a[(r1, 3)] = x;
        a[(r1, 4)] = y;
        a[(r1, 5)] = 1.0;
        a[(r1, 6)] = -v * x;
        a[(r1, 7)] = -v * y;
        a[(r1, 8)] = -v;
    }

    let svd = a.svd(false, true);
    let v_t = svd
        .v_t
        .ok_or_else(|| PnPError::SvdFailed("right singular vectors not computed".to_string()))?;

    let h = v_t.row(svd.singular_values.imin());
    let norm = h.norm();
    if norm < f64::EPSILON {
        return Err(PnPError::DegenerateHomography(0.0));
    }

    let mut homo = [[0.0; 3]; 3];
    homo.iter_mut()
        .flatten()
        .zip(h.iter())
        .for_each(|(out, v)| *out = v / norm);

    let det = det3(&homo);
    if det.abs() < 1e-12 {
        return Err(PnPError::DegenerateHomography(det));
    }

    Ok(homo)
}

/// Applies a row-major homography to a point.
pub fn apply_homography(h: &[[f64; 3]; 3], p: [f64; 2]) -> [f64; 2] {
    let x = h[0][0] * p[0] + h[0][1] * p[1] + h[0][2];
    let y = h[1][0] * p[0] + h[1][1] * p[1] + h[1][2];
    let w = h[2][0] * p[0] + h[2][1] * p[1] + h[2][2];
    [x / w, y / w]
}

fn det3(m: &[[f64; 3]; 3]) -> f64 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1]) - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_homography_4pt() -> Result<(), Box<dyn std::error::Error>> {
        let src = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]];
        let dst = [[10.0, 10.0], [30.0, 12.0], [28.0, 35.0], [9.0, 30.0]];

        let h = homography_4pt(&src, &dst)?;
        for (s, d) in src.iter().zip(dst.iter()) {
            let p = apply_homography(&h, *s);
            assert_relative_eq!(p[0], d[0], epsilon = 1e-8);
            assert_relative_eq!(p[1], d[1], epsilon = 1e-8);
        }

        Ok(())
    }

    #[test]
    fn test_homography_4pt_degenerate() {
        let src = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]];
        let collinear = [[0.0, 0.0], [1.0, 1.0], [2.0, 2.0], [3.0, 3.0]];
        assert!(matches!(
            homography_4pt(&src, &collinear),
            Err(PnPError::DegenerateHomography(_))
        ));
    }
}
