use glam::{DMat3, DQuat, DVec3};

/// Converts a row-major rotation matrix into a glam matrix.
#[inline]
pub fn to_dmat3(m: &[[f64; 3]; 3]) -> DMat3 {
    DMat3::from_cols_array_2d(m).transpose()
}

/// Converts a glam matrix into a row-major rotation matrix.
#[inline]
pub fn from_dmat3(m: &DMat3) -> [[f64; 3]; 3] {
    m.transpose().to_cols_array_2d()
}

/// Converts a row-major rotation matrix to a unit quaternion `[w, x, y, z]`.
pub fn matrix_to_quaternion(m: &[[f64; 3]; 3]) -> [f64; 4] {
    let q = DQuat::from_mat3(&to_dmat3(m)).normalize();
    // keep w non-negative so equal rotations give equal quaternions
    let q = if q.w < 0.0 { -q } else { q };
    [q.w, q.x, q.y, q.z]
}

/// Converts a quaternion `[w, x, y, z]` to a row-major rotation matrix.
///
/// The quaternion does not need to be normalized.
pub fn quaternion_to_matrix(q: [f64; 4]) -> [[f64; 3]; 3] {
    let q = DQuat::from_xyzw(q[1], q[2], q[3], q[0]).normalize();
    from_dmat3(&DMat3::from_quat(q))
}

/// Converts a row-major rotation matrix to a rotation vector (axis times angle, radians).
pub fn matrix_to_rvec(m: &[[f64; 3]; 3]) -> [f64; 3] {
    let q = DQuat::from_mat3(&to_dmat3(m)).normalize();
    let q = if q.w < 0.0 { -q } else { q };
    let (axis, angle) = q.to_axis_angle();
    let v = axis * angle;
    [v.x, v.y, v.z]
}

/// Converts a rotation vector to a row-major rotation matrix.
pub fn rvec_to_matrix(rvec: [f64; 3]) -> [[f64; 3]; 3] {
    let v = DVec3::from_array(rvec);
    let angle = v.length();
    if angle < 1e-12 {
        return from_dmat3(&DMat3::IDENTITY);
    }
    from_dmat3(&DMat3::from_axis_angle(v / angle, angle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn rot_z(angle: f64) -> [[f64; 3]; 3] {
        let (s, c) = angle.sin_cos();
        [[c, -s, 0.0], [s, c, 0.0], [0.0, 0.0, 1.0]]
    }

    #[test]
    fn test_quaternion_round_trip() {
        let m = rot_z(0.7);
        let q = matrix_to_quaternion(&m);
        assert_relative_eq!(q[0], (0.35f64).cos(), epsilon = 1e-12);
        assert_relative_eq!(q[3], (0.35f64).sin(), epsilon = 1e-12);

        let back = quaternion_to_matrix(q);
        m.iter().flatten().zip(back.iter().flatten()).for_each(|(a, b)| {
            assert_relative_eq!(a, b, epsilon = 1e-12);
        });
    }

    #[test]
    fn test_rvec() {
        let m = rot_z(-0.4);
        let rvec = matrix_to_rvec(&m);
        assert_relative_eq!(rvec[0], 0.0, epsilon = 1e-12);
        assert_relative_eq!(rvec[1], 0.0, epsilon = 1e-12);
        assert_relative_eq!(rvec[2], -0.4, epsilon = 1e-12);

        let back = rvec_to_matrix(rvec);
        m.iter().flatten().zip(back.iter().flatten()).for_each(|(a, b)| {
            assert_relative_eq!(a, b, epsilon = 1e-12);
        });

        assert_eq!(rvec_to_matrix([0.0; 3]), from_dmat3(&DMat3::IDENTITY));
    }
}
