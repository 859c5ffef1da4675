//! Direct linear transform for 6 or more non coplanar correspondences.
//!
//! Gives the initial pose of the iterative solver.

use super::PnpError;
use nalgebra::{DMatrix, Isometry3, Matrix3, Point3, Rotation3, Translation3, UnitQuaternion, Vector2, Vector3};

/// Minimum number of correspondences of the linear system.
pub const DLT_MIN_POINTS: usize = 6;

/// Estimate the model to camera pose from model points and their
/// undistorted normalized image coordinates.
pub fn solve_dlt(
    world: &[Point3<f64>],
    normalized: &[Vector2<f64>],
) -> Result<Isometry3<f64>, PnpError> {
    let n = world.len().min(normalized.len());
    if n < DLT_MIN_POINTS {
        return Err(PnpError::NotEnoughPoints {
            needed: DLT_MIN_POINTS,
            got: n,
        });
    }

    let mut a = DMatrix::<f64>::zeros(2 * n, 12);
    for (i, (obj, img)) in world.iter().zip(normalized.iter()).enumerate() {
        let (xn, yn) = (img.x, img.y);
        let r0 = 2 * i;
        let r1 = r0 + 1;
        for (k, w) in [obj.x, obj.y, obj.z, 1.0].into_iter().enumerate() {
            a[(r0, k)] = w;
            a[(r0, 8 + k)] = -xn * w;
            a[(r1, 4 + k)] = w;
            a[(r1, 8 + k)] = -yn * w;
        }
    }

    let svd = a.svd(false, true);
    let v_t = svd.v_t.ok_or(PnpError::Degenerate("svd of the linear system failed"))?;
    let p = v_t.row(svd.singular_values.imin());

    #[rustfmt::skip]
    let m = Matrix3::new(
        p[0], p[1], p[2],
        p[4], p[5], p[6],
        p[8], p[9], p[10],
    );
    let mut t = Vector3::new(p[3], p[7], p[11]);

    let svd_m = m.svd(true, true);
    let u = svd_m.u.ok_or(PnpError::Degenerate("svd of the rotation block failed"))?;
    let v_t_m = svd_m.v_t.ok_or(PnpError::Degenerate("svd of the rotation block failed"))?;
    let mut r = u * v_t_m;
    let scale = svd_m.singular_values.sum() / 3.0;
    if scale.abs() < 1e-12 {
        return Err(PnpError::Degenerate("zero scale in the linear solution"));
    }
    t /= scale;

    // The null vector is defined up to sign.
    if m.determinant() < 0.0 {
        r = -r;
        t = -t;
    }

    let rotation = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(r));
    Ok(Isometry3::from_parts(Translation3::from(t), rotation))
}
