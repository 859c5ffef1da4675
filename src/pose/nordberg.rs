// Copyright (c) 2018 Michael Persson
// Adapted to openMVG by Romain Janvier and Pierre Moulon
// Adapted to Rust by Matthieu Pizenberg

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Minimal P3P solver from
//! "Lambda Twist: An Accurate Fast Robust Perspective Three Point (P3P) Solver"
//! Persson, M. and Nordberg, K. ECCV 2018.
//!
//! Three model points and their bearing vectors give up to four poses.
//! [`solve_p4p`] uses a fourth correspondence to keep the right one.

use super::PnpError;
use crate::camera::CameraInfo;
use nalgebra::{Isometry3, Matrix3, Point2, Point3, Translation3, UnitQuaternion, Vector3};

type Iso3 = Isometry3<f64>;
type Mat3 = Matrix3<f64>;
type Vec3 = Vector3<f64>;

/// Return 0 to 4 poses $(\bm{R}, \bm{t})$ satisfying
/// $$
/// \lambda_i \ \bm{y_i} = \bm{R \ x_i} + \bm{t},\quad i \in \\{1, 2, 3\\}
/// $$
///
/// - $\bm{x_i}$ are the model points.
/// - $\bm{y_i}$ are the bearing vectors, e.g. $(u_i, v_i, 1)$ on the normalized image plane.
/// - $\lambda_i$ are the signed distances from the camera.
///
/// The returned isometries map model coordinates to camera coordinates.
pub fn solve(world_3d_points: &[Point3<f64>; 3], bearing_vectors: &[Vec3; 3]) -> Vec<Iso3> {
    compute_poses_nordberg(world_3d_points, bearing_vectors)
        .into_iter()
        .filter(|(rot, trans)| {
            rot.iter().chain(trans.iter()).all(|v| v.is_finite())
        })
        .map(|(rot, trans)| {
            let rotation = UnitQuaternion::from_matrix(&rot);
            Iso3::from_parts(Translation3::from(trans), rotation)
        })
        .collect()
}

/// Solve P3P on the first three correspondences and keep the candidate with
/// the smallest pixel reprojection error on the fourth.
pub fn solve_p4p(
    world: &[Point3<f64>],
    pixels: &[Point2<f64>],
    camera: &CameraInfo,
) -> Result<Iso3, PnpError> {
    if world.len() < 4 || pixels.len() < 4 {
        return Err(PnpError::NotEnoughPoints {
            needed: 4,
            got: world.len().min(pixels.len()),
        });
    }
    let bearing = |p: &Point2<f64>| camera.normalize(p).push(1.0);
    let candidates = solve(
        &[world[0], world[1], world[2]],
        &[bearing(&pixels[0]), bearing(&pixels[1]), bearing(&pixels[2])],
    );

    candidates
        .into_iter()
        .map(|pose| {
            let error = (camera.project(&pose, &world[3]) - pixels[3]).norm_squared();
            (pose, error)
        })
        .filter(|(_, error)| error.is_finite())
        .min_by(|(_, a), (_, b)| a.total_cmp(b))
        .map(|(pose, _)| pose)
        .ok_or(PnpError::NoSolution)
}

// Private functions ###########################################################

/// Gauss-Newton on the depths `lambda`.
///
/// `aij` are squared model distances, `bij` are `-2 cos` of the bearing angles.
// Rarely improves after two iterations, 5 are run.
#[allow(clippy::similar_names)]
fn gauss_newton_refine_lambda(
    lambda: Vec3,
    a12: f64,
    a13: f64,
    a23: f64,
    b12: f64,
    b13: f64,
    b23: f64,
) -> Vec3 {
    let compute_residual = |l: &Vec3| {
        let l1 = l.x;
        let l2 = l.y;
        let l3 = l.z;
        let r1 = l1 * l1 + l2 * l2 + b12 * l1 * l2 - a12;
        let r2 = l1 * l1 + l3 * l3 + b13 * l1 * l3 - a13;
        let r3 = l2 * l2 + l3 * l3 + b23 * l2 * l3 - a23;
        (l1, l2, l3, Vec3::new(r1, r2, r3))
    };
    let (mut l1, mut l2, mut l3, mut res) = compute_residual(&lambda);
    for _ in 0..5 {
        if l1_norm(res) < 1e-10 {
            break;
        }

        let dr1dl1 = 2.0 * l1 + b12 * l2;
        let dr1dl2 = 2.0 * l2 + b12 * l1;
        let dr2dl1 = 2.0 * l1 + b13 * l3;
        let dr2dl3 = 2.0 * l3 + b13 * l1;
        let dr3dl2 = 2.0 * l2 + b23 * l3;
        let dr3dl3 = 2.0 * l3 + b23 * l2;
        let det = 1.0 / (-dr1dl1 * dr2dl3 * dr3dl2 - dr1dl2 * dr2dl1 * dr3dl3);

        #[rustfmt::skip]
        let jacobian = Mat3::new(
            -dr2dl3 * dr3dl2, -dr1dl2 * dr3dl3,  dr1dl2 * dr2dl3,
            -dr2dl1 * dr3dl3,  dr1dl1 * dr3dl3, -dr1dl1 * dr2dl3,
             dr2dl1 * dr3dl2, -dr1dl1 * dr3dl2, -dr1dl2 * dr2dl1,
        );
        let lambda_new = Vec3::new(l1, l2, l3) - det * (jacobian * res);
        let (l1_new, l2_new, l3_new, res_new) = compute_residual(&lambda_new);
        if l1_norm(res_new) > l1_norm(res) {
            break;
        } else {
            l1 = l1_new;
            l2 = l2_new;
            l3 = l3_new;
            res = res_new;
        }
    }
    Vec3::new(l1, l2, l3)
}

/// Sum of magnitudes.
#[inline]
fn l1_norm(v: Vec3) -> f64 {
    v.x.abs() + v.y.abs() + v.z.abs()
}

/// Roots of `r^2 + b r + c`, with `false` when they are complex.
fn root2real(b: f64, c: f64) -> (bool, f64, f64) {
    let discriminant = b * b - 4.0 * c;
    if discriminant < 0.0 {
        let root = 0.5 * b;
        (false, root, root)
    } else if b < 0.0 {
        let y = discriminant.sqrt();
        (true, 0.5 * (-b + y), 0.5 * (-b - y))
    } else {
        let y = discriminant.sqrt();
        (true, 2.0 * c / (-b + y), 2.0 * c / (-b - y))
    }
}

/// One real root of `r^3 + b r^2 + c r + d`, the one with the steepest slope.
///
/// Newton iterations start outside the stationary points when there are any.
#[allow(clippy::many_single_char_names)]
fn cube_root(b: f64, c: f64, d: f64) -> f64 {
    // Choose an initial solution.
    let mut r0;
    // Not monotonic.
    if b * b >= 3.0 * c {
        // Two stationary points t1 < t2.
        let v = (b * b - 3.0 * c).sqrt();
        let t1 = (-b - v) / 3.0;

        // Check if h(t1) > 0, in this case make a 2-order approx of h around t1.
        let mut k = ((t1 + b) * t1 + c) * t1 + d;

        if k > 0.0 {
            // Find leftmost root of 0.5 * (r0 - t1)^2 * (6 * t1 + 2 * b) + k = 0.
            r0 = t1 - (-k / (3.0 * t1 + b)).sqrt();
        } else {
            let t2 = (-b + v) / 3.0;
            k = ((t2 + b) * t2 + c) * t2 + d;
            // Find rightmost root of 0.5 * (r0 - t2)^2 * (6 * t2 + 2 * b) + k1 = 0.
            r0 = t2 + (-k / (3.0 * t2 + b)).sqrt();
        }
    } else {
        r0 = -b / 3.0;
        if ((3.0 * r0 + 2.0 * b) * r0 + c).abs() < 1e-4 {
            r0 += 1.0;
        }
    }

    // Between 7 and 50 Newton steps.
    for _ in 0..7 {
        let fx = ((r0 + b) * r0 + c) * r0 + d;
        let fpx = (3.0 * r0 + 2.0 * b) * r0 + c;
        r0 -= fx / fpx;
    }
    for _ in 0..43 {
        let fx = ((r0 + b) * r0 + c) * r0 + d;
        if fx.abs() > 1e-13 {
            let fpx = (3.0 * r0 + 2.0 * b) * r0 + c;
            r0 -= fx / fpx;
        } else {
            break;
        }
    }
    r0
}

/// Eigen decomposition of a symmetric matrix with a zero eigenvalue.
fn eigen_decomposition_singular(x: Mat3) -> (Mat3, Vec3) {
    let mut eigenvalues = Vec3::zeros();
    #[rustfmt::skip]
    let mut v3 = Vec3::new(
        x[1] * x[5] - x[2] * x[4],
        x[2] * x[3] - x[5] * x[0],
        x[4] * x[0] - x[1] * x[3],
    );
    v3.normalize_mut();

    let x12_sqr = x.m12 * x.m12;
    let b = -x.m11 - x.m22 - x.m33;
    let c = -x12_sqr - x.m13 * x.m13 - x.m23 * x.m23 + x.m11 * (x.m22 + x.m33) + x.m22 * x.m33;
    let (_, mut e1, mut e2) = root2real(b, c);
    if e1.abs() < e2.abs() {
        std::mem::swap(&mut e1, &mut e2);
    }
    eigenvalues[0] = e1;
    eigenvalues[1] = e2;

    let mx0011 = -x.m11 * x.m22;
    let prec_0 = x.m12 * x.m23 - x.m13 * x.m22;
    let prec_1 = x.m12 * x.m13 - x.m11 * x.m23;

    let compute_eigen_vector = |e: f64| {
        let tmp = 1.0 / (e * (x.m11 + x.m22) + mx0011 - e * e + x12_sqr);
        let mut a1 = -(e * x.m13 + prec_0) * tmp;
        let mut a2 = -(e * x.m23 + prec_1) * tmp;
        let rnorm = 1.0 / (a1 * a1 + a2 * a2 + 1.0).sqrt();
        a1 *= rnorm;
        a2 *= rnorm;
        Vec3::new(a1, a2, rnorm)
    };
    let v1 = compute_eigen_vector(e1);
    let v2 = compute_eigen_vector(e2);

    #[rustfmt::skip]
    let eigenvectors = Mat3::new(
        v1[0], v2[0], v3[0],
        v1[1], v2[1], v3[1],
        v1[2], v2[2], v3[2],
    );

    (eigenvectors, eigenvalues)
}

/// Candidate `(R, t)` for three model points and their bearings.
///
/// Bearings need not be unit length.
#[allow(clippy::similar_names)]
fn compute_poses_nordberg(
    world_3d_points: &[Point3<f64>; 3],
    bearing_vectors: &[Vec3; 3],
) -> Vec<(Mat3, Vec3)> {
    // Extraction of 3D points vectors
    let wp1 = world_3d_points[0].coords;
    let wp2 = world_3d_points[1].coords;
    let wp3 = world_3d_points[2].coords;

    // Extraction of feature vectors
    let f1 = bearing_vectors[0];
    let f2 = bearing_vectors[1];
    let f3 = bearing_vectors[2];

    let f1 = f1.normalize();
    let f2 = f2.normalize();
    let f3 = f3.normalize();

    // Compute vectors between 3D points.
    let d12 = wp1 - wp2;
    let d13 = wp1 - wp3;
    let d23 = wp2 - wp3;
    let d12xd13 = d12.cross(&d13);

    // "a12" is the squared distance between 3D points 1 and 2.
    let a12 = d12.norm_squared();
    let a13 = d13.norm_squared();
    let a23 = d23.norm_squared();

    // "c31" is the cosine between bearing vectors 3 and 1.
    let c12 = f1.dot(&f2);
    let c23 = f2.dot(&f3);
    let c31 = f3.dot(&f1);
    let blob = c12 * c23 * c31 - 1.0;

    // "s31" is the sine between bearing vectors 3 and 1.
    let s12_sqr = 1.0 - c12 * c12;
    let s23_sqr = 1.0 - c23 * c23;
    let s31_sqr = 1.0 - c31 * c31;

    // Other useful constants.
    let b12 = -2.0 * c12;
    let b13 = -2.0 * c31;
    let b23 = -2.0 * c23;

    // Cubic coefficients, c[0-3] of equation (10) in the paper.
    let p3 = a13 * (a23 * s31_sqr - a13 * s23_sqr);
    let p2 =
        2.0 * blob * a23 * a13 + a13 * (2.0 * a12 + a13) * s23_sqr + a23 * (a23 - a12) * s31_sqr;
    let p1 = a23 * (a13 - a23) * s12_sqr
        - a12 * a12 * s23_sqr
        - 2.0 * a12 * (blob * a23 + a13 * s23_sqr);
    let p0 = a12 * (a12 * s23_sqr - a23 * s12_sqr);

    // Get sharpest real root of above.
    let g = cube_root(p2 / p3, p1 / p3, p0 / p3);

    // Build the matrix called D0 in the paper.
    let d0_00 = a23 * (1.0 - g);
    let d0_01 = -(a23 * c12);
    let d0_02 = a23 * c31 * g;
    let d0_11 = a23 - a12 + a13 * g;
    let d0_12 = -c23 * (a13 * g - a12);
    let d0_22 = g * (a13 - a23) - a12;
    #[rustfmt::skip]
    let d0_mat = Mat3::new(
        d0_00, d0_01, d0_02,
        d0_01, d0_11, d0_12,
        d0_02, d0_12, d0_22,
    );

    // Get sorted eigenvectors and eigenvalues of the singular matrix D0.
    let (eig_vectors, eig_values) = eigen_decomposition_singular(d0_mat);

    // Initialize the possible depths triplets for the three image points.
    // There might be between 0 and 4 possible solutions.
    let mut lambdas = Vec::with_capacity(4);

    // Solve the four possible solutions for the depths values.
    let eigen_ratio = (0.0_f64.max(-eig_values[1] / eig_values[0])).sqrt();

    // Helper closure to compute quadratic coefficients.
    // CF equation (15) in paper.
    let quadratic_coefficients = |ratio: f64| {
        let w2 = 1.0 / (ratio * eig_vectors.m12 - eig_vectors.m11);
        let w0 = w2 * (eig_vectors.m21 - ratio * eig_vectors.m22);
        let w1 = w2 * (eig_vectors.m31 - ratio * eig_vectors.m32);

        let a = 1.0 / ((a13 - a12) * w1 * w1 - a12 * b13 * w1 - a12);
        let b = a * (a13 * b12 * w1 - a12 * b13 * w0 - 2.0 * w0 * w1 * (a12 - a13));
        let c = a * ((a13 - a12) * w0 * w0 + a13 * b12 * w0 + a13);
        (w0, w1, b, c)
    };

    // Helper closure to estimate possible depths values.
    // CF equation (16) in paper.
    let possible_depths = |tau: f64, w0: f64, w1: f64| {
        let d = a23 / (tau * (b23 + tau) + 1.0);
        if d > 0.0 {
            let l2 = d.sqrt();
            let l3 = tau * l2;
            let l1 = w0 * l2 + w1 * l3;
            (true, l1, l2, l3)
        } else {
            (false, 0.0, 0.0, 0.0)
        }
    };

    // Helper closure pushing one potential solution.
    let mut push_solution = |tau: f64, w0: f64, w1: f64| {
        if tau > 0.0 {
            let (valid, l1, l2, l3) = possible_depths(tau, w0, w1);
            if valid && l1 >= 0.0 {
                lambdas.push(Vec3::new(l1, l2, l3));
            }
        }
    };

    // Helper closure pushing two potential solutions
    // corresponding to a given eigen value ratio.
    let mut push_solutions_to_lambdas = |ratio: f64| {
        let (w0, w1, b, c) = quadratic_coefficients(ratio);
        if b * b - 4.0 * c >= 0.0 {
            let (_, tau1, tau2) = root2real(b, c);
            push_solution(tau1, w0, w1);
            push_solution(tau2, w0, w1);
        }
    };

    push_solutions_to_lambdas(eigen_ratio);
    push_solutions_to_lambdas(-eigen_ratio);

    // Recover the rotation R and translation t such that
    // lambda_i * y_i = R * x_i + t
    #[rustfmt::skip]
    let x_mat = Mat3::new(
        d12[0], d13[0], d12xd13[0],
        d12[1], d13[1], d12xd13[1],
        d12[2], d13[2], d12xd13[2],
    );
    // Collinear model points have no unique solution.
    let x_mat = match x_mat.try_inverse() {
        Some(inverse) => inverse,
        None => return Vec::new(),
    };

    lambdas
        .iter()
        .map(|&lambda| {
            // Refine estimated depth values.
            let lambda_refined = gauss_newton_refine_lambda(lambda, a12, a13, a23, b12, b13, b23);

            let ry1 = lambda_refined[0] * f1;
            let ry2 = lambda_refined[1] * f2;
            let ry3 = lambda_refined[2] * f3;

            let yd1 = ry1 - ry2;
            let yd2 = ry1 - ry3;
            let yd1xd2 = yd1.cross(&yd2);

            #[rustfmt::skip]
            let y_mat = Mat3::new(
                yd1[0], yd2[0], yd1xd2[0],
                yd1[1], yd2[1], yd1xd2[1],
                yd1[2], yd2[2], yd1xd2[2],
            );

            let rot = y_mat * x_mat;
            (rot, ry1 - rot * wp1)
        })
        .collect()
}

// Tests #######################################################################

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_relative_eq, relative_eq};

    const EPSILON_APPROX: f64 = 1e-6;

    #[test]
    fn manual_case() {
        // Define some points in camera coordinates (with z > 0).
        let p_cam = [
            Point3::new(-0.228_125, -0.061_458_334, 1.0),
            Point3::new(0.418_75, -0.581_25, 2.0),
            Point3::new(1.128_125, 0.878_125, 3.0),
        ];

        // Define the camera pose.
        let rot = UnitQuaternion::from_euler_angles(0.1, 0.2, 0.3);
        let trans = Translation3::new(0.1, 0.2, 0.3);
        let pose = Iso3::from_parts(trans, rot);

        // Compute world coordinates.
        let p_world = p_cam.map(|p| pose.inverse() * p);
        let bearings = p_cam.map(|p| p.coords);

        // Estimate potential poses with P3P.
        let poses = solve(&p_world, &bearings);
        assert!(!poses.is_empty());

        // One of them is the ground truth.
        assert!(poses.iter().any(|p| {
            relative_eq!(rot, p.rotation, epsilon = EPSILON_APPROX)
                && relative_eq!(trans, p.translation, epsilon = EPSILON_APPROX)
        }));
    }

    #[test]
    fn fourth_point_selects_pose() {
        let camera = CameraInfo::pinhole(500.0, 500.0, 320.0, 240.0);
        let truth = Iso3::from_parts(
            Translation3::new(0.05, -0.02, 0.6),
            UnitQuaternion::from_euler_angles(0.4, -0.3, 0.2),
        );
        let world = [
            Point3::new(0.05, -0.05, 0.05),
            Point3::new(-0.05, -0.05, 0.05),
            Point3::new(-0.05, 0.05, 0.05),
            Point3::new(0.05, -0.05, -0.05),
        ];
        let pixels = world.map(|p| camera.project(&truth, &p));

        let pose = solve_p4p(&world, &pixels, &camera).unwrap();
        assert_relative_eq!(pose.rotation, truth.rotation, epsilon = 1e-6);
        assert_relative_eq!(pose.translation.vector, truth.translation.vector, epsilon = 1e-6);
    }

    #[test]
    fn p4p_needs_four_points() {
        let camera = CameraInfo::pinhole(500.0, 500.0, 320.0, 240.0);
        let world = [Point3::origin(); 3];
        let pixels = [Point2::origin(); 3];
        assert!(matches!(
            solve_p4p(&world, &pixels, &camera),
            Err(PnpError::NotEnoughPoints { needed: 4, got: 3 })
        ));
    }
}
