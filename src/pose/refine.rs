//! Levenberg-Marquardt refinement of a pose on the pixel reprojection error.
//!
//! The pose is parametrized by a rotation vector and a translation. The
//! Jacobian is computed by central differences, which keeps lens distortion
//! in the model for free.

use super::PnpError;
use crate::camera::CameraInfo;
use nalgebra::{Isometry3, Matrix6, Point2, Point3, Translation3, UnitQuaternion, Vector3, Vector6};

const MAX_ITERATIONS: usize = 100;
const INITIAL_DAMPING: f64 = 1e-3;
const MAX_DAMPING: f64 = 1e10;
const STEP_TOLERANCE: f64 = 1e-12;
const DIFF_STEP: f64 = 1e-7;

fn to_isometry(params: &Vector6<f64>) -> Isometry3<f64> {
    let rotation = UnitQuaternion::from_scaled_axis(Vector3::new(params[0], params[1], params[2]));
    let translation = Translation3::new(params[3], params[4], params[5]);
    Isometry3::from_parts(translation, rotation)
}

fn to_params(pose: &Isometry3<f64>) -> Vector6<f64> {
    let r = pose.rotation.scaled_axis();
    let t = pose.translation.vector;
    Vector6::new(r.x, r.y, r.z, t.x, t.y, t.z)
}

struct Problem<'a> {
    camera: &'a CameraInfo,
    world: &'a [Point3<f64>],
    pixels: &'a [Point2<f64>],
}

impl Problem<'_> {
    /// Stacked `[dx0, dy0, dx1, dy1, ...]` reprojection residuals.
    fn residuals(&self, params: &Vector6<f64>) -> Vec<f64> {
        let pose = to_isometry(params);
        self.world
            .iter()
            .zip(self.pixels.iter())
            .flat_map(|(w, p)| {
                let r = self.camera.project(&pose, w) - p;
                [r.x, r.y]
            })
            .collect()
    }

    fn cost(residuals: &[f64]) -> f64 {
        residuals.iter().map(|r| r * r).sum()
    }

    /// Normal equations `(J^T J, J^T r)` at `params`.
    fn normal_equations(&self, params: &Vector6<f64>, residuals: &[f64]) -> (Matrix6<f64>, Vector6<f64>) {
        // Columns of the Jacobian, one per parameter.
        let columns: Vec<Vec<f64>> = (0..6)
            .map(|k| {
                let h = DIFF_STEP * params[k].abs().max(1.0);
                let mut plus = *params;
                let mut minus = *params;
                plus[k] += h;
                minus[k] -= h;
                self.residuals(&plus)
                    .iter()
                    .zip(self.residuals(&minus).iter())
                    .map(|(a, b)| (a - b) / (2.0 * h))
                    .collect()
            })
            .collect();

        let mut jtj = Matrix6::zeros();
        let mut jtr = Vector6::zeros();
        for i in 0..6 {
            for j in i..6 {
                let v: f64 = columns[i].iter().zip(&columns[j]).map(|(a, b)| a * b).sum();
                jtj[(i, j)] = v;
                jtj[(j, i)] = v;
            }
            jtr[i] = columns[i].iter().zip(residuals).map(|(a, b)| a * b).sum();
        }
        (jtj, jtr)
    }
}

/// Refine `initial` so that `world` projects onto `pixels`.
///
/// Returns the refined pose and its root mean square reprojection error.
pub fn refine_pose(
    camera: &CameraInfo,
    world: &[Point3<f64>],
    pixels: &[Point2<f64>],
    initial: &Isometry3<f64>,
) -> Result<(Isometry3<f64>, f64), PnpError> {
    let problem = Problem {
        camera,
        world,
        pixels,
    };
    let mut params = to_params(initial);
    let mut residuals = problem.residuals(&params);
    let mut cost = Problem::cost(&residuals);
    if !cost.is_finite() {
        return Err(PnpError::Degenerate("initial pose does not project"));
    }

    let mut damping = INITIAL_DAMPING;
    for _ in 0..MAX_ITERATIONS {
        let (jtj, jtr) = problem.normal_equations(&params, &residuals);
        let mut improved = false;
        while damping < MAX_DAMPING {
            let mut lhs = jtj;
            for i in 0..6 {
                lhs[(i, i)] += damping * jtj[(i, i)].max(1e-12);
            }
            let step = match lhs.cholesky() {
                Some(chol) => chol.solve(&(-jtr)),
                None => {
                    damping *= 10.0;
                    continue;
                }
            };
            let candidate = params + step;
            let candidate_residuals = problem.residuals(&candidate);
            let candidate_cost = Problem::cost(&candidate_residuals);
            if candidate_cost.is_finite() && candidate_cost < cost {
                params = candidate;
                residuals = candidate_residuals;
                cost = candidate_cost;
                damping = (damping / 10.0).max(1e-12);
                improved = step.norm() > STEP_TOLERANCE;
                break;
            }
            damping *= 10.0;
        }
        if !improved {
            break;
        }
    }

    let rms = (cost / world.len().max(1) as f64).sqrt();
    Ok((to_isometry(&params), rms))
}
