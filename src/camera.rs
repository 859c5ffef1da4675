//! Pinhole camera with lens distortion.
//!
//! Distortion coefficients follow the usual `k1 k2 p1 p2 [k3 [k4 k5 k6]]`
//! ordering. Missing coefficients are zero, so an empty list is an ideal lens.

use nalgebra::{Isometry3, Matrix3, Point2, Point3, Vector2};
use serde::{Deserialize, Serialize};

const UNDISTORT_ITERATIONS: usize = 20;
const UNDISTORT_EPSILON: f64 = 1e-24;

/// Calibrated camera intrinsics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraInfo {
    /// Row-major intrinsic matrix `[[fx, 0, cx], [0, fy, cy], [0, 0, 1]]`.
    pub intrinsics: [[f64; 3]; 3],
    /// Distortion coefficients.
    #[serde(default)]
    pub distortion: Vec<f64>,
}

impl CameraInfo {
    /// Camera from a row-major intrinsic matrix and distortion coefficients.
    pub fn new(intrinsics: [[f64; 3]; 3], distortion: Vec<f64>) -> Self {
        Self {
            intrinsics,
            distortion,
        }
    }

    /// Distortion free camera with the given focal lengths and principal point.
    pub fn pinhole(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self::new([[fx, 0.0, cx], [0.0, fy, cy], [0.0, 0.0, 1.0]], Vec::new())
    }

    /// Intrinsic matrix.
    pub fn matrix(&self) -> Matrix3<f64> {
        let k = &self.intrinsics;
        #[rustfmt::skip]
        let m = Matrix3::new(
            k[0][0], k[0][1], k[0][2],
            k[1][0], k[1][1], k[1][2],
            k[2][0], k[2][1], k[2][2],
        );
        m
    }

    fn coefficient(&self, index: usize) -> f64 {
        self.distortion.get(index).copied().unwrap_or(0.0)
    }

    /// Apply lens distortion to a point on the normalized image plane.
    pub fn distort(&self, p: &Vector2<f64>) -> Vector2<f64> {
        let (k1, k2, p1, p2) = (
            self.coefficient(0),
            self.coefficient(1),
            self.coefficient(2),
            self.coefficient(3),
        );
        let (k3, k4, k5, k6) = (
            self.coefficient(4),
            self.coefficient(5),
            self.coefficient(6),
            self.coefficient(7),
        );
        let (x, y) = (p.x, p.y);
        let r2 = x * x + y * y;
        let r4 = r2 * r2;
        let r6 = r4 * r2;
        let radial = (1.0 + k1 * r2 + k2 * r4 + k3 * r6) / (1.0 + k4 * r2 + k5 * r4 + k6 * r6);
        Vector2::new(
            x * radial + 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x),
            y * radial + p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y,
        )
    }

    /// Project a point given in camera coordinates to pixels.
    pub fn project_camera_point(&self, p: &Point3<f64>) -> Point2<f64> {
        let normalized = Vector2::new(p.x / p.z, p.y / p.z);
        let d = self.distort(&normalized);
        let k = &self.intrinsics;
        Point2::new(
            k[0][0] * d.x + k[0][1] * d.y + k[0][2],
            k[1][1] * d.y + k[1][2],
        )
    }

    /// Project a model point through `pose` (model to camera) to pixels.
    pub fn project(&self, pose: &Isometry3<f64>, p: &Point3<f64>) -> Point2<f64> {
        self.project_camera_point(&(pose * p))
    }

    /// Map a pixel to the undistorted normalized image plane.
    ///
    /// Distortion is inverted by fixed point iteration.
    pub fn normalize(&self, pixel: &Point2<f64>) -> Vector2<f64> {
        let k = &self.intrinsics;
        let y = (pixel.y - k[1][2]) / k[1][1];
        let x = (pixel.x - k[0][2] - k[0][1] * y) / k[0][0];
        let distorted = Vector2::new(x, y);
        if self.distortion.iter().all(|&c| c == 0.0) {
            return distorted;
        }

        let mut undistorted = distorted;
        for _ in 0..UNDISTORT_ITERATIONS {
            let error = self.distort(&undistorted) - distorted;
            undistorted -= error;
            if error.norm_squared() < UNDISTORT_EPSILON {
                break;
            }
        }
        undistorted
    }
}
