//! Pose of one object instance from its 2D cuboid.
//!
//! The solving method depends on how many vertices were detected:
//!
//!  - fewer than 4: no pose,
//!  - 4 or 5: the first 4 go through the minimal P3P solver, the fourth
//!    correspondence choosing among its candidate poses,
//!  - 6 or more: a linear initial pose refined on the reprojection error.
//!
//! The solved pose is then used to reproject the whole model, so every
//! returned cuboid has all of its vertices.

mod dlt;
pub mod nordberg;
mod refine;

use crate::camera::CameraInfo;
use crate::cuboid::{Cuboid2D, Cuboid3D};
use nalgebra::{Isometry3, Point2, Point3, Translation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

pub use dlt::DLT_MIN_POINTS;

/// Correspondences used by the minimal method.
pub const MINIMAL_POINTS: usize = 4;

/// Why a pose could not be computed.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PnpError {
    /// Fewer correspondences than the method requires.
    #[error("need {needed} correspondences, got {got}")]
    NotEnoughPoints {
        /// Required by the method.
        needed: usize,
        /// Available.
        got: usize,
    },
    /// The point configuration does not constrain the pose.
    #[error("degenerate configuration: {0}")]
    Degenerate(&'static str),
    /// No candidate pose fits the correspondences.
    #[error("no pose fits the correspondences")]
    NoSolution,
}

/// Rigid transform from model space to camera space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    /// Translation, in model units.
    pub position: Vector3<f64>,
    /// Rotation vector: axis times angle in radians.
    pub orientation: Vector3<f64>,
}

impl Pose {
    /// Pose of an isometry.
    pub fn from_isometry(iso: &Isometry3<f64>) -> Self {
        Self {
            position: iso.translation.vector,
            orientation: iso.rotation.scaled_axis(),
        }
    }

    /// Isometry of the pose.
    pub fn to_isometry(&self) -> Isometry3<f64> {
        Isometry3::from_parts(
            Translation3::from(self.position),
            UnitQuaternion::from_scaled_axis(self.orientation),
        )
    }
}

/// Solver chosen for a number of detected vertices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PnpMethod {
    /// P3P with a fourth point for disambiguation.
    Minimal,
    /// Linear estimate refined with Levenberg-Marquardt.
    Iterative,
}

impl PnpMethod {
    /// Method for `count` correspondences, `None` below 4.
    pub fn for_vertex_count(count: usize) -> Option<Self> {
        if count < MINIMAL_POINTS {
            None
        } else if count < DLT_MIN_POINTS {
            Some(PnpMethod::Minimal)
        } else {
            Some(PnpMethod::Iterative)
        }
    }
}

/// Flip a translation that points behind the camera.
pub fn correct_depth_sign(position: Vector3<f64>) -> Vector3<f64> {
    if position.z < 0.0 {
        -position
    } else {
        position
    }
}

/// Result of a successful solve.
#[derive(Debug, Clone, PartialEq)]
pub struct PoseEstimate {
    /// The model reprojected through the pose, in image pixels.
    pub cuboid: Cuboid2D,
    /// Solved pose, depth sign corrected.
    pub pose: Pose,
    /// Method that produced the pose.
    pub method: PnpMethod,
}

/// Solves poses of instances of one object model seen by one camera.
#[derive(Debug, Clone)]
pub struct PoseSolver {
    camera: CameraInfo,
    model: Cuboid3D,
    scale: f64,
}

impl PoseSolver {
    /// Solver for `model` seen by `camera`.
    ///
    /// `scale` converts cuboid coordinates to image pixels.
    pub fn new(camera: CameraInfo, model: Cuboid3D, scale: f64) -> Self {
        Self {
            camera,
            model,
            scale,
        }
    }

    /// Camera of the solver.
    pub fn camera(&self) -> &CameraInfo {
        &self.camera
    }

    /// Object model of the solver.
    pub fn model(&self) -> &Cuboid3D {
        &self.model
    }

    /// Pose of one instance, `None` when it has too few vertices or its
    /// geometry is degenerate.
    pub fn solve(&self, cuboid: &Cuboid2D) -> Option<PoseEstimate> {
        let (world, pixels): (Vec<Point3<f64>>, Vec<Point2<f64>>) = cuboid
            .available_vertices()
            .map(|(i, p)| (self.model.vertices()[i], Point2::from(p.coords * self.scale)))
            .unzip();

        let method = match PnpMethod::for_vertex_count(world.len()) {
            Some(method) => method,
            None => {
                debug!("skipping instance with {} vertices", world.len());
                return None;
            }
        };
        debug!("solving {} correspondences with {:?}", world.len(), method);

        let solved = match method {
            PnpMethod::Minimal => nordberg::solve_p4p(
                &world[..MINIMAL_POINTS],
                &pixels[..MINIMAL_POINTS],
                &self.camera,
            ),
            PnpMethod::Iterative => self.solve_iterative(&world, &pixels),
        };
        let iso = match solved {
            Ok(iso) => iso,
            Err(err) => {
                warn!("no pose for instance at {:?}: {}", cuboid.center(), err);
                return None;
            }
        };

        self.estimate(&iso, method, *cuboid.center())
    }

    /// Reproject the model through `iso`, then report the depth corrected pose.
    fn estimate(
        &self,
        iso: &Isometry3<f64>,
        method: PnpMethod,
        center: Point2<f64>,
    ) -> Option<PoseEstimate> {
        let pose = Pose::from_isometry(iso);
        if !pose.position.iter().chain(pose.orientation.iter()).all(|v| v.is_finite()) {
            warn!("non finite pose for instance at {:?}", center);
            return None;
        }

        let projected = Cuboid2D::new(
            self.camera.project(iso, self.model.center()),
            self.model.vertices().map(|v| Some(self.camera.project(iso, &v))),
        );
        Some(PoseEstimate {
            cuboid: projected,
            pose: Pose {
                position: correct_depth_sign(pose.position),
                orientation: pose.orientation,
            },
            method,
        })
    }

    /// Linear and minimal initial poses, each refined, best one kept.
    fn solve_iterative(
        &self,
        world: &[Point3<f64>],
        pixels: &[Point2<f64>],
    ) -> Result<Isometry3<f64>, PnpError> {
        let normalized: Vec<_> = pixels.iter().map(|p| self.camera.normalize(p)).collect();
        let initial = [
            dlt::solve_dlt(world, &normalized),
            nordberg::solve_p4p(world, pixels, &self.camera),
        ];

        let mut best: Option<(Isometry3<f64>, f64)> = None;
        let mut last_error = PnpError::NoSolution;
        for start in initial {
            let refined = start.and_then(|iso| refine::refine_pose(&self.camera, world, pixels, &iso));
            match refined {
                Ok((iso, rms)) => {
                    debug!("refined reprojection error {:.4} px", rms);
                    if best.map_or(true, |(_, b)| rms < b) {
                        best = Some((iso, rms));
                    }
                }
                Err(err) => {
                    debug!("initial pose rejected: {}", err);
                    last_error = err;
                }
            }
        }
        best.map(|(iso, _)| iso).ok_or(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cuboid::{CuboidDimensions, VERTEX_COUNT};
    use approx::assert_relative_eq;
    use quickcheck_macros::quickcheck;

    fn model() -> Cuboid3D {
        Cuboid3D::from_dimensions(
            Point3::origin(),
            CuboidDimensions {
                width: 10.0,
                height: 20.0,
                length: 6.0,
            },
        )
    }

    fn camera() -> CameraInfo {
        CameraInfo::new(
            [[640.0, 0.0, 320.0], [0.0, 640.0, 240.0], [0.0, 0.0, 1.0]],
            vec![0.05, -0.01, 0.0, 0.0, 0.0],
        )
    }

    fn truth() -> Isometry3<f64> {
        Isometry3::from_parts(
            Translation3::new(3.0, -2.0, 80.0),
            UnitQuaternion::from_euler_angles(0.4, -0.5, 0.3),
        )
    }

    /// Detected cuboid in map pixels, keeping only the vertices in `keep`.
    fn observed(scale: f64, keep: &[usize]) -> Cuboid2D {
        let (camera, model, pose) = (camera(), model(), truth());
        let mut vertices = [None; VERTEX_COUNT];
        for &i in keep {
            let p = camera.project(&pose, &model.vertices()[i]);
            vertices[i] = Some(Point2::from(p.coords / scale));
        }
        let center = camera.project(&pose, model.center());
        Cuboid2D::new(Point2::from(center.coords / scale), vertices)
    }

    #[test]
    fn method_follows_vertex_count() {
        assert_eq!(PnpMethod::for_vertex_count(0), None);
        assert_eq!(PnpMethod::for_vertex_count(3), None);
        assert_eq!(PnpMethod::for_vertex_count(4), Some(PnpMethod::Minimal));
        assert_eq!(PnpMethod::for_vertex_count(5), Some(PnpMethod::Minimal));
        assert_eq!(PnpMethod::for_vertex_count(6), Some(PnpMethod::Iterative));
        assert_eq!(PnpMethod::for_vertex_count(8), Some(PnpMethod::Iterative));
    }

    #[test]
    fn full_cuboid_is_solved_iteratively() {
        let solver = PoseSolver::new(camera(), model(), 8.0);
        let estimate = solver.solve(&observed(8.0, &[0, 1, 2, 3, 4, 5, 6, 7])).unwrap();
        assert_eq!(estimate.method, PnpMethod::Iterative);
        let expected = truth();
        assert_relative_eq!(estimate.pose.position, expected.translation.vector, epsilon = 1e-5);
        assert_relative_eq!(
            estimate.pose.to_isometry().rotation,
            expected.rotation,
            epsilon = 1e-6
        );
        assert_eq!(estimate.cuboid.available_vertex_count(), VERTEX_COUNT);
    }

    #[test]
    fn five_vertices_use_minimal_method() {
        let solver = PoseSolver::new(camera(), model(), 8.0);
        let estimate = solver.solve(&observed(8.0, &[0, 2, 3, 5, 7])).unwrap();
        assert_eq!(estimate.method, PnpMethod::Minimal);
        assert_relative_eq!(estimate.pose.position, truth().translation.vector, epsilon = 1e-4);
    }

    #[test]
    fn reprojection_completes_missing_vertices() {
        let solver = PoseSolver::new(camera(), model(), 1.0);
        let partial = observed(1.0, &[1, 2, 4, 5, 6, 7]);
        let complete = observed(1.0, &[0, 1, 2, 3, 4, 5, 6, 7]);
        let estimate = solver.solve(&partial).unwrap();
        for i in 0..VERTEX_COUNT {
            let p = estimate.cuboid.vertex(i).unwrap();
            let q = complete.vertex(i).unwrap();
            assert!((p - q).norm() < 1e-3, "vertex {} off by {}", i, (p - q).norm());
        }
        assert!((estimate.cuboid.center() - complete.center()).norm() < 1e-3);
    }

    #[test]
    fn three_vertices_are_skipped() {
        let solver = PoseSolver::new(camera(), model(), 8.0);
        assert!(solver.solve(&observed(8.0, &[0, 1, 2])).is_none());
    }

    #[test]
    fn pose_round_trips_through_isometry() {
        let pose = Pose::from_isometry(&truth());
        assert_relative_eq!(pose.to_isometry(), truth(), epsilon = 1e-12);
    }

    #[test]
    fn pose_behind_camera_is_flipped_after_reprojection() {
        let camera = CameraInfo::pinhole(500.0, 500.0, 320.0, 240.0);
        let solver = PoseSolver::new(camera.clone(), model(), 1.0);
        let behind = Isometry3::from_parts(
            Translation3::new(2.0, -1.0, -40.0),
            UnitQuaternion::from_euler_angles(0.1, 0.2, -0.3),
        );
        let estimate = solver
            .estimate(&behind, PnpMethod::Iterative, Point2::new(320.0, 240.0))
            .unwrap();

        assert_relative_eq!(estimate.pose.position, Vector3::new(-2.0, 1.0, 40.0));
        assert_relative_eq!(
            estimate.pose.to_isometry().rotation,
            behind.rotation,
            epsilon = 1e-12
        );
        // The cuboid comes from the uncorrected pose.
        for (i, v) in model().vertices().iter().enumerate() {
            let expected = camera.project(&behind, v);
            assert_relative_eq!(*estimate.cuboid.vertex(i).unwrap(), expected, epsilon = 1e-9);
        }
        assert_relative_eq!(
            *estimate.cuboid.center(),
            camera.project(&behind, model().center()),
            epsilon = 1e-9
        );
    }

    #[quickcheck]
    fn depth_is_never_negative(x: f64, y: f64, z: f64) -> bool {
        let corrected = correct_depth_sign(Vector3::new(x, y, z));
        // NaN depth has no sign to fix.
        z.is_nan() || corrected.z >= 0.0
    }

    #[quickcheck]
    fn correction_keeps_direction_line(x: f64, y: f64, z: f64) -> bool {
        if [x, y, z].iter().any(|c| c.is_nan()) {
            return true;
        }
        let v = Vector3::new(x, y, z);
        let corrected = correct_depth_sign(v);
        corrected == v || corrected == -v
    }
}
