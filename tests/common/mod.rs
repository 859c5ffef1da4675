//! Synthetic network outputs rendered from known poses.

#![allow(dead_code)]

use cuboid_pose::cuboid::VERTEX_COUNT;
use cuboid_pose::{CameraInfo, Cuboid3D, CuboidDimensions, KeypointParams, TensorLayout};
use nalgebra::{Isometry3, Point2, Point3, Translation3, UnitQuaternion};
use ndarray::{Array3, Axis};

/// Spread of the rendered belief blobs, in map pixels.
pub const BLOB_SIGMA: f64 = 1.5;

pub const ALL_VERTICES: [usize; VERTEX_COUNT] = [0, 1, 2, 3, 4, 5, 6, 7];

/// Camera, object and tensor layout shared by the instances of a scene.
pub struct Scene {
    pub camera: CameraInfo,
    pub model: Cuboid3D,
    pub layout: TensorLayout,
    pub scale: f64,
}

impl Scene {
    /// 200x160 maps at image resolution, principal point at map pixel (100, 80).
    pub fn large() -> Self {
        Self {
            camera: CameraInfo::pinhole(400.0, 400.0, 100.0, 80.0),
            model: cube(10.0),
            layout: TensorLayout {
                height: 160,
                width: 200,
                ..TensorLayout::default()
            },
            scale: 1.0,
        }
    }

    /// Default 80x60 maps of a 640x480 image.
    pub fn network() -> Self {
        Self {
            camera: CameraInfo::new(
                [[600.0, 0.0, 320.0], [0.0, 600.0, 240.0], [0.0, 0.0, 1.0]],
                vec![0.02, -0.01, 0.0, 0.0, 0.0],
            ),
            model: cube(10.0),
            layout: TensorLayout::default(),
            scale: 8.0,
        }
    }

    /// All-zero tensor of the scene layout.
    pub fn empty_tensor(&self) -> Array3<f32> {
        Array3::zeros((self.layout.channels(), self.layout.height, self.layout.width))
    }

    /// Map pixel where the network would put `point` for an object at `pose`.
    pub fn map_point(&self, pose: &Isometry3<f64>, point: &Point3<f64>) -> Point2<f64> {
        Point2::from(self.camera.project(pose, point).coords / self.scale)
    }

    /// Render one instance: its center and the vertices listed in `vertices`.
    pub fn render(&self, tensor: &mut Array3<f32>, pose: &Isometry3<f64>, vertices: &[usize]) {
        let offset = KeypointParams::default().upsampling_offset;
        let mut stamp = |channel: usize, p: Point2<f64>| {
            let mut map = tensor.index_axis_mut(Axis(0), channel);
            let (cx, cy) = (p.x - offset, p.y - offset);
            for ((y, x), v) in map.indexed_iter_mut() {
                let d2 = (x as f64 - cx).powi(2) + (y as f64 - cy).powi(2);
                *v += (-d2 / (2.0 * BLOB_SIGMA * BLOB_SIGMA)).exp() as f32;
            }
        };
        for &i in vertices {
            stamp(i, self.map_point(pose, &self.model.vertices()[i]));
        }
        stamp(self.layout.vertex_count, self.map_point(pose, self.model.center()));
    }
}

pub fn cube(side: f64) -> Cuboid3D {
    Cuboid3D::from_dimensions(
        Point3::origin(),
        CuboidDimensions {
            width: side,
            height: side,
            length: side,
        },
    )
}

pub fn pose(x: f64, y: f64, z: f64, roll: f64, pitch: f64, yaw: f64) -> Isometry3<f64> {
    Isometry3::from_parts(
        Translation3::new(x, y, z),
        UnitQuaternion::from_euler_angles(roll, pitch, yaw),
    )
}
