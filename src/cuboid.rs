//! 2D and 3D cuboids.
//!
//! Vertices are always indexed the same way, in 2D and in 3D:
//!
//! ```text
//! y
//! ^
//! |    6--------7
//! |   /|       /|
//! |  / |      / |
//! | 2--|-----3  |
//! | |  5---- |--4
//! | | /      | /
//! | |/       |/
//! | 1--------0
//! |-----------------> x
//! ```
//!
//! Vertices 0..4 are on the `+z` face, 4..8 on the `-z` face.

use nalgebra::{Point2, Point3, Vector3};
use serde::{Deserialize, Serialize};

/// Number of cuboid vertices.
pub const VERTEX_COUNT: usize = 8;

/// The 12 cuboid edges as pairs of vertex indices:
/// the `+z` face, the `-z` face, then the edges joining them.
pub const EDGES: [(usize, usize); 12] = [
    (0, 1),
    (1, 2),
    (2, 3),
    (3, 0),
    (4, 5),
    (5, 6),
    (6, 7),
    (7, 4),
    (0, 4),
    (1, 5),
    (2, 6),
    (3, 7),
];

/// Object size along the model axes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CuboidDimensions {
    /// Extent along x.
    pub width: f64,
    /// Extent along y.
    pub height: f64,
    /// Extent along z.
    pub length: f64,
}

/// Rigid 3D shape of the detected object class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cuboid3D {
    center: Point3<f64>,
    vertices: [Point3<f64>; VERTEX_COUNT],
}

impl Cuboid3D {
    /// Cuboid from explicit vertices, ordered as in the module documentation.
    pub fn new(center: Point3<f64>, vertices: [Point3<f64>; VERTEX_COUNT]) -> Self {
        Self { center, vertices }
    }

    /// Axis aligned cuboid of the given size around `center`.
    pub fn from_dimensions(center: Point3<f64>, dimensions: CuboidDimensions) -> Self {
        let half = Vector3::new(
            dimensions.width / 2.0,
            dimensions.height / 2.0,
            dimensions.length / 2.0,
        );
        // (x, y, z) signs of each vertex.
        #[rustfmt::skip]
        let signs: [[f64; 3]; VERTEX_COUNT] = [
            [ 1.0, -1.0,  1.0],
            [-1.0, -1.0,  1.0],
            [-1.0,  1.0,  1.0],
            [ 1.0,  1.0,  1.0],
            [ 1.0, -1.0, -1.0],
            [-1.0, -1.0, -1.0],
            [-1.0,  1.0, -1.0],
            [ 1.0,  1.0, -1.0],
        ];
        let vertices =
            signs.map(|s| center + Vector3::from(s).component_mul(&half));
        Self { center, vertices }
    }

    /// Model center.
    pub fn center(&self) -> &Point3<f64> {
        &self.center
    }

    /// The 8 model vertices.
    pub fn vertices(&self) -> &[Point3<f64>; VERTEX_COUNT] {
        &self.vertices
    }
}

/// Cuboid seen in an image. Vertices that were not detected are `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cuboid2D {
    center: Point2<f64>,
    vertices: [Option<Point2<f64>>; VERTEX_COUNT],
}

impl Cuboid2D {
    /// Cuboid from a center and its (possibly missing) vertices.
    pub fn new(center: Point2<f64>, vertices: [Option<Point2<f64>>; VERTEX_COUNT]) -> Self {
        Self { center, vertices }
    }

    /// Cuboid without any vertex.
    pub fn empty(center: Point2<f64>) -> Self {
        Self::new(center, [None; VERTEX_COUNT])
    }

    /// Instance center.
    pub fn center(&self) -> &Point2<f64> {
        &self.center
    }

    /// The 8 vertex slots.
    pub fn vertices(&self) -> &[Option<Point2<f64>>; VERTEX_COUNT] {
        &self.vertices
    }

    /// Vertex at `index`, if it was detected.
    pub fn vertex(&self, index: usize) -> Option<&Point2<f64>> {
        self.vertices.get(index).and_then(Option::as_ref)
    }

    /// Number of detected vertices.
    pub fn available_vertex_count(&self) -> usize {
        self.vertices.iter().filter(|v| v.is_some()).count()
    }

    /// Number of missing vertices.
    pub fn missing_vertex_count(&self) -> usize {
        VERTEX_COUNT - self.available_vertex_count()
    }

    /// Indices and positions of the detected vertices, in vertex order.
    pub fn available_vertices(&self) -> impl Iterator<Item = (usize, &Point2<f64>)> + '_ {
        self.vertices
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.as_ref().map(|p| (i, p)))
    }

    /// Edges whose two end points are both detected.
    pub fn edges(&self) -> impl Iterator<Item = (&Point2<f64>, &Point2<f64>)> + '_ {
        EDGES
            .iter()
            .filter_map(move |&(a, b)| Some((self.vertex(a)?, self.vertex(b)?)))
    }

    /// Same cuboid with all coordinates multiplied by `scale`.
    pub fn scaled(&self, scale: f64) -> Self {
        Self {
            center: Point2::from(self.center.coords * scale),
            vertices: self.vertices.map(|v| v.map(|p| Point2::from(p.coords * scale))),
        }
    }
}
