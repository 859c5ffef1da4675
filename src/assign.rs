//! Assignment of vertex candidates to object instances.
//!
//! Every candidate goes to its closest instance center. When several
//! candidates of the same vertex role end up at one center, the closest one
//! wins. The affinity field is looked up for every pair and traced, but only
//! the distance decides.

use crate::cuboid::{Cuboid2D, VERTEX_COUNT};
use crate::error::DecodeError;
use crate::tensor::AffinityField;
use nalgebra::{Point2, Vector2};
use tracing::trace;

const DIRECTION_EPSILON: f64 = 1e-12;

/// Direction from a vertex toward the center of the instance it belongs to.
pub trait DirectionField {
    /// Direction for a candidate of vertex role `role` located at `point`.
    fn direction(&self, role: usize, point: &Point2<f64>) -> Vector2<f64>;
}

impl DirectionField for AffinityField<'_> {
    fn direction(&self, role: usize, point: &Point2<f64>) -> Vector2<f64> {
        self.vector(role, point).cast::<f64>()
    }
}

impl<F> DirectionField for F
where
    F: Fn(usize, &Point2<f64>) -> Vector2<f64>,
{
    fn direction(&self, role: usize, point: &Point2<f64>) -> Vector2<f64> {
        self(role, point)
    }
}

fn unit(v: Vector2<f64>) -> Vector2<f64> {
    v.try_normalize(DIRECTION_EPSILON).unwrap_or_else(Vector2::zeros)
}

fn check_unique_centers(centers: &[Point2<f64>]) -> Result<(), DecodeError> {
    for (i, a) in centers.iter().enumerate() {
        if centers[i + 1..].iter().any(|b| a == b) {
            return Err(DecodeError::DuplicateCenter { x: a.x, y: a.y });
        }
    }
    Ok(())
}

/// Build one [`Cuboid2D`] per center from the vertex candidates.
///
/// `candidates[r]` lists the candidates of vertex role `r`. Roles without a
/// list, or whose candidates are all closer to other centers, stay empty.
/// The cuboids are returned in the order of `centers`.
pub fn assign_vertices<F>(
    centers: &[Point2<f64>],
    candidates: &[Vec<Point2<f64>>],
    field: &F,
) -> Result<Vec<Cuboid2D>, DecodeError>
where
    F: DirectionField + ?Sized,
{
    check_unique_centers(centers)?;

    let mut slots = vec![[None; VERTEX_COUNT]; centers.len()];
    // best[c] = closest candidate of the current role assigned to center c.
    let mut best: Vec<Option<(Point2<f64>, f64)>> = vec![None; centers.len()];
    for (role, vertices) in candidates.iter().take(VERTEX_COUNT).enumerate() {
        best.iter_mut().for_each(|b| *b = None);
        for vertex in vertices {
            let direction = unit(field.direction(role, vertex));
            let mut nearest: Option<(usize, f64)> = None;
            for (c, center) in centers.iter().enumerate() {
                let distance = (center - vertex).norm();
                let deviation = (direction - unit(center - vertex)).norm();
                trace!(role, center = c, distance, deviation, "vertex candidate");
                if nearest.map_or(true, |(_, d)| distance < d) {
                    nearest = Some((c, distance));
                }
            }
            if let Some((c, distance)) = nearest {
                if best[c].map_or(true, |(_, d)| distance < d) {
                    best[c] = Some((*vertex, distance));
                }
            }
        }
        for (slot, b) in slots.iter_mut().zip(best.iter()) {
            slot[role] = b.map(|(p, _)| p);
        }
    }

    Ok(centers
        .iter()
        .zip(slots)
        .map(|(center, vertices)| Cuboid2D::new(*center, vertices))
        .collect())
}
