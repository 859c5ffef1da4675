//! Splitting of the raw network output.
//!
//! The tensor `[C, H, W]` holds `V + 1` belief maps (one per cuboid vertex,
//! the object center last) followed by `E` affinity fields of two channels
//! each (x then y component). Splitting only creates views into it.

use crate::config::TensorLayout;
use crate::error::{DecodeError, Dimension};
use nalgebra::{Point2, Vector2};
use ndarray::{Array3, ArrayView2, ArrayView3, Axis};
use tracing::debug;

/// Belief maps and affinity field borrowed from one raw tensor.
#[derive(Debug, Clone, Copy)]
pub struct SplitTensor<'a> {
    belief_maps: ArrayView3<'a, f32>,
    affinities: AffinityField<'a>,
}

impl<'a> SplitTensor<'a> {
    /// All belief maps, `[V + 1, H, W]`.
    pub fn belief_maps(&self) -> ArrayView3<'a, f32> {
        self.belief_maps
    }

    /// Belief map of one keypoint role. The center map is the last one.
    pub fn belief_map(&self, index: usize) -> ArrayView2<'a, f32> {
        self.belief_maps.index_axis_move(Axis(0), index)
    }

    /// Number of belief maps.
    pub fn belief_map_count(&self) -> usize {
        self.belief_maps.len_of(Axis(0))
    }

    /// Affinity field.
    pub fn affinities(&self) -> &AffinityField<'a> {
        &self.affinities
    }
}

/// Per vertex role vector fields pointing toward the instance centers.
#[derive(Debug, Clone, Copy)]
pub struct AffinityField<'a> {
    channels: ArrayView3<'a, f32>,
}

impl<'a> AffinityField<'a> {
    /// Wrap `[2E, H, W]` channels.
    pub fn new(channels: ArrayView3<'a, f32>) -> Self {
        Self { channels }
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.channels.len_of(Axis(0)) / 2
    }

    /// Whether the tensor carries no field at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Field vector at the pixel containing `point`, clamped to the map.
    ///
    /// Returns zero for a field index the tensor does not have.
    pub fn vector(&self, field: usize, point: &Point2<f64>) -> Vector2<f32> {
        let (_, rows, cols) = self.channels.dim();
        if field >= self.len() || rows == 0 || cols == 0 {
            return Vector2::zeros();
        }
        let col = (point.x.max(0.0) as usize).min(cols - 1);
        let row = (point.y.max(0.0) as usize).min(rows - 1);
        Vector2::new(
            self.channels[[2 * field, row, col]],
            self.channels[[2 * field + 1, row, col]],
        )
    }
}

fn check_dimension(dimension: Dimension, expected: usize, actual: usize) -> Result<(), DecodeError> {
    if expected == actual {
        Ok(())
    } else {
        Err(DecodeError::ShapeMismatch {
            dimension,
            expected,
            actual,
        })
    }
}

/// Split `tensor` into belief maps and affinity field after checking every
/// dimension against `layout`.
pub fn split_tensor<'a>(
    tensor: ArrayView3<'a, f32>,
    layout: &TensorLayout,
) -> Result<SplitTensor<'a>, DecodeError> {
    let (channels, rows, cols) = tensor.dim();
    check_dimension(Dimension::Channels, layout.channels(), channels)?;
    check_dimension(Dimension::Height, layout.height, rows)?;
    check_dimension(Dimension::Width, layout.width, cols)?;

    let (belief_maps, affinities) = tensor.split_at(Axis(0), layout.belief_map_count());
    debug!(
        "split tensor {:?}: {} belief maps, {} affinity fields",
        tensor.shape(),
        belief_maps.len_of(Axis(0)),
        layout.affinity_fields
    );
    Ok(SplitTensor {
        belief_maps,
        affinities: AffinityField::new(affinities),
    })
}

/// Tensor from raw little endian f32 values in `[C, H, W]` order.
///
/// Height and width come from `layout`, the channel count from the buffer
/// length, so a channel mismatch is left to [`split_tensor`].
pub fn tensor_from_le_bytes(
    bytes: &[u8],
    layout: &TensorLayout,
) -> Result<Array3<f32>, DecodeError> {
    let plane = layout.height * layout.width;
    let plane_bytes = plane * 4;
    if plane_bytes == 0 || bytes.len() % plane_bytes != 0 {
        return Err(DecodeError::TruncatedTensor {
            bytes: bytes.len(),
            plane_bytes,
        });
    }
    let values: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    let channels = values.len() / plane;
    Array3::from_shape_vec((channels, layout.height, layout.width), values).map_err(|_| {
        DecodeError::TruncatedTensor {
            bytes: bytes.len(),
            plane_bytes,
        }
    })
}
