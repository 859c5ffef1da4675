//! Keypoint extraction from belief maps.
//!
//! Every map is smoothed before searching local maxima so that noise does not
//! create spurious peaks. Confidence is then read back from the raw map, and
//! the peak location is refined with a weighted centroid of the raw values.

pub mod gaussian;

use crate::config::KeypointParams;
use crate::tensor::SplitTensor;
use gaussian::gaussian_blur;
use nalgebra::Point2;
use ndarray::ArrayView2;
use tracing::debug;

/// Windows whose total weight is below this are ignored.
const MIN_WEIGHT_SUM: f64 = 1e-6;

/// What a belief map detects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Cuboid vertex with the given index.
    Vertex(usize),
    /// Object center.
    Center,
}

/// Refined peak of a belief map.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    /// Belief map the peak was found on.
    pub role: Role,
    /// Sub-pixel location in belief map pixels.
    pub position: Point2<f64>,
    /// Unsmoothed belief at the integer peak.
    pub confidence: f32,
}

/// All keypoints of one image, grouped by role.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Keypoints {
    vertices: Vec<Vec<Keypoint>>,
    centers: Vec<Keypoint>,
}

impl Keypoints {
    /// Group keypoints: one list per vertex role, then the centers.
    pub fn new(vertices: Vec<Vec<Keypoint>>, centers: Vec<Keypoint>) -> Self {
        Self { vertices, centers }
    }

    /// Candidates of every vertex role, in role order.
    pub fn vertices(&self) -> &[Vec<Keypoint>] {
        &self.vertices
    }

    /// Instance center candidates.
    pub fn centers(&self) -> &[Keypoint] {
        &self.centers
    }

    /// Positions of the candidates of one vertex role.
    pub fn vertex_positions(&self, role: usize) -> Vec<Point2<f64>> {
        self.vertices
            .get(role)
            .map(|list| list.iter().map(|k| k.position).collect())
            .unwrap_or_default()
    }

    /// Positions of the instance centers.
    pub fn center_positions(&self) -> Vec<Point2<f64>> {
        self.centers.iter().map(|k| k.position).collect()
    }

    /// Total number of keypoints over all maps.
    pub fn len(&self) -> usize {
        self.vertices.iter().map(Vec::len).sum::<usize>() + self.centers.len()
    }

    /// Whether no map produced any keypoint.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Peak search over belief maps.
#[derive(Debug, Clone, Copy)]
pub struct KeypointExtractor {
    params: KeypointParams,
}

impl KeypointExtractor {
    /// Extractor with the given parameters.
    pub fn new(params: KeypointParams) -> Self {
        Self { params }
    }

    /// Parameters in use.
    pub fn params(&self) -> &KeypointParams {
        &self.params
    }

    /// Keypoints of every belief map of `split`, or `None` when no map has any.
    ///
    /// The last belief map holds the object centers.
    pub fn extract(&self, split: &SplitTensor<'_>) -> Option<Keypoints> {
        let map_count = split.belief_map_count();
        if map_count == 0 {
            return None;
        }
        let center_index = map_count - 1;
        let vertices: Vec<Vec<Keypoint>> = (0..center_index)
            .map(|i| self.find_peaks(split.belief_map(i), Role::Vertex(i)))
            .collect();
        let centers = self.find_peaks(split.belief_map(center_index), Role::Center);

        let keypoints = Keypoints::new(vertices, centers);
        debug!(
            "found {} keypoints ({} centers)",
            keypoints.len(),
            keypoints.centers().len()
        );
        if keypoints.is_empty() {
            None
        } else {
            Some(keypoints)
        }
    }

    /// Refined peaks of one belief map, in row-major order.
    pub fn find_peaks(&self, map: ArrayView2<'_, f32>, role: Role) -> Vec<Keypoint> {
        let (rows, cols) = map.dim();
        let blurred = gaussian_blur(map, self.params.sigma);
        let at = |y: usize, x: usize| blurred[[y, x]];

        let mut peaks = Vec::new();
        let mut weak = 0usize;
        for y in 0..rows {
            for x in 0..cols {
                let v = at(y, x);
                if !(v > self.params.detection_threshold) {
                    continue;
                }
                // Outside of the map counts as zero.
                let left = if x > 0 { at(y, x - 1) } else { 0.0 };
                let right = if x + 1 < cols { at(y, x + 1) } else { 0.0 };
                let up = if y > 0 { at(y - 1, x) } else { 0.0 };
                let down = if y + 1 < rows { at(y + 1, x) } else { 0.0 };
                if v < left || v < right || v < up || v < down {
                    continue;
                }

                let confidence = map[[y, x]];
                if !(confidence > self.params.confidence_threshold) {
                    weak += 1;
                    continue;
                }
                if let Some(position) = self.refine(map, x, y) {
                    peaks.push(Keypoint {
                        role,
                        position,
                        confidence,
                    });
                }
            }
        }
        debug!(
            "{:?}: {} peaks, {} below confidence threshold",
            role,
            peaks.len(),
            weak
        );
        peaks
    }

    /// Weighted centroid of the raw map around the integer peak `(x, y)`.
    fn refine(&self, map: ArrayView2<'_, f32>, x: usize, y: usize) -> Option<Point2<f64>> {
        let (rows, cols) = map.dim();
        let radius = self.params.window_radius();
        let mut sum = 0.0;
        let mut sum_x = 0.0;
        let mut sum_y = 0.0;
        for wy in y.saturating_sub(radius)..(y + radius + 1).min(rows) {
            for wx in x.saturating_sub(radius)..(x + radius + 1).min(cols) {
                let w = f64::from(map[[wy, wx]].max(0.0));
                sum += w;
                sum_x += w * wx as f64;
                sum_y += w * wy as f64;
            }
        }
        if sum < MIN_WEIGHT_SUM {
            return None;
        }
        let offset = self.params.upsampling_offset;
        Some(Point2::new(sum_x / sum + offset, sum_y / sum + offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TensorLayout;
    use crate::tensor::split_tensor;
    use approx::assert_relative_eq;
    use ndarray::{Array2, Array3};

    fn blob(map: &mut Array2<f32>, cx: f64, cy: f64, amplitude: f32) {
        let sigma2 = 2.0 * 1.5 * 1.5;
        for ((y, x), v) in map.indexed_iter_mut() {
            let d2 = (x as f64 - cx).powi(2) + (y as f64 - cy).powi(2);
            *v += amplitude * (-d2 / sigma2).exp() as f32;
        }
    }

    fn params_without_offset() -> KeypointParams {
        KeypointParams {
            upsampling_offset: 0.0,
            ..KeypointParams::default()
        }
    }

    #[test]
    fn single_blob_is_refined_to_subpixel() {
        let mut map = Array2::<f32>::zeros((60, 80));
        blob(&mut map, 30.25, 20.0, 1.0);
        let extractor = KeypointExtractor::new(params_without_offset());
        let peaks = extractor.find_peaks(map.view(), Role::Vertex(3));
        assert_eq!(peaks.len(), 1);
        let peak = peaks[0];
        assert_eq!(peak.role, Role::Vertex(3));
        // The 5x5 window truncates the blob, which pulls toward the integer peak.
        assert!(peak.position.x > 30.1 && peak.position.x < 30.3);
        assert_relative_eq!(peak.position.y, 20.0, epsilon = 1e-6);
        assert!(peak.confidence > 0.9);
    }

    #[test]
    fn upsampling_offset_is_added() {
        let mut map = Array2::<f32>::zeros((60, 80));
        blob(&mut map, 40.0, 30.0, 1.0);
        let extractor = KeypointExtractor::new(KeypointParams::default());
        let peaks = extractor.find_peaks(map.view(), Role::Center);
        assert_eq!(peaks.len(), 1);
        assert_relative_eq!(peaks[0].position, Point2::new(40.4395, 30.4395), epsilon = 1e-6);
    }

    #[test]
    fn oversized_sigma_does_not_panic() {
        let mut map = Array2::<f32>::zeros((60, 80));
        blob(&mut map, 40.0, 30.0, 1.0);
        let extractor = KeypointExtractor::new(KeypointParams {
            sigma: 1e30,
            ..KeypointParams::default()
        });
        let peaks = extractor.find_peaks(map.view(), Role::Center);
        assert!(peaks.iter().all(|k| k.position.x.is_finite()));
    }

    #[test]
    fn weak_peaks_are_dropped() {
        let mut map = Array2::<f32>::zeros((60, 80));
        // Visible after smoothing, but below the confidence threshold.
        blob(&mut map, 20.0, 20.0, 0.08);
        blob(&mut map, 60.0, 40.0, 0.9);
        let extractor = KeypointExtractor::new(KeypointParams::default());
        let peaks = extractor.find_peaks(map.view(), Role::Vertex(0));
        assert_eq!(peaks.len(), 1);
        assert_relative_eq!(peaks[0].position.x, 60.4395, epsilon = 1e-3);
    }

    #[test]
    fn peaks_come_in_scan_order() {
        let mut map = Array2::<f32>::zeros((60, 80));
        blob(&mut map, 60.0, 10.0, 1.0);
        blob(&mut map, 10.0, 45.0, 1.0);
        blob(&mut map, 40.0, 10.0, 1.0);
        let extractor = KeypointExtractor::new(params_without_offset());
        let xs: Vec<f64> = extractor
            .find_peaks(map.view(), Role::Vertex(0))
            .iter()
            .map(|k| k.position.x.round())
            .collect();
        assert_eq!(xs, vec![40.0, 60.0, 10.0]);
    }

    #[test]
    fn empty_maps_yield_no_keypoints() {
        let layout = TensorLayout::default();
        let mut tensor = Array3::<f32>::zeros((layout.channels(), layout.height, layout.width));
        // Below both thresholds everywhere.
        tensor.slice_mut(ndarray::s![..9, .., ..]).fill(0.005);
        let split = split_tensor(tensor.view(), &layout).unwrap();
        let extractor = KeypointExtractor::new(KeypointParams::default());
        assert!(extractor.extract(&split).is_none());
    }

    #[test]
    fn extract_separates_centers() {
        let layout = TensorLayout::default();
        let mut tensor = Array3::<f32>::zeros((layout.channels(), layout.height, layout.width));
        let mut center = Array2::<f32>::zeros((layout.height, layout.width));
        blob(&mut center, 40.0, 30.0, 1.0);
        tensor.index_axis_mut(ndarray::Axis(0), 8).assign(&center);
        let mut vertex = Array2::<f32>::zeros((layout.height, layout.width));
        blob(&mut vertex, 45.0, 25.0, 1.0);
        tensor.index_axis_mut(ndarray::Axis(0), 2).assign(&vertex);

        let split = split_tensor(tensor.view(), &layout).unwrap();
        let keypoints = KeypointExtractor::new(KeypointParams::default())
            .extract(&split)
            .unwrap();
        assert_eq!(keypoints.len(), 2);
        assert_eq!(keypoints.centers().len(), 1);
        assert_eq!(keypoints.vertices().len(), 8);
        assert_eq!(keypoints.vertex_positions(2).len(), 1);
        assert!(keypoints.vertex_positions(0).is_empty());
        assert_eq!(keypoints.centers()[0].role, Role::Center);
    }
}
