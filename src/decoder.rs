//! One image through the whole pipeline.
//!
//! [`PoseDecoder`] splits the tensor, extracts keypoints, groups vertices by
//! instance and solves one pose per instance. [`Inspector`]s registered on the
//! decoder see the intermediate data after each of these steps.

use crate::assign::assign_vertices;
use crate::camera::CameraInfo;
use crate::config::DecoderConfig;
use crate::cuboid::{Cuboid2D, Cuboid3D};
use crate::error::{DecodeError, LengthMismatch};
use crate::keypoints::{KeypointExtractor, Keypoints};
use crate::pose::{Pose, PoseSolver};
use crate::tensor::{split_tensor, SplitTensor};
use nalgebra::Point2;
use ndarray::ArrayView3;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;
use tracing::{debug, info};

/// Poses found in one image.
///
/// `cuboids[i]` is the model reprojected through `poses[i]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "DecodeRecord")]
pub struct DecodeResult {
    image_id: Option<String>,
    cuboids: Vec<Cuboid2D>,
    poses: Vec<Pose>,
}

#[derive(Deserialize)]
struct DecodeRecord {
    #[serde(default)]
    image_id: Option<String>,
    cuboids: Vec<Cuboid2D>,
    poses: Vec<Pose>,
}

impl TryFrom<DecodeRecord> for DecodeResult {
    type Error = LengthMismatch;

    fn try_from(record: DecodeRecord) -> Result<Self, Self::Error> {
        if record.cuboids.len() != record.poses.len() {
            return Err(LengthMismatch {
                cuboids: record.cuboids.len(),
                poses: record.poses.len(),
            });
        }
        Ok(Self {
            image_id: record.image_id,
            cuboids: record.cuboids,
            poses: record.poses,
        })
    }
}

impl DecodeResult {
    /// Empty result.
    pub fn new() -> Self {
        Self::default()
    }

    /// Same result tagged with an image identifier.
    pub fn with_image_id(mut self, image_id: impl Into<String>) -> Self {
        self.image_id = Some(image_id.into());
        self
    }

    /// Image identifier, if any.
    pub fn image_id(&self) -> Option<&str> {
        self.image_id.as_deref()
    }

    /// Append one instance.
    pub fn push(&mut self, cuboid: Cuboid2D, pose: Pose) {
        self.cuboids.push(cuboid);
        self.poses.push(pose);
    }

    /// Reprojected cuboids, in image pixels.
    pub fn cuboids(&self) -> &[Cuboid2D] {
        &self.cuboids
    }

    /// Poses, index aligned with [`cuboids`](Self::cuboids).
    pub fn poses(&self) -> &[Pose] {
        &self.poses
    }

    /// Instances as `(cuboid, pose)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&Cuboid2D, &Pose)> + '_ {
        self.cuboids.iter().zip(self.poses.iter())
    }

    /// Number of instances.
    pub fn len(&self) -> usize {
        self.poses.len()
    }

    /// Whether no instance was found.
    pub fn is_empty(&self) -> bool {
        self.poses.is_empty()
    }
}

/// Observer of the intermediate pipeline data.
///
/// Hooks are called synchronously, in pipeline order, once per image. All of
/// them are called even when an image has no keypoint.
pub trait Inspector: Send + Sync {
    /// After the tensor is split.
    fn inspect_tensor(&self, _split: &SplitTensor<'_>) {}
    /// After keypoint extraction.
    fn inspect_keypoints(&self, _keypoints: &Keypoints) {}
    /// After vertices are assigned to instances, in belief map pixels.
    fn inspect_objects(&self, _objects: &[Cuboid2D]) {}
    /// After pose solving.
    fn inspect_poses(&self, _result: &DecodeResult) {}
}

/// Decodes raw network tensors into object poses.
pub struct PoseDecoder {
    config: DecoderConfig,
    extractor: KeypointExtractor,
    solver: PoseSolver,
    inspectors: Vec<Box<dyn Inspector>>,
}

impl fmt::Debug for PoseDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoseDecoder")
            .field("config", &self.config)
            .field("solver", &self.solver)
            .field("inspectors", &self.inspectors.len())
            .finish()
    }
}

impl PoseDecoder {
    /// Decoder for objects of shape `model` seen by `camera`.
    pub fn new(config: DecoderConfig, camera: CameraInfo, model: Cuboid3D) -> Self {
        Self {
            extractor: KeypointExtractor::new(config.keypoints),
            solver: PoseSolver::new(camera, model, config.scale),
            config,
            inspectors: Vec::new(),
        }
    }

    /// Register an inspector. Inspectors run in registration order.
    pub fn with_inspector(mut self, inspector: Box<dyn Inspector>) -> Self {
        self.inspectors.push(inspector);
        self
    }

    /// Configuration in use.
    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Decode one tensor.
    pub fn decode(&self, tensor: ArrayView3<'_, f32>) -> Result<DecodeResult, DecodeError> {
        let start = Instant::now();
        let split = split_tensor(tensor, &self.config.layout)?;
        self.inspectors.iter().for_each(|i| i.inspect_tensor(&split));

        let keypoints = match self.extractor.extract(&split) {
            Some(keypoints) => keypoints,
            None => {
                debug!("no keypoints found");
                let result = DecodeResult::new();
                let keypoints = Keypoints::default();
                self.inspectors.iter().for_each(|i| i.inspect_keypoints(&keypoints));
                self.inspectors.iter().for_each(|i| i.inspect_objects(&[]));
                self.inspectors.iter().for_each(|i| i.inspect_poses(&result));
                return Ok(result);
            }
        };
        self.inspectors.iter().for_each(|i| i.inspect_keypoints(&keypoints));

        let centers = keypoints.center_positions();
        let candidates: Vec<Vec<Point2<f64>>> = (0..self.config.layout.vertex_count)
            .map(|role| keypoints.vertex_positions(role))
            .collect();
        let objects = assign_vertices(&centers, &candidates, split.affinities())?;
        self.inspectors.iter().for_each(|i| i.inspect_objects(&objects));

        let mut result = DecodeResult::new();
        for estimate in objects.iter().filter_map(|o| self.solver.solve(o)) {
            result.push(estimate.cuboid, estimate.pose);
        }
        self.inspectors.iter().for_each(|i| i.inspect_poses(&result));

        info!(
            "decoded {} of {} instances in {:?}",
            result.len(),
            objects.len(),
            start.elapsed()
        );
        Ok(result)
    }

    /// Decode many tensors in parallel. Results keep the input order.
    pub fn decode_batch(
        &self,
        tensors: &[ArrayView3<'_, f32>],
    ) -> Vec<Result<DecodeResult, DecodeError>> {
        tensors.par_iter().map(|t| self.decode(t.view())).collect()
    }
}

/// Decode one tensor with the default network layout and the given
/// camera, object model and thresholds.
pub fn decode(
    tensor: ArrayView3<'_, f32>,
    model: &Cuboid3D,
    intrinsics: [[f64; 3]; 3],
    distortion: &[f64],
    detection_threshold: f32,
    confidence_threshold: f32,
) -> Result<DecodeResult, DecodeError> {
    let mut config = DecoderConfig::default();
    config.keypoints.detection_threshold = detection_threshold;
    config.keypoints.confidence_threshold = confidence_threshold;
    let camera = CameraInfo::new(intrinsics, distortion.to_vec());
    PoseDecoder::new(config, camera, model.clone()).decode(tensor)
}
