//! Decoder configuration.
//!
//! Every struct deserializes with `#[serde(default)]` so a configuration file
//! only needs to name the values that differ from the network defaults.

use crate::camera::CameraInfo;
use crate::cuboid::{CuboidDimensions, VERTEX_COUNT};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Largest accepted smoothing sigma, in map pixels.
pub const MAX_SIGMA: f32 = 64.0;

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// Channel and spatial layout of the raw network tensor `[C, H, W]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TensorLayout {
    /// Number of cuboid vertex roles (one belief map each).
    pub vertex_count: usize,
    /// Number of 2-channel affinity fields following the belief maps.
    pub affinity_fields: usize,
    /// Rows of every map.
    pub height: usize,
    /// Columns of every map.
    pub width: usize,
}

impl Default for TensorLayout {
    fn default() -> Self {
        Self {
            vertex_count: 8,
            affinity_fields: 8,
            height: 60,
            width: 80,
        }
    }
}

impl TensorLayout {
    /// Belief maps: one per vertex role plus the center map.
    pub fn belief_map_count(&self) -> usize {
        self.vertex_count + 1
    }

    /// Expected channel count `V + 1 + 2E`.
    pub fn channels(&self) -> usize {
        self.belief_map_count() + 2 * self.affinity_fields
    }

    /// Cuboids have exactly [`VERTEX_COUNT`] vertex roles, and maps cannot be empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.vertex_count != VERTEX_COUNT {
            return Err(invalid(
                "layout.vertex_count",
                format!("expected {}, got {}", VERTEX_COUNT, self.vertex_count),
            ));
        }
        if self.height == 0 || self.width == 0 {
            return Err(invalid("layout", "maps must not be empty"));
        }
        Ok(())
    }
}

/// Peak search and refinement parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeypointParams {
    /// Standard deviation of the Gaussian smoothing, in map pixels.
    pub sigma: f32,
    /// Minimum smoothed value of a peak.
    pub detection_threshold: f32,
    /// Minimum unsmoothed value at the peak pixel.
    pub confidence_threshold: f32,
    /// Side of the square refinement window. Even values are rounded up.
    pub window_size: usize,
    /// Bias added to refined coordinates to undo the network upsampling shift.
    pub upsampling_offset: f64,
}

impl Default for KeypointParams {
    fn default() -> Self {
        Self {
            sigma: 3.0,
            detection_threshold: 0.01,
            confidence_threshold: 0.1,
            window_size: 5,
            upsampling_offset: 0.4395,
        }
    }
}

impl KeypointParams {
    /// Half side of the refinement window.
    pub fn window_radius(&self) -> usize {
        self.window_size / 2
    }

    /// Reject values the extractor cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.sigma.is_finite() && (0.0..=MAX_SIGMA).contains(&self.sigma)) {
            return Err(invalid(
                "keypoints.sigma",
                format!("{} is not in [0, {}]", self.sigma, MAX_SIGMA),
            ));
        }
        if !self.detection_threshold.is_finite() {
            return Err(invalid("keypoints.detection_threshold", "not finite"));
        }
        if !self.confidence_threshold.is_finite() {
            return Err(invalid("keypoints.confidence_threshold", "not finite"));
        }
        if !self.upsampling_offset.is_finite() {
            return Err(invalid("keypoints.upsampling_offset", "not finite"));
        }
        Ok(())
    }
}

/// Everything the decoder needs besides the camera and the object model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Raw tensor layout.
    pub layout: TensorLayout,
    /// Keypoint extraction parameters.
    pub keypoints: KeypointParams,
    /// Factor from belief map pixels to image pixels (network stride).
    pub scale: f64,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            layout: TensorLayout::default(),
            keypoints: KeypointParams::default(),
            scale: 8.0,
        }
    }
}

impl DecoderConfig {
    /// Check the layout, the keypoint parameters and the scale.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.layout.validate()?;
        self.keypoints.validate()?;
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return Err(invalid("scale", format!("{} is not positive", self.scale)));
        }
        Ok(())
    }
}

/// Configuration of the command line decoder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Decoder parameters.
    #[serde(default)]
    pub decoder: DecoderConfig,
    /// Camera that took the images.
    pub camera: CameraInfo,
    /// Size of the detected object.
    pub cuboid: CuboidDimensions,
}

/// Read an [`AppConfig`] from a JSON file and validate it.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let config: AppConfig =
        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
    config.decoder.validate()?;
    Ok(config)
}
