//! Errors that abort a decode call.
//!
//! Only structural problems are errors. Sparse data (no keypoints, too few
//! vertices, a degenerate pose) shrinks the result instead.

use std::fmt;
use thiserror::Error;

/// Dimension of the raw network tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    /// Number of channels (belief maps + affinity components).
    Channels,
    /// Number of rows of every map.
    Height,
    /// Number of columns of every map.
    Width,
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Dimension::Channels => "channels",
            Dimension::Height => "height",
            Dimension::Width => "width",
        };
        f.write_str(name)
    }
}

/// Fatal errors of one decode call.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DecodeError {
    /// The raw tensor does not have the configured layout.
    #[error("tensor {dimension} mismatch: expected {expected}, got {actual}")]
    ShapeMismatch {
        /// Offending dimension.
        dimension: Dimension,
        /// Size required by the tensor layout.
        expected: usize,
        /// Size of the received tensor.
        actual: usize,
    },
    /// Raw tensor bytes do not hold a whole number of `H x W` f32 planes.
    #[error("tensor of {bytes} bytes is not a multiple of {plane_bytes} byte planes")]
    TruncatedTensor {
        /// Length of the received buffer.
        bytes: usize,
        /// Bytes of one channel plane.
        plane_bytes: usize,
    },
    /// Two instance centers have exactly the same coordinates.
    #[error("duplicate instance center at ({x}, {y})")]
    DuplicateCenter {
        /// Center x coordinate (belief map pixels).
        x: f64,
        /// Center y coordinate (belief map pixels).
        y: f64,
    },
}

/// Errors while loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config {path}: {source}")]
    Io {
        /// Path of the configuration file.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The file is not a valid configuration.
    #[error("failed to parse config {path}: {source}")]
    Parse {
        /// Path of the configuration file.
        path: String,
        /// Underlying error.
        source: serde_json::Error,
    },
    /// A configuration value is out of range.
    #[error("invalid config value {field}: {reason}")]
    Invalid {
        /// Name of the offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

/// A result record whose cuboid and pose lists do not line up.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("{cuboids} cuboids but {poses} poses")]
pub struct LengthMismatch {
    /// Number of cuboids in the record.
    pub cuboids: usize,
    /// Number of poses in the record.
    pub poses: usize,
}
