#![warn(missing_docs)]

//! This package decodes the output of a keypoint network into 6-DoF poses
//! of box shaped objects.
//!
//! The network predicts, for every object class, one belief map per cuboid
//! vertex, one belief map of the object centers and an affinity field
//! pointing from vertices toward their center ([DOPE][dope]).
//! Decoding one image goes through these steps:
//!
//!  1. [`tensor`]: split the raw `[C, H, W]` tensor into belief maps and
//!     affinity field,
//!  2. [`keypoints`]: find sub-pixel peaks of every belief map,
//!  3. [`assign`]: group vertex peaks into instances around the centers,
//!  4. [`pose`]: solve the pose of each instance with Perspective-n-Point,
//!     using the Lambda Twist P3P solver (Persson and Nordberg, ECCV 2018)
//!     for 4 or 5 vertices and a refined linear solution otherwise.
//!
//! [`PoseDecoder`] runs the whole pipeline.
//!
//! [dope]: https://arxiv.org/abs/1809.10790

pub mod assign;
pub mod camera;
pub mod config;
pub mod cuboid;
pub mod decoder;
pub mod error;
pub mod keypoints;
pub mod pose;
pub mod tensor;

pub use camera::CameraInfo;
pub use config::{load_config, AppConfig, DecoderConfig, KeypointParams, TensorLayout};
pub use cuboid::{Cuboid2D, Cuboid3D, CuboidDimensions};
pub use decoder::{decode, DecodeResult, Inspector, PoseDecoder};
pub use error::{ConfigError, DecodeError};
pub use pose::{Pose, PoseSolver};
