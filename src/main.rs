use anyhow::{Context, Result};
use clap::Parser;
use cuboid_pose::tensor::tensor_from_le_bytes;
use cuboid_pose::{load_config, Cuboid3D, PoseDecoder, TensorLayout};
use nalgebra::Point3;
use ndarray::Array3;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Decode a raw network output into object poses and print them as JSON.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// JSON configuration: camera, object dimensions and decoder parameters.
    #[arg(short, long)]
    config: PathBuf,

    /// Raw tensor as little endian f32 values in `[C, H, W]` order.
    #[arg(short, long)]
    tensor: PathBuf,

    /// Identifier stored in the result.
    #[arg(long)]
    image_id: Option<String>,
}

fn read_tensor(path: &Path, layout: &TensorLayout) -> Result<Array3<f32>> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(tensor_from_le_bytes(&bytes, layout)?)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let config = load_config(&args.config)?;
    let layout = config.decoder.layout;
    info!("tensor layout {:?}", layout);
    let tensor = read_tensor(&args.tensor, &layout)?;

    let model = Cuboid3D::from_dimensions(Point3::origin(), config.cuboid);
    let decoder = PoseDecoder::new(config.decoder, config.camera, model);
    let mut result = decoder
        .decode(tensor.view())
        .with_context(|| format!("failed to decode {}", args.tensor.display()))?;
    if let Some(id) = args.image_id {
        result = result.with_image_id(id);
    }

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
