use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fs;
use tracing_subscriber::EnvFilter;

use vicreg::augment::{load_image, AugmentationPipeline};
use vicreg::config::Config;
use vicreg::model::VicReg;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_args()?;
    run(config)
}

fn select_device() -> Device {
    match Device::new_cuda(0) {
        Ok(d) => {
            tracing::info!("using device: CUDA(0)");
            d
        }
        Err(e) => {
            tracing::info!("CUDA not available: {e}");
            Device::Cpu
        }
    }
}

/// Builds a batch of view pairs from one image, embeds them with freshly
/// initialised branches and reports the VICReg terms.
fn run(config: Config) -> Result<()> {
    let device = select_device();
    let image = load_image(&config.image_path)
        .with_context(|| format!("decode {:?}", config.image_path))?;
    let pipeline = AugmentationPipeline::new(&device)?;
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let mut tops = Vec::with_capacity(config.batch_size);
    let mut bottoms = Vec::with_capacity(config.batch_size);
    for _ in 0..config.batch_size {
        let (top, bottom) = pipeline.views_with(&image, &mut rng)?;
        tops.push(top);
        bottoms.push(bottom);
    }
    let top_batch = Tensor::stack(&tops, 0)?;
    let bottom_batch = Tensor::stack(&bottoms, 0)?;

    if let Some(ref out_dir) = config.out_dir {
        fs::create_dir_all(out_dir)?;
        let top_path = out_dir.join("view_top.png");
        let bottom_path = out_dir.join("view_bottom.png");
        pipeline.to_image(&tops[0])?.save(&top_path)?;
        pipeline.to_image(&bottoms[0])?.save(&bottom_path)?;
        println!("Views saved to {:?} and {:?}", top_path, bottom_path);
    }

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let model = VicReg::reference(vb, &config.backbone, config.gamma)?.with_weights(config.weights);
    let total_params: usize = varmap
        .all_vars()
        .iter()
        .map(|v| v.as_tensor().elem_count())
        .sum();

    println!("VICReg (two branches, untrained)");
    println!(
        "Image: {:?} ({}x{})",
        config.image_path,
        image.width(),
        image.height()
    );
    println!(
        "Batch: {} view pairs of {:?} | embed_dim {} | gamma {}",
        config.batch_size,
        top_batch.dims(),
        config.backbone.embed_dim,
        config.gamma
    );
    println!("Parameters: ~{}", format_params(total_params));

    let (top_embeddings, bottom_embeddings) = model.forward(&top_batch, &bottom_batch)?;
    let losses = model.loss(&top_embeddings, &bottom_embeddings)?.to_summary()?;
    tracing::debug!(?losses, "vicreg terms");

    let w = model.weights();
    println!("  invariance: {:.4}  (x{})", losses.invariance, w.invariance);
    println!("  variance:   {:.4}  (x{})", losses.variance, w.variance);
    println!("  covariance: {:.4}  (x{})", losses.covariance, w.covariance);
    println!("  total:      {:.4}", losses.total);
    Ok(())
}

/// Parameter count with the largest fitting unit suffix (`12.3k`, `4.56M`, `1.20B`).
fn format_params(n: usize) -> String {
    const UNITS: [(f64, &str, usize); 3] = [(1e9, "B", 2), (1e6, "M", 2), (1e3, "k", 1)];
    let n = n as f64;
    let (scale, suffix, digits) = UNITS
        .iter()
        .copied()
        .find(|(scale, _, _)| n >= *scale)
        .unwrap_or(UNITS[2]);
    format!("{:.*}{}", digits, n / scale, suffix)
}
