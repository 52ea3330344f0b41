use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::str::FromStr;

use crate::model::LossWeights;

/// Sizes of the reference encoder/expander branch.
#[derive(Debug, Clone, PartialEq)]
pub struct BackboneConfig {
    pub channels: usize,
    pub num_blocks: usize,
    pub hidden_dim: usize,
    pub embed_dim: usize,
}

impl Default for BackboneConfig {
    fn default() -> Self {
        Self {
            channels: 32,
            num_blocks: 3,
            hidden_dim: 256,
            embed_dim: 256,
        }
    }
}

/// Settings for the command-line driver.
#[derive(Debug, Clone)]
pub struct Config {
    pub image_path: PathBuf,
    pub batch_size: usize,
    pub gamma: f64,
    pub seed: Option<u64>,
    pub out_dir: Option<PathBuf>,
    pub backbone: BackboneConfig,
    pub weights: LossWeights,
}

impl Config {
    pub fn from_args() -> Result<Self> {
        let args: Vec<String> = std::env::args().collect();
        if args.len() < 2 {
            let program = args.first().map(String::as_str).unwrap_or("vicreg");
            bail!(
                "usage: {} <image_path> [batch] [embed_dim] [gamma] [seed] [out_dir]",
                program
            );
        }
        Self::from_args_after(&args[1..])
    }

    /// Parses the positional arguments that follow the program name.
    pub fn from_args_after(args: &[String]) -> Result<Self> {
        let Some(image) = args.first() else {
            bail!("missing <image_path>");
        };
        let mut backbone = BackboneConfig::default();
        if let Some(dim) = positional(args, 2, "embed_dim")? {
            backbone.embed_dim = dim;
        }
        let batch_size = positional(args, 1, "batch")?.unwrap_or(8);
        if batch_size < 2 {
            bail!("batch must be at least 2 for the covariance term, got {batch_size}");
        }
        Ok(Self {
            image_path: PathBuf::from(image),
            batch_size,
            gamma: positional(args, 3, "gamma")?.unwrap_or(1.0),
            seed: positional(args, 4, "seed")?,
            out_dir: args.get(5).map(PathBuf::from),
            backbone,
            weights: LossWeights::default(),
        })
    }
}

/// Parses `args[index]` when present; a value that does not parse is an error, not a default.
fn positional<T>(args: &[String], index: usize, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    args.get(index)
        .map(|v| {
            v.parse()
                .with_context(|| format!("{name} must be a {}, got {:?}", std::any::type_name::<T>(), v))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_defaults() -> Result<()> {
        let cfg = Config::from_args_after(&args(&["cat.png"]))?;
        assert_eq!(cfg.image_path, PathBuf::from("cat.png"));
        assert_eq!(cfg.batch_size, 8);
        assert_eq!(cfg.gamma, 1.0);
        assert_eq!(cfg.seed, None);
        assert!(cfg.out_dir.is_none());
        assert_eq!(cfg.backbone, BackboneConfig::default());
        Ok(())
    }

    #[test]
    fn test_positional_overrides() -> Result<()> {
        let cfg = Config::from_args_after(&args(&["a.jpg", "4", "64", "0.5", "7", "out"]))?;
        assert_eq!(cfg.batch_size, 4);
        assert_eq!(cfg.backbone.embed_dim, 64);
        assert_eq!(cfg.gamma, 0.5);
        assert_eq!(cfg.seed, Some(7));
        assert_eq!(cfg.out_dir, Some(PathBuf::from("out")));
        Ok(())
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(Config::from_args_after(&[]).is_err());
        assert!(Config::from_args_after(&args(&["a.png", "1"])).is_err());
        assert!(Config::from_args_after(&args(&["a.png", "4", "wide"])).is_err());
    }

    #[test]
    fn test_malformed_values_are_not_defaulted() {
        let cases: [&[&str]; 4] = [
            &["a.png", "eight"],
            &["a.png", "4", "64", "one"],
            &["a.png", "4", "64", "0.5", "4x2"],
            &["a.png", "4", "64", "0.5", "-3"],
        ];
        for bad in cases {
            let err = Config::from_args_after(&args(bad)).unwrap_err();
            assert!(err.to_string().contains("must be a"), "{bad:?}: {err}");
        }
    }
}
