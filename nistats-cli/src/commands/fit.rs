//! Fit a multi-session first-level GLM.
//!
//! nistats fit --func run1.img --func run2.img --design run1.tsv --design run2.tsv --output-prefix ...

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Args;
use tracing::info;

use nistats_core::glm::NoiseModel;
use nistats_core::model::serialization;
use nistats_core::model::{FitOptions, FmriLinearModel, MaskConfig, MaskInput, ModelArchive};
use nistats_io::save_image;

use super::output_path;

#[derive(Args)]
pub struct FitArgs {
    /// Functional image of a session (repeat once per session)
    #[arg(long = "func", required = true)]
    func: Vec<PathBuf>,

    /// Design matrix of a session, tab/comma/space delimited (repeat once per session)
    #[arg(long = "design", required = true)]
    design: Vec<PathBuf>,

    /// Explicit mask image (non-zero voxels are analysed)
    #[arg(long, conflicts_with = "no_mask")]
    mask: Option<PathBuf>,

    /// Analyse every voxel instead of estimating a mask
    #[arg(long, default_value = "false")]
    no_mask: bool,

    /// Lower intensity quantile searched by the mask estimator
    #[arg(long, default_value = "0.2")]
    mask_lower_cutoff: f64,

    /// Upper intensity quantile searched by the mask estimator
    #[arg(long, default_value = "0.9")]
    mask_upper_cutoff: f64,

    /// Fraction of sessions that must include a voxel
    #[arg(long, default_value = "0.5")]
    mask_threshold: f64,

    /// Noise model: ols or ar1
    #[arg(long, default_value = "ar1")]
    noise_model: String,

    /// AR(1) coefficient quantization steps per unit of rho
    #[arg(long, default_value = "100")]
    ar_bins: usize,

    /// Fit raw data instead of percent signal change
    #[arg(long, default_value = "false")]
    no_scaling: bool,

    /// Output file prefix
    #[arg(long)]
    output_prefix: String,

    /// Also save JSON sidecar for debugging
    #[arg(long, default_value = "false")]
    save_json: bool,
}

pub fn run(args: FitArgs) -> Result<()> {
    let noise_model: NoiseModel = args.noise_model.parse()?;
    if args.func.len() != args.design.len() {
        bail!(
            "Got {} functional images but {} design matrices",
            args.func.len(),
            args.design.len()
        );
    }

    info!("=== nistats: Fit GLM ===");
    info!("Sessions: {}", args.func.len());
    info!("Noise model: {}", noise_model);

    let mask = match (&args.mask, args.no_mask) {
        (Some(path), _) => MaskInput::Path(path.clone()),
        (None, true) => MaskInput::None,
        (None, false) => MaskInput::Compute(MaskConfig {
            lower_cutoff: args.mask_lower_cutoff,
            upper_cutoff: args.mask_upper_cutoff,
            threshold: args.mask_threshold,
            ..MaskConfig::default()
        }),
    };

    let mut model = FmriLinearModel::new(args.func, args.design, mask)?;
    info!(
        "Mask contains {} voxels",
        model.mask().nonzero_voxels().len()
    );

    let options = FitOptions {
        do_scaling: !args.no_scaling,
        noise_model,
        ar_bins: args.ar_bins,
    };
    model.fit(&options)?;

    let fitted = model
        .fitted()
        .ok_or_else(|| anyhow::anyhow!("Model fit produced no result"))?;
    let archive = ModelArchive::from_fitted(fitted);

    // Save model
    let model_path = output_path(&args.output_prefix, "nsglm");
    serialization::save_model(&archive, &model_path)?;
    info!("Model saved to {}", model_path.display());

    let mask_path = output_path(&args.output_prefix, "mask.img");
    save_image(model.mask(), &mask_path)?;
    info!("Mask saved to {}", mask_path.display());

    if args.save_json {
        let json_path = output_path(&args.output_prefix, "nsglm.json");
        serialization::save_model_json(&archive, &json_path)?;
        info!("JSON sidecar saved to {}", json_path.display());
    }

    // Print summary
    println!("{}", serialization::model_summary(&archive));

    Ok(())
}
