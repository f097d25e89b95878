//! Compute contrast maps from a fitted model.
//!
//! nistats contrast --model-file ... --contrast "0,1,0" [--contrast ...] --output-prefix ...

use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::Args;
use tracing::info;

use nistats_core::contrast::{ContrastStatConfig, ContrastType};
use nistats_core::model::multi_session::{
    EFFECT_DESCRIPTION, STAT_DESCRIPTION, VARIANCE_DESCRIPTION, Z_DESCRIPTION,
};
use nistats_core::model::serialization::load_model;
use nistats_core::model::ContrastOptions;
use nistats_io::save_image;
use nistats_linalg::DenseMatrix;

use super::output_path;

#[derive(Args)]
pub struct ContrastArgs {
    /// Model file written by `nistats fit` (.nsglm)
    #[arg(long)]
    model_file: String,

    /// Contrast matrix: comma-separated weights, rows separated by ';'.
    /// Give one per session, or a single one used for every session.
    #[arg(long = "contrast", required = true)]
    contrasts: Vec<String>,

    /// Contrast type: t, F or tmin-conjunction (inferred from the row count by default)
    #[arg(long)]
    contrast_type: Option<String>,

    /// Skip the z-score map
    #[arg(long, default_value = "false")]
    no_z: bool,

    /// Write the statistic map
    #[arg(long, default_value = "false")]
    output_stat: bool,

    /// Write the effect map
    #[arg(long, default_value = "false")]
    output_effects: bool,

    /// Write the variance map
    #[arg(long, default_value = "false")]
    output_variance: bool,

    /// Cap on the degrees of freedom used for p-values
    #[arg(long, default_value = "1e10")]
    dofmax: f64,

    /// Floor on contrast variances
    #[arg(long, default_value = "1e-50")]
    tiny: f64,

    /// Output file prefix
    #[arg(long)]
    output_prefix: String,
}

/// Parse "1,0,-1;0,1,0" into a 2 x 3 matrix.
fn parse_contrast(spec: &str) -> Result<DenseMatrix> {
    let rows: Vec<Vec<f64>> = spec
        .split(';')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(|row| {
            row.split(',')
                .map(|v| {
                    v.trim()
                        .parse::<f64>()
                        .with_context(|| format!("Invalid contrast weight '{}'", v.trim()))
                })
                .collect::<Result<Vec<f64>>>()
        })
        .collect::<Result<_>>()?;
    if rows.is_empty() {
        bail!("Empty contrast '{}'", spec);
    }
    let width = rows[0].len();
    if rows.iter().any(|r| r.len() != width) {
        bail!("Contrast rows of different lengths in '{}'", spec);
    }
    Ok(DenseMatrix::from_rows(&rows))
}

fn file_tag(description: &str) -> &'static str {
    match description {
        Z_DESCRIPTION => "z",
        STAT_DESCRIPTION => "stat",
        EFFECT_DESCRIPTION => "effect",
        VARIANCE_DESCRIPTION => "variance",
        _ => "map",
    }
}

pub fn run(args: ContrastArgs) -> Result<()> {
    let contrast_type = args
        .contrast_type
        .as_deref()
        .map(str::parse::<ContrastType>)
        .transpose()?;

    let archive = load_model(Path::new(&args.model_file))?;
    let n_sessions = archive.n_sessions();
    let model = archive.into_fitted()?;
    info!("Loaded model with {} sessions", n_sessions);

    let parsed = args
        .contrasts
        .iter()
        .map(|c| parse_contrast(c))
        .collect::<Result<Vec<_>>>()?;
    let contrasts = if parsed.len() == 1 && n_sessions > 1 {
        vec![parsed[0].clone(); n_sessions]
    } else {
        parsed
    };

    let options = ContrastOptions {
        contrast_type,
        output_z: !args.no_z,
        output_stat: args.output_stat,
        output_effects: args.output_effects,
        output_variance: args.output_variance,
        stat_config: ContrastStatConfig {
            tiny: args.tiny,
            dofmax: args.dofmax,
        },
    };
    let maps = model.contrast(&contrasts, &options)?;

    for map in &maps {
        let path = output_path(
            &args.output_prefix,
            &format!("{}.img", file_tag(map.description())),
        );
        save_image(map, &path)?;
        println!("{}: {}", map.description(), path.display());
    }

    Ok(())
}
