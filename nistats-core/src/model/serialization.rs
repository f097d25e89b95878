//! Model serialization and deserialization.
//!
//! Uses bincode for fast, compact binary serialization.
//! Format: magic bytes (NSGL) + version (u32) + bincode payload.
//! Optional JSON sidecar for human inspection.

use anyhow::{bail, Context, Result};
use std::path::Path;

use super::archive::ModelArchive;

/// Save a model archive to a binary file (.nsglm).
pub fn save_model(model: &ModelArchive, path: &Path) -> Result<()> {
    let encoded = bincode::serialize(model)?;
    std::fs::write(path, &encoded)
        .with_context(|| format!("Failed to write model: {}", path.display()))?;
    Ok(())
}

/// Load a model archive from a binary file (.nsglm).
pub fn load_model(path: &Path) -> Result<ModelArchive> {
    let data = std::fs::read(path)
        .with_context(|| format!("Failed to read model: {}", path.display()))?;
    let mut model: ModelArchive = bincode::deserialize(&data)
        .with_context(|| format!("Invalid model file: {}", path.display()))?;

    // Validate magic bytes
    if model.magic != ModelArchive::MAGIC {
        bail!(
            "Invalid model file: expected magic bytes {:?}, got {:?}",
            ModelArchive::MAGIC,
            model.magic
        );
    }
    if model.version != ModelArchive::VERSION {
        bail!(
            "Unsupported model file version {} (expected {})",
            model.version,
            ModelArchive::VERSION
        );
    }

    // Images were decoded without their length checks
    model.mask = model.mask.validated().context("Invalid mask in model file")?;
    if model.mask.n_frames() == 0 {
        bail!("Invalid mask in model file: no frames");
    }
    model.means = model
        .means
        .into_iter()
        .enumerate()
        .map(|(i, m)| {
            m.validated()
                .with_context(|| format!("Invalid mean image {} in model file", i))
        })
        .collect::<Result<_>>()?;

    Ok(model)
}

/// Save a JSON sidecar for debugging (.nsglm.json).
pub fn save_model_json(model: &ModelArchive, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(model)?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Summary of a model archive (for display).
pub fn model_summary(model: &ModelArchive) -> String {
    let mut out = format!(
        "nistats GLM v{}\n\
         Noise model: {}\n\
         AR bins: {}\n\
         Scaling: {}\n\
         Grid: {:?}\n\
         Voxels in mask: {}\n\
         Sessions: {}",
        model.version,
        model.options.noise_model,
        model.options.ar_bins,
        if model.options.do_scaling { "yes" } else { "no" },
        model.mask.shape(),
        model.n_voxels(),
        model.n_sessions(),
    );
    for (i, s) in model.sessions.iter().enumerate() {
        let df: Vec<usize> = s.batches.iter().map(|b| b.df_resid).collect();
        out.push_str(&format!(
            "\n  Session {}: {} scans, {} regressors, {} batches, df_resid {}..{}",
            i,
            s.n_scans,
            s.n_regressors,
            s.batches.len(),
            df.iter().min().copied().unwrap_or(0),
            df.iter().max().copied().unwrap_or(0),
        ));
    }
    out
}
