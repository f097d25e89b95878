//! Print a summary of a fitted model.
//!
//! nistats summary --model-file ...

use clap::Args;
use anyhow::Result;

use nistats_core::model::serialization::{load_model, model_summary};

#[derive(Args)]
pub struct SummaryArgs {
    /// Model file written by `nistats fit` (.nsglm)
    #[arg(long)]
    model_file: String,
}

pub fn run(args: SummaryArgs) -> Result<()> {
    let model = load_model(std::path::Path::new(&args.model_file))?;

    println!("Model: {}", args.model_file);
    println!("{}", model_summary(&model));

    Ok(())
}
