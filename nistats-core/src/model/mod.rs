//! Multi-session model, mask estimation and model persistence.

pub mod archive;
pub mod inputs;
pub mod mask;
pub mod multi_session;
pub mod serialization;

pub use archive::ModelArchive;
pub use inputs::{DataInput, DesignInput, MaskInput, SessionInputs};
pub use mask::{compute_epi_mask, compute_multi_epi_mask, MaskConfig};
pub use multi_session::{ContrastOptions, FitOptions, FittedModel, FmriLinearModel};
pub use serialization::{load_model, model_summary, save_model, save_model_json};
