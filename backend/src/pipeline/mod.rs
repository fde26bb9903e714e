pub mod dataset;
pub mod engineering;
pub mod pca;
pub mod scaler;

pub use dataset::{Dataset, PipelineError};
pub use pca::{Pca, apply_pca};
pub use scaler::{Scaler, ScalerError};
