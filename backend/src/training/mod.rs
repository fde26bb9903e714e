pub mod manager;
pub mod metrics;
pub mod trainer;

pub use manager::TrainingManager;
pub use metrics::ClassificationMetrics;
pub use trainer::{Trainer, TrainingError};
