pub mod tracker;

pub use tracker::{DEFAULT_RUNS_KEPT, ExperimentTracker, RunBuilder, TrackingError};
