//! Native classifiers, their JSON artifacts, the in-process model registry
//! and the ensemble consensus built on top of it.

pub mod artifact;
pub mod classifier;
pub mod consensus;
pub mod knn;
pub mod logistic;
pub mod naive_bayes;
pub mod registry;

pub use artifact::{ArtifactError, ModelArtifact, ModelParams};
pub use classifier::{Classifier, ClassifierError, Prediction};
pub use consensus::{Consensus, ConsensusError, Ensemble, ModelVote, consensus, run_ensemble};
pub use registry::{LoadedModel, ModelRegistry, RegistryError};
