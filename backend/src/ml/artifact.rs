use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use ckd_shared::{Label, ModelKind};
use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::classifier::{Classifier, ClassifierError};
use super::knn::{DEFAULT_NEIGHBOURS, KnnModel};
use super::logistic::LogisticModel;
use super::naive_bayes::GaussianNb;

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed artifact: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Model(#[from] ClassifierError),
}

/// Fitted parameters, tagged by model kind in the JSON artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ModelParams {
    #[serde(rename = "LogisticRegression")]
    LogisticRegression(LogisticModel),
    #[serde(rename = "KNN")]
    Knn(KnnModel),
    #[serde(rename = "NaiveBayes")]
    NaiveBayes(GaussianNb),
}

impl ModelParams {
    pub fn fit(kind: ModelKind, x: ArrayView2<f64>, y: &[Label]) -> Result<Self, ClassifierError> {
        Ok(match kind {
            ModelKind::LogisticRegression => ModelParams::LogisticRegression(LogisticModel::fit(x, y)?),
            ModelKind::Knn => ModelParams::Knn(KnnModel::fit(x, y, DEFAULT_NEIGHBOURS)?),
            ModelKind::NaiveBayes => ModelParams::NaiveBayes(GaussianNb::fit(x, y)?),
        })
    }

    pub fn kind(&self) -> ModelKind {
        match self {
            ModelParams::LogisticRegression(_) => ModelKind::LogisticRegression,
            ModelParams::Knn(_) => ModelKind::Knn,
            ModelParams::NaiveBayes(_) => ModelKind::NaiveBayes,
        }
    }

    pub fn n_features(&self) -> usize {
        match self {
            ModelParams::LogisticRegression(m) => m.n_features(),
            ModelParams::Knn(m) => m.n_features(),
            ModelParams::NaiveBayes(m) => m.n_features(),
        }
    }

    /// Shape checks for parameters read from disk.
    pub fn validate(&self) -> Result<(), ClassifierError> {
        match self {
            ModelParams::LogisticRegression(m) => m.validate(),
            ModelParams::Knn(m) => m.validate(),
            ModelParams::NaiveBayes(m) => m.validate(),
        }
    }

    pub fn predict_proba(&self, row: &[f64]) -> Result<f64, ClassifierError> {
        match self {
            ModelParams::LogisticRegression(m) => m.predict_proba(row),
            ModelParams::Knn(m) => m.predict_proba(row),
            ModelParams::NaiveBayes(m) => m.predict_proba(row),
        }
    }
}

/// A trained model as persisted under the models directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub name: String,
    pub feature_names: Vec<String>,
    pub trained_at: DateTime<Utc>,
    pub model: ModelParams,
}

pub fn fingerprint(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

impl ModelArtifact {
    pub fn new(name: impl Into<String>, feature_names: Vec<String>, model: ModelParams) -> Result<Self, ClassifierError> {
        let artifact = Self {
            name: name.into(),
            feature_names,
            trained_at: Utc::now(),
            model,
        };
        artifact.validate()?;
        Ok(artifact)
    }

    fn validate(&self) -> Result<(), ClassifierError> {
        if self.name.trim().is_empty() {
            return Err(ClassifierError::InvalidModel("artifact has no name".into()));
        }
        self.model.validate()?;
        if self.feature_names.len() != self.model.n_features() {
            return Err(ClassifierError::InvalidModel(format!(
                "{} declares {} features but its parameters cover {}",
                self.name,
                self.feature_names.len(),
                self.model.n_features()
            )));
        }
        Ok(())
    }

    pub fn file_name(&self) -> String {
        format!("{}.json", self.name)
    }

    /// Writes `<dir>/<name>.json` and returns its path and fingerprint.
    pub fn save(&self, dir: impl AsRef<Path>) -> Result<(PathBuf, String), ArtifactError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let bytes = serde_json::to_vec_pretty(self)?;
        let path = dir.join(self.file_name());
        fs::write(&path, &bytes)?;
        Ok((path, fingerprint(&bytes)))
    }

    /// Reads and validates an artifact, returning it with the file's fingerprint.
    pub fn load(path: impl AsRef<Path>) -> Result<(Self, String), ArtifactError> {
        let bytes = fs::read(path)?;
        let artifact: ModelArtifact = serde_json::from_slice(&bytes)?;
        artifact.validate()?;
        Ok((artifact, fingerprint(&bytes)))
    }
}

impl Classifier for ModelArtifact {
    fn kind(&self) -> ModelKind {
        self.model.kind()
    }

    fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    fn predict_proba(&self, values: &[f64]) -> Result<f64, ClassifierError> {
        if values.len() != self.model.n_features() {
            return Err(ClassifierError::InvalidModel(format!(
                "expected {} values, got {}",
                self.model.n_features(),
                values.len()
            )));
        }
        self.model.predict_proba(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeatureSchema;
    use crate::pipeline::Scaler;
    use crate::pipeline::dataset::tests::sample;
    use ckd_shared::MissingValueStrategy;

    fn trained(kind: ModelKind) -> ModelArtifact {
        let ds = sample().handle_missing(MissingValueStrategy::FillMedian);
        let params = ModelParams::fit(kind, ds.features.view(), &ds.labels).unwrap();
        ModelArtifact::new(kind.to_string(), ds.feature_names.clone(), params).unwrap()
    }

    #[test]
    fn artifacts_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = trained(ModelKind::Knn);
        let (path, saved_fp) = artifact.save(dir.path()).unwrap();
        assert!(path.ends_with("KNN.json"));

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"kind\": \"KNN\""));

        let (loaded, loaded_fp) = ModelArtifact::load(&path).unwrap();
        assert_eq!(loaded.name, artifact.name);
        assert_eq!(loaded.feature_names, artifact.feature_names);
        assert_eq!(loaded.trained_at, artifact.trained_at);
        assert_eq!(loaded.model.kind(), ModelKind::Knn);
        assert_eq!(saved_fp, loaded_fp);
        assert_eq!(loaded_fp.len(), 64);
    }

    #[test]
    fn every_kind_classifies_the_example_patient() {
        let schema = FeatureSchema::ckd_default();
        let patient = schema.vectorize(&schema.example_patient()).unwrap();
        for kind in [ModelKind::LogisticRegression, ModelKind::Knn, ModelKind::NaiveBayes] {
            let artifact = trained(kind);
            assert_eq!(Classifier::kind(&artifact), kind);
            let prediction = artifact.classify(&patient).unwrap();
            assert!((0.5..=1.0).contains(&prediction.confidence), "{kind}");
            let probability = prediction.probability.unwrap();
            assert!((probability.ckd + probability.notckd - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn rejects_inconsistent_artifacts() {
        let mut artifact = trained(ModelKind::NaiveBayes);
        artifact.feature_names.pop();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, serde_json::to_vec(&artifact).unwrap()).unwrap();
        assert!(matches!(
            ModelArtifact::load(&path),
            Err(ArtifactError::Model(ClassifierError::InvalidModel(_)))
        ));

        fs::write(&path, b"{not json").unwrap();
        assert!(matches!(ModelArtifact::load(&path), Err(ArtifactError::Json(_))));
    }

    #[test]
    fn mismatched_scaler_is_rejected_on_load() {
        let mut artifact = trained(ModelKind::LogisticRegression);
        if let ModelParams::LogisticRegression(model) = &mut artifact.model {
            model.scaler = Scaler::Standard {
                means: vec![0.0],
                scales: vec![1.0],
            };
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("LogisticRegression.json");
        fs::write(&path, serde_json::to_vec(&artifact).unwrap()).unwrap();
        assert!(matches!(
            ModelArtifact::load(&path),
            Err(ArtifactError::Model(ClassifierError::InvalidModel(_)))
        ));

        let schema = FeatureSchema::ckd_default();
        let patient = schema.vectorize(&schema.example_patient()).unwrap();
        assert!(artifact.classify(&patient).is_err());
    }
}
