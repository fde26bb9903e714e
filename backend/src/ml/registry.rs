use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use ckd_shared::ModelInfo;

use super::artifact::ModelArtifact;
use super::classifier::Classifier;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Failed to read models directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A classifier registered under a name, with the provenance of its artifact.
pub struct LoadedModel {
    pub name: String,
    pub fingerprint: Option<String>,
    pub trained_at: Option<DateTime<Utc>>,
    pub classifier: Arc<dyn Classifier>,
}

impl LoadedModel {
    pub fn new(name: impl Into<String>, classifier: Arc<dyn Classifier>) -> Self {
        Self {
            name: name.into(),
            fingerprint: None,
            trained_at: None,
            classifier,
        }
    }

    fn from_artifact(artifact: ModelArtifact, fingerprint: String) -> Self {
        Self {
            name: artifact.name.clone(),
            fingerprint: Some(fingerprint),
            trained_at: Some(artifact.trained_at),
            classifier: Arc::new(artifact),
        }
    }

    pub fn info(&self) -> ModelInfo {
        ModelInfo {
            name: self.name.clone(),
            kind: self.classifier.kind(),
            has_probability: self.classifier.has_probability(),
            feature_names: self.classifier.feature_names().to_vec(),
            fingerprint: self.fingerprint.clone(),
            trained_at: self.trained_at,
        }
    }
}

impl std::fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModel")
            .field("name", &self.name)
            .field("kind", &self.classifier.kind())
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}

/// Named classifiers in registration order.
///
/// Readers take a [`ModelRegistry::snapshot`] of cloned `Arc`s, so a reload
/// swaps the whole set without disturbing calls already in flight.
pub struct ModelRegistry {
    models_dir: PathBuf,
    models: RwLock<Vec<Arc<LoadedModel>>>,
}

impl ModelRegistry {
    pub fn new(models_dir: impl Into<PathBuf>) -> Self {
        Self {
            models_dir: models_dir.into(),
            models: RwLock::new(Vec::new()),
        }
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Loads every `*.json` artifact in file-name order. Unreadable or invalid
    /// artifacts are logged and skipped; a missing directory yields no models.
    pub fn load_dir(dir: &Path) -> Result<Vec<Arc<LoadedModel>>, RegistryError> {
        if !dir.exists() {
            log::warn!("Models directory {} does not exist", dir.display());
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(dir).map_err(|source| RegistryError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        let mut loaded: Vec<Arc<LoadedModel>> = Vec::with_capacity(paths.len());
        for path in paths {
            match ModelArtifact::load(&path) {
                Ok((artifact, fingerprint)) => {
                    if loaded.iter().any(|m| m.name == artifact.name) {
                        log::warn!(
                            "Duplicate model name '{}' in {}, keeping the first",
                            artifact.name,
                            path.display()
                        );
                        continue;
                    }
                    log::info!("Loaded {} model from {}", artifact.name, path.display());
                    loaded.push(Arc::new(LoadedModel::from_artifact(artifact, fingerprint)));
                }
                Err(e) => log::warn!("Skipping model artifact {}: {}", path.display(), e),
            }
        }
        Ok(loaded)
    }

    pub fn load(&self) -> Result<usize, RegistryError> {
        self.reload()
    }

    /// Re-reads the models directory and swaps the registered set in one step.
    /// On error the current set is kept.
    pub fn reload(&self) -> Result<usize, RegistryError> {
        let loaded = Self::load_dir(&self.models_dir)?;
        let count = loaded.len();
        *self.models.write().unwrap_or_else(PoisonError::into_inner) = loaded;
        Ok(count)
    }

    /// Registers a classifier, replacing any model with the same name.
    pub fn insert(&self, model: LoadedModel) {
        let mut models = self.models.write().unwrap_or_else(PoisonError::into_inner);
        let model = Arc::new(model);
        match models.iter_mut().find(|m| m.name == model.name) {
            Some(slot) => *slot = model,
            None => models.push(model),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<LoadedModel>> {
        self.models
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|m| m.name == name)
            .cloned()
    }

    pub fn snapshot(&self) -> Vec<Arc<LoadedModel>> {
        self.models.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn list(&self) -> Vec<ModelInfo> {
        self.snapshot().iter().map(|m| m.info()).collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.snapshot().iter().map(|m| m.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.models.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
