use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ckd_shared::{
    FeatureScore, Label, MissingValueStrategy, ModelKind, ModelTrainingResult, RankedModel, RunStatus,
    TrainingConfig, TrainingStatus, TrainingSummary,
};
use strum::IntoEnumIterator;
use tokio::sync::watch;
use uuid::Uuid;

use super::metrics::ClassificationMetrics;
use crate::config::FeatureSchema;
use crate::ml::{ArtifactError, ClassifierError, ModelArtifact, ModelParams, ModelRegistry, RegistryError};
use crate::pipeline::engineering::f_scores;
use crate::pipeline::{Dataset, PipelineError};
use crate::stats::descriptive;
use crate::tracking::ExperimentTracker;

#[derive(Debug, thiserror::Error)]
pub enum TrainingError {
    #[error("Training is already in progress")]
    AlreadyRunning,
    #[error("No training in progress")]
    NotRunning,
    #[error("No training results available")]
    NoResults,
    #[error("Training data not found at {}", .0.display())]
    DataMissing(PathBuf),
    #[error("Invalid training configuration: {0}")]
    InvalidConfig(String),
    #[error("Training cancelled")]
    Cancelled,
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Classifier(#[from] ClassifierError),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

pub fn models_to_train(config: &TrainingConfig) -> Vec<ModelKind> {
    config
        .models_to_train
        .clone()
        .unwrap_or_else(|| ModelKind::iter().collect())
}

pub fn validate_config(config: &TrainingConfig) -> Result<(), TrainingError> {
    if !(0.1..=0.5).contains(&config.test_size) {
        return Err(TrainingError::InvalidConfig(format!(
            "test_size must be between 0.1 and 0.5, got {}",
            config.test_size
        )));
    }
    if config.models_to_train.as_ref().is_some_and(Vec::is_empty) {
        return Err(TrainingError::InvalidConfig("models_to_train is empty".into()));
    }
    if config.experiment_name.trim().is_empty() {
        return Err(TrainingError::InvalidConfig("experiment_name is empty".into()));
    }
    Ok(())
}

/// Ranks by F1, best first.
pub fn summarize(results: &BTreeMap<String, ModelTrainingResult>) -> TrainingSummary {
    let mut ranking: Vec<RankedModel> = results
        .iter()
        .map(|(name, result)| RankedModel {
            name: name.clone(),
            f1_score: result.f1_score,
        })
        .collect();
    ranking.sort_by(|a, b| b.f1_score.total_cmp(&a.f1_score));
    TrainingSummary {
        best_model: ranking.first().map(|m| m.name.clone()),
        ranking,
    }
}

fn predict_labels(params: &ModelParams, ds: &Dataset) -> Result<Vec<Label>, ClassifierError> {
    ds.features
        .outer_iter()
        .map(|row| {
            let p = params.predict_proba(&row.to_vec())?;
            Ok(if p >= 0.5 { Label::Ckd } else { Label::NotCkd })
        })
        .collect()
}

/// Fits, evaluates and persists models from the training CSV.
pub struct Trainer {
    schema: Arc<FeatureSchema>,
    data_path: PathBuf,
    registry: Arc<ModelRegistry>,
    tracker: Arc<ExperimentTracker>,
}

impl Trainer {
    pub fn new(
        schema: Arc<FeatureSchema>,
        data_path: impl Into<PathBuf>,
        registry: Arc<ModelRegistry>,
        tracker: Arc<ExperimentTracker>,
    ) -> Self {
        Self {
            schema,
            data_path: data_path.into(),
            registry,
            tracker,
        }
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    pub fn has_data(&self) -> bool {
        self.data_path.is_file()
    }

    /// Training CSV restricted to the schema features, all of which must be
    /// present.
    pub fn load_dataset(&self, strategy: MissingValueStrategy) -> Result<Dataset, TrainingError> {
        if !self.has_data() {
            return Err(TrainingError::DataMissing(self.data_path.clone()));
        }
        let dataset = Dataset::from_csv(&self.data_path, &self.schema)?;
        if let Some(missing) = self.schema.names().iter().find(|n| dataset.column_index(n).is_none()) {
            return Err(PipelineError::MissingColumn(missing.clone()).into());
        }
        let dataset = dataset.handle_missing(strategy);
        if dataset.is_empty() {
            return Err(PipelineError::Empty.into());
        }
        Ok(dataset)
    }

    /// ANOVA F-scores of every feature against the diagnosis, highest first.
    pub fn feature_ranking(&self) -> Result<Vec<FeatureScore>, TrainingError> {
        let dataset = self.load_dataset(MissingValueStrategy::FillMedian)?;
        let mut scores = f_scores(&dataset);
        scores.sort_by(|a, b| b.f_score.total_cmp(&a.f_score));
        Ok(scores)
    }

    /// Runs one training job, publishing progress through `status`.
    ///
    /// `is_cancelled` is polled before each model and once more before any
    /// artifact is written. Artifacts reach the models directory only when
    /// every requested model has trained, so a cancelled or failed job
    /// leaves the directory and the registry untouched.
    pub fn run(
        &self,
        config: &TrainingConfig,
        status: &watch::Sender<TrainingStatus>,
        is_cancelled: impl Fn() -> bool,
    ) -> Result<TrainingSummary, TrainingError> {
        let kinds = models_to_train(config);
        let dataset = self.load_dataset(config.missing_values)?;
        let (train, test) = dataset.train_test_split(config.test_size, config.random_state, true)?;
        log::info!(
            "Training {} models on {} rows ({} held out)",
            kinds.len(),
            train.len(),
            test.len()
        );

        let mut results = BTreeMap::new();
        let mut artifacts = Vec::with_capacity(kinds.len());
        for (i, kind) in kinds.iter().enumerate() {
            if is_cancelled() {
                log::info!("Training cancelled before {}", kind);
                return Err(TrainingError::Cancelled);
            }
            status.send_modify(|s| {
                s.current_model = Some(kind.to_string());
                s.progress = (i * 100 / kinds.len()) as u8;
                s.message = format!("Training {kind}");
            });

            let (result, artifact) = self.train_model(*kind, &train, &test, config)?;
            artifacts.push(artifact);
            log::info!(
                "{} trained: accuracy {:.3}, f1 {:.3}",
                kind,
                result.accuracy,
                result.f1_score
            );
            results.insert(kind.to_string(), result.clone());
            status.send_modify(|s| {
                s.results.insert(kind.to_string(), result);
            });
        }

        if is_cancelled() {
            log::info!("Training cancelled before saving artifacts");
            return Err(TrainingError::Cancelled);
        }
        for artifact in &artifacts {
            let (path, fingerprint) = artifact.save(self.registry.models_dir())?;
            log::debug!("Saved {} to {} ({})", artifact.name, path.display(), fingerprint);
        }

        let summary = summarize(&results);
        let count = self.registry.reload()?;
        log::info!("Registry reloaded with {} models", count);
        Ok(summary)
    }

    fn train_model(
        &self,
        kind: ModelKind,
        train: &Dataset,
        test: &Dataset,
        config: &TrainingConfig,
    ) -> Result<(ModelTrainingResult, ModelArtifact), TrainingError> {
        let params = ModelParams::fit(kind, train.features.view(), &train.labels)?;
        let metrics = ClassificationMetrics::compute(&test.labels, &predict_labels(&params, test)?);
        let cv_scores = self.cross_validate(kind, train, config);
        let cv_mean = descriptive::mean(&cv_scores);
        let cv_std = descriptive::population_std(&cv_scores);

        let artifact = ModelArtifact::new(kind.to_string(), train.feature_names.clone(), params)?;

        let run_id = self.log_run(kind, train, config, &metrics, cv_mean, cv_std);
        let result = ModelTrainingResult {
            accuracy: metrics.accuracy,
            precision: metrics.precision,
            recall: metrics.recall,
            f1_score: metrics.f1_score,
            cv_mean,
            cv_std,
            run_id,
        };
        Ok((result, artifact))
    }

    /// Accuracy per fold. Folds whose training part lacks a class are skipped.
    fn cross_validate(&self, kind: ModelKind, train: &Dataset, config: &TrainingConfig) -> Vec<f64> {
        if config.cv_folds < 2 {
            return Vec::new();
        }
        let folds = match train.k_fold_indices(config.cv_folds, config.random_state) {
            Ok(folds) => folds,
            Err(e) => {
                log::warn!("Skipping cross-validation for {}: {}", kind, e);
                return Vec::new();
            }
        };
        folds
            .iter()
            .filter_map(|(train_rows, validation_rows)| {
                let fold_train = train.select_rows(train_rows);
                let fold_val = train.select_rows(validation_rows);
                let predicted = ModelParams::fit(kind, fold_train.features.view(), &fold_train.labels)
                    .and_then(|params| predict_labels(&params, &fold_val));
                match predicted {
                    Ok(labels) => Some(ClassificationMetrics::compute(&fold_val.labels, &labels).accuracy),
                    Err(e) => {
                        log::debug!("Skipping fold for {}: {}", kind, e);
                        None
                    }
                }
            })
            .collect()
    }

    fn log_run(
        &self,
        kind: ModelKind,
        train: &Dataset,
        config: &TrainingConfig,
        metrics: &ClassificationMetrics,
        cv_mean: Option<f64>,
        cv_std: Option<f64>,
    ) -> Option<Uuid> {
        let mut run = self.tracker.start_run(&config.experiment_name, kind.to_string());
        run.log_param("model_type", kind)
            .log_param("test_size", config.test_size)
            .log_param("random_state", config.random_state)
            .log_param("n_features", train.n_features())
            .log_param("train_samples", train.len())
            .log_metric("accuracy", metrics.accuracy)
            .log_metric("precision", metrics.precision)
            .log_metric("recall", metrics.recall)
            .log_metric("f1_score", metrics.f1_score);
        if let (Some(mean), Some(std)) = (cv_mean, cv_std) {
            run.log_metric("cv_mean", mean).log_metric("cv_std", std);
        }
        match run.finish(RunStatus::Finished) {
            Ok(run) => Some(run.run_id),
            Err(e) => {
                log::warn!("Failed to record training run for {}: {}", kind, e);
                None
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::pipeline::dataset::tests::SAMPLE_CSV;

    pub(crate) struct Fixture {
        pub dir: tempfile::TempDir,
        pub registry: Arc<ModelRegistry>,
        pub tracker: Arc<ExperimentTracker>,
        pub trainer: Arc<Trainer>,
    }

    pub(crate) fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let data_path = dir.path().join("ckd.csv");
        std::fs::write(&data_path, SAMPLE_CSV).unwrap();
        let registry = Arc::new(ModelRegistry::new(dir.path().join("models")));
        let tracker = Arc::new(ExperimentTracker::in_memory());
        let trainer = Arc::new(Trainer::new(
            Arc::new(FeatureSchema::ckd_default()),
            data_path,
            registry.clone(),
            tracker.clone(),
        ));
        Fixture {
            dir,
            registry,
            tracker,
            trainer,
        }
    }

    pub(crate) fn quick_config() -> TrainingConfig {
        TrainingConfig {
            test_size: 0.34,
            cv_folds: 3,
            ..TrainingConfig::default()
        }
    }

    #[test]
    fn trains_every_model_and_reloads_registry() {
        let f = fixture();
        let (tx, _rx) = watch::channel(TrainingStatus::running(Uuid::new_v4()));
        let summary = f.trainer.run(&quick_config(), &tx, || false).unwrap();

        assert_eq!(summary.ranking.len(), 3);
        assert!(summary.best_model.is_some());
        assert!(summary.ranking.windows(2).all(|w| w[0].f1_score >= w[1].f1_score));
        assert_eq!(f.registry.len(), 3);
        assert!(f.dir.path().join("models").join("KNN.json").exists());

        let status = tx.borrow();
        assert_eq!(status.results.len(), 3);
        let knn = &status.results["KNN"];
        assert!(knn.cv_mean.is_some());
        let run = f.tracker.run(knn.run_id.unwrap()).unwrap();
        assert_eq!(run.run_name, "KNN");
        assert_eq!(run.params["model_type"], "KNN");
        assert!(run.metrics.contains_key("f1_score"));
    }

    #[test]
    fn cancelled_before_the_first_model() {
        let f = fixture();
        let (tx, _rx) = watch::channel(TrainingStatus::running(Uuid::new_v4()));
        let outcome = f.trainer.run(&quick_config(), &tx, || true);
        assert!(matches!(outcome, Err(TrainingError::Cancelled)));
        assert!(f.registry.is_empty());
    }

    #[test]
    fn cancelled_mid_job_writes_no_artifacts() {
        let f = fixture();
        let (tx, _rx) = watch::channel(TrainingStatus::running(Uuid::new_v4()));
        let polls = std::cell::Cell::new(0);
        let outcome = f.trainer.run(&quick_config(), &tx, || {
            polls.set(polls.get() + 1);
            polls.get() > 2
        });
        assert!(matches!(outcome, Err(TrainingError::Cancelled)));
        assert_eq!(tx.borrow().results.len(), 2);

        let models_dir = f.dir.path().join("models");
        let written = std::fs::read_dir(&models_dir).map(|d| d.count()).unwrap_or(0);
        assert_eq!(written, 0);
        assert_eq!(f.registry.reload().unwrap(), 0);
    }

    #[test]
    fn single_model_without_cross_validation() {
        let f = fixture();
        let config = TrainingConfig {
            models_to_train: Some(vec![ModelKind::NaiveBayes]),
            cv_folds: 0,
            ..quick_config()
        };
        let (tx, _rx) = watch::channel(TrainingStatus::running(Uuid::new_v4()));
        let summary = f.trainer.run(&config, &tx, || false).unwrap();
        assert_eq!(summary.best_model.as_deref(), Some("NaiveBayes"));
        assert_eq!(tx.borrow().results["NaiveBayes"].cv_mean, None);
    }

    #[test]
    fn missing_schema_column_fails() {
        let f = fixture();
        std::fs::write(f.trainer.data_path(), "hemo,status\n10,ckd\n15,notckd\n").unwrap();
        assert!(matches!(
            f.trainer.load_dataset(MissingValueStrategy::FillMedian),
            Err(TrainingError::Pipeline(PipelineError::MissingColumn(_)))
        ));
    }

    #[test]
    fn feature_ranking_is_sorted() {
        let f = fixture();
        let ranking = f.trainer.feature_ranking().unwrap();
        assert_eq!(ranking.len(), 9);
        assert!(ranking.windows(2).all(|w| w[0].f_score >= w[1].f_score));
    }

    #[test]
    fn config_validation() {
        assert!(validate_config(&TrainingConfig::default()).is_ok());
        let bad = TrainingConfig {
            test_size: 0.9,
            ..TrainingConfig::default()
        };
        assert!(matches!(validate_config(&bad), Err(TrainingError::InvalidConfig(_))));
        let empty = TrainingConfig {
            models_to_train: Some(Vec::new()),
            ..TrainingConfig::default()
        };
        assert!(validate_config(&empty).is_err());
        assert_eq!(models_to_train(&TrainingConfig::default()).len(), 3);
    }
}
