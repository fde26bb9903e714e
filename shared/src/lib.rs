use chrono::{DateTime, Utc};
use derive_more::{Deref, From};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};
use uuid::Uuid;

/// Diagnosis label. `Ckd` is the positive class.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Label {
    Ckd,
    NotCkd,
}

impl Label {
    pub fn as_numeric(self) -> u8 {
        match self {
            Label::Ckd => 1,
            Label::NotCkd => 0,
        }
    }

    pub fn prediction_text(self) -> &'static str {
        match self {
            Label::Ckd => "CKD",
            Label::NotCkd => "NO CKD",
        }
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
pub enum ModelKind {
    #[serde(rename = "LogisticRegression")]
    #[strum(serialize = "LogisticRegression")]
    LogisticRegression,
    #[serde(rename = "KNN")]
    #[strum(serialize = "KNN")]
    Knn,
    #[serde(rename = "NaiveBayes")]
    #[strum(serialize = "NaiveBayes")]
    NaiveBayes,
}

/// Raw patient payload: feature name to value. Validation happens server side
/// against the feature schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Deref, From)]
#[serde(transparent)]
pub struct PatientInput(pub BTreeMap<String, f64>);

impl<const N: usize> From<[(&str, f64); N]> for PatientInput {
    fn from(pairs: [(&str, f64); N]) -> Self {
        PatientInput(
            pairs
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassProbabilities {
    pub ckd: f64,
    pub notckd: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureComparison {
    pub patient_value: f64,
    pub ckd_mean: Option<f64>,
    pub ckd_std: Option<f64>,
    pub ckd_median: Option<f64>,
    pub ckd_mode: Option<f64>,
    pub notckd_mean: Option<f64>,
    pub notckd_std: Option<f64>,
    pub notckd_median: Option<f64>,
    pub notckd_mode: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub prediction: Label,
    pub prediction_numeric: u8,
    pub prediction_text: String,
    pub probability: Option<ClassProbabilities>,
    pub confidence: f64,
    pub model_used: String,
    pub timestamp: DateTime<Utc>,
    pub run_id: Option<Uuid>,
    pub patient_values: BTreeMap<String, f64>,
    #[serde(default)]
    pub comparison_data: BTreeMap<String, FeatureComparison>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchPredictionRequest {
    pub patients: Vec<PatientInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchPredictionResponse {
    pub predictions: Vec<PredictionResponse>,
    pub total_patients: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndividualPrediction {
    pub model: String,
    pub prediction: Label,
    pub confidence: f64,
    pub probability: Option<ClassProbabilities>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusSummary {
    pub prediction: Label,
    /// Human readable form, e.g. "3/4 models".
    pub agreement: String,
    pub agreement_count: usize,
    pub total_models: usize,
    pub consensus_confidence: f64,
    pub average_model_confidence: f64,
    pub unanimous: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsemblePredictionResponse {
    pub individual_predictions: Vec<IndividualPrediction>,
    pub consensus: ConsensusSummary,
    pub patient_values: BTreeMap<String, f64>,
    #[serde(default)]
    pub comparison_data: BTreeMap<String, FeatureComparison>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub kind: ModelKind,
    pub has_probability: bool,
    pub feature_names: Vec<String>,
    pub fingerprint: Option<String>,
    pub trained_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsResponse {
    pub models: Vec<ModelInfo>,
    pub total: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReloadResponse {
    pub status: String,
    pub message: String,
    pub models: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingValueStrategy {
    Drop,
    #[default]
    FillMedian,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub experiment_name: String,
    pub test_size: f64,
    pub random_state: u64,
    /// `None` trains every model kind.
    pub models_to_train: Option<Vec<ModelKind>>,
    pub missing_values: MissingValueStrategy,
    /// Values below 2 disable cross-validation.
    pub cv_folds: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            experiment_name: "CKD_Detection".to_string(),
            test_size: 0.2,
            random_state: 42,
            models_to_train: None,
            missing_values: MissingValueStrategy::default(),
            cv_folds: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TrainingState {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TrainingState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TrainingState::Completed | TrainingState::Failed | TrainingState::Cancelled
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelTrainingResult {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub cv_mean: Option<f64>,
    pub cv_std: Option<f64>,
    pub run_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedModel {
    pub name: String,
    pub f1_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub best_model: Option<String>,
    pub ranking: Vec<RankedModel>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingStatus {
    pub job_id: Option<Uuid>,
    pub state: TrainingState,
    pub current_model: Option<String>,
    pub progress: u8,
    pub message: String,
    pub results: BTreeMap<String, ModelTrainingResult>,
    pub summary: Option<TrainingSummary>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl TrainingStatus {
    pub fn idle() -> Self {
        Self {
            job_id: None,
            state: TrainingState::Idle,
            current_model: None,
            progress: 0,
            message: "Not started".to_string(),
            results: BTreeMap::new(),
            summary: None,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    pub fn running(job_id: Uuid) -> Self {
        Self {
            job_id: Some(job_id),
            state: TrainingState::Running,
            message: "Training started".to_string(),
            started_at: Some(Utc::now()),
            ..Self::idle()
        }
    }

    pub fn is_training(&self) -> bool {
        self.state == TrainingState::Running
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingResponse {
    pub status: String,
    pub message: String,
    pub job_id: Option<Uuid>,
    pub started_at: Option<DateTime<Utc>>,
    pub models_to_train: Vec<ModelKind>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingResults {
    pub results: BTreeMap<String, ModelTrainingResult>,
    pub summary: Option<TrainingSummary>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureScore {
    pub feature: String,
    pub f_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    pub experiment_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum RunStatus {
    Finished,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub run_id: Uuid,
    pub experiment_id: String,
    pub experiment_name: String,
    pub run_name: String,
    pub status: RunStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub params: BTreeMap<String, String>,
    pub metrics: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub count: usize,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub latest: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSummaryResponse {
    pub experiment_name: String,
    pub total_runs: usize,
    pub metrics_summary: BTreeMap<String, MetricSummary>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsHealth {
    pub loaded: bool,
    pub count: usize,
    pub names: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub service: String,
    pub version: String,
    pub models: ModelsHealth,
    pub statistics_available: bool,
    pub training: TrainingState,
}
