use std::sync::Arc;

use actix_web::{HttpResponse, web};
use chrono::Utc;
use ckd_shared::{
    BatchPredictionRequest, BatchPredictionResponse, EnsemblePredictionResponse, ModelsResponse, PatientInput,
    PredictionResponse, ReloadResponse, RunStatus,
};
use serde::Deserialize;
use uuid::Uuid;

use super::error::ApiError;
use crate::config::{FeatureSchema, Settings};
use crate::features::FeatureVector;
use crate::ml::{LoadedModel, ModelRegistry, Prediction, run_ensemble};
use crate::stats::ComparisonService;
use crate::tracking::ExperimentTracker;

#[derive(Debug, Deserialize)]
pub struct ModelQuery {
    pub model_name: Option<String>,
}

fn select_model(registry: &ModelRegistry, settings: &Settings, name: Option<&str>) -> Result<Arc<LoadedModel>, ApiError> {
    if registry.is_empty() {
        return Err(ApiError::ModelUnavailable);
    }
    let name = name.unwrap_or(&settings.default_model);
    registry.get(name).ok_or_else(|| ApiError::ModelNotFound {
        name: name.to_string(),
        available: registry.names(),
    })
}

/// Records one prediction as a tracking run. Failures are only logged.
fn track_prediction(
    tracker: &ExperimentTracker,
    experiment: &str,
    model: &str,
    features: &FeatureVector,
    prediction: &Prediction,
) -> Option<Uuid> {
    let mut run = tracker.start_run(experiment, format!("prediction_{model}"));
    for (name, value) in features.iter() {
        run.log_param(format!("input_{name}"), value);
    }
    run.log_param("model_used", model)
        .log_metric("prediction", f64::from(prediction.label.as_numeric()))
        .log_metric("confidence", prediction.confidence);
    match run.finish(RunStatus::Finished) {
        Ok(run) => Some(run.run_id),
        Err(e) => {
            log::warn!("Failed to track prediction: {}", e);
            None
        }
    }
}

struct PredictionContext<'a> {
    settings: &'a Settings,
    comparison: &'a ComparisonService,
    tracker: &'a ExperimentTracker,
}

impl PredictionContext<'_> {
    fn predict(&self, model: &LoadedModel, features: &FeatureVector) -> Result<PredictionResponse, ApiError> {
        let prediction = model
            .classifier
            .classify(features)
            .map_err(|source| ApiError::Classifier {
                model: model.name.clone(),
                source,
            })?;
        let run_id = track_prediction(
            self.tracker,
            &self.settings.experiment_name,
            &model.name,
            features,
            &prediction,
        );
        Ok(PredictionResponse {
            prediction: prediction.label,
            prediction_numeric: prediction.label.as_numeric(),
            prediction_text: prediction.label.prediction_text().to_string(),
            probability: prediction.probability,
            confidence: prediction.confidence,
            model_used: model.name.clone(),
            timestamp: Utc::now(),
            run_id,
            patient_values: features.to_map(),
            comparison_data: self.comparison.compare(features),
        })
    }
}

pub async fn predict(
    settings: web::Data<Settings>,
    schema: web::Data<FeatureSchema>,
    registry: web::Data<ModelRegistry>,
    comparison: web::Data<ComparisonService>,
    tracker: web::Data<ExperimentTracker>,
    query: web::Query<ModelQuery>,
    patient: web::Json<PatientInput>,
) -> Result<HttpResponse, ApiError> {
    let features = schema.vectorize(&patient)?;
    let model = select_model(&registry, &settings, query.model_name.as_deref())?;
    let ctx = PredictionContext {
        settings: &settings,
        comparison: &comparison,
        tracker: &tracker,
    };
    let response = ctx.predict(&model, &features)?;
    log::info!(
        "Prediction by {}: {} ({:.3})",
        model.name,
        response.prediction,
        response.confidence
    );
    Ok(HttpResponse::Ok().json(response))
}

/// Every patient is validated before any model runs.
pub async fn predict_batch(
    settings: web::Data<Settings>,
    schema: web::Data<FeatureSchema>,
    registry: web::Data<ModelRegistry>,
    comparison: web::Data<ComparisonService>,
    tracker: web::Data<ExperimentTracker>,
    query: web::Query<ModelQuery>,
    request: web::Json<BatchPredictionRequest>,
) -> Result<HttpResponse, ApiError> {
    if request.patients.is_empty() {
        return Err(ApiError::BadRequest("No patients provided".into()));
    }
    let vectors = request
        .patients
        .iter()
        .map(|patient| schema.vectorize(patient))
        .collect::<Result<Vec<_>, _>>()?;
    let model = select_model(&registry, &settings, query.model_name.as_deref())?;
    let ctx = PredictionContext {
        settings: &settings,
        comparison: &comparison,
        tracker: &tracker,
    };
    let predictions = vectors
        .iter()
        .map(|features| ctx.predict(&model, features))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(HttpResponse::Ok().json(BatchPredictionResponse {
        total_patients: predictions.len(),
        predictions,
        timestamp: Utc::now(),
    }))
}

pub async fn predict_ensemble(
    schema: web::Data<FeatureSchema>,
    registry: web::Data<ModelRegistry>,
    comparison: web::Data<ComparisonService>,
    patient: web::Json<PatientInput>,
) -> Result<HttpResponse, ApiError> {
    let features = schema.vectorize(&patient)?;
    let models = registry.snapshot();
    if models.is_empty() {
        return Err(ApiError::ModelUnavailable);
    }
    let ensemble = run_ensemble(&models, &features)?;
    log::info!(
        "Ensemble prediction: {} ({})",
        ensemble.consensus.label,
        ensemble.consensus.agreement_text()
    );

    Ok(HttpResponse::Ok().json(EnsemblePredictionResponse {
        individual_predictions: ensemble.votes.iter().map(|v| v.to_individual()).collect(),
        consensus: ensemble.consensus.summary(),
        patient_values: features.to_map(),
        comparison_data: comparison.compare(&features),
        timestamp: Utc::now(),
    }))
}

pub async fn predict_example(
    settings: web::Data<Settings>,
    schema: web::Data<FeatureSchema>,
    registry: web::Data<ModelRegistry>,
    comparison: web::Data<ComparisonService>,
    tracker: web::Data<ExperimentTracker>,
    query: web::Query<ModelQuery>,
) -> Result<HttpResponse, ApiError> {
    let features = schema.vectorize(&schema.example_patient())?;
    let model = select_model(&registry, &settings, query.model_name.as_deref())?;
    let ctx = PredictionContext {
        settings: &settings,
        comparison: &comparison,
        tracker: &tracker,
    };
    Ok(HttpResponse::Ok().json(ctx.predict(&model, &features)?))
}

pub async fn list_models(registry: web::Data<ModelRegistry>) -> HttpResponse {
    let models = registry.list();
    HttpResponse::Ok().json(ModelsResponse {
        total: models.len(),
        models,
        timestamp: Utc::now(),
    })
}

pub async fn reload_models(registry: web::Data<ModelRegistry>) -> Result<HttpResponse, ApiError> {
    let count = registry.reload()?;
    log::info!("Reloaded {} models from {}", count, registry.models_dir().display());
    Ok(HttpResponse::Ok().json(ReloadResponse {
        status: "success".to_string(),
        message: format!("Reloaded {count} models"),
        models: registry.names(),
        timestamp: Utc::now(),
    }))
}

pub async fn statistics(comparison: web::Data<ComparisonService>) -> Result<HttpResponse, ApiError> {
    let stats = comparison.statistics().ok_or(ApiError::StatisticsUnavailable)?;
    Ok(HttpResponse::Ok().json(stats))
}
