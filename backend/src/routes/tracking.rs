use actix_web::{HttpResponse, web};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::error::ApiError;
use crate::config::Settings;
use crate::tracking::{ExperimentTracker, TrackingError};

const DEFAULT_RUN_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
pub struct RunsQuery {
    pub experiment_name: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct ExperimentQuery {
    pub experiment_name: Option<String>,
}

pub async fn experiments(tracker: web::Data<ExperimentTracker>) -> HttpResponse {
    let experiments = tracker.experiments();
    HttpResponse::Ok().json(json!({
        "experiments": experiments,
        "total": experiments.len(),
    }))
}

pub async fn experiment_runs(
    tracker: web::Data<ExperimentTracker>,
    path: web::Path<String>,
    query: web::Query<RunsQuery>,
) -> Result<HttpResponse, ApiError> {
    let experiment_id = path.into_inner();
    let runs = tracker.runs(&experiment_id, query.limit.unwrap_or(DEFAULT_RUN_LIMIT))?;
    Ok(HttpResponse::Ok().json(json!({
        "experiment_id": experiment_id,
        "runs": runs,
        "total": runs.len(),
    })))
}

pub async fn runs_by_name(
    settings: web::Data<Settings>,
    tracker: web::Data<ExperimentTracker>,
    query: web::Query<RunsQuery>,
) -> Result<HttpResponse, ApiError> {
    let name = query.experiment_name.as_deref().unwrap_or(&settings.experiment_name);
    let experiment = tracker
        .experiment_by_name(name)
        .ok_or_else(|| TrackingError::ExperimentNotFound(name.to_string()))?;
    let runs = tracker.runs(&experiment.experiment_id, query.limit.unwrap_or(DEFAULT_RUN_LIMIT))?;
    Ok(HttpResponse::Ok().json(json!({
        "experiment": experiment,
        "runs": runs,
        "total": runs.len(),
    })))
}

pub async fn run_details(
    tracker: web::Data<ExperimentTracker>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let run_id = Uuid::parse_str(&path.into_inner())
        .map_err(|_| ApiError::BadRequest("Invalid UUID format".into()))?;
    Ok(HttpResponse::Ok().json(tracker.run(run_id)?))
}

pub async fn metrics_summary(
    settings: web::Data<Settings>,
    tracker: web::Data<ExperimentTracker>,
    query: web::Query<ExperimentQuery>,
) -> Result<HttpResponse, ApiError> {
    let name = query.experiment_name.as_deref().unwrap_or(&settings.experiment_name);
    Ok(HttpResponse::Ok().json(tracker.metrics_summary(name)?))
}
