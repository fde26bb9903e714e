use actix_web::{HttpResponse, web};
use chrono::Utc;
use ckd_shared::{HealthResponse, ModelsHealth};
use serde_json::json;

use crate::ml::ModelRegistry;
use crate::stats::ComparisonService;
use crate::training::TrainingManager;

const SERVICE_NAME: &str = "ckd-prediction-api";

pub async fn root() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "message": "CKD Prediction API",
        "version": env!("CARGO_PKG_VERSION"),
        "health": "/api/v1/health",
        "endpoints": {
            "predict": "/api/v1/predict",
            "batch": "/api/v1/predict/batch",
            "ensemble": "/api/v1/predict/ensemble",
            "example": "/api/v1/predict/example",
            "models": "/api/v1/models",
            "statistics": "/api/v1/statistics",
            "training": "/api/v1/training/status",
            "tracking": "/api/v1/tracking/experiments",
        },
    }))
}

/// Reports "degraded" while no model is loaded.
pub async fn health(
    registry: web::Data<ModelRegistry>,
    comparison: web::Data<ComparisonService>,
    training: web::Data<TrainingManager>,
) -> HttpResponse {
    let names = registry.names();
    let loaded = !names.is_empty();
    HttpResponse::Ok().json(HealthResponse {
        status: if loaded { "healthy" } else { "degraded" }.to_string(),
        timestamp: Utc::now(),
        service: SERVICE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        models: ModelsHealth {
            loaded,
            count: names.len(),
            names,
        },
        statistics_available: comparison.is_available(),
        training: training.status().state,
    })
}

pub async fn ready(registry: web::Data<ModelRegistry>) -> HttpResponse {
    if registry.is_empty() {
        return HttpResponse::ServiceUnavailable().json(json!({
            "status": "not ready",
            "reason": "No models loaded",
        }));
    }
    HttpResponse::Ok().json(json!({
        "status": "ready",
        "models": registry.len(),
    }))
}

pub async fn live() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "alive",
        "timestamp": Utc::now(),
    }))
}
