use std::str::FromStr;

use actix_web::{HttpResponse, web};
use chrono::Utc;
use ckd_shared::{ModelKind, TrainingConfig};
use serde_json::json;
use strum::IntoEnumIterator;

use super::error::ApiError;
use crate::training::TrainingManager;

/// An empty body means the default configuration.
fn parse_config(body: &[u8]) -> Result<TrainingConfig, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(TrainingConfig::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("Invalid training configuration: {e}")))
}

pub async fn train_all(manager: web::Data<TrainingManager>, body: web::Bytes) -> Result<HttpResponse, ApiError> {
    let config = parse_config(&body)?;
    let response = manager.start(config)?;
    Ok(HttpResponse::Ok().json(response))
}

pub async fn train_single(
    manager: web::Data<TrainingManager>,
    path: web::Path<String>,
    body: web::Bytes,
) -> Result<HttpResponse, ApiError> {
    let name = path.into_inner();
    let kind = ModelKind::from_str(&name).map_err(|_| {
        let available: Vec<String> = ModelKind::iter().map(|k| k.to_string()).collect();
        ApiError::BadRequest(format!("Unknown model '{name}'. Available: {available:?}"))
    })?;
    let config = TrainingConfig {
        models_to_train: Some(vec![kind]),
        ..parse_config(&body)?
    };
    let response = manager.start(config)?;
    Ok(HttpResponse::Ok().json(response))
}

pub async fn status(manager: web::Data<TrainingManager>) -> HttpResponse {
    HttpResponse::Ok().json(manager.status())
}

pub async fn cancel(manager: web::Data<TrainingManager>) -> Result<HttpResponse, ApiError> {
    let status = manager.cancel()?;
    log::info!("Cancellation requested for training job {:?}", status.job_id);
    Ok(HttpResponse::Ok().json(json!({
        "status": "cancelling",
        "message": status.message,
        "job_id": status.job_id,
    })))
}

pub async fn results(manager: web::Data<TrainingManager>) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(manager.results()?))
}

pub async fn feature_ranking(manager: web::Data<TrainingManager>) -> Result<HttpResponse, ApiError> {
    let manager = manager.into_inner();
    let ranking = web::block(move || manager.trainer().feature_ranking()).await??;
    Ok(HttpResponse::Ok().json(json!({
        "feature_ranking": ranking,
        "total_features": ranking.len(),
        "timestamp": Utc::now(),
    })))
}

#[cfg(test)]
mod tests {
    use actix_web::http::StatusCode;
    use actix_web::{App, test};
    use ckd_shared::{TrainingResponse, TrainingState, TrainingStatus};
    use serde_json::Value;

    use super::*;
    use crate::routes::testing::services;

    #[actix_web::test]
    async fn single_model_job_through_the_api() {
        let t = services(Vec::new());
        let app = test::init_service(App::new().configure(|cfg| t.services.configure(cfg))).await;

        let req = test::TestRequest::get().uri("/api/v1/training/results").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::post()
            .uri("/api/v1/training/train-single/NaiveBayes")
            .set_json(json!({ "test_size": 0.34, "cv_folds": 3 }))
            .to_request();
        let response: TrainingResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(response.models_to_train, vec![ModelKind::NaiveBayes]);

        let mut rx = t.services.training.subscribe();
        let finished = rx.wait_for(|s| s.state.is_terminal()).await.unwrap().clone();
        assert_eq!(finished.state, TrainingState::Completed);

        let req = test::TestRequest::get().uri("/api/v1/training/status").to_request();
        let status: TrainingStatus = test::call_and_read_body_json(&app, req).await;
        assert_eq!(status.state, TrainingState::Completed);

        let req = test::TestRequest::get().uri("/api/v1/training/results").to_request();
        let results: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(results["summary"]["best_model"], "NaiveBayes");
        assert_eq!(t.services.registry.names(), vec!["NaiveBayes".to_string()]);
    }

    #[actix_web::test]
    async fn rejects_bad_requests() {
        let t = services(Vec::new());
        let app = test::init_service(App::new().configure(|cfg| t.services.configure(cfg))).await;

        let req = test::TestRequest::post()
            .uri("/api/v1/training/train-single/SVM")
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::post()
            .uri("/api/v1/training/train-all")
            .set_json(json!({ "test_size": 0.9 }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::post()
            .uri("/api/v1/training/train-all")
            .set_payload("not json")
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::delete().uri("/api/v1/training/cancel").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn feature_ranking_endpoint() {
        let t = services(Vec::new());
        let app = test::init_service(App::new().configure(|cfg| t.services.configure(cfg))).await;
        let req = test::TestRequest::get().uri("/api/v1/training/feature-ranking").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["total_features"], 9);
        assert!(body["feature_ranking"][0]["f_score"].as_f64().unwrap() > 0.0);
    }

    #[actix_web::test]
    async fn empty_body_uses_defaults() {
        assert_eq!(parse_config(b"").unwrap().random_state, 42);
        assert_eq!(parse_config(b"{\"random_state\": 7}").unwrap().random_state, 7);
        assert!(parse_config(b"[1, 2]").is_err());
    }
}
