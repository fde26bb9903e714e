pub mod error;
mod health;
mod prediction;
mod tracking;
mod training;

use std::sync::Arc;

use actix_web::web;

pub use error::{ApiError, ErrorResponse};

use crate::config::{FeatureSchema, Settings};
use crate::ml::ModelRegistry;
use crate::stats::ComparisonService;
use crate::tracking::ExperimentTracker;
use crate::training::TrainingManager;

/// Shared services handed to every worker as `web::Data`.
#[derive(Clone)]
pub struct AppServices {
    pub settings: Arc<Settings>,
    pub schema: Arc<FeatureSchema>,
    pub registry: Arc<ModelRegistry>,
    pub comparison: Arc<ComparisonService>,
    pub tracker: Arc<ExperimentTracker>,
    pub training: Arc<TrainingManager>,
}

impl AppServices {
    pub fn configure(&self, cfg: &mut web::ServiceConfig) {
        cfg.app_data(web::Data::from(self.settings.clone()))
            .app_data(web::Data::from(self.schema.clone()))
            .app_data(web::Data::from(self.registry.clone()))
            .app_data(web::Data::from(self.comparison.clone()))
            .app_data(web::Data::from(self.tracker.clone()))
            .app_data(web::Data::from(self.training.clone()));
        configure_routes(cfg);
    }
}

fn bad_request(message: String) -> actix_web::Error {
    ApiError::BadRequest(message).into()
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(|err, _req| bad_request(err.to_string())))
        .app_data(web::QueryConfig::default().error_handler(|err, _req| bad_request(err.to_string())))
        .app_data(web::PathConfig::default().error_handler(|err, _req| bad_request(err.to_string())))
        .service(web::resource("/").route(web::get().to(health::root)))
        .service(
            web::scope("/api/v1")
                .service(web::resource("/health").route(web::get().to(health::health)))
                .service(web::resource("/ready").route(web::get().to(health::ready)))
                .service(web::resource("/live").route(web::get().to(health::live)))
                .service(web::resource("/models").route(web::get().to(prediction::list_models)))
                .service(web::resource("/reload-models").route(web::post().to(prediction::reload_models)))
                .service(web::resource("/predict").route(web::post().to(prediction::predict)))
                .service(web::resource("/predict/batch").route(web::post().to(prediction::predict_batch)))
                .service(web::resource("/predict/ensemble").route(web::post().to(prediction::predict_ensemble)))
                .service(web::resource("/predict/example").route(web::get().to(prediction::predict_example)))
                .service(web::resource("/statistics").route(web::get().to(prediction::statistics)))
                .service(
                    web::scope("/training")
                        .service(web::resource("/train-all").route(web::post().to(training::train_all)))
                        .service(
                            web::resource("/train-single/{model}").route(web::post().to(training::train_single)),
                        )
                        .service(web::resource("/status").route(web::get().to(training::status)))
                        .service(web::resource("/cancel").route(web::delete().to(training::cancel)))
                        .service(web::resource("/results").route(web::get().to(training::results)))
                        .service(
                            web::resource("/feature-ranking").route(web::get().to(training::feature_ranking)),
                        ),
                )
                .service(
                    web::scope("/tracking")
                        .service(web::resource("/experiments").route(web::get().to(tracking::experiments)))
                        .service(
                            web::resource("/experiments/{experiment_id}/runs")
                                .route(web::get().to(tracking::experiment_runs)),
                        )
                        .service(web::resource("/runs").route(web::get().to(tracking::runs_by_name)))
                        .service(web::resource("/runs/{run_id}").route(web::get().to(tracking::run_details)))
                        .service(web::resource("/metrics/summary").route(web::get().to(tracking::metrics_summary))),
                ),
        );
}
