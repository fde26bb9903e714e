use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;

use crate::config::ValidationError;
use crate::ml::{ClassifierError, ConsensusError, RegistryError};
use crate::tracking::TrackingError;
use crate::training::TrainingError;

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("No models loaded")]
    ModelUnavailable,
    #[error("Model '{name}' not found. Available models: {available:?}")]
    ModelNotFound { name: String, available: Vec<String> },
    #[error("Reference statistics are not available")]
    StatisticsUnavailable,
    #[error("Model '{model}' failed: {source}")]
    Classifier {
        model: String,
        #[source]
        source: ClassifierError,
    },
    #[error(transparent)]
    Consensus(#[from] ConsensusError),
    #[error(transparent)]
    Training(#[from] TrainingError),
    #[error(transparent)]
    Tracking(#[from] TrackingError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("Background task failed: {0}")]
    Blocking(#[from] actix_web::error::BlockingError),
    #[error("{0}")]
    BadRequest(String),
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::ModelUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::ModelNotFound { .. } | ApiError::StatisticsUnavailable => StatusCode::NOT_FOUND,
            ApiError::Training(e) => match e {
                TrainingError::AlreadyRunning => StatusCode::CONFLICT,
                TrainingError::NotRunning | TrainingError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
                TrainingError::NoResults | TrainingError::DataMissing(_) => StatusCode::NOT_FOUND,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Tracking(TrackingError::RunNotFound(_) | TrackingError::ExperimentNotFound(_)) => {
                StatusCode::NOT_FOUND
            }
            ApiError::Classifier { .. }
            | ApiError::Consensus(_)
            | ApiError::Tracking(_)
            | ApiError::Registry(_)
            | ApiError::Blocking(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            log::error!("{}", self);
        }
        HttpResponse::build(status).json(ErrorResponse {
            error: self.to_string(),
        })
    }
}
