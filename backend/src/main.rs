use std::io;
use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{App, HttpServer, http::header};
use ckd_backend::config::{FeatureSchema, SchemaError, Settings};
use ckd_backend::ml::ModelRegistry;
use ckd_backend::routes::AppServices;
use ckd_backend::stats::ComparisonService;
use ckd_backend::tracking::ExperimentTracker;
use ckd_backend::training::{Trainer, TrainingManager};

fn load_schema(settings: &Settings) -> io::Result<FeatureSchema> {
    match FeatureSchema::load(&settings.feature_schema_path) {
        Ok(schema) => {
            log::info!(
                "Loaded feature schema v{} with {} features",
                schema.version(),
                schema.features().len()
            );
            Ok(schema)
        }
        Err(SchemaError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
            log::warn!(
                "Feature schema {} not found, using built-in CKD features",
                settings.feature_schema_path.display()
            );
            Ok(FeatureSchema::ckd_default())
        }
        Err(e) => {
            log::error!("Failed to load feature schema: {}", e);
            Err(io::Error::other(e.to_string()))
        }
    }
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    if let Ok(current_dir) = std::env::current_dir() {
        log::info!("Current working directory: {}", current_dir.display());
    }

    let settings = Settings::from_env().map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
    let schema = Arc::new(load_schema(&settings)?);

    let comparison = Arc::new(ComparisonService::load(&settings.reference_data_path, &schema));

    let registry = Arc::new(ModelRegistry::new(settings.models_dir.clone()));
    match registry.load() {
        Ok(0) => log::warn!(
            "No models loaded from {}; train models via /api/v1/training/train-all",
            settings.models_dir.display()
        ),
        Ok(count) => log::info!("Loaded {} models: {:?}", count, registry.names()),
        Err(e) => log::error!("Failed to load models: {}", e),
    }

    let tracker = match ExperimentTracker::open(&settings.tracking_dir) {
        Ok(tracker) => tracker,
        Err(e) => {
            log::warn!("Tracking store unavailable, keeping runs in memory: {}", e);
            ExperimentTracker::in_memory()
        }
    };
    let tracker = Arc::new(tracker.with_run_limit(settings.tracking_max_runs));
    tracker.create_experiment(&settings.experiment_name);

    let trainer = Arc::new(Trainer::new(
        schema.clone(),
        settings.training_data_path.clone(),
        registry.clone(),
        tracker.clone(),
    ));
    let bind_address = settings.bind_address();
    let services = AppServices {
        settings: Arc::new(settings),
        schema,
        registry,
        comparison,
        tracker,
        training: Arc::new(TrainingManager::new(trainer)),
    };

    log::info!("Starting server on {}", bind_address);

    HttpServer::new(move || {
        App::new()
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "DELETE", "OPTIONS"])
                    .allowed_headers(vec![header::ACCEPT, header::CONTENT_TYPE])
                    .max_age(3600),
            )
            .configure(|cfg| services.configure(cfg))
    })
    .bind(&bind_address)?
    .run()
    .await
}
