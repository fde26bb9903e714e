use std::path::PathBuf;

use crate::tracking::DEFAULT_RUNS_KEPT;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

/// Process configuration, read from the environment (and `.env` via dotenv).
#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub models_dir: PathBuf,
    pub reference_data_path: PathBuf,
    pub training_data_path: PathBuf,
    pub feature_schema_path: PathBuf,
    pub tracking_dir: PathBuf,
    pub experiment_name: String,
    pub default_model: String,
    /// Runs kept in memory per experiment; `runs.jsonl` keeps everything.
    pub tracking_max_runs: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            models_dir: PathBuf::from("models"),
            reference_data_path: PathBuf::from("data/ckd_imputed.csv"),
            training_data_path: PathBuf::from("data/processed/ckd_imputed.csv"),
            feature_schema_path: PathBuf::from("config/features.yaml"),
            tracking_dir: PathBuf::from("tracking"),
            experiment_name: "CKD_Detection".to_string(),
            default_model: "KNN".to_string(),
            tracking_max_runs: DEFAULT_RUNS_KEPT,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Settings::default();

        let port = match lookup("PORT") {
            Some(value) => value
                .trim()
                .parse::<u16>()
                .map_err(|_| SettingsError::InvalidValue { key: "PORT", value })?,
            None => defaults.port,
        };

        let tracking_max_runs = match lookup("TRACKING_MAX_RUNS") {
            Some(value) => match value.trim().parse::<usize>() {
                Ok(limit) if limit > 0 => limit,
                _ => {
                    return Err(SettingsError::InvalidValue {
                        key: "TRACKING_MAX_RUNS",
                        value,
                    });
                }
            },
            None => defaults.tracking_max_runs,
        };

        let path = |key: &str, default: PathBuf| lookup(key).map(PathBuf::from).unwrap_or(default);

        Ok(Self {
            host: lookup("API_HOST").unwrap_or(defaults.host),
            port,
            models_dir: path("MODELS_DIR", defaults.models_dir),
            reference_data_path: path("REFERENCE_DATA_PATH", defaults.reference_data_path),
            training_data_path: path("TRAINING_DATA_PATH", defaults.training_data_path),
            feature_schema_path: path("FEATURE_SCHEMA_PATH", defaults.feature_schema_path),
            tracking_dir: path("TRACKING_DIR", defaults.tracking_dir),
            experiment_name: lookup("EXPERIMENT_NAME").unwrap_or(defaults.experiment_name),
            default_model: lookup("DEFAULT_MODEL").unwrap_or(defaults.default_model),
            tracking_max_runs,
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
