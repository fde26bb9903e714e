use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use ckd_shared::{
    TrainingConfig, TrainingResponse, TrainingResults, TrainingState, TrainingStatus, TrainingSummary,
};
use tokio::sync::watch;
use uuid::Uuid;

use super::trainer::{Trainer, TrainingError, models_to_train, validate_config};

/// Owns the background training job.
///
/// Only the job writes to the status channel once it is running; handlers
/// read snapshots through [`TrainingManager::status`] or a subscription.
pub struct TrainingManager {
    trainer: Arc<Trainer>,
    status: Arc<watch::Sender<TrainingStatus>>,
    cancel: Arc<AtomicBool>,
}

fn finish(status: &watch::Sender<TrainingStatus>, outcome: Result<TrainingSummary, TrainingError>) {
    status.send_modify(|s| {
        s.current_model = None;
        s.completed_at = Some(Utc::now());
        match outcome {
            Ok(summary) => {
                log::info!("Training job completed, best model: {:?}", summary.best_model);
                s.state = TrainingState::Completed;
                s.progress = 100;
                s.message = "Training completed".to_string();
                s.summary = Some(summary);
            }
            Err(TrainingError::Cancelled) => {
                log::info!("Training job cancelled");
                s.state = TrainingState::Cancelled;
                s.message = "Training cancelled".to_string();
            }
            Err(e) => {
                log::error!("Training job failed: {}", e);
                s.state = TrainingState::Failed;
                s.message = "Training failed".to_string();
                s.error = Some(e.to_string());
            }
        }
    });
}

impl TrainingManager {
    pub fn new(trainer: Arc<Trainer>) -> Self {
        let (status, _) = watch::channel(TrainingStatus::idle());
        Self {
            trainer,
            status: Arc::new(status),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn trainer(&self) -> &Trainer {
        &self.trainer
    }

    /// Starts a job on the blocking pool. Must be called inside a Tokio runtime.
    pub fn start(&self, config: TrainingConfig) -> Result<TrainingResponse, TrainingError> {
        validate_config(&config)?;
        if !self.trainer.has_data() {
            return Err(TrainingError::DataMissing(self.trainer.data_path().to_path_buf()));
        }

        let job_id = Uuid::new_v4();
        let started = self.status.send_if_modified(|s| {
            if s.is_training() {
                return false;
            }
            // cleared while the channel is locked so no cancel() can slip in first
            self.cancel.store(false, Ordering::SeqCst);
            *s = TrainingStatus::running(job_id);
            true
        });
        if !started {
            return Err(TrainingError::AlreadyRunning);
        }

        let kinds = models_to_train(&config);
        log::info!("Starting training job {} for {:?}", job_id, kinds);
        let trainer = self.trainer.clone();
        let status = self.status.clone();
        let cancel = self.cancel.clone();
        tokio::task::spawn_blocking(move || {
            let outcome = trainer.run(&config, &status, || cancel.load(Ordering::SeqCst));
            finish(&status, outcome);
        });

        Ok(TrainingResponse {
            status: "started".to_string(),
            message: format!("Training started for {} models", kinds.len()),
            job_id: Some(job_id),
            started_at: self.status.borrow().started_at,
            models_to_train: kinds,
        })
    }

    pub fn status(&self) -> TrainingStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TrainingStatus> {
        self.status.subscribe()
    }

    /// Requests cancellation; the job stops before its next model.
    pub fn cancel(&self) -> Result<TrainingStatus, TrainingError> {
        if !self.status.borrow().is_training() {
            return Err(TrainingError::NotRunning);
        }
        self.cancel.store(true, Ordering::SeqCst);
        self.status.send_modify(|s| {
            if s.is_training() {
                s.message = "Cancellation requested".to_string();
            }
        });
        Ok(self.status())
    }

    pub fn results(&self) -> Result<TrainingResults, TrainingError> {
        let status = self.status.borrow();
        if status.results.is_empty() {
            return Err(TrainingError::NoResults);
        }
        Ok(TrainingResults {
            results: status.results.clone(),
            summary: status.summary.clone(),
            started_at: status.started_at,
            completed_at: status.completed_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::trainer::tests::{fixture, quick_config};

    async fn wait_until_done(manager: &TrainingManager) -> TrainingStatus {
        let mut rx = manager.subscribe();
        rx.wait_for(|s| s.state.is_terminal()).await.unwrap().clone()
    }

    #[actix_web::test]
    async fn job_runs_to_completion() {
        let f = fixture();
        let manager = TrainingManager::new(f.trainer.clone());
        assert!(matches!(manager.results(), Err(TrainingError::NoResults)));

        let response = manager.start(quick_config()).unwrap();
        assert_eq!(response.status, "started");
        assert_eq!(response.models_to_train.len(), 3);

        let status = wait_until_done(&manager).await;
        assert_eq!(status.state, TrainingState::Completed);
        assert_eq!(status.job_id, response.job_id);
        assert_eq!(status.progress, 100);
        assert!(status.completed_at.is_some());

        let results = manager.results().unwrap();
        assert_eq!(results.results.len(), 3);
        assert!(results.summary.unwrap().best_model.is_some());
        assert_eq!(f.registry.len(), 3);
        assert!(matches!(manager.cancel(), Err(TrainingError::NotRunning)));
    }

    #[actix_web::test]
    async fn second_start_is_rejected_while_running() {
        let f = fixture();
        let manager = TrainingManager::new(f.trainer.clone());
        manager.status.send_modify(|s| *s = TrainingStatus::running(Uuid::new_v4()));
        assert!(matches!(manager.start(quick_config()), Err(TrainingError::AlreadyRunning)));

        let status = manager.cancel().unwrap();
        assert_eq!(status.message, "Cancellation requested");
        assert!(manager.cancel.load(Ordering::SeqCst));
    }

    #[actix_web::test]
    async fn bad_requests_never_start_a_job() {
        let f = fixture();
        let manager = TrainingManager::new(f.trainer.clone());
        let config = TrainingConfig {
            test_size: 0.05,
            ..TrainingConfig::default()
        };
        assert!(matches!(manager.start(config), Err(TrainingError::InvalidConfig(_))));

        std::fs::remove_file(f.trainer.data_path()).unwrap();
        assert!(matches!(manager.start(quick_config()), Err(TrainingError::DataMissing(_))));
        assert_eq!(manager.status().state, TrainingState::Idle);
    }

    #[actix_web::test]
    async fn failed_job_reports_the_error() {
        let f = fixture();
        std::fs::write(f.trainer.data_path(), "hemo,status\n10,ckd\n15,notckd\n").unwrap();
        let manager = TrainingManager::new(f.trainer.clone());
        manager.start(quick_config()).unwrap();

        let status = wait_until_done(&manager).await;
        assert_eq!(status.state, TrainingState::Failed);
        assert!(status.error.unwrap().contains("not found"));
    }

    #[actix_web::test]
    async fn stale_cancel_request_does_not_stop_the_next_job() {
        let f = fixture();
        let manager = TrainingManager::new(f.trainer.clone());
        manager.cancel.store(true, Ordering::SeqCst);

        manager.start(quick_config()).unwrap();
        let status = wait_until_done(&manager).await;
        assert_eq!(status.state, TrainingState::Completed);
    }
}
