use std::collections::{BTreeMap, VecDeque};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use ckd_shared::{Experiment, MetricSummary, MetricsSummaryResponse, Run, RunStatus};
use uuid::Uuid;

pub const RUNS_FILE: &str = "runs.jsonl";
pub const DEFAULT_RUNS_KEPT: usize = 1000;

#[derive(Debug, thiserror::Error)]
pub enum TrackingError {
    #[error("Tracking store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Tracking store serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Run {0} not found")]
    RunNotFound(Uuid),
    #[error("Experiment '{0}' not found")]
    ExperimentNotFound(String),
}

#[derive(Debug)]
struct TrackerState {
    experiments: Vec<Experiment>,
    /// Per experiment id, oldest first, at most `run_limit` long.
    runs: BTreeMap<String, VecDeque<Run>>,
    run_limit: usize,
}

impl Default for TrackerState {
    fn default() -> Self {
        Self {
            experiments: Vec::new(),
            runs: BTreeMap::new(),
            run_limit: DEFAULT_RUNS_KEPT,
        }
    }
}

impl TrackerState {
    fn push(&mut self, run: Run) {
        let runs = self.runs.entry(run.experiment_id.clone()).or_default();
        runs.push_back(run);
        while runs.len() > self.run_limit {
            runs.pop_front();
        }
    }

    fn set_run_limit(&mut self, limit: usize) {
        self.run_limit = limit.max(1);
        for runs in self.runs.values_mut() {
            while runs.len() > self.run_limit {
                runs.pop_front();
            }
        }
    }

    fn run_count(&self) -> usize {
        self.runs.values().map(VecDeque::len).sum()
    }

    fn experiment_id(&mut self, name: &str) -> String {
        if let Some(existing) = self.experiments.iter().find(|e| e.name == name) {
            return existing.experiment_id.clone();
        }
        let next = self
            .experiments
            .iter()
            .filter_map(|e| e.experiment_id.parse::<u64>().ok())
            .max()
            .map_or(1, |id| id + 1);
        let experiment = Experiment {
            experiment_id: next.to_string(),
            name: name.to_string(),
            created_at: Utc::now(),
        };
        self.experiments.push(experiment);
        next.to_string()
    }

    fn replay(&mut self, run: Run) {
        if !self.experiments.iter().any(|e| e.experiment_id == run.experiment_id) {
            self.experiments.push(Experiment {
                experiment_id: run.experiment_id.clone(),
                name: run.experiment_name.clone(),
                created_at: run.start_time,
            });
        }
        self.push(run);
    }
}

/// Records experiments and runs with their params and metrics.
///
/// Finished runs are appended as JSON lines to `runs.jsonl` in the tracking
/// directory and replayed by [`ExperimentTracker::open`]. Only the latest
/// runs of each experiment stay in memory for queries; the file keeps the
/// full history.
#[derive(Debug)]
pub struct ExperimentTracker {
    log: Option<Mutex<File>>,
    state: Mutex<TrackerState>,
}

impl ExperimentTracker {
    pub fn in_memory() -> Self {
        Self {
            log: None,
            state: Mutex::new(TrackerState::default()),
        }
    }

    /// Caps the runs kept in memory per experiment, dropping the oldest.
    pub fn with_run_limit(self, limit: usize) -> Self {
        self.state().set_run_limit(limit);
        self
    }

    pub fn open(dir: impl AsRef<Path>) -> Result<Self, TrackingError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let log_path = dir.join(RUNS_FILE);

        let mut state = TrackerState::default();
        if log_path.exists() {
            let reader = BufReader::new(fs::File::open(&log_path)?);
            for (number, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Run>(&line) {
                    Ok(run) => state.replay(run),
                    Err(e) => log::warn!("Skipping malformed run on line {} of {}: {}", number + 1, log_path.display(), e),
                }
            }
            log::info!("Replayed {} tracked runs from {}", state.run_count(), log_path.display());
        }
        let file = OpenOptions::new().create(true).append(true).open(&log_path)?;

        Ok(Self {
            log: Some(Mutex::new(file)),
            state: Mutex::new(state),
        })
    }

    fn state(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the experiment with this name, creating it if needed.
    pub fn create_experiment(&self, name: &str) -> Experiment {
        let mut state = self.state();
        let id = state.experiment_id(name);
        state
            .experiments
            .iter()
            .find(|e| e.experiment_id == id)
            .cloned()
            .unwrap_or_else(|| Experiment {
                experiment_id: id,
                name: name.to_string(),
                created_at: Utc::now(),
            })
    }

    pub fn start_run(&self, experiment_name: &str, run_name: impl Into<String>) -> RunBuilder<'_> {
        let experiment_id = self.state().experiment_id(experiment_name);
        RunBuilder {
            tracker: self,
            run: Run {
                run_id: Uuid::new_v4(),
                experiment_id,
                experiment_name: experiment_name.to_string(),
                run_name: run_name.into(),
                status: RunStatus::Finished,
                start_time: Utc::now(),
                end_time: None,
                params: BTreeMap::new(),
                metrics: BTreeMap::new(),
            },
        }
    }

    fn record(&self, run: Run) -> Result<(), TrackingError> {
        if let Some(log) = &self.log {
            let line = serde_json::to_string(&run)?;
            let mut file = log.lock().unwrap_or_else(PoisonError::into_inner);
            writeln!(file, "{line}")?;
        }
        self.state().push(run);
        Ok(())
    }

    pub fn experiments(&self) -> Vec<Experiment> {
        self.state().experiments.clone()
    }

    pub fn experiment(&self, experiment_id: &str) -> Option<Experiment> {
        self.state()
            .experiments
            .iter()
            .find(|e| e.experiment_id == experiment_id)
            .cloned()
    }

    pub fn experiment_by_name(&self, name: &str) -> Option<Experiment> {
        self.state().experiments.iter().find(|e| e.name == name).cloned()
    }

    /// Up to `max` runs of an experiment, newest first.
    pub fn runs(&self, experiment_id: &str, max: usize) -> Result<Vec<Run>, TrackingError> {
        let state = self.state();
        if !state.experiments.iter().any(|e| e.experiment_id == experiment_id) {
            return Err(TrackingError::ExperimentNotFound(experiment_id.to_string()));
        }
        Ok(state
            .runs
            .get(experiment_id)
            .map(|runs| runs.iter().rev().take(max).cloned().collect())
            .unwrap_or_default())
    }

    pub fn run(&self, run_id: Uuid) -> Result<Run, TrackingError> {
        self.state()
            .runs
            .values()
            .flat_map(VecDeque::iter)
            .find(|r| r.run_id == run_id)
            .cloned()
            .ok_or(TrackingError::RunNotFound(run_id))
    }

    /// Count, mean, min, max and most recent value of every metric over the
    /// runs of the experiment still held in memory.
    pub fn metrics_summary(&self, experiment_name: &str) -> Result<MetricsSummaryResponse, TrackingError> {
        let experiment = self
            .experiment_by_name(experiment_name)
            .ok_or_else(|| TrackingError::ExperimentNotFound(experiment_name.to_string()))?;
        // oldest first, so the last value seen is the latest
        let mut runs = self.runs(&experiment.experiment_id, usize::MAX)?;
        runs.reverse();

        let mut values: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for run in &runs {
            for (metric, value) in &run.metrics {
                values.entry(metric.clone()).or_default().push(*value);
            }
        }

        let metrics_summary = values
            .into_iter()
            .filter_map(|(metric, series)| {
                let latest = *series.last()?;
                let count = series.len();
                let summary = MetricSummary {
                    count,
                    mean: series.iter().sum::<f64>() / count as f64,
                    min: series.iter().copied().fold(f64::INFINITY, f64::min),
                    max: series.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                    latest,
                };
                Some((metric, summary))
            })
            .collect();

        Ok(MetricsSummaryResponse {
            experiment_name: experiment.name,
            total_runs: runs.len(),
            metrics_summary,
            timestamp: Utc::now(),
        })
    }
}

/// A run being recorded. Nothing is stored until [`RunBuilder::finish`].
#[derive(Debug)]
pub struct RunBuilder<'a> {
    tracker: &'a ExperimentTracker,
    run: Run,
}

impl RunBuilder<'_> {
    pub fn run_id(&self) -> Uuid {
        self.run.run_id
    }

    pub fn log_param(&mut self, key: impl Into<String>, value: impl ToString) -> &mut Self {
        self.run.params.insert(key.into(), value.to_string());
        self
    }

    pub fn log_metric(&mut self, key: impl Into<String>, value: f64) -> &mut Self {
        let key = key.into();
        if value.is_finite() {
            self.run.metrics.insert(key, value);
        } else {
            log::warn!("Dropping non-finite metric {key}={value}");
        }
        self
    }

    pub fn finish(mut self, status: RunStatus) -> Result<Run, TrackingError> {
        self.run.status = status;
        self.run.end_time = Some(Utc::now());
        self.tracker.record(self.run.clone())?;
        Ok(self.run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_prediction(tracker: &ExperimentTracker, confidence: f64) -> Run {
        let mut run = tracker.start_run("CKD_Detection", "prediction");
        run.log_param("model_used", "KNN").log_metric("confidence", confidence);
        run.finish(RunStatus::Finished).unwrap()
    }

    #[test]
    fn experiments_are_created_once() {
        let tracker = ExperimentTracker::in_memory();
        let a = tracker.create_experiment("CKD_Detection");
        let b = tracker.create_experiment("CKD_Detection");
        let c = tracker.create_experiment("Other");
        assert_eq!(a.experiment_id, b.experiment_id);
        assert_ne!(a.experiment_id, c.experiment_id);
        assert_eq!(tracker.experiments().len(), 2);
    }

    #[test]
    fn runs_are_listed_newest_first() {
        let tracker = ExperimentTracker::in_memory();
        let first = log_prediction(&tracker, 0.6);
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = log_prediction(&tracker, 0.8);

        let experiment = tracker.experiment_by_name("CKD_Detection").unwrap();
        let runs = tracker.runs(&experiment.experiment_id, 10).unwrap();
        assert_eq!(runs[0].run_id, second.run_id);
        assert_eq!(runs[1].run_id, first.run_id);
        assert_eq!(tracker.runs(&experiment.experiment_id, 1).unwrap().len(), 1);
        assert_eq!(runs[0].params["model_used"], "KNN");

        assert!(matches!(tracker.runs("999", 10), Err(TrackingError::ExperimentNotFound(_))));
        assert!(matches!(tracker.run(Uuid::new_v4()), Err(TrackingError::RunNotFound(_))));
        assert_eq!(tracker.run(first.run_id).unwrap().status, RunStatus::Finished);
    }

    #[test]
    fn metrics_summary_aggregates_runs() {
        let tracker = ExperimentTracker::in_memory();
        log_prediction(&tracker, 0.6);
        std::thread::sleep(std::time::Duration::from_millis(2));
        log_prediction(&tracker, 1.0);

        let summary = tracker.metrics_summary("CKD_Detection").unwrap();
        assert_eq!(summary.total_runs, 2);
        let confidence = &summary.metrics_summary["confidence"];
        assert_eq!(confidence.count, 2);
        assert!((confidence.mean - 0.8).abs() < 1e-12);
        assert_eq!((confidence.min, confidence.max, confidence.latest), (0.6, 1.0, 1.0));
        assert!(tracker.metrics_summary("missing").is_err());
    }

    #[test]
    fn non_finite_metrics_are_dropped() {
        let tracker = ExperimentTracker::in_memory();
        let mut run = tracker.start_run("CKD_Detection", "training");
        run.log_metric("cv_std", f64::NAN).log_metric("accuracy", 0.9);
        let run = run.finish(RunStatus::Failed).unwrap();
        assert!(!run.metrics.contains_key("cv_std"));
        assert_eq!(run.status, RunStatus::Failed);
    }

    #[test]
    fn runs_survive_a_restart() {
        let dir = tempfile::tempdir().unwrap();
        let run_id = {
            let tracker = ExperimentTracker::open(dir.path()).unwrap();
            log_prediction(&tracker, 0.7).run_id
        };
        let mut file = OpenOptions::new()
            .append(true)
            .open(dir.path().join(RUNS_FILE))
            .unwrap();
        writeln!(file, "not json").unwrap();

        let reopened = ExperimentTracker::open(dir.path()).unwrap();
        let run = reopened.run(run_id).unwrap();
        assert_eq!(run.metrics["confidence"], 0.7);
        let experiment = reopened.experiment_by_name("CKD_Detection").unwrap();
        assert_eq!(experiment.experiment_id, run.experiment_id);

        let next = reopened.create_experiment("Second");
        assert_ne!(next.experiment_id, experiment.experiment_id);
    }

    #[test]
    fn memory_keeps_only_the_latest_runs() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = ExperimentTracker::open(dir.path()).unwrap().with_run_limit(3);
        let runs: Vec<Run> = [0.5, 0.6, 0.7, 0.8, 0.9]
            .into_iter()
            .map(|confidence| log_prediction(&tracker, confidence))
            .collect();
        let other = {
            let mut run = tracker.start_run("Other", "training");
            run.log_metric("accuracy", 0.9);
            run.finish(RunStatus::Finished).unwrap()
        };

        let experiment = tracker.experiment_by_name("CKD_Detection").unwrap();
        let kept = tracker.runs(&experiment.experiment_id, usize::MAX).unwrap();
        let kept_ids: Vec<Uuid> = kept.iter().map(|r| r.run_id).collect();
        assert_eq!(kept_ids, vec![runs[4].run_id, runs[3].run_id, runs[2].run_id]);
        assert!(matches!(tracker.run(runs[0].run_id), Err(TrackingError::RunNotFound(_))));
        assert!(tracker.run(other.run_id).is_ok());

        let summary = tracker.metrics_summary("CKD_Detection").unwrap();
        assert_eq!(summary.total_runs, 3);
        assert_eq!(summary.metrics_summary["confidence"].min, 0.7);

        let lines = fs::read_to_string(dir.path().join(RUNS_FILE)).unwrap();
        assert_eq!(lines.lines().count(), 6);
        let reopened = ExperimentTracker::open(dir.path()).unwrap().with_run_limit(2);
        assert_eq!(reopened.runs(&experiment.experiment_id, 10).unwrap().len(), 2);
    }
}
