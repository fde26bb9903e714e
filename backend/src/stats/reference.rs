use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use ckd_shared::{FeatureComparison, Label};
use serde::Serialize;

use super::descriptive;
use crate::config::{FeatureKind, FeatureSchema};
use crate::features::FeatureVector;
use crate::pipeline::{Dataset, PipelineError};

/// Summary of one feature within one diagnosis class.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FeatureStatistic {
    Continuous {
        mean: f64,
        median: f64,
        std: f64,
        min: f64,
        max: f64,
    },
    Categorical {
        mode: f64,
        min: f64,
        max: f64,
    },
}

impl FeatureStatistic {
    fn describe(values: &[f64], kind: FeatureKind) -> Option<Self> {
        let min = descriptive::min(values)?;
        let max = descriptive::max(values)?;
        Some(match kind {
            FeatureKind::Continuous => FeatureStatistic::Continuous {
                mean: descriptive::mean(values)?,
                median: descriptive::median(values)?,
                std: descriptive::sample_std(values)?,
                min,
                max,
            },
            FeatureKind::Categorical => FeatureStatistic::Categorical {
                mode: descriptive::mode(values)?,
                min,
                max,
            },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassStatistics {
    pub ckd: Option<FeatureStatistic>,
    pub notckd: Option<FeatureStatistic>,
}

/// Per-feature, per-class reference statistics. Built once and never mutated.
#[derive(Debug, Clone, Serialize)]
pub struct ReferenceStatistics {
    pub records: usize,
    pub ckd_records: usize,
    pub notckd_records: usize,
    pub features: BTreeMap<String, ClassStatistics>,
}

impl ReferenceStatistics {
    /// Features the dataset does not carry are left out.
    pub fn compute(dataset: &Dataset, schema: &FeatureSchema) -> Self {
        let (ckd_records, notckd_records) = dataset.label_counts();
        let mut features = BTreeMap::new();
        for spec in schema.features() {
            let Some(col) = dataset.column_index(&spec.name) else {
                continue;
            };
            let stats = ClassStatistics {
                ckd: FeatureStatistic::describe(&dataset.class_column(col, Label::Ckd), spec.kind),
                notckd: FeatureStatistic::describe(&dataset.class_column(col, Label::NotCkd), spec.kind),
            };
            features.insert(spec.name.clone(), stats);
        }
        Self {
            records: dataset.len(),
            ckd_records,
            notckd_records,
            features,
        }
    }

    pub fn get(&self, feature: &str) -> Option<&ClassStatistics> {
        self.features.get(feature)
    }

    /// Comparison rows for every patient feature that has reference data.
    pub fn compare(&self, patient: &FeatureVector) -> BTreeMap<String, FeatureComparison> {
        let mut out = BTreeMap::new();
        for (name, value) in patient.iter() {
            let Some(stats) = self.features.get(name) else {
                continue;
            };
            let mut row = FeatureComparison {
                patient_value: value,
                ckd_mean: None,
                ckd_std: None,
                ckd_median: None,
                ckd_mode: None,
                notckd_mean: None,
                notckd_std: None,
                notckd_median: None,
                notckd_mode: None,
            };
            match &stats.ckd {
                Some(FeatureStatistic::Continuous { mean, median, std, .. }) => {
                    row.ckd_mean = Some(*mean);
                    row.ckd_median = Some(*median);
                    row.ckd_std = Some(*std);
                }
                Some(FeatureStatistic::Categorical { mode, .. }) => row.ckd_mode = Some(*mode),
                None => {}
            }
            match &stats.notckd {
                Some(FeatureStatistic::Continuous { mean, median, std, .. }) => {
                    row.notckd_mean = Some(*mean);
                    row.notckd_median = Some(*median);
                    row.notckd_std = Some(*std);
                }
                Some(FeatureStatistic::Categorical { mode, .. }) => row.notckd_mode = Some(*mode),
                None => {}
            }
            out.insert(name.to_string(), row);
        }
        out
    }
}

/// Read-only handle to the reference statistics shared across workers.
/// `None` means the reference dataset could not be used and comparisons are
/// omitted.
#[derive(Debug, Clone, Default)]
pub struct ComparisonService {
    statistics: Option<Arc<ReferenceStatistics>>,
}

impl ComparisonService {
    pub fn new(statistics: ReferenceStatistics) -> Self {
        Self {
            statistics: Some(Arc::new(statistics)),
        }
    }

    pub fn unavailable() -> Self {
        Self::default()
    }

    pub fn try_load(path: impl AsRef<Path>, schema: &FeatureSchema) -> Result<Self, PipelineError> {
        let dataset = Dataset::from_csv(path, schema)?;
        if dataset.is_empty() {
            return Err(PipelineError::Empty);
        }
        Ok(Self::new(ReferenceStatistics::compute(&dataset, schema)))
    }

    /// Never fails: a bad dataset degrades to [`ComparisonService::unavailable`].
    pub fn load(path: impl AsRef<Path>, schema: &FeatureSchema) -> Self {
        let path = path.as_ref();
        match Self::try_load(path, schema) {
            Ok(service) => {
                log::info!("Comparison statistics calculated from {}", path.display());
                service
            }
            Err(e) => {
                log::warn!(
                    "Reference dataset {} unusable, comparison data disabled: {}",
                    path.display(),
                    e
                );
                Self::unavailable()
            }
        }
    }

    pub fn is_available(&self) -> bool {
        self.statistics.is_some()
    }

    pub fn statistics(&self) -> Option<&ReferenceStatistics> {
        self.statistics.as_deref()
    }

    pub fn compare(&self, patient: &FeatureVector) -> BTreeMap<String, FeatureComparison> {
        self.statistics
            .as_ref()
            .map(|stats| stats.compare(patient))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::dataset::tests::{SAMPLE_CSV, sample};
    use std::io::Write;

    #[test]
    fn continuous_statistics_for_known_values() {
        let schema = FeatureSchema::ckd_default();
        let csv = "age,status\n1,ckd\n2,ckd\n3,ckd\n4,ckd\n5,ckd\n40,notckd\n";
        let ds = Dataset::from_reader(csv.as_bytes(), &schema).unwrap();
        let stats = ReferenceStatistics::compute(&ds, &schema);

        match stats.get("age").unwrap().ckd.clone().unwrap() {
            FeatureStatistic::Continuous { mean, median, std, min, max } => {
                assert_eq!(mean, 3.0);
                assert_eq!(median, 3.0);
                assert!((std - 1.58).abs() < 0.01);
                assert_eq!((min, max), (1.0, 5.0));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(stats.get("hemo").is_none());
    }

    #[test]
    fn categorical_features_use_mode() {
        let stats = ReferenceStatistics::compute(&sample(), &FeatureSchema::ckd_default());
        let htn = stats.get("htn").unwrap();
        assert_eq!(
            htn.ckd,
            Some(FeatureStatistic::Categorical { mode: 1.0, min: 0.0, max: 1.0 })
        );
        assert_eq!(
            htn.notckd,
            Some(FeatureStatistic::Categorical { mode: 0.0, min: 0.0, max: 0.0 })
        );
    }

    #[test]
    fn missing_cells_are_skipped() {
        let stats = ReferenceStatistics::compute(&sample(), &FeatureSchema::ckd_default());
        match stats.get("sc").unwrap().notckd.clone().unwrap() {
            FeatureStatistic::Continuous { mean, .. } => assert!((mean - 0.9).abs() < 1e-9),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn comparison_fills_the_right_fields() {
        let schema = FeatureSchema::ckd_default();
        let service = ComparisonService::new(ReferenceStatistics::compute(&sample(), &schema));
        let patient = schema.vectorize(&schema.example_patient()).unwrap();

        let rows = service.compare(&patient);
        assert_eq!(rows.len(), 9);
        let hemo = &rows["hemo"];
        assert_eq!(hemo.patient_value, 15.4);
        assert!(hemo.ckd_mean.is_some() && hemo.ckd_mode.is_none());
        let dm = &rows["dm"];
        assert!(dm.ckd_mode.is_some() && dm.ckd_mean.is_none());
    }

    #[test]
    fn unusable_dataset_degrades() {
        let schema = FeatureSchema::ckd_default();
        let service = ComparisonService::load("/nonexistent/reference.csv", &schema);
        assert!(!service.is_available());
        let patient = schema.vectorize(&schema.example_patient()).unwrap();
        assert!(service.compare(&patient).is_empty());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "hemo,status\nabc,ckd\n").unwrap();
        assert!(!ComparisonService::load(file.path(), &schema).is_available());

        let mut good = tempfile::NamedTempFile::new().unwrap();
        write!(good, "{SAMPLE_CSV}").unwrap();
        assert!(ComparisonService::load(good.path(), &schema).is_available());
    }
}
