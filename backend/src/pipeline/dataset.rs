use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use ckd_shared::{Label, MissingValueStrategy};
use csv::{ReaderBuilder, Trim};
use ndarray::{Array2, Axis};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::config::FeatureSchema;
use crate::stats::descriptive;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Column '{0}' not found")]
    MissingColumn(String),
    #[error("Invalid value '{value}' in column '{column}' at row {row}")]
    InvalidValue {
        row: usize,
        column: String,
        value: String,
    },
    #[error("Dataset is empty")]
    Empty,
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

/// Labeled tabular data. Missing cells are stored as NaN.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub feature_names: Vec<String>,
    pub features: Array2<f64>,
    pub labels: Vec<Label>,
}

fn is_missing_cell(raw: &str) -> bool {
    raw.is_empty() || raw == "?" || raw.eq_ignore_ascii_case("nan")
}

impl Dataset {
    pub fn new(
        feature_names: Vec<String>,
        features: Array2<f64>,
        labels: Vec<Label>,
    ) -> Result<Self, PipelineError> {
        if features.ncols() != feature_names.len() || features.nrows() != labels.len() {
            return Err(PipelineError::InvalidArgument(format!(
                "shape {:?} does not match {} names and {} labels",
                features.dim(),
                feature_names.len(),
                labels.len()
            )));
        }
        Ok(Self {
            feature_names,
            features,
            labels,
        })
    }

    pub fn from_csv(path: impl AsRef<Path>, schema: &FeatureSchema) -> Result<Self, PipelineError> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file), schema)
    }

    /// Reads the label column and every schema feature present in the header,
    /// in schema order. Rows with an unrecognised label are skipped.
    pub fn from_reader<R: Read>(reader: R, schema: &FeatureSchema) -> Result<Self, PipelineError> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .trim(Trim::All)
            .from_reader(reader);

        let headers = reader.headers()?.clone();
        let label_spec = schema.label();
        let label_idx = headers
            .iter()
            .position(|h| h == label_spec.column)
            .ok_or_else(|| PipelineError::MissingColumn(label_spec.column.clone()))?;

        let mut columns = Vec::new();
        for spec in schema.features() {
            match headers.iter().position(|h| h == spec.name) {
                Some(idx) => columns.push((spec.name.clone(), idx)),
                None => log::warn!("Column '{}' not present in dataset", spec.name),
            }
        }

        let mut values = Vec::new();
        let mut labels = Vec::new();
        let mut skipped = 0usize;
        for (row, record) in reader.records().enumerate() {
            let record = record?;
            let Some(label) = record.get(label_idx).and_then(|raw| label_spec.parse(raw)) else {
                skipped += 1;
                continue;
            };
            for (name, idx) in &columns {
                let raw = record.get(*idx).unwrap_or("");
                let value = if is_missing_cell(raw) {
                    f64::NAN
                } else {
                    raw.parse::<f64>().map_err(|_| PipelineError::InvalidValue {
                        row: row + 1,
                        column: name.clone(),
                        value: raw.to_string(),
                    })?
                };
                values.push(value);
            }
            labels.push(label);
        }
        if skipped > 0 {
            log::warn!("Skipped {} rows with an unrecognised label", skipped);
        }

        let feature_names: Vec<String> = columns.into_iter().map(|(name, _)| name).collect();
        let features = Array2::from_shape_vec((labels.len(), feature_names.len()), values)?;
        Self::new(feature_names, features, labels)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn n_features(&self) -> usize {
        self.feature_names.len()
    }

    pub fn has_missing(&self) -> bool {
        self.features.iter().any(|v| v.is_nan())
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.feature_names.iter().position(|n| n == name)
    }

    /// Non-missing values of one column for rows carrying `label`.
    pub fn class_column(&self, column: usize, label: Label) -> Vec<f64> {
        self.features
            .column(column)
            .iter()
            .zip(&self.labels)
            .filter(|(v, l)| **l == label && !v.is_nan())
            .map(|(v, _)| *v)
            .collect()
    }

    pub fn label_counts(&self) -> (usize, usize) {
        let ckd = self.labels.iter().filter(|l| **l == Label::Ckd).count();
        (ckd, self.labels.len() - ckd)
    }

    pub fn select_rows(&self, rows: &[usize]) -> Dataset {
        Dataset {
            feature_names: self.feature_names.clone(),
            features: self.features.select(Axis(0), rows),
            labels: rows.iter().map(|&i| self.labels[i]).collect(),
        }
    }

    pub fn handle_missing(&self, strategy: MissingValueStrategy) -> Dataset {
        match strategy {
            MissingValueStrategy::Drop => {
                let keep: Vec<usize> = self
                    .features
                    .outer_iter()
                    .enumerate()
                    .filter(|(_, row)| row.iter().all(|v| !v.is_nan()))
                    .map(|(i, _)| i)
                    .collect();
                self.select_rows(&keep)
            }
            MissingValueStrategy::FillMedian => {
                let mut filled = self.clone();
                for mut column in filled.features.columns_mut() {
                    let present: Vec<f64> = column.iter().copied().filter(|v| !v.is_nan()).collect();
                    let median = descriptive::median(&present).unwrap_or(0.0);
                    column.mapv_inplace(|v| if v.is_nan() { median } else { v });
                }
                filled
            }
        }
    }

    /// Keeps rows within `mean ± n_std * std` for every column, filtering
    /// column by column. Bounds come from the present values only; rows
    /// missing the column are dropped with the outliers.
    pub fn remove_outliers(&self, n_std: f64) -> Dataset {
        let mut current = self.clone();
        for col in 0..self.n_features() {
            let values: Vec<f64> = current.features.column(col).to_vec();
            let present: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
            let (Some(mean), Some(std)) = (descriptive::mean(&present), descriptive::sample_std(&present)) else {
                continue;
            };
            let (lower, upper) = (mean - n_std * std, mean + n_std * std);
            let keep: Vec<usize> = values
                .iter()
                .enumerate()
                .filter(|(_, v)| **v >= lower && **v <= upper)
                .map(|(i, _)| i)
                .collect();
            current = current.select_rows(&keep);
        }
        current
    }

    /// Shuffled split. With `stratify` each label keeps its share in both halves.
    pub fn train_test_split(
        &self,
        test_size: f64,
        seed: u64,
        stratify: bool,
    ) -> Result<(Dataset, Dataset), PipelineError> {
        if !(test_size > 0.0 && test_size < 1.0) {
            return Err(PipelineError::InvalidArgument(format!(
                "test_size must be in (0, 1), got {test_size}"
            )));
        }
        if self.is_empty() {
            return Err(PipelineError::Empty);
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let mut train = Vec::new();
        let mut test = Vec::new();

        let groups: Vec<Vec<usize>> = if stratify {
            [Label::Ckd, Label::NotCkd]
                .iter()
                .map(|label| (0..self.len()).filter(|&i| self.labels[i] == *label).collect())
                .collect()
        } else {
            vec![(0..self.len()).collect()]
        };

        for mut group in groups {
            if group.is_empty() {
                continue;
            }
            group.shuffle(&mut rng);
            let n_test = ((group.len() as f64) * test_size).round() as usize;
            let n_test = n_test.min(group.len().saturating_sub(1));
            test.extend_from_slice(&group[..n_test]);
            train.extend_from_slice(&group[n_test..]);
        }

        if test.is_empty() || train.is_empty() {
            return Err(PipelineError::InvalidArgument(format!(
                "test_size {test_size} leaves an empty split for {} rows",
                self.len()
            )));
        }
        train.sort_unstable();
        test.sort_unstable();
        Ok((self.select_rows(&train), self.select_rows(&test)))
    }

    /// `(train_rows, validation_rows)` for each of `k` shuffled folds.
    pub fn k_fold_indices(&self, k: usize, seed: u64) -> Result<Vec<(Vec<usize>, Vec<usize>)>, PipelineError> {
        if k < 2 || k > self.len() {
            return Err(PipelineError::InvalidArgument(format!(
                "cannot build {k} folds from {} rows",
                self.len()
            )));
        }
        let mut indices: Vec<usize> = (0..self.len()).collect();
        indices.shuffle(&mut StdRng::seed_from_u64(seed));

        let base = self.len() / k;
        let extra = self.len() % k;
        let mut folds = Vec::with_capacity(k);
        let mut start = 0;
        for fold in 0..k {
            let size = base + usize::from(fold < extra);
            let validation = indices[start..start + size].to_vec();
            let train: Vec<usize> = indices[..start]
                .iter()
                .chain(&indices[start + size..])
                .copied()
                .collect();
            folds.push((train, validation));
            start += size;
        }
        Ok(folds)
    }
}
