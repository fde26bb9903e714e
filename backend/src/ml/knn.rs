use ckd_shared::Label;
use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

use super::classifier::{ClassifierError, check_training_data};
use crate::pipeline::Scaler;

pub const DEFAULT_NEIGHBOURS: usize = 5;

/// k-nearest neighbours over standardised features with Euclidean distance.
/// The CKD probability is the share of CKD labels among the neighbours.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnnModel {
    pub k: usize,
    pub scaler: Scaler,
    pub points: Vec<Vec<f64>>,
    pub labels: Vec<Label>,
}

impl KnnModel {
    pub fn fit(x: ArrayView2<f64>, y: &[Label], k: usize) -> Result<Self, ClassifierError> {
        check_training_data(x, y)?;
        if k == 0 {
            return Err(ClassifierError::InvalidTrainingData("k must be at least 1".into()));
        }
        let scaler = Scaler::fit_standard(x);
        let points = scaler.transform(x)?.outer_iter().map(|row| row.to_vec()).collect();
        Ok(Self {
            k: k.min(y.len()),
            scaler,
            points,
            labels: y.to_vec(),
        })
    }

    pub fn n_features(&self) -> usize {
        self.scaler.n_features()
    }

    pub fn validate(&self) -> Result<(), ClassifierError> {
        self.scaler.validate()?;
        if self.k == 0 {
            return Err(ClassifierError::InvalidModel("k must be at least 1".into()));
        }
        if self.points.is_empty() || self.points.len() != self.labels.len() {
            return Err(ClassifierError::InvalidModel(format!(
                "{} reference points but {} labels",
                self.points.len(),
                self.labels.len()
            )));
        }
        let width = self.scaler.n_features();
        if let Some(i) = self.points.iter().position(|p| p.len() != width) {
            return Err(ClassifierError::InvalidModel(format!(
                "reference point {} has {} values, expected {}",
                i,
                self.points[i].len(),
                width
            )));
        }
        Ok(())
    }

    pub fn predict_proba(&self, row: &[f64]) -> Result<f64, ClassifierError> {
        let query = self.scaler.transform_row(row)?;
        let mut distances: Vec<(f64, Label)> = self
            .points
            .iter()
            .zip(&self.labels)
            .map(|(point, label)| {
                let d: f64 = point.iter().zip(&query).map(|(a, b)| (a - b).powi(2)).sum();
                (d, *label)
            })
            .collect();
        // stable sort: equal distances keep training order
        distances.sort_by(|a, b| a.0.total_cmp(&b.0));

        let k = self.k.min(distances.len()).max(1);
        let ckd = distances
            .iter()
            .take(k)
            .filter(|(_, label)| *label == Label::Ckd)
            .count();
        Ok(ckd as f64 / k as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn votes_among_nearest_points() {
        let x = array![[0.0], [1.0], [2.0], [10.0], [11.0]];
        let y = [Label::NotCkd, Label::NotCkd, Label::NotCkd, Label::Ckd, Label::Ckd];
        let model = KnnModel::fit(x.view(), &y, 3).unwrap();

        assert_eq!(model.predict_proba(&[0.5]).unwrap(), 0.0);
        assert!((model.predict_proba(&[10.5]).unwrap() - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn k_is_capped_by_training_size() {
        let x = array![[0.0], [1.0]];
        let model = KnnModel::fit(x.view(), &[Label::Ckd, Label::NotCkd], 5).unwrap();
        assert_eq!(model.k, 2);
        assert_eq!(model.predict_proba(&[0.0]).unwrap(), 0.5);
        assert!(KnnModel::fit(x.view(), &[Label::Ckd, Label::NotCkd], 0).is_err());
    }

    #[test]
    fn validate_checks_reference_points() {
        let x = array![[0.0, 1.0], [1.0, 0.0]];
        let mut model = KnnModel::fit(x.view(), &[Label::Ckd, Label::NotCkd], 1).unwrap();
        assert!(model.validate().is_ok());

        model.labels.pop();
        assert!(matches!(model.validate(), Err(ClassifierError::InvalidModel(_))));

        model.labels.push(Label::NotCkd);
        model.points[1].pop();
        assert!(matches!(model.validate(), Err(ClassifierError::InvalidModel(_))));
    }
}
