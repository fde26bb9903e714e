use std::f64::consts::PI;

use ckd_shared::Label;
use ndarray::{ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use super::classifier::{ClassifierError, check_training_data};
use super::logistic::sigmoid;

const VAR_SMOOTHING: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassGaussian {
    pub prior: f64,
    pub means: Vec<f64>,
    pub variances: Vec<f64>,
}

impl ClassGaussian {
    fn fit(x: ArrayView2<f64>, y: &[Label], label: Label, epsilon: f64) -> Self {
        let rows: Vec<usize> = (0..y.len()).filter(|&i| y[i] == label).collect();
        let subset = x.select(Axis(0), &rows);
        let means = subset.mean_axis(Axis(0)).map(|m| m.to_vec()).unwrap_or_default();
        let variances = subset.var_axis(Axis(0), 0.0).mapv(|v| v + epsilon).to_vec();
        Self {
            prior: rows.len() as f64 / y.len() as f64,
            means,
            variances,
        }
    }

    fn validate(&self, class: &str) -> Result<(), ClassifierError> {
        if self.means.len() != self.variances.len() {
            return Err(ClassifierError::InvalidModel(format!(
                "{class}: {} means but {} variances",
                self.means.len(),
                self.variances.len()
            )));
        }
        if !(self.prior > 0.0 && self.prior <= 1.0) {
            return Err(ClassifierError::InvalidModel(format!("{class}: prior {} out of range", self.prior)));
        }
        if self.means.iter().any(|m| !m.is_finite()) || self.variances.iter().any(|v| !v.is_finite() || *v <= 0.0) {
            return Err(ClassifierError::InvalidModel(format!(
                "{class}: means must be finite and variances positive"
            )));
        }
        Ok(())
    }

    fn log_likelihood(&self, row: &[f64]) -> f64 {
        let density: f64 = row
            .iter()
            .zip(self.means.iter().zip(&self.variances))
            .map(|(x, (mean, var))| (2.0 * PI * var).ln() + (x - mean).powi(2) / var)
            .sum();
        self.prior.ln() - 0.5 * density
    }
}

/// Gaussian naive Bayes with per-class priors, means and variances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaussianNb {
    pub ckd: ClassGaussian,
    pub notckd: ClassGaussian,
}

impl GaussianNb {
    pub fn fit(x: ArrayView2<f64>, y: &[Label]) -> Result<Self, ClassifierError> {
        check_training_data(x, y)?;
        // variance floor relative to the widest feature
        let widest = x.var_axis(Axis(0), 0.0).fold(0.0_f64, |acc, v| acc.max(*v));
        let epsilon = if widest > 0.0 { VAR_SMOOTHING * widest } else { VAR_SMOOTHING };
        Ok(Self {
            ckd: ClassGaussian::fit(x, y, Label::Ckd, epsilon),
            notckd: ClassGaussian::fit(x, y, Label::NotCkd, epsilon),
        })
    }

    pub fn n_features(&self) -> usize {
        self.ckd.means.len()
    }

    pub fn validate(&self) -> Result<(), ClassifierError> {
        self.ckd.validate("ckd")?;
        self.notckd.validate("notckd")?;
        if self.ckd.means.len() != self.notckd.means.len() {
            return Err(ClassifierError::InvalidModel(format!(
                "class parameters cover {} and {} features",
                self.ckd.means.len(),
                self.notckd.means.len()
            )));
        }
        Ok(())
    }

    pub fn predict_proba(&self, row: &[f64]) -> Result<f64, ClassifierError> {
        if row.len() != self.n_features() {
            return Err(ClassifierError::InvalidModel(format!(
                "expected {} values, got {}",
                self.n_features(),
                row.len()
            )));
        }
        Ok(sigmoid(self.ckd.log_likelihood(row) - self.notckd.log_likelihood(row)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::dataset::tests::sample;
    use ckd_shared::MissingValueStrategy;
    use ndarray::array;

    #[test]
    fn priors_follow_class_balance() {
        let x = array![[1.0], [1.2], [0.8], [5.0]];
        let y = [Label::Ckd, Label::Ckd, Label::Ckd, Label::NotCkd];
        let model = GaussianNb::fit(x.view(), &y).unwrap();
        assert!((model.ckd.prior - 0.75).abs() < 1e-12);
        assert!((model.ckd.means[0] - 1.0).abs() < 1e-12);
        assert!(model.notckd.variances[0] > 0.0);
        assert!(model.predict_proba(&[1.0]).unwrap() > 0.5);
        assert!(model.predict_proba(&[5.0]).unwrap() < 0.5);
    }

    #[test]
    fn separates_the_sample() {
        let ds = sample().handle_missing(MissingValueStrategy::FillMedian);
        let model = GaussianNb::fit(ds.features.view(), &ds.labels).unwrap();
        assert_eq!(model.n_features(), 9);
        let correct = ds
            .features
            .outer_iter()
            .zip(&ds.labels)
            .filter(|(row, label)| {
                let p = model.predict_proba(&row.to_vec()).unwrap();
                (p >= 0.5) == (**label == Label::Ckd)
            })
            .count();
        assert_eq!(correct, ds.len());
    }

    #[test]
    fn validate_rejects_bad_variances() {
        let x = array![[1.0, 2.0], [1.5, 2.5], [4.0, 0.0], [5.0, 1.0]];
        let y = [Label::Ckd, Label::Ckd, Label::NotCkd, Label::NotCkd];
        let mut model = GaussianNb::fit(x.view(), &y).unwrap();
        assert!(model.validate().is_ok());

        model.notckd.variances[1] = 0.0;
        assert!(matches!(model.validate(), Err(ClassifierError::InvalidModel(_))));

        model.notckd.variances[1] = 1.0;
        model.ckd.variances.pop();
        assert!(model.validate().is_err());
        assert!(model.predict_proba(&[1.0]).is_err());
    }
}
