use ckd_shared::Label;
use ndarray::{Array1, ArrayView2};
use serde::{Deserialize, Serialize};

use super::classifier::{ClassifierError, check_training_data};
use crate::pipeline::Scaler;

const LEARNING_RATE: f64 = 0.1;
const EPOCHS: usize = 1000;
const L2_PENALTY: f64 = 1e-3;

pub(crate) fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// L2-regularised logistic regression trained by batch gradient descent on
/// standardised features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticModel {
    pub scaler: Scaler,
    pub weights: Vec<f64>,
    pub bias: f64,
}

impl LogisticModel {
    pub fn fit(x: ArrayView2<f64>, y: &[Label]) -> Result<Self, ClassifierError> {
        check_training_data(x, y)?;
        let scaler = Scaler::fit_standard(x);
        let xs = scaler.transform(x)?;
        let targets: Array1<f64> = y.iter().map(|l| f64::from(l.as_numeric())).collect();
        let n = xs.nrows() as f64;

        let mut weights = Array1::<f64>::zeros(xs.ncols());
        let mut bias = 0.0;
        for _ in 0..EPOCHS {
            let errors = (xs.dot(&weights) + bias).mapv(sigmoid) - &targets;
            let grad_w = xs.t().dot(&errors) / n + &weights * L2_PENALTY;
            let grad_b = errors.sum() / n;
            weights.scaled_add(-LEARNING_RATE, &grad_w);
            bias -= LEARNING_RATE * grad_b;
        }

        Ok(Self {
            scaler,
            weights: weights.to_vec(),
            bias,
        })
    }

    pub fn n_features(&self) -> usize {
        self.weights.len()
    }

    pub fn validate(&self) -> Result<(), ClassifierError> {
        self.scaler.validate()?;
        if self.scaler.n_features() != self.weights.len() {
            return Err(ClassifierError::InvalidModel(format!(
                "{} weights but the scaler covers {} features",
                self.weights.len(),
                self.scaler.n_features()
            )));
        }
        if !self.bias.is_finite() || self.weights.iter().any(|w| !w.is_finite()) {
            return Err(ClassifierError::InvalidModel("non-finite coefficients".into()));
        }
        Ok(())
    }

    pub fn predict_proba(&self, row: &[f64]) -> Result<f64, ClassifierError> {
        let scaled = self.scaler.transform_row(row)?;
        let z: f64 = scaled.iter().zip(&self.weights).map(|(x, w)| x * w).sum();
        Ok(sigmoid(z + self.bias))
    }
}
