use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScalerError {
    #[error("scaler has {centres} centres but {spreads} spreads")]
    Shape { centres: usize, spreads: usize },
    #[error("scaler spread for column {0} is zero or not finite")]
    Spread(usize),
    #[error("scaler fitted on {expected} columns, got {actual}")]
    Width { expected: usize, actual: usize },
}

/// Column-wise feature scaling, fitted on training data and stored inside
/// model artifacts so inference applies the same transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Scaler {
    Standard { means: Vec<f64>, scales: Vec<f64> },
    MinMax { mins: Vec<f64>, ranges: Vec<f64> },
}

// Constant columns would divide by zero; treat their spread as one.
fn non_degenerate(spread: f64) -> f64 {
    if spread.abs() < f64::EPSILON { 1.0 } else { spread }
}

impl Scaler {
    pub fn fit_standard(x: ArrayView2<f64>) -> Self {
        let means = x
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(x.ncols()));
        let scales = x.std_axis(Axis(0), 0.0).mapv(non_degenerate);
        Scaler::Standard {
            means: means.to_vec(),
            scales: scales.to_vec(),
        }
    }

    pub fn fit_min_max(x: ArrayView2<f64>) -> Self {
        let mut mins = Vec::with_capacity(x.ncols());
        let mut ranges = Vec::with_capacity(x.ncols());
        for column in x.columns() {
            let lo = column.iter().copied().fold(f64::INFINITY, f64::min);
            let hi = column.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            if lo.is_finite() && hi.is_finite() {
                mins.push(lo);
                ranges.push(non_degenerate(hi - lo));
            } else {
                mins.push(0.0);
                ranges.push(1.0);
            }
        }
        Scaler::MinMax { mins, ranges }
    }

    pub fn n_features(&self) -> usize {
        match self {
            Scaler::Standard { means, .. } => means.len(),
            Scaler::MinMax { mins, .. } => mins.len(),
        }
    }

    /// Checks a deserialized scaler before it is used for inference.
    pub fn validate(&self) -> Result<(), ScalerError> {
        let (centres, spreads) = match self {
            Scaler::Standard { means, scales } => (means, scales),
            Scaler::MinMax { mins, ranges } => (mins, ranges),
        };
        if centres.len() != spreads.len() {
            return Err(ScalerError::Shape {
                centres: centres.len(),
                spreads: spreads.len(),
            });
        }
        if let Some(col) = spreads.iter().position(|s| !s.is_finite() || *s == 0.0) {
            return Err(ScalerError::Spread(col));
        }
        Ok(())
    }

    fn scale(&self, col: usize, value: f64) -> Option<f64> {
        let (centre, spread) = match self {
            Scaler::Standard { means, scales } => (means.get(col)?, scales.get(col)?),
            Scaler::MinMax { mins, ranges } => (mins.get(col)?, ranges.get(col)?),
        };
        Some((value - centre) / spread)
    }

    fn check_width(&self, actual: usize) -> Result<(), ScalerError> {
        let expected = self.n_features();
        if actual == expected {
            Ok(())
        } else {
            Err(ScalerError::Width { expected, actual })
        }
    }

    pub fn transform(&self, x: ArrayView2<f64>) -> Result<Array2<f64>, ScalerError> {
        self.check_width(x.ncols())?;
        let mut out = x.to_owned();
        for ((_, col), value) in out.indexed_iter_mut() {
            *value = self.scale(col, *value).ok_or(ScalerError::Width {
                expected: self.n_features(),
                actual: col + 1,
            })?;
        }
        Ok(out)
    }

    pub fn transform_row(&self, row: &[f64]) -> Result<Vec<f64>, ScalerError> {
        self.check_width(row.len())?;
        row.iter()
            .enumerate()
            .map(|(col, value)| {
                self.scale(col, *value).ok_or(ScalerError::Width {
                    expected: self.n_features(),
                    actual: col + 1,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn standard_scaling_centres_columns() {
        let x = array![[1.0, 10.0], [3.0, 10.0]];
        let scaler = Scaler::fit_standard(x.view());
        let scaled = scaler.transform(x.view()).unwrap();
        assert_eq!(scaled, array![[-1.0, 0.0], [1.0, 0.0]]);
        assert_eq!(scaler.transform_row(&[2.0, 12.0]).unwrap(), vec![0.0, 2.0]);
    }

    #[test]
    fn min_max_maps_to_unit_range() {
        let x = array![[0.0, 5.0], [4.0, 5.0], [2.0, 5.0]];
        let scaler = Scaler::fit_min_max(x.view());
        let scaled = scaler.transform(x.view()).unwrap();
        assert_eq!(scaled.column(0).to_vec(), vec![0.0, 1.0, 0.5]);
        assert_eq!(scaled.column(1).to_vec(), vec![0.0, 0.0, 0.0]);
        assert_eq!(scaler.n_features(), 2);
    }

    #[test]
    fn survives_json_round_trip() {
        let scaler = Scaler::fit_standard(array![[1.0], [2.0]].view());
        let json = serde_json::to_string(&scaler).unwrap();
        assert!(json.contains("\"method\":\"standard\""));
        let back: Scaler = serde_json::from_str(&json).unwrap();
        assert_eq!(back, scaler);
    }

    #[test]
    fn width_mismatch_is_an_error() {
        let scaler = Scaler::Standard {
            means: vec![0.0],
            scales: vec![1.0],
        };
        assert_eq!(
            scaler.transform_row(&[1.0, 2.0]),
            Err(ScalerError::Width { expected: 1, actual: 2 })
        );
        assert!(scaler.transform(array![[1.0, 2.0]].view()).is_err());
    }

    #[test]
    fn validate_rejects_malformed_parameters() {
        let short = Scaler::Standard {
            means: vec![0.0, 1.0],
            scales: vec![1.0],
        };
        assert_eq!(short.validate(), Err(ScalerError::Shape { centres: 2, spreads: 1 }));
        let flat = Scaler::MinMax {
            mins: vec![0.0, 0.0],
            ranges: vec![1.0, 0.0],
        };
        assert_eq!(flat.validate(), Err(ScalerError::Spread(1)));
        assert!(Scaler::fit_standard(array![[1.0, 4.0], [2.0, 4.0]].view()).validate().is_ok());
    }
}
