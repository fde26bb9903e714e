use ckd_shared::{ClassProbabilities, Label, ModelKind};
use ndarray::ArrayView2;

use crate::features::FeatureVector;
use crate::pipeline::ScalerError;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClassifierError {
    #[error("Feature mismatch: model expects {expected:?}, got {actual:?}")]
    FeatureMismatch {
        expected: Vec<String>,
        actual: Vec<String>,
    },
    #[error("Invalid model: {0}")]
    InvalidModel(String),
    #[error("Invalid training data: {0}")]
    InvalidTrainingData(String),
    #[error(transparent)]
    Scaler(#[from] ScalerError),
}

/// One model's verdict on one patient.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub label: Label,
    pub confidence: f64,
    pub probability: Option<ClassProbabilities>,
}

impl Prediction {
    /// The label is CKD from 0.5 upwards; confidence is the winning class probability.
    pub fn from_ckd_probability(p_ckd: f64) -> Self {
        let p_ckd = p_ckd.clamp(0.0, 1.0);
        let label = if p_ckd >= 0.5 { Label::Ckd } else { Label::NotCkd };
        Self {
            label,
            confidence: p_ckd.max(1.0 - p_ckd),
            probability: Some(ClassProbabilities {
                ckd: p_ckd,
                notckd: 1.0 - p_ckd,
            }),
        }
    }
}

/// A trained model that can score a validated feature vector.
///
/// Implementations are pure: the same vector always yields the same
/// prediction, and scoring never mutates the model.
pub trait Classifier: Send + Sync {
    fn kind(&self) -> ModelKind;

    /// Feature names in the order the model was trained on.
    fn feature_names(&self) -> &[String];

    /// Probability of the CKD class for raw (unscaled) values in
    /// [`Classifier::feature_names`] order.
    fn predict_proba(&self, values: &[f64]) -> Result<f64, ClassifierError>;

    fn has_probability(&self) -> bool {
        true
    }

    fn classify(&self, features: &FeatureVector) -> Result<Prediction, ClassifierError> {
        if features.names() != self.feature_names() {
            return Err(ClassifierError::FeatureMismatch {
                expected: self.feature_names().to_vec(),
                actual: features.names().to_vec(),
            });
        }
        let p_ckd = self.predict_proba(features.values())?;
        Ok(Prediction::from_ckd_probability(p_ckd))
    }
}

/// Shared preconditions for every `fit`: matching non-empty shapes, finite
/// values and both classes present.
pub(crate) fn check_training_data(x: ArrayView2<f64>, y: &[Label]) -> Result<(), ClassifierError> {
    if x.nrows() == 0 || x.ncols() == 0 {
        return Err(ClassifierError::InvalidTrainingData("no samples".into()));
    }
    if x.nrows() != y.len() {
        return Err(ClassifierError::InvalidTrainingData(format!(
            "{} rows but {} labels",
            x.nrows(),
            y.len()
        )));
    }
    if x.iter().any(|v| !v.is_finite()) {
        return Err(ClassifierError::InvalidTrainingData(
            "features contain missing or infinite values".into(),
        ));
    }
    if !y.contains(&Label::Ckd) || !y.contains(&Label::NotCkd) {
        return Err(ClassifierError::InvalidTrainingData(
            "both classes must be present".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::config::FeatureSchema;

    /// Returns the same probability for every input.
    pub(crate) struct FixedClassifier {
        pub kind: ModelKind,
        pub names: Vec<String>,
        pub p_ckd: f64,
    }

    impl FixedClassifier {
        pub(crate) fn new(label: Label, confidence: f64) -> Self {
            let p_ckd = match label {
                Label::Ckd => confidence,
                Label::NotCkd => 1.0 - confidence,
            };
            Self {
                kind: ModelKind::Knn,
                names: FeatureSchema::ckd_default().names().to_vec(),
                p_ckd,
            }
        }
    }

    impl Classifier for FixedClassifier {
        fn kind(&self) -> ModelKind {
            self.kind
        }

        fn feature_names(&self) -> &[String] {
            &self.names
        }

        fn predict_proba(&self, _values: &[f64]) -> Result<f64, ClassifierError> {
            Ok(self.p_ckd)
        }
    }

    pub(crate) struct FailingClassifier {
        pub names: Vec<String>,
    }

    impl FailingClassifier {
        pub(crate) fn new() -> Self {
            Self {
                names: FeatureSchema::ckd_default().names().to_vec(),
            }
        }
    }

    impl Classifier for FailingClassifier {
        fn kind(&self) -> ModelKind {
            ModelKind::LogisticRegression
        }

        fn feature_names(&self) -> &[String] {
            &self.names
        }

        fn predict_proba(&self, _values: &[f64]) -> Result<f64, ClassifierError> {
            Err(ClassifierError::InvalidModel("weights are corrupt".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FixedClassifier;
    use super::*;
    use crate::config::FeatureSchema;
    use ndarray::array;
    use std::sync::Arc;

    #[test]
    fn probability_maps_to_label_and_confidence() {
        let p = Prediction::from_ckd_probability(0.8);
        assert_eq!(p.label, Label::Ckd);
        assert!((p.confidence - 0.8).abs() < 1e-12);

        let p = Prediction::from_ckd_probability(0.1);
        assert_eq!(p.label, Label::NotCkd);
        assert!((p.confidence - 0.9).abs() < 1e-12);
        assert_eq!(Prediction::from_ckd_probability(0.5).label, Label::Ckd);
    }

    #[test]
    fn classify_rejects_foreign_feature_order() {
        let classifier = FixedClassifier::new(Label::Ckd, 0.7);
        let names: Arc<[String]> = vec!["hemo".to_string()].into();
        let vector = FeatureVector::new(names, vec![12.0]);
        assert!(matches!(
            classifier.classify(&vector),
            Err(ClassifierError::FeatureMismatch { .. })
        ));

        let schema = FeatureSchema::ckd_default();
        let vector = schema.vectorize(&schema.example_patient()).unwrap();
        assert_eq!(classifier.classify(&vector).unwrap().label, Label::Ckd);
    }

    #[test]
    fn training_data_checks() {
        let x = array![[1.0], [2.0]];
        assert!(check_training_data(x.view(), &[Label::Ckd, Label::NotCkd]).is_ok());
        assert!(check_training_data(x.view(), &[Label::Ckd, Label::Ckd]).is_err());
        assert!(check_training_data(x.view(), &[Label::Ckd]).is_err());
        let nan = array![[1.0], [f64::NAN]];
        assert!(check_training_data(nan.view(), &[Label::Ckd, Label::NotCkd]).is_err());
    }
}
