use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use ckd_shared::{Label, PatientInput};
use serde::{Deserialize, Serialize};

use crate::features::FeatureVector;

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("Failed to read feature schema: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse feature schema: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid feature schema: {0}")]
    Invalid(String),
}

/// Rejections raised while turning a patient payload into a feature vector.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Missing features {missing:?}. Expected: {expected:?}")]
    MissingFeature {
        missing: Vec<String>,
        expected: Vec<String>,
    },
    #[error("Feature '{feature}' value {value} is outside [{min}, {max}]")]
    OutOfRange {
        feature: String,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("Feature '{0}' is not a finite number")]
    NotFinite(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureKind {
    Continuous,
    Categorical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub unit: Option<String>,
    pub kind: FeatureKind,
    pub min: f64,
    pub max: f64,
    #[serde(default)]
    pub example: Option<f64>,
}

impl FeatureSpec {
    fn new(name: &str, description: &str, unit: Option<&str>, kind: FeatureKind, range: (f64, f64), example: f64) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            unit: unit.map(str::to_string),
            kind,
            min: range.0,
            max: range.1,
            example: Some(example),
        }
    }

    pub fn is_categorical(&self) -> bool {
        self.kind == FeatureKind::Categorical
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelSpec {
    pub column: String,
    pub positive: String,
    pub negative: String,
}

impl LabelSpec {
    pub fn parse(&self, raw: &str) -> Option<Label> {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case(&self.positive) {
            Some(Label::Ckd)
        } else if raw.eq_ignore_ascii_case(&self.negative) {
            Some(Label::NotCkd)
        } else {
            None
        }
    }
}

#[derive(Debug, Deserialize)]
struct SchemaFile {
    #[serde(default)]
    version: u32,
    label: LabelSpec,
    features: Vec<FeatureSpec>,
}

/// Ordered clinical feature declarations plus the diagnosis column layout.
#[derive(Debug, Clone)]
pub struct FeatureSchema {
    version: u32,
    label: LabelSpec,
    features: Vec<FeatureSpec>,
    names: Arc<[String]>,
}

impl FeatureSchema {
    pub fn new(label: LabelSpec, features: Vec<FeatureSpec>) -> Result<Self, SchemaError> {
        Self::build(1, label, features)
    }

    fn build(version: u32, label: LabelSpec, features: Vec<FeatureSpec>) -> Result<Self, SchemaError> {
        if features.is_empty() {
            return Err(SchemaError::Invalid("no features declared".into()));
        }
        let mut seen = HashSet::new();
        for spec in &features {
            if !seen.insert(spec.name.as_str()) {
                return Err(SchemaError::Invalid(format!("duplicate feature '{}'", spec.name)));
            }
            if spec.min > spec.max {
                return Err(SchemaError::Invalid(format!(
                    "feature '{}' has min {} greater than max {}",
                    spec.name, spec.min, spec.max
                )));
            }
        }
        if label.positive.eq_ignore_ascii_case(&label.negative) {
            return Err(SchemaError::Invalid("positive and negative labels are identical".into()));
        }

        let names: Arc<[String]> = features.iter().map(|f| f.name.clone()).collect();
        Ok(Self {
            version,
            label,
            features,
            names,
        })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, SchemaError> {
        let file: SchemaFile = serde_yaml::from_str(raw)?;
        Self::build(file.version, file.label, file.features)
    }

    /// Nine-feature CKD layout used when no schema file is available.
    pub fn ckd_default() -> Self {
        use FeatureKind::{Categorical, Continuous};

        let features = vec![
            FeatureSpec::new("hemo", "Hemoglobin", Some("g/dL"), Continuous, (0.0, 20.0), 15.4),
            FeatureSpec::new("sg", "Specific Gravity", None, Categorical, (1.000, 1.030), 1.020),
            FeatureSpec::new("sc", "Serum Creatinine", Some("mg/dL"), Continuous, (0.0, 20.0), 1.2),
            FeatureSpec::new("rbcc", "Red Blood Cell Count", Some("millions/cmm"), Continuous, (0.0, 10.0), 5.2),
            FeatureSpec::new("pcv", "Packed Cell Volume", Some("%"), Continuous, (0.0, 60.0), 44.0),
            FeatureSpec::new("htn", "Hypertension (0=No, 1=Yes)", None, Categorical, (0.0, 1.0), 1.0),
            FeatureSpec::new("dm", "Diabetes Mellitus (0=No, 1=Yes)", None, Categorical, (0.0, 1.0), 1.0),
            FeatureSpec::new("bp", "Blood Pressure", Some("mmHg"), Continuous, (0.0, 200.0), 80.0),
            FeatureSpec::new("age", "Age", Some("years"), Continuous, (0.0, 120.0), 48.0),
        ];
        let label = LabelSpec {
            column: "status".to_string(),
            positive: "ckd".to_string(),
            negative: "notckd".to_string(),
        };
        let names: Arc<[String]> = features.iter().map(|f| f.name.clone()).collect();
        Self {
            version: 1,
            label,
            features,
            names,
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn label(&self) -> &LabelSpec {
        &self.label
    }

    pub fn features(&self) -> &[FeatureSpec] {
        &self.features
    }

    pub fn names(&self) -> Arc<[String]> {
        self.names.clone()
    }

    pub fn spec(&self, name: &str) -> Option<&FeatureSpec> {
        self.features.iter().find(|f| f.name == name)
    }

    /// Checks presence of every declared feature, then finiteness and range,
    /// and returns the values in schema order. Extra keys are ignored.
    pub fn vectorize(&self, input: &PatientInput) -> Result<FeatureVector, ValidationError> {
        let missing: Vec<String> = self
            .features
            .iter()
            .filter(|f| !input.contains_key(&f.name))
            .map(|f| f.name.clone())
            .collect();
        if !missing.is_empty() {
            return Err(ValidationError::MissingFeature {
                missing,
                expected: self.names.to_vec(),
            });
        }

        let mut values = Vec::with_capacity(self.features.len());
        for spec in &self.features {
            let value = input.get(&spec.name).copied().unwrap_or(f64::NAN);
            if !value.is_finite() {
                return Err(ValidationError::NotFinite(spec.name.clone()));
            }
            if value < spec.min || value > spec.max {
                return Err(ValidationError::OutOfRange {
                    feature: spec.name.clone(),
                    value,
                    min: spec.min,
                    max: spec.max,
                });
            }
            values.push(value);
        }
        Ok(FeatureVector::new(self.names.clone(), values))
    }

    /// Sample payload built from each feature's `example`, or the range midpoint.
    pub fn example_patient(&self) -> PatientInput {
        PatientInput(
            self.features
                .iter()
                .map(|f| {
                    let value = f.example.unwrap_or((f.min + f.max) / 2.0);
                    (f.name.clone(), value)
                })
                .collect(),
        )
    }
}
