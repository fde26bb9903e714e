pub mod schema;
pub mod settings;

pub use schema::{FeatureKind, FeatureSchema, FeatureSpec, SchemaError, ValidationError};
pub use settings::{Settings, SettingsError};
