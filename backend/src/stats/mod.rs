pub mod descriptive;
pub mod reference;

pub use reference::{ComparisonService, FeatureStatistic, ReferenceStatistics};
