//! CKD prediction service: feature validation, reference statistics, native
//! classifiers with ensemble consensus, background training and run tracking,
//! exposed over an actix-web API.

pub mod config;
pub mod features;
pub mod ml;
pub mod pipeline;
pub mod routes;
pub mod stats;
pub mod tracking;
pub mod training;
