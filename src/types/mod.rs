//! Shared type definitions
//!
//! Catalog entries and transfer configuration used across the crate.

pub mod config;
pub mod model;

pub use config::TransferConfig;
pub use model::{ModelCatalog, ModelDescriptor, MODEL_EXTENSION};
