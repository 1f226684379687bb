//! Persistent storage
//!
//! This module handles everything that lives on disk: model files, settings and
//! the application data directory.

pub mod huggingface;
pub mod models;
pub mod settings;

use directories::ProjectDirs;
use std::path::PathBuf;
use thiserror::Error;

pub use models::ModelStore;

/// Errors raised by the storage layer
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Could not determine application data directory")]
    NoDataDir,
}

/// Application private data directory
pub fn get_data_dir() -> Result<PathBuf, StorageError> {
    ProjectDirs::from("dev", "ModelFetch", "ModelFetch")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or(StorageError::NoDataDir)
}
