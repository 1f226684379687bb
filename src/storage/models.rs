//! Model placement
//!
//! Maps catalog entries to their canonical files and installs or removes them.
//! The directory contents are the only record of what is downloaded.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::download::DownloadError;
use crate::types::{ModelCatalog, ModelDescriptor};

/// Subdirectory holding in-flight transfers.
const STAGING_DIR: &str = ".partial";

/// Owner of the models directory
#[derive(Debug, Clone)]
pub struct ModelStore {
    root: PathBuf,
    catalog: Arc<ModelCatalog>,
}

impl ModelStore {
    pub fn new(root: impl Into<PathBuf>, catalog: Arc<ModelCatalog>) -> Self {
        Self {
            root: root.into(),
            catalog,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    pub fn ensure_directory(&self) -> Result<(), DownloadError> {
        fs::create_dir_all(&self.root).map_err(placement_error)
    }

    pub fn descriptor(&self, model_id: &str) -> Result<&ModelDescriptor, DownloadError> {
        self.catalog
            .get(model_id)
            .ok_or_else(|| DownloadError::UnknownModel(model_id.to_string()))
    }

    /// Canonical location: `<root>/<filename>.gguf`.
    pub fn path_for(&self, model_id: &str) -> Result<PathBuf, DownloadError> {
        let descriptor = self.descriptor(model_id)?;
        Ok(self.root.join(descriptor.file_name()?))
    }

    /// Where a transfer attempt writes before it is installed.
    pub fn staging_path(&self, model_id: &str, generation: u64) -> Result<PathBuf, DownloadError> {
        let descriptor = self.descriptor(model_id)?;
        Ok(self
            .root
            .join(STAGING_DIR)
            .join(format!("{}.{}.download", descriptor.file_name()?, generation)))
    }

    /// Live check of the canonical file; never cached.
    pub fn is_downloaded(&self, model_id: &str) -> bool {
        self.path_for(model_id)
            .map(|path| path.is_file())
            .unwrap_or(false)
    }

    /// Catalog entries whose canonical file exists, in catalog order.
    pub fn list_downloaded(&self) -> Vec<&ModelDescriptor> {
        self.catalog
            .iter()
            .filter(|model| self.is_downloaded(&model.id))
            .collect()
    }

    /// Move a finished download into its canonical place.
    ///
    /// The replacement becomes visible through a single rename over the old
    /// file. A failure leaves whatever was installed before untouched.
    pub fn install(&self, temp_location: &Path, model_id: &str) -> Result<PathBuf, DownloadError> {
        let target = self.path_for(model_id)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(placement_error)?;
        }

        match fs::rename(temp_location, &target) {
            Ok(()) => {}
            Err(err) if is_cross_device(&err) => {
                // Different volume: copy next to the target, then rename into place.
                let staged = target.with_extension("gguf.installing");
                let copied =
                    fs::copy(temp_location, &staged).and_then(|_| fs::rename(&staged, &target));
                if let Err(err) = copied {
                    let _ = fs::remove_file(&staged);
                    return Err(placement_error(err));
                }
                let _ = fs::remove_file(temp_location);
            }
            Err(err) => return Err(placement_error(err)),
        }

        tracing::info!("Installed model {} at {:?}", model_id, target);
        Ok(target)
    }

    /// Delete the canonical file. Returns whether a file was removed.
    pub fn remove(&self, model_id: &str) -> Result<bool, DownloadError> {
        let target = self.path_for(model_id)?;
        match fs::remove_file(&target) {
            Ok(()) => {
                tracing::info!("Removed model {} ({:?})", model_id, target);
                Ok(true)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(placement_error(err)),
        }
    }

    /// Clear transfer leftovers from a previous run.
    pub fn sweep_staging(&self) -> usize {
        let Ok(entries) = fs::read_dir(self.root.join(STAGING_DIR)) else {
            return 0;
        };
        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_file() && fs::remove_file(&path).is_ok() {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::info!("Removed {} stale partial downloads", removed);
        }
        removed
    }
}

fn placement_error(err: io::Error) -> DownloadError {
    DownloadError::PlacementError(err.to_string())
}

fn is_cross_device(err: &io::Error) -> bool {
    #[cfg(windows)]
    const EXDEV: i32 = 17; // ERROR_NOT_SAME_DEVICE
    #[cfg(not(windows))]
    const EXDEV: i32 = 18;
    err.raw_os_error() == Some(EXDEV)
}
