//! Application wiring
//!
//! Builds the network monitor, transport and download manager from the
//! persisted settings, and writes the selected model back when it changes.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::download::{DownloadError, DownloadManager, HttpTransport, ManagerDeps, SessionSnapshot};
use crate::storage::settings::{get_settings_path, save_settings_to, AppSettings};
use crate::storage::{ModelStore, StorageError};
use crate::system::{NetworkMonitor, PathStatus, SystemDiskSpace, TcpProbe};
use crate::types::ModelCatalog;

/// Upper bound for one reachability probe
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Download(#[from] DownloadError),
}

/// Running download stack
///
/// Must be created inside a tokio runtime.
pub struct App {
    store: ModelStore,
    monitor: NetworkMonitor,
    manager: DownloadManager,
    settings: AppSettings,
    settings_path: PathBuf,
    persist_task: JoinHandle<()>,
}

impl App {
    /// Start with the settings file in the application data directory.
    pub fn start(settings: AppSettings) -> Result<Self, StartupError> {
        let path = get_settings_path()?;
        Self::start_at(settings, path)
    }

    /// Start with an explicit settings file for selection persistence.
    pub fn start_at(mut settings: AppSettings, settings_path: PathBuf) -> Result<Self, StartupError> {
        settings.validate();

        let store = ModelStore::new(
            settings.models_directory.clone(),
            Arc::new(ModelCatalog::builtin().clone()),
        );
        store.ensure_directory()?;
        store.sweep_staging();

        let probe = TcpProbe::new(settings.reachability_host.clone(), PROBE_TIMEOUT);
        let monitor = NetworkMonitor::new(Arc::new(probe), settings.reachability_interval());
        monitor.start();

        let transport = HttpTransport::new(&settings.transfer_config())?;
        let manager = DownloadManager::spawn(ManagerDeps {
            store: store.clone(),
            transport: Arc::new(transport),
            disk: Arc::new(SystemDiskSpace),
            network: monitor.subscribe(),
            config: settings.transfer_config(),
            initial_selection: settings.selected_model.clone(),
        });

        let persist_task = tokio::spawn(persist_selection(
            manager.subscribe(),
            settings.clone(),
            settings_path.clone(),
        ));

        tracing::info!(
            "Download manager ready, models in {:?}",
            settings.models_directory
        );

        Ok(Self {
            store,
            monitor,
            manager,
            settings,
            settings_path,
            persist_task,
        })
    }

    pub fn manager(&self) -> &DownloadManager {
        &self.manager
    }

    pub fn store(&self) -> &ModelStore {
        &self.store
    }

    pub fn network_status(&self) -> PathStatus {
        self.monitor.status()
    }

    /// Stop background tasks and write the final selection.
    pub fn shutdown(mut self) {
        self.persist_task.abort();
        self.monitor.stop();
        let snapshot = self.manager.snapshot();
        store_selection(&mut self.settings, &snapshot, &self.settings_path);
    }
}

async fn persist_selection(
    mut snapshots: watch::Receiver<SessionSnapshot>,
    mut settings: AppSettings,
    path: PathBuf,
) {
    loop {
        let snapshot = snapshots.borrow_and_update().clone();
        store_selection(&mut settings, &snapshot, &path);
        if snapshots.changed().await.is_err() {
            break;
        }
    }
}

fn store_selection(settings: &mut AppSettings, snapshot: &SessionSnapshot, path: &Path) {
    if settings.selected_model == snapshot.selected_model_id {
        return;
    }
    settings.selected_model = snapshot.selected_model_id.clone();
    if let Err(e) = save_settings_to(settings, path) {
        tracing::warn!("Failed to persist selected model: {}", e);
    }
}
