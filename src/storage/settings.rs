//! Settings storage
//!
//! Manages persistence of the download manager's preferences.

use crate::storage::{get_data_dir, StorageError};
use crate::types::TransferConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    /// Directory where model files (.gguf) are stored
    pub models_directory: PathBuf,
    /// Model the rest of the app treats as active
    #[serde(default)]
    pub selected_model: Option<String>,
    /// User-Agent header for model requests
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Seconds allowed to connect and receive response headers
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Seconds allowed for a whole transfer
    #[serde(default = "default_transfer_timeout")]
    pub transfer_timeout_secs: u64,
    /// Minimum milliseconds between progress updates
    #[serde(default = "default_progress_interval")]
    pub progress_interval_ms: u64,
    /// Redirect hops to follow
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
    /// `host:port` probed to decide whether the network is usable
    #[serde(default = "default_reachability_host")]
    pub reachability_host: String,
    /// Seconds between reachability probes
    #[serde(default = "default_reachability_interval")]
    pub reachability_interval_secs: u64,
}

fn default_user_agent() -> String {
    TransferConfig::default().user_agent
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_transfer_timeout() -> u64 {
    3600
}

fn default_progress_interval() -> u64 {
    500
}

fn default_max_redirects() -> usize {
    10
}

fn default_reachability_host() -> String {
    "huggingface.co:443".to_string()
}

fn default_reachability_interval() -> u64 {
    5
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            models_directory: get_data_dir()
                .ok()
                .map(|d| d.join("models"))
                .unwrap_or_else(|| PathBuf::from("./models")),
            selected_model: None,
            user_agent: default_user_agent(),
            connect_timeout_secs: default_connect_timeout(),
            transfer_timeout_secs: default_transfer_timeout(),
            progress_interval_ms: default_progress_interval(),
            max_redirects: default_max_redirects(),
            reachability_host: default_reachability_host(),
            reachability_interval_secs: default_reachability_interval(),
        }
    }
}

impl AppSettings {
    /// Validate settings values
    ///
    /// Ensures all parameters are within acceptable ranges.
    pub fn validate(&mut self) {
        self.connect_timeout_secs = self.connect_timeout_secs.clamp(5, 300);
        // never shorter than the connect phase
        self.transfer_timeout_secs = self
            .transfer_timeout_secs
            .clamp(self.connect_timeout_secs, 24 * 3600);
        self.progress_interval_ms = self.progress_interval_ms.clamp(50, 10_000);
        self.max_redirects = self.max_redirects.clamp(1, 30);
        self.reachability_interval_secs = self.reachability_interval_secs.clamp(1, 300);

        if self.user_agent.trim().is_empty() {
            self.user_agent = default_user_agent();
        }

        if !self.reachability_host.contains(':') {
            self.reachability_host = default_reachability_host();
        }

        if self
            .selected_model
            .as_deref()
            .is_some_and(|id| id.trim().is_empty())
        {
            self.selected_model = None;
        }
    }

    /// Transfer knobs derived from these settings.
    pub fn transfer_config(&self) -> TransferConfig {
        TransferConfig {
            user_agent: self.user_agent.clone(),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            transfer_timeout: Duration::from_secs(self.transfer_timeout_secs),
            progress_interval: Duration::from_millis(self.progress_interval_ms),
            max_redirects: self.max_redirects,
        }
    }

    pub fn reachability_interval(&self) -> Duration {
        Duration::from_secs(self.reachability_interval_secs)
    }
}

/// Get the settings file path
pub fn get_settings_path() -> Result<PathBuf, StorageError> {
    Ok(get_data_dir()?.join("settings.json"))
}

/// Load settings from disk
///
/// Returns default settings if the file doesn't exist or is corrupted
pub fn load_settings() -> AppSettings {
    match get_settings_path().and_then(|path| load_settings_from(&path)) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!("Failed to load settings, using defaults: {}", e);
            AppSettings::default()
        }
    }
}

/// Load settings from an explicit file
pub fn load_settings_from(path: &Path) -> Result<AppSettings, StorageError> {
    if !path.exists() {
        tracing::info!("Settings file not found, using defaults");
        return Ok(AppSettings::default());
    }

    let json = fs::read_to_string(path)?;
    let mut settings: AppSettings = serde_json::from_str(&json)?;
    settings.validate();

    tracing::debug!("Loaded settings from {:?}", path);
    Ok(settings)
}

/// Save settings to an explicit file
pub fn save_settings_to(settings: &AppSettings, path: &Path) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(settings)?;
    fs::write(path, json)?;

    tracing::debug!("Saved settings to {:?}", path);
    Ok(())
}
