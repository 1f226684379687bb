//! Download session state
//!
//! The mutable record owned by the controller and the immutable snapshot
//! handed to observers.

use serde::{Deserialize, Serialize};

use super::error::DownloadError;
use super::throttle::ProgressSample;

/// Lifecycle of the download session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    /// Nothing in flight and no model ready
    Idle,
    /// Bytes are being transferred
    Downloading,
    /// Transfer finished, file being moved into place
    Installing,
    /// The selected model is on disk
    Ready,
    /// The last attempt failed; see `last_error`
    Failed,
}

impl Phase {
    pub fn is_transferring(self) -> bool {
        matches!(self, Phase::Downloading | Phase::Installing)
    }
}

/// Controller-owned session record
#[derive(Debug, Clone)]
pub(crate) struct DownloadSession {
    pub selected_model_id: Option<String>,
    pub active_model_id: Option<String>,
    pub phase: Phase,
    pub progress: f64,
    pub bytes_written: u64,
    pub bytes_expected: u64,
    pub last_error: Option<DownloadError>,
    pub preflight_checked: bool,
    pub generation: u64,
}

impl DownloadSession {
    pub fn new(selected_model_id: Option<String>) -> Self {
        Self {
            selected_model_id,
            active_model_id: None,
            phase: Phase::Idle,
            progress: 0.0,
            bytes_written: 0,
            bytes_expected: 0,
            last_error: None,
            preflight_checked: false,
            generation: 0,
        }
    }

    /// Reset counters for a fresh attempt.
    pub fn begin(&mut self, model_id: &str, generation: u64) {
        self.active_model_id = Some(model_id.to_string());
        self.phase = Phase::Downloading;
        self.progress = 0.0;
        self.bytes_written = 0;
        self.bytes_expected = 0;
        self.last_error = None;
        self.preflight_checked = false;
        self.generation = generation;
    }

    pub fn apply(&mut self, sample: ProgressSample) {
        self.bytes_written = sample.bytes_written;
        self.bytes_expected = sample.bytes_expected;
        self.progress = sample.fraction;
    }

    /// Attempt ended with an error.
    pub fn fail(&mut self, error: DownloadError) {
        self.active_model_id = None;
        self.phase = Phase::Failed;
        self.last_error = Some(error);
        self.preflight_checked = false;
    }

    /// Attempt installed; the downloaded model becomes the selection.
    ///
    /// `installed_size` is the size of the file on disk when it could be read.
    pub fn complete(&mut self, installed_size: Option<u64>) {
        self.selected_model_id = self.active_model_id.take();
        self.phase = Phase::Ready;
        match installed_size {
            Some(size) => self.bytes_expected = size,
            None if self.bytes_expected == 0 => self.bytes_expected = self.bytes_written,
            None => {}
        }
        self.bytes_written = self.bytes_expected;
        self.progress = 1.0;
    }

    /// User cancelled; no error is surfaced.
    pub fn abandon(&mut self) {
        self.active_model_id = None;
        self.phase = Phase::Idle;
        self.preflight_checked = false;
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            selected_model_id: self.selected_model_id.clone(),
            active_model_id: self.active_model_id.clone(),
            phase: self.phase,
            progress: self.progress,
            bytes_written: self.bytes_written,
            bytes_expected: self.bytes_expected,
            last_error: self.last_error.as_ref().map(ToString::to_string),
            preflight_checked: self.preflight_checked,
            generation: self.generation,
        }
    }
}

/// Consistent view of the session published to observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub selected_model_id: Option<String>,
    pub active_model_id: Option<String>,
    pub phase: Phase,
    pub progress: f64,
    pub bytes_written: u64,
    pub bytes_expected: u64,
    pub last_error: Option<String>,
    pub preflight_checked: bool,
    pub generation: u64,
}

impl SessionSnapshot {
    /// Whether a model can be handed to the inference layer.
    pub fn has_model_ready(&self) -> bool {
        self.selected_model_id.is_some()
    }
}
