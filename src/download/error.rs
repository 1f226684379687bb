use thiserror::Error;

use crate::storage::huggingface::format_size;

/// Why a download manager operation failed
///
/// Every variant ends the current attempt; nothing is retried automatically.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DownloadError {
    #[error("No network connection")]
    NetworkUnavailable,
    #[error("Connection lost")]
    ConnectionLost,
    #[error("Invalid model: {0}")]
    InvalidModel(String),
    #[error("Unknown model: {0}")]
    UnknownModel(String),
    #[error("Model is not downloaded: {0}")]
    NotDownloaded(String),
    #[error(
        "Not enough free space: {} required, {} available",
        format_size(*.required),
        format_size(*.available)
    )]
    InsufficientDiskSpace { required: u64, available: u64 },
    #[error("Server returned status {0}")]
    ServerError(u16),
    #[error("Download failed: {0}")]
    TransportError(String),
    #[error("Failed to save file: {0}")]
    PlacementError(String),
    #[error("Download manager has shut down")]
    ManagerClosed,
}
