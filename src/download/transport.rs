//! Transfer transport
//!
//! A [`Transport`] moves the bytes of one attempt into a staging file and
//! reports what happens as [`TransferEvent`]s tagged with the attempt
//! generation. The controller consumes them from a channel.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{redirect, Client, StatusCode, Url};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::error::DownloadError;
use crate::types::TransferConfig;

/// What one attempt should fetch and where to put it
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub model_id: String,
    pub url: Url,
    pub staging_path: PathBuf,
}

/// Transport-level reason an attempt ended without a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferFailure {
    /// Response status other than 200
    Status(u16),
    /// Connection, timeout or body error
    Network(String),
    /// Writing the staging file failed
    Io(String),
    /// The attempt was cancelled
    Cancelled,
}

impl From<TransferFailure> for DownloadError {
    fn from(failure: TransferFailure) -> Self {
        match failure {
            TransferFailure::Status(code) => DownloadError::ServerError(code),
            TransferFailure::Network(description) => DownloadError::TransportError(description),
            TransferFailure::Io(description) => DownloadError::PlacementError(description),
            TransferFailure::Cancelled => DownloadError::TransportError("cancelled".to_string()),
        }
    }
}

/// Event emitted by a running attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    Progress { bytes_written: u64, bytes_expected: u64 },
    Completed(PathBuf),
    Failed(TransferFailure),
}

/// Event plus the attempt it belongs to
#[derive(Debug, Clone)]
pub struct TransferMessage {
    pub generation: u64,
    pub event: TransferEvent,
}

/// Reporting handle given to a transport for one attempt
#[derive(Debug, Clone)]
pub struct TransferSink {
    generation: u64,
    tx: mpsc::UnboundedSender<TransferMessage>,
}

impl TransferSink {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<TransferMessage>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Report cumulative bytes. `bytes_expected` is 0 while unknown.
    pub fn progress(&self, bytes_written: u64, bytes_expected: u64) {
        self.send(TransferEvent::Progress {
            bytes_written,
            bytes_expected,
        });
    }

    fn send(&self, event: TransferEvent) {
        // The controller may already be gone during shutdown.
        let _ = self.tx.send(TransferMessage {
            generation: self.generation,
            event,
        });
    }
}

/// Moves one attempt's bytes into `request.staging_path`
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch the payload and return the path of the finished file.
    ///
    /// Implementations report progress through `sink`, first with zero bytes
    /// once the expected size is known.
    async fn fetch(
        &self,
        request: &TransferRequest,
        sink: &TransferSink,
    ) -> Result<PathBuf, TransferFailure>;
}

/// Drive one attempt to its terminal event.
///
/// Cancelling `cancel` drops the in-flight fetch. The staging file is removed
/// on every path that does not hand it over.
pub async fn run_transfer(
    transport: Arc<dyn Transport>,
    request: TransferRequest,
    sink: TransferSink,
    cancel: CancellationToken,
) {
    let outcome = tokio::select! {
        _ = cancel.cancelled() => Err(TransferFailure::Cancelled),
        result = transport.fetch(&request, &sink) => result,
    };

    match outcome {
        Ok(path) => sink.send(TransferEvent::Completed(path)),
        Err(failure) => {
            let _ = fs::remove_file(&request.staging_path).await;
            if failure != TransferFailure::Cancelled {
                tracing::warn!(
                    "Transfer of {} (attempt {}) failed: {:?}",
                    request.model_id,
                    sink.generation(),
                    failure
                );
            }
            sink.send(TransferEvent::Failed(failure));
        }
    }
}

/// Plain HTTPS GET through reqwest
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    /// Bound on connecting plus waiting for the response headers
    response_timeout: Duration,
}

impl HttpTransport {
    pub fn new(config: &TransferConfig) -> Result<Self, DownloadError> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.connect_timeout)
            .timeout(config.transfer_timeout)
            .redirect(redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| DownloadError::TransportError(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            response_timeout: config.connect_timeout,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(
        &self,
        request: &TransferRequest,
        sink: &TransferSink,
    ) -> Result<PathBuf, TransferFailure> {
        tracing::info!("Downloading {} from {}", request.model_id, request.url);

        let pending = self.client.get(request.url.clone()).send();
        let mut response = tokio::time::timeout(self.response_timeout, pending)
            .await
            .map_err(|_| TransferFailure::Network("timed out waiting for response".to_string()))?
            .map_err(|e| TransferFailure::Network(e.to_string()))?;

        if response.status() != StatusCode::OK {
            return Err(TransferFailure::Status(response.status().as_u16()));
        }

        let total_size = response.content_length().unwrap_or(0);
        tracing::info!(
            "File size: {} bytes ({} MB)",
            total_size,
            total_size / 1024 / 1024
        );
        sink.progress(0, total_size);

        if let Some(parent) = request.staging_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| TransferFailure::Io(e.to_string()))?;
        }
        let mut file = File::create(&request.staging_path)
            .await
            .map_err(|e| TransferFailure::Io(e.to_string()))?;

        let mut downloaded: u64 = 0;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| TransferFailure::Network(e.to_string()))?
        {
            file.write_all(&chunk)
                .await
                .map_err(|e| TransferFailure::Io(e.to_string()))?;
            downloaded += chunk.len() as u64;
            sink.progress(downloaded, total_size);
        }
        file.flush()
            .await
            .map_err(|e| TransferFailure::Io(e.to_string()))?;
        drop(file);

        if total_size > 0 && downloaded != total_size {
            return Err(TransferFailure::Network(format!(
                "Download incomplete: got {} bytes, expected {}",
                downloaded, total_size
            )));
        }

        Ok(request.staging_path.clone())
    }
}
