//! Configuration types
//!
//! Runtime knobs for the transfer layer.

use std::time::Duration;

/// Transfer configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferConfig {
    /// User-Agent header sent with every request
    pub user_agent: String,
    /// Time allowed to establish the connection and receive the response headers
    pub connect_timeout: Duration,
    /// Time allowed for the whole transfer, body included
    pub transfer_timeout: Duration,
    /// Minimum spacing between published progress updates
    pub progress_interval: Duration,
    /// Redirect hops followed before giving up
    pub max_redirects: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("model-fetch/", env!("CARGO_PKG_VERSION")).to_string(),
            connect_timeout: Duration::from_secs(30),
            // multi-gigabyte payloads on slow links
            transfer_timeout: Duration::from_secs(3600),
            progress_interval: Duration::from_millis(500),
            max_redirects: 10,
        }
    }
}
