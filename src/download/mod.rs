//! Background model downloads
//!
//! [`DownloadManager`] is the handle the rest of the application talks to.
//! Everything behind it runs on a single controller task.

pub mod error;
pub mod manager;
pub mod session;
pub mod throttle;
pub mod transport;

pub use error::DownloadError;
pub use manager::{DownloadManager, ManagerDeps};
pub use session::{Phase, SessionSnapshot};
pub use throttle::{progress_fraction, ProgressSample, ProgressThrottler};
pub use transport::{
    HttpTransport, TransferEvent, TransferFailure, TransferRequest, TransferSink, Transport,
};
