//! Model Fetch Library
//!
//! Downloads GGUF model weights in the background, keeps track of which one
//! is installed and selected, and publishes progress for a UI to observe.

pub mod app;
pub mod download;
pub mod storage;
pub mod system;
pub mod types;
