//! System utilities
//!
//! Host facts the download manager depends on: free disk space and network reachability.

pub mod disk;
pub mod network;

pub use disk::{DiskSpace, SystemDiskSpace};
pub use network::{NetworkMonitor, PathStatus, ReachabilityProbe, TcpProbe};
