//! Disk space lookup
//!
//! Answers "how many bytes can still be written under this path" for the
//! download preflight.

use std::path::{Path, PathBuf};

use sysinfo::Disks;

/// Source of free-space figures
pub trait DiskSpace: Send + Sync {
    /// Bytes available on the volume holding `path`, if it can be determined.
    fn available_bytes(&self, path: &Path) -> Option<u64>;
}

/// Reads mounted volumes through `sysinfo`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemDiskSpace;

impl DiskSpace for SystemDiskSpace {
    fn available_bytes(&self, path: &Path) -> Option<u64> {
        let target = nearest_existing_path(path);
        let target = std::fs::canonicalize(&target).unwrap_or(target);
        let disks = Disks::new_with_refreshed_list();

        // Longest mount point that prefixes the target wins.
        disks
            .list()
            .iter()
            .filter(|disk| target.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .map(|disk| disk.available_space())
    }
}

/// Walk up until an existing ancestor is found.
fn nearest_existing_path(path: &Path) -> PathBuf {
    let mut candidate = path.to_path_buf();
    while !candidate.exists() {
        if !candidate.pop() {
            return PathBuf::from(".");
        }
    }
    candidate
}
