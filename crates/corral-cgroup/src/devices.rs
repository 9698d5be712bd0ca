//! Block device discovery.
//!
//! `io.max` limits are scoped per device, so every whole block device on the
//! host is enumerated from the sysfs block tree: each `/sys/block/<dev>/dev`
//! file holds the device's `MAJ:MIN` pair.

use std::fs;

use crate::{CgroupError, Result};

const SYS_BLOCK: &str = "/sys/block";

/// `MAJ:MIN` identifiers of every whole block device, sorted for stable
/// write order.
pub fn block_devices() -> Result<Vec<String>> {
    let entries = fs::read_dir(SYS_BLOCK).map_err(CgroupError::Devices)?;

    let mut devices = Vec::new();
    for entry in entries {
        let entry = entry.map_err(CgroupError::Devices)?;
        let id = fs::read_to_string(entry.path().join("dev")).map_err(CgroupError::Devices)?;
        devices.push(id.trim().to_string());
    }
    devices.sort();

    tracing::debug!(count = devices.len(), "enumerated block devices");
    Ok(devices)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_maj_min(id: &str) -> bool {
        match id.split_once(':') {
            Some((maj, min)) => maj.parse::<u32>().is_ok() && min.parse::<u32>().is_ok(),
            None => false,
        }
    }

    #[test]
    fn enumerates_maj_min_pairs() {
        // /sys/block is world-readable on any Linux host.
        let devices = block_devices().expect("sysfs block tree should be readable");
        for device in &devices {
            assert!(is_maj_min(device), "not a MAJ:MIN pair: {device}");
        }
    }
}
