//! One-time host preparation for cgroup v2.
//!
//! Jobs need the `io`, `memory` and `cpu` controllers delegated to child
//! cgroups of `/sys/fs/cgroup`. Getting there takes four steps, each
//! idempotent:
//!
//! 1. **Evict cgroup v1.** A mounted v1 hierarchy claims its controllers and
//!    the kernel refuses to hand them to v2. Every `cgroup`-type mount found
//!    in `/proc/self/mountinfo` is unmounted; any failure aborts preparation.
//! 2. **Mount cgroup2** at [`CGROUP_ROOT`] unless mountinfo already shows it.
//! 3. **Verify controllers** in `cgroup.controllers`.
//! 4. **Delegate controllers** by writing `+<controller>` tokens to
//!    `cgroup.subtree_control`. The kernel wants one well-formed write per
//!    token, and the file is re-read afterwards to confirm the delegation
//!    actually took.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use nix::mount::{mount, umount2, MntFlags, MsFlags};

use crate::{CgroupError, Result, CGROUP_ROOT};

/// Controllers every job cgroup needs.
pub const CONTROLLERS: [&str; 3] = ["io", "memory", "cpu"];

/// Prepare the host for per-job cgroups. Idempotent.
pub fn prepare() -> Result<()> {
    evict_v1()?;
    ensure_v2_mounted()?;
    ensure_controllers()?;
    tracing::debug!("cgroup v2 host preparation complete");
    Ok(())
}

/// One line of `/proc/self/mountinfo`, reduced to what we need.
#[derive(Debug, PartialEq, Eq)]
struct MountEntry {
    mount_point: String,
    fs_type: String,
}

/// Parse mountinfo text. Lines that don't follow the documented shape
/// (`... mountpoint ... - fstype source options`) are skipped.
fn parse_mountinfo(content: &str) -> Vec<MountEntry> {
    let mut entries = Vec::new();
    for line in content.lines() {
        let Some((head, tail)) = line.split_once(" - ") else {
            continue;
        };
        let mount_point = head.split_whitespace().nth(4);
        let fs_type = tail.split_whitespace().next();
        if let (Some(mount_point), Some(fs_type)) = (mount_point, fs_type) {
            entries.push(MountEntry {
                mount_point: mount_point.to_string(),
                fs_type: fs_type.to_string(),
            });
        }
    }
    entries
}

fn read_mounts() -> Result<Vec<MountEntry>> {
    let path = PathBuf::from("/proc/self/mountinfo");
    let content = fs::read_to_string(&path).map_err(|source| CgroupError::Read { path, source })?;
    Ok(parse_mountinfo(&content))
}

fn evict_v1() -> Result<()> {
    for entry in read_mounts()? {
        if entry.fs_type != "cgroup" {
            continue;
        }
        tracing::debug!(path = %entry.mount_point, "unmounting cgroup v1");
        umount2(entry.mount_point.as_str(), MntFlags::empty()).map_err(|errno| {
            CgroupError::UnmountV1 {
                path: PathBuf::from(&entry.mount_point),
                source: io::Error::from(errno),
            }
        })?;
    }
    Ok(())
}

fn v2_mounted(mounts: &[MountEntry]) -> bool {
    mounts
        .iter()
        .any(|m| m.fs_type == "cgroup2" && m.mount_point == CGROUP_ROOT)
}

fn ensure_v2_mounted() -> Result<()> {
    if v2_mounted(&read_mounts()?) {
        return Ok(());
    }

    tracing::info!(path = CGROUP_ROOT, "mounting cgroup2");
    mount(
        Some("cgroup2"),
        CGROUP_ROOT,
        Some("cgroup2"),
        MsFlags::empty(),
        None::<&str>,
    )
    .map_err(|errno| CgroupError::MountV2(io::Error::from(errno)))?;

    if v2_mounted(&read_mounts()?) {
        Ok(())
    } else {
        Err(CgroupError::NotMounted)
    }
}

/// Exact-token membership test; `contains` would match "cpu" in "cpuset".
fn has_controller(content: &str, controller: &str) -> bool {
    content.split_whitespace().any(|token| token == controller)
}

fn missing_controllers(content: &str) -> Vec<&'static str> {
    CONTROLLERS
        .iter()
        .copied()
        .filter(|controller| !has_controller(content, controller))
        .collect()
}

fn read_control_file(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|source| CgroupError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn ensure_controllers() -> Result<()> {
    let root = Path::new(CGROUP_ROOT);

    let available = read_control_file(&root.join("cgroup.controllers"))?;
    for controller in CONTROLLERS {
        if !has_controller(&available, controller) {
            return Err(CgroupError::ControllerMissing { controller });
        }
    }

    let subtree_control = root.join("cgroup.subtree_control");
    for controller in missing_controllers(&read_control_file(&subtree_control)?) {
        tracing::debug!(controller, "delegating controller to subtree");
        fs::write(&subtree_control, format!("+{controller}\n"))
            .map_err(|source| CgroupError::DelegateWrite { controller, source })?;
    }

    let missing = missing_controllers(&read_control_file(&subtree_control)?);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(CgroupError::Delegation { missing })
    }
}
