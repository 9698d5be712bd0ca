//! Error types for corral-cgroup.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while preparing the host or managing a job cgroup.
#[derive(Debug, Error)]
pub enum CgroupError {
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to unmount cgroup v1 at {path}: {source}")]
    UnmountV1 { path: PathBuf, source: io::Error },

    #[error("failed to mount cgroup2 at /sys/fs/cgroup: {0}")]
    MountV2(#[source] io::Error),

    #[error("cgroup2 is not mounted at /sys/fs/cgroup after mounting")]
    NotMounted,

    #[error("{controller} controller is not available in cgroup v2")]
    ControllerMissing { controller: &'static str },

    #[error("failed to delegate +{controller} to the cgroup subtree: {source}")]
    DelegateWrite {
        controller: &'static str,
        source: io::Error,
    },

    #[error("failed to delegate cgroup controllers, still missing {missing:?}")]
    Delegation { missing: Vec<&'static str> },

    #[error("failed to create cgroup for job {job_id}: {source}")]
    CreateScope { job_id: String, source: io::Error },

    #[error("failed to write {attribute} for job {job_id}: {source}")]
    WriteAttribute {
        attribute: &'static str,
        job_id: String,
        source: io::Error,
    },

    #[error("failed to enumerate block devices: {0}")]
    Devices(#[source] io::Error),

    #[error("failed to write pid {pid} to cgroup.procs for job {job_id}: {source}")]
    AttachPid {
        pid: i32,
        job_id: String,
        source: io::Error,
    },
}
