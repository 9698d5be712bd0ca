//! Error types for corral.

use corral_cgroup::CgroupError;
use rustix::io::Errno;
use thiserror::Error;

/// Main error type for corral operations.
///
/// A program that cannot be launched is deliberately *not* represented here:
/// `start` reports it as a handle in the `Failed` state, so setup errors
/// (which the operator can fix) stay distinct from a bad program path (which
/// the caller observes through status).
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("host is not ready for cgroup v2 jobs: {0}")]
    HostNotReady(#[source] CgroupError),

    #[error("cgroup provisioning for job {job_id} failed: {source}")]
    Provisioning {
        job_id: String,
        #[source]
        source: CgroupError,
    },

    #[error("cgroup attach failed; killed pid {pid}: {source}")]
    Attach {
        pid: i32,
        #[source]
        source: CgroupError,
    },

    #[error("cgroup attach failed ({attach}) and killing pid {pid} failed too: {kill}")]
    AttachCleanup {
        pid: i32,
        attach: CgroupError,
        kill: Errno,
    },

    #[error("failed to signal job process: {0}")]
    Signal(#[source] Errno),
}

/// Result type for corral operations.
pub type Result<T> = std::result::Result<T, Error>;
