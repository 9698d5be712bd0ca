//! corral-cgroup: cgroup v2 plumbing for the corral job runtime.
//!
//! This crate owns every interaction with the kernel's resource-control
//! hierarchy:
//!
//! - **Host preparation** - unmount any leftover cgroup v1 hierarchies, mount
//!   cgroup v2 at `/sys/fs/cgroup`, and delegate the `io`, `memory` and `cpu`
//!   controllers to the subtree ([`host::prepare`])
//! - **Limit formatting** - attribute values (`cpu.max`, `memory.max`,
//!   `memory.high`, `io.max`) pre-formatted once per configuration
//!   ([`Limits`])
//! - **Per-job scopes** - one directory per job under `/sys/fs/cgroup`,
//!   populated with the limit set, a process attached to it, and removed when
//!   the job is reaped ([`JobCgroup`])
//!
//! ## Requirements
//!
//! - Linux with cgroup v2 enabled in the kernel
//! - root (every operation writes under `/sys/fs/cgroup`)

pub mod devices;
pub mod host;
pub mod limits;
pub mod scope;

mod error;

pub use error::CgroupError;
pub use limits::Limits;
pub use scope::JobCgroup;

/// Crate-level result type
pub type Result<T> = std::result::Result<T, CgroupError>;

/// Canonical cgroup v2 mount point.
pub const CGROUP_ROOT: &str = "/sys/fs/cgroup";
