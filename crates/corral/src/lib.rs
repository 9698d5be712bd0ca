//! corral: run external commands under per-job resource limits and namespace
//! isolation, with a live, multi-subscriber view of their output.
//!
//! Every job gets:
//!
//! - **A cgroup v2 scope** - `cpu.max`, `memory.max`, `memory.high` and
//!   per-device `io.max` limits under `/sys/fs/cgroup/<job_id>`
//! - **Fresh namespaces** - UTS, PID, user, network and mount, with UID/GID 0
//!   inside mapped to the caller's ids outside
//! - **An output buffer** - the child's stdout is captured into an append-only
//!   buffer; any number of readers can stream it, each from byte zero, while
//!   the job runs or after it finished
//!
//! ## Quick Start
//!
//! ```ignore
//! use corral::{Config, Executor, JobStatus};
//! use std::io::Read;
//!
//! let executor = Executor::from_config(Config {
//!     cpu_percent: 20,
//!     memory_bytes: 256 * 1024 * 1024,
//!     write_bytes_per_sec: 10 * 1024 * 1024,
//!     read_bytes_per_sec: 10 * 1024 * 1024,
//! })?;
//!
//! let job = executor.start("job-1", "echo", &["hello"])?;
//! let mut reader = job.output();
//!
//! job.wait_for_status();
//! assert_eq!(job.status(), JobStatus::Finished);
//!
//! let mut out = Vec::new();
//! reader.read_to_end(&mut out)?;
//! assert_eq!(out, b"hello\n");
//! ```
//!
//! `wait_for_status` blocks until the child is reaped; dedicate a thread to
//! it per job. A job whose program cannot be launched at all is not an error:
//! `start` returns an inert handle whose status is [`JobStatus::Failed`].
//!
//! ## Requirements
//!
//! - Linux with cgroup v2 (any mounted v1 hierarchy is unmounted during
//!   executor construction)
//! - root (cgroup writes and namespace setup fail without it)

mod config;
mod error;
mod executor;
mod job;
mod output;
mod spawn;

pub use config::Config;
pub use error::{Error, Result};
pub use executor::Executor;
pub use job::{JobHandle, JobStatus};
pub use output::{OutputBuffer, OutputReader};

// Re-export from corral-cgroup for convenience
pub use corral_cgroup::CgroupError;
