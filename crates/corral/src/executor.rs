//! The job runtime.
//!
//! An [`Executor`] is built once from a validated [`Config`]: construction
//! prepares the host's cgroup v2 hierarchy and pre-formats the limit set.
//! After that it is immutable, so one executor can start jobs from any number
//! of threads as long as their job ids are distinct.
//!
//! ## Start sequence
//!
//! 1. Create `/sys/fs/cgroup/<job_id>` and write the limits - failures here
//!    are `start` errors, nothing was spawned yet.
//! 2. Clone the child into fresh UTS/PID/user/net/mount namespaces, held at
//!    an exec gate; write its id maps.
//! 3. Attach the child's pid to the job cgroup, *then* open the gate, so the
//!    program only ever runs inside its limits.
//! 4. Wait for the exec verdict. A program that cannot exec is not a `start`
//!    error: the scope is removed and an inert `Failed` handle is returned.
//! 5. Wire the stdout pipe into a fresh [`OutputBuffer`] via a pump thread
//!    and hand back a `Started` handle in the `Running` state.

use std::fs::File;
use std::io::Read;
use std::thread;

use corral_cgroup::{host, JobCgroup, Limits};

use crate::config::Config;
use crate::job::JobHandle;
use crate::output::OutputBuffer;
use crate::spawn;
use crate::{Error, Result};

/// Runs jobs under per-job cgroup limits and namespace isolation.
#[derive(Debug)]
pub struct Executor {
    limits: Limits,
}

impl Executor {
    /// Validate the config and prepare the host.
    ///
    /// Host preparation unmounts any cgroup v1 hierarchies, mounts cgroup v2
    /// at `/sys/fs/cgroup` if needed, and delegates the `io`, `memory` and
    /// `cpu` controllers. The config is checked before the host is touched.
    pub fn from_config(config: Config) -> Result<Self> {
        config.validate()?;
        host::prepare().map_err(Error::HostNotReady)?;
        Ok(Self {
            limits: config.limits(),
        })
    }

    /// Start `program` with `args` as job `job_id`.
    ///
    /// `job_id` names the job's cgroup directory verbatim; the caller is
    /// responsible for uniqueness and filesystem-safety. Errors cover setup
    /// failures (provisioning, attach) only - a program that cannot be
    /// launched yields `Ok` with a handle whose status is `Failed`.
    pub fn start(&self, job_id: &str, program: &str, args: &[&str]) -> Result<JobHandle> {
        let scope =
            JobCgroup::create(job_id, &self.limits).map_err(|source| Error::Provisioning {
                job_id: job_id.to_string(),
                source,
            })?;

        let pending = match spawn::launch(program, args) {
            Ok(pending) => pending,
            Err(err) => {
                tracing::warn!(job_id, program, error = %err, "job failed to launch");
                scope.remove();
                return Ok(JobHandle::failed());
            }
        };

        let pid = pending.pid();
        if let Err(source) = scope.attach(pid) {
            let err = match pending.abort() {
                Ok(()) => Error::Attach { pid, source },
                Err(kill) => Error::AttachCleanup {
                    pid,
                    attach: source,
                    kill,
                },
            };
            scope.remove();
            return Err(err);
        }

        let child = match pending.release() {
            Ok(child) => child,
            Err(err) => {
                tracing::warn!(job_id, program, error = %err, "job failed to launch");
                scope.remove();
                return Ok(JobHandle::failed());
            }
        };
        tracing::info!(job_id, program, pid = child.pid, "job started");

        let buffer = OutputBuffer::new();
        let pump = {
            let buffer = buffer.clone();
            let stdout = File::from(child.stdout);
            thread::spawn(move || pump_stdout(stdout, &buffer))
        };

        Ok(JobHandle::started(child.pidfd, buffer, pump, scope))
    }
}

/// Drain the child's stdout pipe into the buffer until EOF.
fn pump_stdout(mut stdout: File, buffer: &OutputBuffer) {
    let mut buf = [0u8; 4096];
    loop {
        match stdout.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                buffer.append(&buf[..n]);
            }
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => {
                tracing::debug!(error = %err, "stdout pump stopped");
                break;
            }
        }
    }
}
