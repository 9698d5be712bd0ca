//! Job handles and lifecycle.
//!
//! A [`JobHandle`] is what `start` hands back: either a `Started` job owning
//! the child's pidfd, output buffer and cgroup scope, or an inert `Failed`
//! one for a program that never launched.
//!
//! [`JobHandle::wait_for_status`] drives the terminal transition and must run
//! once per started job (a dedicated thread is the expected shape). Its
//! internal order is load-bearing: reap the child, drain and join the stdout
//! pump, close the buffer, remove the cgroup scope, then publish the status.
//! Anyone who observes a terminal status is therefore guaranteed that every
//! output byte is already available to new readers and the scope is gone.

use std::fmt;
use std::os::fd::{AsRawFd, OwnedFd};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use rustix::process::{pidfd_send_signal, Signal};

use corral_cgroup::JobCgroup;

use crate::output::{OutputBuffer, OutputReader};
use crate::spawn;
use crate::{Error, Result};

/// Lifecycle state of a job.
///
/// `Running` is the only non-terminal state; the other three are sticky.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// The child process is running.
    Running,
    /// The child exited with status zero.
    Finished,
    /// The child exited non-zero, was killed by a signal, or could not be
    /// reaped.
    Aborted,
    /// The child could not be launched at all.
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Finished => "finished",
            JobStatus::Aborted => "aborted",
            JobStatus::Failed => "failed",
        }
    }

    #[inline]
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle to a started (or failed-to-start) job.
#[derive(Debug)]
pub enum JobHandle {
    /// The child process launched; the handle owns its resources.
    Started(StartedJob),
    /// The child never launched. Every operation is inert so callers can
    /// treat all handles uniformly.
    Failed,
}

impl JobHandle {
    pub(crate) fn started(
        pidfd: OwnedFd,
        buffer: OutputBuffer,
        pump: JoinHandle<()>,
        scope: JobCgroup,
    ) -> Self {
        JobHandle::Started(StartedJob {
            pidfd,
            status: Mutex::new(JobStatus::Running),
            buffer,
            pump: Mutex::new(Some(pump)),
            scope: Mutex::new(Some(scope)),
        })
    }

    pub(crate) fn failed() -> Self {
        JobHandle::Failed
    }

    /// Ask the job to terminate (SIGTERM). Non-blocking; the exit is still
    /// observed through [`wait_for_status`](Self::wait_for_status).
    pub fn stop(&self) -> Result<()> {
        match self {
            JobHandle::Started(job) => {
                pidfd_send_signal(&job.pidfd, Signal::TERM).map_err(Error::Signal)
            }
            JobHandle::Failed => Ok(()),
        }
    }

    /// Kill the job (SIGKILL). Non-blocking.
    pub fn force_stop(&self) -> Result<()> {
        match self {
            JobHandle::Started(job) => {
                pidfd_send_signal(&job.pidfd, Signal::KILL).map_err(Error::Signal)
            }
            JobHandle::Failed => Ok(()),
        }
    }

    /// Current status. `Running` until [`wait_for_status`](Self::wait_for_status)
    /// has observed the exit.
    pub fn status(&self) -> JobStatus {
        match self {
            JobHandle::Started(job) => *lock(&job.status),
            JobHandle::Failed => JobStatus::Failed,
        }
    }

    /// A fresh reader over the job's output, from byte zero.
    ///
    /// Readers created while the job runs stream live; readers created after
    /// the terminal transition see a finalized snapshot. For a `Failed`
    /// handle the reader is empty and already at end-of-stream.
    pub fn output(&self) -> OutputReader {
        match self {
            JobHandle::Started(job) => job.buffer.reader(),
            JobHandle::Failed => {
                let buffer = OutputBuffer::new();
                buffer.close();
                buffer.reader()
            }
        }
    }

    /// Block until the child is reaped, then close the output buffer, remove
    /// the cgroup scope and publish the terminal status.
    ///
    /// Expected to be called exactly once per started handle; a second call
    /// finds the one-shot resources already taken and only repeats the
    /// (idempotent) status bookkeeping - it cannot deadlock.
    pub fn wait_for_status(&self) {
        match self {
            JobHandle::Started(job) => job.wait(),
            JobHandle::Failed => {}
        }
    }
}

/// A job whose child process launched.
#[derive(Debug)]
pub struct StartedJob {
    pidfd: OwnedFd,
    status: Mutex<JobStatus>,
    buffer: OutputBuffer,
    pump: Mutex<Option<JoinHandle<()>>>,
    scope: Mutex<Option<JobCgroup>>,
}

impl StartedJob {
    fn wait(&self) {
        // A repeat call must not re-reap (waitid would error and demote a
        // Finished status); terminal states are sticky.
        if lock(&self.status).is_terminal() {
            return;
        }

        let exit = spawn::wait_for_exit(self.pidfd.as_raw_fd());

        // The pipe EOFs once the child (and anything it spawned) is gone;
        // joining the pump here puts every byte in the buffer before close.
        if let Some(pump) = lock(&self.pump).take() {
            if pump.join().is_err() {
                tracing::warn!("stdout pump thread panicked");
            }
        }
        self.buffer.close();

        if let Some(scope) = lock(&self.scope).take() {
            scope.remove();
        }

        let status = match exit {
            Ok((Some(0), None)) => JobStatus::Finished,
            _ => JobStatus::Aborted,
        };
        tracing::debug!(status = %status, "job reaped");
        *lock(&self.status) = status;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn status_tokens() {
        assert_eq!(JobStatus::Running.as_str(), "running");
        assert_eq!(JobStatus::Finished.as_str(), "finished");
        assert_eq!(JobStatus::Aborted.as_str(), "aborted");
        assert_eq!(JobStatus::Failed.as_str(), "failed");
        assert_eq!(format!("{}", JobStatus::Aborted), "aborted");
    }

    #[test]
    fn running_is_the_only_non_terminal_status() {
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Finished.is_terminal());
        assert!(JobStatus::Aborted.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn failed_handle_is_inert() {
        let handle = JobHandle::failed();

        assert_eq!(handle.status(), JobStatus::Failed);
        handle.stop().expect("stop is a no-op");
        handle.force_stop().expect("force_stop is a no-op");
        handle.wait_for_status();
        assert_eq!(handle.status(), JobStatus::Failed);

        let mut out = Vec::new();
        handle.output().read_to_end(&mut out).expect("empty reader");
        assert!(out.is_empty());
    }
}
