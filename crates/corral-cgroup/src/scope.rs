//! Per-job cgroup directories.
//!
//! A [`JobCgroup`] is one directory under `/sys/fs/cgroup`, named after the
//! caller's job id. Its lifecycle brackets the job's:
//!
//! 1. [`JobCgroup::create`] - directory plus the full limit set; if any
//!    attribute write fails the directory is removed before the error is
//!    returned, so a failed start never leaks a scope.
//! 2. [`JobCgroup::attach`] - move the freshly cloned child into the scope.
//! 3. [`JobCgroup::remove`] - one-shot teardown after the job is reaped.
//!    The kernel refuses to rmdir a cgroup that still has tasks; that failure
//!    is logged and swallowed, leaving the directory for operator cleanup.

use std::fs;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use crate::{devices, CgroupError, Limits, Result, CGROUP_ROOT};

/// A per-job cgroup v2 directory.
#[derive(Debug)]
pub struct JobCgroup {
    job_id: String,
    path: PathBuf,
}

impl JobCgroup {
    /// Create the scope and apply the limit set.
    ///
    /// The job id is used verbatim as the directory name; a stale directory
    /// from an earlier job with the same id surfaces as `EEXIST` here.
    pub fn create(job_id: &str, limits: &Limits) -> Result<Self> {
        let path = Path::new(CGROUP_ROOT).join(job_id);
        tracing::debug!(job_id, path = %path.display(), "creating job cgroup");

        fs::DirBuilder::new()
            .mode(0o700)
            .create(&path)
            .map_err(|source| CgroupError::CreateScope {
                job_id: job_id.to_string(),
                source,
            })?;

        let scope = Self {
            job_id: job_id.to_string(),
            path,
        };
        if let Err(err) = scope.apply(limits) {
            let _ = fs::remove_dir(&scope.path);
            return Err(err);
        }
        Ok(scope)
    }

    fn apply(&self, limits: &Limits) -> Result<()> {
        self.write_attribute("cpu.max", limits.cpu_max())?;
        self.write_attribute("memory.max", limits.memory_max())?;
        self.write_attribute("memory.high", limits.memory_high())?;
        for device in devices::block_devices()? {
            self.write_attribute("io.max", &limits.io_max_line(&device))?;
        }
        Ok(())
    }

    fn write_attribute(&self, attribute: &'static str, value: &str) -> Result<()> {
        fs::write(self.path.join(attribute), value).map_err(|source| {
            CgroupError::WriteAttribute {
                attribute,
                job_id: self.job_id.clone(),
                source,
            }
        })
    }

    /// Move a process into this cgroup.
    pub fn attach(&self, pid: i32) -> Result<()> {
        tracing::debug!(job_id = %self.job_id, pid, "attaching pid to job cgroup");
        fs::write(self.path.join("cgroup.procs"), pid.to_string()).map_err(|source| {
            CgroupError::AttachPid {
                pid,
                job_id: self.job_id.clone(),
                source,
            }
        })
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// One-shot teardown. rmdir failure means tasks still linger in the
    /// scope; the directory is left behind and the failure logged.
    pub fn remove(self) {
        tracing::debug!(job_id = %self.job_id, "removing job cgroup");
        if let Err(err) = fs::remove_dir(&self.path) {
            tracing::debug!(job_id = %self.job_id, error = %err, "leaving job cgroup behind");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Needs root and a prepared cgroup v2 host; run with `--ignored`.
    #[test]
    #[ignore]
    fn create_applies_limits_and_removes() {
        crate::host::prepare().expect("host preparation");

        let limits = Limits::new(10, 100_000, 1000, 1000);
        let scope = JobCgroup::create("corral-scope-test", &limits).expect("create scope");

        let cpu_max = fs::read_to_string(scope.path().join("cpu.max")).expect("read cpu.max");
        assert_eq!(cpu_max.trim(), "1000000 100000");
        let memory_high =
            fs::read_to_string(scope.path().join("memory.high")).expect("read memory.high");
        assert_eq!(memory_high.trim(), "75000");

        let path = scope.path().to_path_buf();
        scope.remove();
        assert!(!path.exists());
    }

    /// A stale directory with the same job id must fail creation.
    #[test]
    #[ignore]
    fn create_fails_on_existing_scope() {
        crate::host::prepare().expect("host preparation");

        let limits = Limits::new(10, 100_000, 1000, 1000);
        let first = JobCgroup::create("corral-scope-dup", &limits).expect("create scope");
        let second = JobCgroup::create("corral-scope-dup", &limits);
        assert!(matches!(
            second,
            Err(CgroupError::CreateScope { .. })
        ));
        first.remove();
    }
}
