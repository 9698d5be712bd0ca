//! Namespaced child launch plumbing.
//!
//! Launch flow, split across the clone boundary:
//!
//! 1. Parent allocates the stdout pipe, the exec-status pipe and an eventfd
//!    gate, all `CLOEXEC`, plus the argv C strings (nothing allocates in the
//!    child).
//! 2. `clone(2)` with `CLONE_NEWUTS | CLONE_NEWPID | CLONE_NEWUSER |
//!    CLONE_NEWNET | CLONE_NEWNS` and `SIGCHLD` as the exit signal. The job
//!    must be *created* with the flags - `unshare(2)` with `CLONE_NEWPID`
//!    only moves later children into the new namespace, and the job itself
//!    has to be pid 1 in its namespace. Without `CLONE_VM` the child gets a
//!    copy-on-write address space, so everything set up before the clone
//!    stays valid in it.
//! 3. Parent opens a pidfd and writes `/proc/<pid>/setgroups` (deny), then
//!    `uid_map`, then `gid_map` - mapping id 0 inside the namespace to the
//!    parent's real ids, in the order the kernel requires.
//! 4. Child dup2s the pipe onto stdout (stdin and stderr stay inherited) and
//!    blocks reading the gate.
//! 5. The caller places the pid wherever it wants it (its cgroup), then
//!    [`PendingChild::release`] opens the gate and the child `execvp`s.
//! 6. Exec failure travels back as a raw errno over the status pipe;
//!    `CLOEXEC` closing the pipe is the success signal.
//!
//! Between clone and exec the child only makes async-signal-safe syscalls.

use std::ffi::CString;
use std::fs;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use nix::sched::{clone, CloneFlags};
use rustix::io::Errno;
use rustix::process::{pidfd_open, pidfd_send_signal, Pid, PidfdFlags, Signal};
use thiserror::Error;

/// Error during child launch. The executor surfaces all of these as a handle
/// in the `Failed` state, never as a `start` error.
#[derive(Debug, Error)]
pub(crate) enum SpawnError {
    #[error("program or argument contains NUL")]
    NulArgument,

    #[error("pipe: {0}")]
    Pipe(io::Error),

    #[error("eventfd: {0}")]
    Eventfd(io::Error),

    #[error("clone: {0}")]
    Clone(nix::errno::Errno),

    #[error("pidfd: {0}")]
    Pidfd(Errno),

    #[error("id map setup: {0}")]
    IdMap(io::Error),

    #[error("exec gate: {0}")]
    Gate(io::Error),

    #[error("exec status: {0}")]
    Status(io::Error),

    #[error("exec: {0}")]
    Exec(Errno),
}

/// The child only dup2s, blocks on the gate and execs; a small scratch stack
/// is plenty.
const CHILD_STACK_SIZE: usize = 256 * 1024;

/// Unidirectional pipe, both ends `CLOEXEC`.
struct Pipe {
    read: OwnedFd,
    write: OwnedFd,
}

impl Pipe {
    fn new() -> io::Result<Self> {
        let mut fds = [0i32; 2];
        // SAFETY: pipe2 writes into a valid two-element array.
        if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) } != 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: on success both fds are valid and unowned.
        Ok(unsafe {
            Self {
                read: OwnedFd::from_raw_fd(fds[0]),
                write: OwnedFd::from_raw_fd(fds[1]),
            }
        })
    }
}

fn eventfd_cloexec() -> io::Result<OwnedFd> {
    // SAFETY: eventfd returns a fresh fd or -1.
    let fd = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: fd is valid and unowned.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// A cloned child that has not been released to exec yet. The child sits
/// blocked on the gate until [`release`](Self::release) or
/// [`abort`](Self::abort).
pub(crate) struct PendingChild {
    pid: libc::pid_t,
    pidfd: OwnedFd,
    stdout: OwnedFd,
    gate: OwnedFd,
    status: OwnedFd,
}

/// A released child that exec'd successfully.
pub(crate) struct Child {
    pub pid: libc::pid_t,
    pub pidfd: OwnedFd,
    pub stdout: OwnedFd,
}

/// Clone the child with fresh namespaces and hold it at the exec gate.
pub(crate) fn launch(program: &str, args: &[&str]) -> Result<PendingChild, SpawnError> {
    let program_c = CString::new(program).map_err(|_| SpawnError::NulArgument)?;
    let mut argv = Vec::with_capacity(args.len() + 1);
    argv.push(program_c.clone());
    for arg in args {
        argv.push(CString::new(*arg).map_err(|_| SpawnError::NulArgument)?);
    }
    let argv_ptrs: Vec<*const libc::c_char> = argv
        .iter()
        .map(|s| s.as_ptr())
        .chain(std::iter::once(std::ptr::null()))
        .collect();

    let stdout = Pipe::new().map_err(SpawnError::Pipe)?;
    let status = Pipe::new().map_err(SpawnError::Pipe)?;
    let gate = eventfd_cloexec().map_err(SpawnError::Eventfd)?;

    let flags = CloneFlags::CLONE_NEWUTS
        | CloneFlags::CLONE_NEWPID
        | CloneFlags::CLONE_NEWUSER
        | CloneFlags::CLONE_NEWNET
        | CloneFlags::CLONE_NEWNS;

    let stdout_write = stdout.write.as_raw_fd();
    let gate_fd = gate.as_raw_fd();
    let status_write = status.write.as_raw_fd();
    let program_ptr = program_c.as_ptr();
    let argv_ptr = argv_ptrs.as_ptr();

    let mut stack = vec![0u8; CHILD_STACK_SIZE];
    // SAFETY: without CLONE_VM the child runs on a copy-on-write address
    // space, so the captured fds and argv pointers stay valid; the callback
    // only makes async-signal-safe syscalls and never returns after a
    // successful exec.
    let pid = unsafe {
        clone(
            Box::new(move || -> isize {
                child_after_clone(stdout_write, gate_fd, status_write, program_ptr, argv_ptr)
            }),
            &mut stack,
            flags,
            Some(libc::SIGCHLD),
        )
    }
    .map_err(SpawnError::Clone)?
    .as_raw();

    // Parent half. The child's copies of these ends die at its exec (CLOEXEC)
    // or exit; ours must go now so pipe EOFs can ever arrive.
    let Pipe {
        read: stdout_read,
        write: stdout_write,
    } = stdout;
    let Pipe {
        read: status_read,
        write: status_write,
    } = status;
    drop(stdout_write);
    drop(status_write);

    // SAFETY: pid is the positive pid of our direct child.
    let child_pid = unsafe { Pid::from_raw_unchecked(pid) };
    let pidfd = match pidfd_open(child_pid, PidfdFlags::empty()) {
        Ok(fd) => fd,
        Err(errno) => {
            // SAFETY: pid is our direct, unreaped child.
            unsafe {
                libc::kill(pid, libc::SIGKILL);
                let mut wstatus = 0;
                libc::waitpid(pid, &mut wstatus, 0);
            }
            return Err(SpawnError::Pidfd(errno));
        }
    };

    if let Err(err) = setup_id_maps(pid) {
        kill_and_reap(&pidfd);
        return Err(SpawnError::IdMap(err));
    }

    Ok(PendingChild {
        pid,
        pidfd,
        stdout: stdout_read,
        gate,
        status: status_read,
    })
}

impl PendingChild {
    #[inline]
    pub(crate) fn pid(&self) -> i32 {
        self.pid
    }

    /// Open the exec gate and wait for the verdict from the status pipe.
    pub(crate) fn release(self) -> Result<Child, SpawnError> {
        let PendingChild {
            pid,
            pidfd,
            stdout,
            gate,
            status,
        } = self;

        let token = 1u64;
        // SAFETY: writing 8 bytes from a stack value to an owned eventfd.
        let n = unsafe { libc::write(gate.as_raw_fd(), (&token as *const u64).cast(), 8) };
        if n != 8 {
            let err = SpawnError::Gate(io::Error::last_os_error());
            kill_and_reap(&pidfd);
            return Err(err);
        }
        drop(gate);

        match read_exec_errno(&status) {
            Ok(None) => Ok(Child { pid, pidfd, stdout }),
            Ok(Some(errno)) => {
                // The child already _exited; reap it.
                let _ = wait_for_exit(pidfd.as_raw_fd());
                Err(SpawnError::Exec(errno))
            }
            Err(err) => {
                kill_and_reap(&pidfd);
                Err(SpawnError::Status(err))
            }
        }
    }

    /// Kill the never-released child. Returns the signal error if the kill
    /// could not be delivered (in which case the child is not reaped either).
    pub(crate) fn abort(self) -> Result<(), Errno> {
        pidfd_send_signal(&self.pidfd, Signal::KILL)?;
        let _ = wait_for_exit(self.pidfd.as_raw_fd());
        Ok(())
    }
}

fn kill_and_reap(pidfd: &OwnedFd) {
    if pidfd_send_signal(pidfd, Signal::KILL).is_ok() {
        let _ = wait_for_exit(pidfd.as_raw_fd());
    }
}

/// Map UID/GID 0 inside the child's user namespace to this process's real
/// ids, size 1. setgroups must be denied before gid_map is written (kernel
/// requirement).
fn setup_id_maps(pid: libc::pid_t) -> io::Result<()> {
    // SAFETY: getuid/getgid are always safe to call.
    let uid = unsafe { libc::getuid() };
    let gid = unsafe { libc::getgid() };

    fs::write(format!("/proc/{pid}/setgroups"), "deny\n")?;
    fs::write(format!("/proc/{pid}/uid_map"), format!("0 {uid} 1\n"))?;
    fs::write(format!("/proc/{pid}/gid_map"), format!("0 {gid} 1\n"))
}

/// The child-side path between clone and exec.
///
/// Runs on the cloned copy of the parent's stack; everything it touches was
/// allocated before the clone. Exit codes: 125 gate failure, 127 exec
/// failure (after reporting errno through the status pipe).
fn child_after_clone(
    stdout_write: RawFd,
    gate: RawFd,
    status_write: RawFd,
    program: *const libc::c_char,
    argv: *const *const libc::c_char,
) -> ! {
    // SAFETY: raw fds are live for the whole child path; dup2 clears CLOEXEC
    // on the new stdout, stdin and stderr stay inherited from the parent.
    unsafe {
        if libc::dup2(stdout_write, libc::STDOUT_FILENO) < 0 {
            report_exec_errno(status_write);
        }

        // Block until the parent wrote the id maps and attached us to the
        // job cgroup.
        let mut token = 0u64;
        loop {
            let n = libc::read(gate, (&mut token as *mut u64).cast(), 8);
            if n == 8 {
                break;
            }
            if n < 0 && *libc::__errno_location() == libc::EINTR {
                continue;
            }
            libc::_exit(125);
        }

        libc::execvp(program, argv);
        // execvp only returns on failure.
        report_exec_errno(status_write);
    }
}

/// Send errno to the parent over the status pipe and exit.
unsafe fn report_exec_errno(status_write: RawFd) -> ! {
    let errno = *libc::__errno_location();
    let bytes = errno.to_ne_bytes();
    libc::write(status_write, bytes.as_ptr().cast(), 4);
    libc::_exit(127);
}

/// Wait for the exec verdict: `None` means the CLOEXEC pipe closed on a
/// successful exec, `Some(errno)` is the child's report.
fn read_exec_errno(status: &OwnedFd) -> io::Result<Option<Errno>> {
    let mut bytes = [0u8; 4];
    let mut filled = 0;
    while filled < 4 {
        // SAFETY: reading into the unfilled tail of a stack buffer.
        let n = unsafe {
            libc::read(
                status.as_raw_fd(),
                bytes[filled..].as_mut_ptr().cast(),
                4 - filled,
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        if n == 0 {
            break;
        }
        filled += n as usize;
    }
    match filled {
        0 => Ok(None),
        4 => Ok(Some(Errno::from_raw_os_error(i32::from_ne_bytes(bytes)))),
        _ => Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "short exec status report",
        )),
    }
}

/// Reap the child through its pidfd: `(exit code, killing signal)`.
pub(crate) fn wait_for_exit(pidfd: RawFd) -> io::Result<(Option<i32>, Option<i32>)> {
    // SAFETY: siginfo_t is valid zero-initialized; waitid fills it in.
    let mut siginfo: libc::siginfo_t = unsafe { std::mem::zeroed() };
    let ret = unsafe {
        libc::waitid(
            libc::P_PIDFD,
            pidfd as libc::id_t,
            &mut siginfo,
            libc::WEXITED,
        )
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }

    let code = siginfo.si_code;
    // SAFETY: si_status is valid for the CLD_* codes waitid reports.
    let status = unsafe { siginfo.si_status() };

    match code {
        libc::CLD_EXITED => Ok((Some(status), None)),
        libc::CLD_KILLED | libc::CLD_DUMPED => Ok((None, Some(status))),
        _ => Ok((None, None)),
    }
}
