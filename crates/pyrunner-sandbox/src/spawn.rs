//! Resource-limited spawner.
//!
//! Launches the interpreter in a fresh process group with kernel caps
//! installed between `fork` and `exec`:
//!
//! 1. `setpgid(0, 0)` — new process group, so the supervisor can signal the
//!    child and everything it spawns as one unit
//! 2. stdio wiring — stdin from `/dev/null`, stdout/stderr into pipes
//! 3. rlimits — address space, CPU time, descriptors, core dumps
//! 4. `execve` with a sanitized environment
//!
//! Setup failures are reported over a close-on-exec status pipe: the parent
//! reads it after fork; EOF means exec happened, any bytes are a failure
//! report and the spawn is surfaced as an error. A child that could not be
//! fully limited never runs user code.
//!
//! All pipe and file descriptors this process creates are close-on-exec, so
//! a child spawned for one request can never see another request's pipes or
//! scratch files.

use std::ffi::{CStr, CString};
use std::io::{self, Read as _};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::path::Path;
use std::time::Instant;

use rustix::io::Errno;
use rustix::process::{pidfd_open, Pid, PidfdFlags};
use thiserror::Error;

use crate::plan::SpawnPlan;
use crate::preflight;
use crate::rlimits::apply_rlimits;
use crate::scratch::Pipe;

/// Error during spawn. The child is already dead (or never lived) when any
/// of these is returned.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("host preflight: {0}")]
    Preflight(String),

    #[error("pipe: {0}")]
    Pipe(#[source] io::Error),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("fork: {0}")]
    Fork(Errno),

    #[error("pidfd: {0}")]
    Pidfd(Errno),

    #[error("child setup: {0}")]
    ChildSetup(String),
}

/// Handle to a spawned interpreter.
///
/// Dropping an unreaped handle kills the whole process group and reaps the
/// child, so a panicking or cancelled supervisor never leaks processes.
#[derive(Debug)]
pub struct ChildHandle {
    pid: libc::pid_t,
    pgid: libc::pid_t,
    pidfd: OwnedFd,
    stdout: OwnedFd,
    stderr: OwnedFd,
    started: Instant,
    reaped: bool,
}

impl ChildHandle {
    #[inline]
    pub fn pid(&self) -> libc::pid_t {
        self.pid
    }

    #[inline]
    pub fn started(&self) -> Instant {
        self.started
    }

    #[inline]
    pub fn pidfd_fd(&self) -> RawFd {
        self.pidfd.as_raw_fd()
    }

    #[inline]
    pub fn stdout_fd(&self) -> RawFd {
        self.stdout.as_raw_fd()
    }

    #[inline]
    pub fn stderr_fd(&self) -> RawFd {
        self.stderr.as_raw_fd()
    }

    /// Ask the process group to terminate (SIGTERM).
    pub fn terminate_group(&self) {
        // ESRCH just means the group is already gone.
        unsafe { libc::killpg(self.pgid, libc::SIGTERM) };
    }

    /// Kill the process group outright (SIGKILL).
    pub fn kill_group(&self) {
        unsafe { libc::killpg(self.pgid, libc::SIGKILL) };
    }

    pub(crate) fn mark_reaped(&mut self) {
        self.reaped = true;
    }
}

impl Drop for ChildHandle {
    fn drop(&mut self) {
        if self.reaped {
            return;
        }
        self.kill_group();
        // The child is ours to reap; anything deeper in the group is
        // reparented to init once killed.
        let mut status: libc::c_int = 0;
        loop {
            let ret = unsafe { libc::waitpid(self.pid, &mut status, 0) };
            if ret >= 0 || io::Error::last_os_error().kind() != io::ErrorKind::Interrupted {
                break;
            }
        }
    }
}

/// Sanitized child environment; `-I` additionally makes the interpreter
/// ignore any PYTHON* variables that might leak through.
const CHILD_ENV: &[&CStr] = &[
    c"PATH=/usr/local/bin:/usr/bin:/bin",
    c"HOME=/tmp",
    c"USER=sandbox",
    c"LANG=C.UTF-8",
    c"LC_ALL=C.UTF-8",
];

pub(crate) fn last_errno() -> Errno {
    Errno::from_raw_os_error(io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO))
}

fn path_cstring(path: &Path) -> Result<CString, SpawnError> {
    use std::os::unix::ffi::OsStrExt;

    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| SpawnError::InvalidPath(path.to_string_lossy().into_owned()))
}

/// Spawn the interpreter described by `plan`.
pub fn spawn(plan: &SpawnPlan) -> Result<ChildHandle, SpawnError> {
    if let Err(e) = preflight::check() {
        return Err(SpawnError::Preflight(e.to_string()));
    }

    let stdout = Pipe::new().map_err(SpawnError::Pipe)?;
    let stderr = Pipe::new().map_err(SpawnError::Pipe)?;
    let status = Pipe::new().map_err(SpawnError::Pipe)?;

    // Everything the child needs is materialized before fork; the child
    // must not allocate (another thread may hold the allocator lock).
    let interp = path_cstring(&plan.interpreter)?;
    let code = path_cstring(&plan.code_file)?;
    let argv: [*const libc::c_char; 5] = [
        interp.as_ptr(),
        c"-I".as_ptr(),
        c"-u".as_ptr(),
        code.as_ptr(),
        std::ptr::null(),
    ];

    let envp: Vec<*const libc::c_char> = CHILD_ENV
        .iter()
        .map(|s| s.as_ptr())
        .chain(std::iter::once(std::ptr::null()))
        .collect();

    // SAFETY: the child branch only calls async-signal-safe functions before
    // exec, and exits without returning into Rust cleanup code.
    let child_pid = unsafe { libc::fork() };
    if child_pid < 0 {
        return Err(SpawnError::Fork(last_errno()));
    }

    if child_pid == 0 {
        child_setup_and_exec(
            &stdout,
            &stderr,
            status.write_fd(),
            plan,
            interp.as_ptr(),
            argv.as_ptr(),
            envp.as_ptr(),
        );
    }

    let started = Instant::now();

    // Mirror the child's setpgid to close the race between fork and exec;
    // EACCES after a successful exec is expected and harmless.
    unsafe { libc::setpgid(child_pid, child_pid) };

    // SAFETY: child_pid is a live child of this process.
    let pid = unsafe { Pid::from_raw_unchecked(child_pid) };
    let pidfd = match pidfd_open(pid, PidfdFlags::empty()) {
        Ok(fd) => fd,
        Err(e) => {
            unsafe {
                libc::killpg(child_pid, libc::SIGKILL);
                libc::waitpid(child_pid, std::ptr::null_mut(), 0);
            }
            return Err(SpawnError::Pidfd(e));
        }
    };

    let (out_read, out_write) = stdout.into_parts();
    let (err_read, err_write) = stderr.into_parts();
    let (status_read, status_write) = status.into_parts();
    drop(out_write);
    drop(err_write);
    drop(status_write);

    // EOF: exec succeeded and the close-on-exec write end vanished.
    // Data: the child reported a setup failure and exited.
    let mut report = Vec::new();
    let mut status_file = std::fs::File::from(status_read);
    if let Err(e) = status_file.read_to_end(&mut report) {
        unsafe {
            libc::killpg(child_pid, libc::SIGKILL);
            libc::waitpid(child_pid, std::ptr::null_mut(), 0);
        }
        return Err(SpawnError::Pipe(e));
    }
    if !report.is_empty() {
        let mut wstatus: libc::c_int = 0;
        unsafe { libc::waitpid(child_pid, &mut wstatus, 0) };
        return Err(SpawnError::ChildSetup(
            String::from_utf8_lossy(&report).into_owned(),
        ));
    }

    Ok(ChildHandle {
        pid: child_pid,
        pgid: child_pid,
        pidfd,
        stdout: out_read,
        stderr: err_read,
        started,
        reaped: false,
    })
}

/// Child-side flow after fork. Never returns: either execs or `_exit`s after
/// reporting the failed stage over the status pipe.
fn child_setup_and_exec(
    stdout: &Pipe,
    stderr: &Pipe,
    status_fd: RawFd,
    plan: &SpawnPlan,
    interp: *const libc::c_char,
    argv: *const *const libc::c_char,
    envp: *const *const libc::c_char,
) -> ! {
    unsafe {
        if libc::setpgid(0, 0) != 0 {
            report_and_exit(status_fd, b"setpgid", *libc::__errno_location());
        }

        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_RDONLY);
        if devnull < 0 || libc::dup2(devnull, 0) < 0 {
            report_and_exit(status_fd, b"stdin", *libc::__errno_location());
        }
        if libc::dup2(stdout.write_fd(), 1) < 0 || libc::dup2(stderr.write_fd(), 2) < 0 {
            report_and_exit(status_fd, b"dup2", *libc::__errno_location());
        }

        if let Err(e) = apply_rlimits(plan) {
            report_and_exit(status_fd, b"rlimit", e.raw_os_error());
        }

        libc::execve(interp, argv, envp);
        report_and_exit(status_fd, b"exec", *libc::__errno_location());
    }
}

/// Write `<stage> failed (errno <n>)` to the status pipe and exit. Uses only
/// stack buffers; the forked child cannot touch the allocator.
fn report_and_exit(fd: RawFd, stage: &[u8], errno: i32) -> ! {
    let mut buf = [0u8; 96];
    let mut n = 0;

    let mut push = |bytes: &[u8], buf: &mut [u8; 96], n: &mut usize| {
        for &b in bytes {
            if *n < buf.len() {
                buf[*n] = b;
                *n += 1;
            }
        }
    };

    push(stage, &mut buf, &mut n);
    push(b" failed (errno ", &mut buf, &mut n);

    let mut digits = [0u8; 12];
    let mut d = 0;
    let mut v = if errno < 0 { 0 } else { errno as u32 };
    if v == 0 {
        digits[d] = b'0';
        d += 1;
    }
    while v > 0 {
        digits[d] = b'0' + (v % 10) as u8;
        v /= 10;
        d += 1;
    }
    while d > 0 {
        d -= 1;
        push(&digits[d..d + 1], &mut buf, &mut n);
    }
    push(b")", &mut buf, &mut n);

    unsafe {
        libc::write(fd, buf.as_ptr().cast(), n);
        libc::_exit(127);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::SpawnPlan;

    #[test]
    fn spawn_missing_interpreter_fails() {
        let plan = SpawnPlan::new("/nonexistent/interpreter", "/nonexistent/code.py");
        match spawn(&plan) {
            Err(SpawnError::ChildSetup(msg)) => assert!(msg.contains("exec"), "got: {msg}"),
            Err(SpawnError::Preflight(_)) => eprintln!("Skipping: host preflight failed"),
            other => panic!("expected ChildSetup error, got {other:?}"),
        }
    }

    #[test]
    fn spawn_reports_interpreter_exec() {
        let Ok(sh) = which::which("sh") else {
            eprintln!("Skipping: sh not found");
            return;
        };
        // `sh -I -u <file>`: most shells reject -I, but exec itself succeeds,
        // which is all the spawner promises.
        let scratch =
            crate::scratch::ScratchFile::create(&std::env::temp_dir(), "exit 0").unwrap();
        let plan = SpawnPlan::new(sh, scratch.path());
        match spawn(&plan) {
            Ok(handle) => drop(handle),
            Err(SpawnError::Preflight(_)) => eprintln!("Skipping: host preflight failed"),
            Err(e) => panic!("spawn failed: {e}"),
        }
    }

    #[test]
    fn invalid_path_rejected() {
        let plan = SpawnPlan::new("/usr/bin/python3", "/tmp/with\0nul.py");
        assert!(matches!(spawn(&plan), Err(SpawnError::InvalidPath(_))));
    }
}
