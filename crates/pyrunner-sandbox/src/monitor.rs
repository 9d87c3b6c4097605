//! Child supervision: stream collection, memory sampling, deadline and
//! cancellation enforcement.
//!
//! A single cooperative loop multiplexes with `poll()` over:
//!
//! - **stdout / stderr pipes** — drained continuously so a chatty child
//!   never stalls on a full pipe buffer
//! - **pidfd** — readable when the child exits (no waitpid races)
//! - **a 100 ms tick** — resident-set samples from `/proc/<pid>/statm` and
//!   deadline / cancellation checks
//!
//! Enforcement (memory breach, wall-clock deadline, caller cancellation)
//! records a timestamped firing, sends SIGTERM to the process group, and
//! escalates to SIGKILL after a grace window. The loop keeps draining the
//! pipes until the child actually exits, so output buffered before the
//! firing is preserved.
//!
//! ## Exit detection
//!
//! `waitid(P_PIDFD, ...)` distinguishes a normal exit (`CLD_EXITED`, exit
//! code) from death by signal (`CLD_KILLED` / `CLD_DUMPED`, signal number).
//! Before reaping, the group gets a final SIGKILL sweep; the zombie pins
//! the process-group id, so the sweep cannot hit a recycled group.

use std::io;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::plan::{SpawnPlan, SAMPLE_INTERVAL, TERM_GRACE};
use crate::preflight;
use crate::spawn::ChildHandle;

/// Cooperative cancellation flag, shared between the caller and the
/// supervision loop. Cloning is cheap; all clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. The supervision loop notices within one tick.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Which enforcer fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnforcementKind {
    /// Wall-clock deadline reached.
    Deadline,
    /// Resident-set sample crossed the memory limit.
    MemoryCap,
    /// Caller cancelled the request.
    Cancel,
}

/// A single enforcement firing, timestamped for tie-breaking.
#[derive(Debug, Clone, Copy)]
pub struct Enforcement {
    pub kind: EnforcementKind,
    pub at: Instant,
}

/// Everything the supervisor observed about one child.
#[derive(Debug)]
pub struct Supervision {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Exit code, when the child exited normally.
    pub exit_code: Option<i32>,
    /// Terminating signal, when the child was killed.
    pub signal: Option<i32>,
    pub duration: Duration,
    /// Peak resident-set size in bytes; `None` if never sampled.
    pub peak_rss: Option<u64>,
    pub deadline_fired: Option<Instant>,
    pub memory_fired: Option<Instant>,
    pub cancel_fired: Option<Instant>,
}

impl Supervision {
    /// True when the child died to a SIGKILL nobody here sent — on this
    /// platform the kernel's response to an address-space violation or the
    /// OOM killer. Only meaningful when no enforcement fired.
    pub fn killed_by_kernel(&self) -> bool {
        self.signal == Some(libc::SIGKILL)
    }

    /// The earliest enforcement firing, if any. When both the deadline and
    /// the memory sampler fired before the child died, the earlier firing
    /// decides the classification.
    pub fn enforcement(&self) -> Option<Enforcement> {
        let mut earliest: Option<Enforcement> = None;
        let candidates = [
            (EnforcementKind::Deadline, self.deadline_fired),
            (EnforcementKind::MemoryCap, self.memory_fired),
            (EnforcementKind::Cancel, self.cancel_fired),
        ];
        for (kind, at) in candidates {
            if let Some(at) = at {
                if earliest.map_or(true, |e| at < e.at) {
                    earliest = Some(Enforcement { kind, at });
                }
            }
        }
        earliest
    }
}

/// Supervise `child` until it exits, enforcing the plan's wall-clock
/// deadline and memory limit. Always reaps the child before returning Ok.
pub fn supervise(
    child: &mut ChildHandle,
    plan: &SpawnPlan,
    cancel: Option<&CancelToken>,
) -> io::Result<Supervision> {
    let start = child.started();
    let deadline = start + plan.timeout;
    let page_size = preflight::check()
        .map(|info| info.page_size)
        .unwrap_or(4096);

    let stdout_fd = child.stdout_fd();
    let stderr_fd = child.stderr_fd();
    let pidfd = child.pidfd_fd();

    set_nonblocking(stdout_fd)?;
    set_nonblocking(stderr_fd)?;

    let mut stdout_buf = Vec::new();
    let mut stderr_buf = Vec::new();
    let mut buf = [0u8; 4096];

    let mut stdout_open = true;
    let mut stderr_open = true;

    let mut peak_rss: Option<u64> = None;
    let mut next_sample = start;

    let mut deadline_fired: Option<Instant> = None;
    let mut memory_fired: Option<Instant> = None;
    let mut cancel_fired: Option<Instant> = None;
    let mut kill_at: Option<Instant> = None;

    let mut exit_code = None;
    let mut signal = None;

    loop {
        let now = Instant::now();
        let enforced =
            deadline_fired.is_some() || memory_fired.is_some() || cancel_fired.is_some();

        if !enforced {
            if cancel.is_some_and(CancelToken::is_cancelled) {
                tracing::debug!(pid = child.pid(), "cancellation requested, terminating group");
                cancel_fired = Some(now);
                child.terminate_group();
                kill_at = Some(now + TERM_GRACE);
            } else if now >= deadline {
                tracing::debug!(pid = child.pid(), "wall-clock deadline reached, terminating group");
                deadline_fired = Some(now);
                child.terminate_group();
                kill_at = Some(now + TERM_GRACE);
            }
        }

        if now >= next_sample {
            next_sample = now + SAMPLE_INTERVAL;
            if let Some(rss) = rss_bytes(child.pid(), page_size) {
                peak_rss = Some(peak_rss.map_or(rss, |p| p.max(rss)));
                if rss > plan.memory_limit
                    && deadline_fired.is_none()
                    && memory_fired.is_none()
                    && cancel_fired.is_none()
                {
                    tracing::debug!(
                        pid = child.pid(),
                        rss,
                        limit = plan.memory_limit,
                        "memory limit breached, terminating group"
                    );
                    memory_fired = Some(now);
                    child.terminate_group();
                    kill_at = Some(now + TERM_GRACE);
                }
            }
        }

        if let Some(t) = kill_at {
            if now >= t {
                child.kill_group();
                kill_at = None;
            }
        }

        // Wake for the next sample tick, the deadline, or the pending kill,
        // whichever is closer.
        let mut wait = next_sample.saturating_duration_since(now);
        if deadline_fired.is_none() && memory_fired.is_none() && cancel_fired.is_none() {
            wait = wait.min(deadline.saturating_duration_since(now));
        }
        if let Some(t) = kill_at {
            wait = wait.min(t.saturating_duration_since(now));
        }
        let poll_timeout = wait.as_millis().min(SAMPLE_INTERVAL.as_millis()) as i32;

        // Negative fds are ignored by poll(); streams drop out once at EOF.
        let mut fds = [
            libc::pollfd {
                fd: if stdout_open { stdout_fd } else { -1 },
                events: libc::POLLIN,
                revents: 0,
            },
            libc::pollfd {
                fd: if stderr_open { stderr_fd } else { -1 },
                events: libc::POLLIN,
                revents: 0,
            },
            libc::pollfd {
                fd: pidfd,
                events: libc::POLLIN,
                revents: 0,
            },
        ];

        let ret = unsafe { libc::poll(fds.as_mut_ptr(), 3, poll_timeout.max(1)) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }

        if fds[0].revents & (libc::POLLIN | libc::POLLHUP) != 0 {
            stdout_open = drain_ready(stdout_fd, &mut stdout_buf, &mut buf);
        }
        if fds[1].revents & (libc::POLLIN | libc::POLLHUP) != 0 {
            stderr_open = drain_ready(stderr_fd, &mut stderr_buf, &mut buf);
        }

        if fds[2].revents & libc::POLLIN != 0 {
            // Sweep any group stragglers before reaping; the zombie pins the
            // pgid until waitid below.
            child.kill_group();
            let (ec, sig) = wait_for_exit(pidfd)?;
            child.mark_reaped();
            exit_code = ec;
            signal = sig;
            break;
        }
    }

    // Whatever made it into the pipes before death is preserved.
    drain_remaining(stdout_fd, &mut stdout_buf, &mut buf);
    drain_remaining(stderr_fd, &mut stderr_buf, &mut buf);

    Ok(Supervision {
        stdout: stdout_buf,
        stderr: stderr_buf,
        exit_code,
        signal,
        duration: start.elapsed(),
        peak_rss,
        deadline_fired,
        memory_fired,
        cancel_fired,
    })
}

/// Resident-set size of `pid` in bytes, from `/proc/<pid>/statm`.
/// `None` once the process is gone.
fn rss_bytes(pid: libc::pid_t, page_size: u64) -> Option<u64> {
    let statm = std::fs::read_to_string(format!("/proc/{pid}/statm")).ok()?;
    let pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    Some(pages * page_size)
}

/// Read everything currently available from `fd`. Returns false once the
/// stream reached EOF.
fn drain_ready(fd: RawFd, output: &mut Vec<u8>, buf: &mut [u8]) -> bool {
    loop {
        let ret = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            return err.kind() == io::ErrorKind::WouldBlock;
        }
        if ret == 0 {
            return false;
        }
        output.extend_from_slice(&buf[..ret as usize]);
    }
}

fn drain_remaining(fd: RawFd, output: &mut Vec<u8>, buf: &mut [u8]) {
    loop {
        let ret = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
        if ret <= 0 {
            break;
        }
        output.extend_from_slice(&buf[..ret as usize]);
    }
}

fn wait_for_exit(pidfd: RawFd) -> io::Result<(Option<i32>, Option<i32>)> {
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
    let status = unsafe { siginfo.si_status() };

    match code {
        libc::CLD_EXITED => Ok((Some(status), None)),
        libc::CLD_KILLED | libc::CLD_DUMPED => Ok((None, Some(status))),
        _ => Ok((None, None)),
    }
}

#[inline]
fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    let ret = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::SpawnPlan;
    use crate::spawn::spawn;
    use std::time::Duration;

    fn python() -> Option<std::path::PathBuf> {
        which::which("python3").ok()
    }

    #[test]
    fn cancel_token_observed_by_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn enforcement_picks_earliest() {
        let t0 = Instant::now();
        let t1 = t0 + Duration::from_millis(1);
        let sup = Supervision {
            stdout: vec![],
            stderr: vec![],
            exit_code: None,
            signal: Some(libc::SIGKILL),
            duration: Duration::from_secs(1),
            peak_rss: None,
            deadline_fired: Some(t1),
            memory_fired: Some(t0),
            cancel_fired: None,
        };
        assert_eq!(sup.enforcement().unwrap().kind, EnforcementKind::MemoryCap);
    }

    #[test]
    fn enforcement_none_when_clean() {
        let sup = Supervision {
            stdout: vec![],
            stderr: vec![],
            exit_code: Some(0),
            signal: None,
            duration: Duration::from_millis(5),
            peak_rss: Some(1024),
            deadline_fired: None,
            memory_fired: None,
            cancel_fired: None,
        };
        assert!(sup.enforcement().is_none());
    }

    #[test]
    fn rss_of_self_is_positive() {
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as u64;
        match rss_bytes(unsafe { libc::getpid() }, page_size) {
            Some(rss) => assert!(rss > 0),
            None => eprintln!("Skipping: /proc not available"),
        }
    }

    #[test]
    fn supervise_collects_output_and_exit() {
        let Some(python) = python() else {
            eprintln!("Skipping: python3 not found");
            return;
        };
        let scratch = crate::scratch::ScratchFile::create(
            &std::env::temp_dir(),
            "print('from child')",
        )
        .unwrap();
        let plan = SpawnPlan::new(python, scratch.path()).timeout(Duration::from_secs(30));
        let mut child = match spawn(&plan) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Skipping: spawn failed: {e}");
                return;
            }
        };
        let sup = supervise(&mut child, &plan, None).unwrap();
        assert_eq!(sup.exit_code, Some(0));
        assert!(sup.signal.is_none());
        assert_eq!(String::from_utf8_lossy(&sup.stdout).trim(), "from child");
        assert!(sup.enforcement().is_none());
    }

    #[test]
    fn supervise_enforces_deadline() {
        let Some(python) = python() else {
            eprintln!("Skipping: python3 not found");
            return;
        };
        let scratch = crate::scratch::ScratchFile::create(
            &std::env::temp_dir(),
            "while True:\n    pass",
        )
        .unwrap();
        let plan = SpawnPlan::new(python, scratch.path()).timeout(Duration::from_secs(1));
        let mut child = match spawn(&plan) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Skipping: spawn failed: {e}");
                return;
            }
        };
        let sup = supervise(&mut child, &plan, None).unwrap();
        assert!(sup.deadline_fired.is_some());
        assert_eq!(sup.enforcement().unwrap().kind, EnforcementKind::Deadline);
        assert!(sup.duration >= Duration::from_secs(1));
        assert!(sup.duration < Duration::from_secs(5));
    }

    #[test]
    fn supervise_cancellation_kills_group() {
        let Some(python) = python() else {
            eprintln!("Skipping: python3 not found");
            return;
        };
        let scratch = crate::scratch::ScratchFile::create(
            &std::env::temp_dir(),
            "import time\ntime.sleep(60)",
        )
        .unwrap();
        let plan = SpawnPlan::new(python, scratch.path()).timeout(Duration::from_secs(60));
        let mut child = match spawn(&plan) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Skipping: spawn failed: {e}");
                return;
            }
        };
        let token = CancelToken::new();
        token.cancel();
        let sup = supervise(&mut child, &plan, Some(&token)).unwrap();
        assert!(sup.cancel_fired.is_some());
        assert_eq!(sup.enforcement().unwrap().kind, EnforcementKind::Cancel);
        assert!(sup.duration < Duration::from_secs(10));
    }
}
