//! Spawn plan for a single sandboxed interpreter run.
//!
//! A `SpawnPlan` describes everything the spawner and supervisor need:
//! the interpreter, the code file, and the resource caps.
//!
//! ## Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `timeout` | 30 seconds |
//! | `memory_limit` | 512 MiB |
//! | `cpu_secs` | 300 seconds (hard ceiling) |
//! | `fd_limit` | 50 descriptors |

use std::path::PathBuf;
use std::time::Duration;

/// Hard ceiling on child CPU time, irrespective of the per-request timeout.
///
/// The wall-clock deadline is the supervisor's job; this rlimit is the
/// backstop that bounds CPU-bound runaways even if the supervisor dies.
pub const CPU_HARD_CEILING_SECS: u64 = 300;

/// Default open-file-descriptor cap for the child.
pub const DEFAULT_FD_LIMIT: u64 = 50;

/// Interval between resident-set-size samples.
pub const SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

/// Grace window between SIGTERM and SIGKILL when tearing down the group.
pub const TERM_GRACE: Duration = Duration::from_millis(500);

/// What to run and under which caps.
#[derive(Debug, Clone)]
pub struct SpawnPlan {
    /// Absolute path to the interpreter binary.
    pub interpreter: PathBuf,
    /// Path to the file holding the user code.
    pub code_file: PathBuf,
    /// Address-space cap and sampler threshold, in bytes.
    pub memory_limit: u64,
    /// CPU-time rlimit in seconds, clamped to [`CPU_HARD_CEILING_SECS`].
    pub cpu_secs: u64,
    /// Open-file-descriptor cap.
    pub fd_limit: u64,
    /// Wall-clock deadline enforced by the supervisor.
    pub timeout: Duration,
}

impl SpawnPlan {
    pub fn new(interpreter: impl Into<PathBuf>, code_file: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
            code_file: code_file.into(),
            memory_limit: 512 * 1024 * 1024,
            cpu_secs: CPU_HARD_CEILING_SECS,
            fd_limit: DEFAULT_FD_LIMIT,
            timeout: Duration::from_secs(30),
        }
    }

    /// Set the address-space cap in bytes.
    pub fn memory_limit(mut self, bytes: u64) -> Self {
        self.memory_limit = bytes;
        self
    }

    /// Set the CPU-time rlimit. Values above the hard ceiling are clamped.
    pub fn cpu_secs(mut self, secs: u64) -> Self {
        self.cpu_secs = secs.min(CPU_HARD_CEILING_SECS);
        self
    }

    pub fn fd_limit(mut self, count: u64) -> Self {
        self.fd_limit = count;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}
