//! pyrunner-sandbox: OS-level machinery for resource-limited interpreter runs.
//!
//! This crate owns everything between "here is a code file" and "here is what
//! the child did": the spawn plan, the fork/exec spawner with kernel resource
//! caps, the scratch-file and pipe plumbing, and the supervision loop that
//! collects output, samples resident memory, and enforces the wall-clock
//! deadline.
//!
//! ## Layers
//!
//! - [`SpawnPlan`] — what to run and under which caps
//! - [`spawn`] — fork, new process group, rlimits, exec (Linux only)
//! - [`supervise`] — poll-multiplexed stream collection + RSS sampling +
//!   deadline/cancellation enforcement + exit reaping
//! - [`ScratchFile`] — per-request code file, deleted on drop
//! - [`preflight`] — refuses to spawn on hosts missing the required
//!   primitives instead of running with weakened isolation
//!
//! Policy decisions (what counts as a timeout, how outcomes are classified)
//! live in the `pyrunner` crate; this crate only reports what happened.

mod monitor;
mod plan;
mod preflight;
mod rlimits;
mod scratch;
mod spawn;

pub use monitor::{supervise, CancelToken, Enforcement, EnforcementKind, Supervision};
pub use plan::{
    SpawnPlan, CPU_HARD_CEILING_SECS, DEFAULT_FD_LIMIT, SAMPLE_INTERVAL, TERM_GRACE,
};
pub use preflight::{check, HostInfo, PreflightError};
pub use scratch::ScratchFile;
pub use spawn::{spawn, ChildHandle, SpawnError};
