//! Kernel resource limits for the spawned interpreter.
//!
//! Applied in the child after fork and before exec. All limits are set with
//! soft = hard so the child cannot raise them back.
//!
//! | Limit | Purpose |
//! |-------|---------|
//! | `RLIMIT_AS` | Address-space cap; allocations beyond it fail |
//! | `RLIMIT_CPU` | CPU-time ceiling; the kernel signals on breach |
//! | `RLIMIT_NOFILE` | Descriptor fan-out cap |
//! | `RLIMIT_CORE` | 0 — no core dumps on crash |

use rustix::io::Errno;

use crate::plan::{SpawnPlan, CPU_HARD_CEILING_SECS};

/// Apply all caps from the plan. Any failure must abort the spawn; a child
/// running partially limited is worse than no child at all.
pub(crate) fn apply_rlimits(plan: &SpawnPlan) -> Result<(), Errno> {
    set_rlimit(libc::RLIMIT_AS, plan.memory_limit)?;
    set_rlimit(libc::RLIMIT_CPU, plan.cpu_secs.min(CPU_HARD_CEILING_SECS))?;
    set_rlimit(libc::RLIMIT_NOFILE, plan.fd_limit)?;
    set_rlimit(libc::RLIMIT_CORE, 0)?;
    Ok(())
}

#[inline]
fn set_rlimit(resource: libc::__rlimit_resource_t, limit: u64) -> Result<(), Errno> {
    let rlim = libc::rlimit {
        rlim_cur: limit,
        rlim_max: limit,
    };
    // SAFETY: rlim is valid, resource is a valid constant.
    if unsafe { libc::setrlimit(resource, &rlim) } != 0 {
        Err(crate::spawn::last_errno())
    } else {
        Ok(())
    }
}
