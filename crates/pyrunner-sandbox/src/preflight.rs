//! Host capability checking.
//!
//! Verifies once, at first spawn, that the host provides every primitive the
//! sandbox relies on. If anything is missing the spawner refuses to start
//! rather than running with weakened isolation.
//!
//! | Requirement | Check |
//! |-------------|-------|
//! | Page size | `sysconf(_SC_PAGESIZE)` > 0 |
//! | RSS accounting | `/proc/self/statm` readable and parseable |
//! | Resource limits | `getrlimit(RLIMIT_AS)` succeeds |
//!
//! The result is cached in a `OnceLock`; subsequent calls are free.

use std::sync::OnceLock;

use thiserror::Error;

/// What the host offers, as probed at first use.
#[derive(Debug, Clone)]
pub struct HostInfo {
    /// Size of a memory page in bytes; RSS samples are page counts.
    pub page_size: u64,
}

#[derive(Debug, Clone, Error)]
pub enum PreflightError {
    #[error("cannot determine page size")]
    PageSizeUnknown,

    #[error("/proc resident-set accounting is unavailable: {0}")]
    ProcUnavailable(String),

    #[error("resource limits are unavailable")]
    RlimitsUnavailable,
}

static HOST_INFO: OnceLock<Result<HostInfo, PreflightError>> = OnceLock::new();

/// Check host capabilities and cache the result.
pub fn check() -> Result<&'static HostInfo, &'static PreflightError> {
    HOST_INFO.get_or_init(check_impl).as_ref()
}

fn check_impl() -> Result<HostInfo, PreflightError> {
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if page_size <= 0 {
        return Err(PreflightError::PageSizeUnknown);
    }

    // The memory sampler reads /proc/<pid>/statm; prove the format on our
    // own entry before trusting it for children.
    match std::fs::read_to_string("/proc/self/statm") {
        Ok(content) => {
            let resident = content.split_whitespace().nth(1).and_then(|f| f.parse::<u64>().ok());
            if resident.is_none() {
                return Err(PreflightError::ProcUnavailable(
                    "unexpected /proc/self/statm format".into(),
                ));
            }
        }
        Err(e) => return Err(PreflightError::ProcUnavailable(e.to_string())),
    }

    let mut rlim = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: rlim is a valid out-pointer.
    if unsafe { libc::getrlimit(libc::RLIMIT_AS, &mut rlim) } != 0 {
        return Err(PreflightError::RlimitsUnavailable);
    }

    Ok(HostInfo {
        page_size: page_size as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_passes_on_supported_hosts() {
        match check() {
            Ok(info) => assert!(info.page_size >= 4096),
            Err(e) => eprintln!("host not supported: {e}"),
        }
    }

    #[test]
    fn check_is_cached() {
        let a = check().map(|i| i.page_size).ok();
        let b = check().map(|i| i.page_size).ok();
        assert_eq!(a, b);
    }
}
