//! Execution requests and their bounds.
//!
//! A request is immutable once built; [`ExecutionRequest::validate`] is the
//! single place the size and limit bounds are enforced. The serde shape
//! matches the transport contract (`code`, `timeout`, `memory_limit`,
//! `auto_print`), with unknown fields rejected.

use serde::Deserialize;
use thiserror::Error;

pub const MIN_TIMEOUT_SECS: u64 = 1;
pub const MAX_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

pub const MIN_MEMORY_MIB: u64 = 64;
pub const MAX_MEMORY_MIB: u64 = 2048;
pub const DEFAULT_MEMORY_MIB: u64 = 512;

/// Upper bound on submitted source size.
pub const MAX_CODE_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("code cannot be empty")]
    EmptyCode,

    #[error("code too large ({size} bytes, max {max})")]
    CodeTooLarge { size: usize, max: usize },

    #[error("timeout must be {min}-{max} seconds, got {got}")]
    TimeoutOutOfRange { got: u64, min: u64, max: u64 },

    #[error("memory limit must be {min}-{max} MiB, got {got}")]
    MemoryOutOfRange { got: u64, min: u64, max: u64 },
}

/// One piece of user code plus its per-request limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutionRequest {
    code: String,
    #[serde(default = "default_timeout")]
    timeout: u64,
    #[serde(default = "default_memory_limit")]
    memory_limit: u64,
    #[serde(default)]
    auto_print: bool,
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_memory_limit() -> u64 {
    DEFAULT_MEMORY_MIB
}

impl ExecutionRequest {
    /// Build a request with default limits.
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            timeout: DEFAULT_TIMEOUT_SECS,
            memory_limit: DEFAULT_MEMORY_MIB,
            auto_print: false,
        }
    }

    /// Set the wall-clock timeout in seconds.
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout = secs;
        self
    }

    /// Set the memory limit in MiB.
    pub fn memory_limit_mib(mut self, mib: u64) -> Self {
        self.memory_limit = mib;
        self
    }

    /// Echo the value of a trailing bare expression.
    pub fn auto_print(mut self, enabled: bool) -> Self {
        self.auto_print = enabled;
        self
    }

    #[inline]
    pub fn code(&self) -> &str {
        &self.code
    }

    #[inline]
    pub fn timeout(&self) -> u64 {
        self.timeout
    }

    #[inline]
    pub fn memory_limit(&self) -> u64 {
        self.memory_limit
    }

    #[inline]
    pub fn auto_print_enabled(&self) -> bool {
        self.auto_print
    }

    /// Enforce the request bounds. All bounds are inclusive.
    pub fn validate(&self) -> Result<(), RequestError> {
        if self.code.trim().is_empty() {
            return Err(RequestError::EmptyCode);
        }
        if self.code.len() > MAX_CODE_BYTES {
            return Err(RequestError::CodeTooLarge {
                size: self.code.len(),
                max: MAX_CODE_BYTES,
            });
        }
        if !(MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&self.timeout) {
            return Err(RequestError::TimeoutOutOfRange {
                got: self.timeout,
                min: MIN_TIMEOUT_SECS,
                max: MAX_TIMEOUT_SECS,
            });
        }
        if !(MIN_MEMORY_MIB..=MAX_MEMORY_MIB).contains(&self.memory_limit) {
            return Err(RequestError::MemoryOutOfRange {
                got: self.memory_limit,
                min: MIN_MEMORY_MIB,
                max: MAX_MEMORY_MIB,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let req = ExecutionRequest::new("print(1)");
        assert_eq!(req.timeout(), 30);
        assert_eq!(req.memory_limit(), 512);
        assert!(!req.auto_print_enabled());
        assert!(req.validate().is_ok());
    }

    #[test]
    fn empty_code_rejected() {
        assert_eq!(
            ExecutionRequest::new("").validate(),
            Err(RequestError::EmptyCode)
        );
        assert_eq!(
            ExecutionRequest::new("   \n\t ").validate(),
            Err(RequestError::EmptyCode)
        );
    }

    #[test]
    fn oversized_code_rejected() {
        let req = ExecutionRequest::new("#".repeat(MAX_CODE_BYTES + 1));
        assert!(matches!(
            req.validate(),
            Err(RequestError::CodeTooLarge { .. })
        ));
    }

    #[test]
    fn code_at_limit_accepted() {
        let req = ExecutionRequest::new("#".repeat(MAX_CODE_BYTES));
        assert!(req.validate().is_ok());
    }

    #[test]
    fn timeout_bounds_inclusive() {
        assert!(ExecutionRequest::new("x").timeout_secs(1).validate().is_ok());
        assert!(ExecutionRequest::new("x").timeout_secs(300).validate().is_ok());
        assert!(matches!(
            ExecutionRequest::new("x").timeout_secs(0).validate(),
            Err(RequestError::TimeoutOutOfRange { got: 0, .. })
        ));
        assert!(matches!(
            ExecutionRequest::new("x").timeout_secs(301).validate(),
            Err(RequestError::TimeoutOutOfRange { got: 301, .. })
        ));
    }

    #[test]
    fn memory_bounds_inclusive() {
        assert!(ExecutionRequest::new("x").memory_limit_mib(64).validate().is_ok());
        assert!(ExecutionRequest::new("x").memory_limit_mib(2048).validate().is_ok());
        assert!(matches!(
            ExecutionRequest::new("x").memory_limit_mib(63).validate(),
            Err(RequestError::MemoryOutOfRange { got: 63, .. })
        ));
        assert!(matches!(
            ExecutionRequest::new("x").memory_limit_mib(4096).validate(),
            Err(RequestError::MemoryOutOfRange { got: 4096, .. })
        ));
    }

    #[test]
    fn deserializes_transport_shape() {
        let req: ExecutionRequest =
            serde_json::from_str(r#"{"code": "print(1)", "timeout": 10, "memory_limit": 256}"#)
                .unwrap();
        assert_eq!(req.code(), "print(1)");
        assert_eq!(req.timeout(), 10);
        assert_eq!(req.memory_limit(), 256);
    }

    #[test]
    fn deserializes_with_defaults() {
        let req: ExecutionRequest = serde_json::from_str(r#"{"code": "print(1)"}"#).unwrap();
        assert_eq!(req.timeout(), DEFAULT_TIMEOUT_SECS);
        assert_eq!(req.memory_limit(), DEFAULT_MEMORY_MIB);
    }

    #[test]
    fn unknown_fields_rejected() {
        let result: Result<ExecutionRequest, _> =
            serde_json::from_str(r#"{"code": "x", "shell": true}"#);
        assert!(result.is_err());
    }
}
