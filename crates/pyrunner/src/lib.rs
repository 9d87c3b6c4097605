//! pyrunner: sandboxed Python execution.
//!
//! Accepts arbitrary user-supplied Python, refuses what static analysis can
//! refuse, and runs the rest under OS-enforced caps — returning captured
//! output, an outcome classification, wall-clock duration, and peak
//! resident memory.
//!
//! ## Defense in depth
//!
//! - **Static layer** — the source is parsed to an AST and walked against a
//!   policy catalog: import whitelist, forbidden-builtin calls, forbidden
//!   attribute access. It restricts what code can *express*.
//! - **Dynamic layer** — the interpreter runs in a fresh process group with
//!   kernel rlimits (address space, CPU, descriptors, core dumps), a
//!   100 ms resident-set sampler, and a wall-clock deadline. It bounds what
//!   even admitted code can *consume*.
//!
//! ## Quick start
//!
//! ```ignore
//! use pyrunner::{ExecutionRequest, Runner, RunnerConfig};
//!
//! let runner = Runner::new(RunnerConfig::detect()?);
//! let outcome = runner.execute(
//!     &ExecutionRequest::new("import math\nprint(math.sqrt(16))")
//!         .timeout_secs(10)
//!         .memory_limit_mib(256),
//! );
//! assert_eq!(outcome.stdout.trim(), "4.0");
//! ```
//!
//! Every call is independent; callers may execute concurrently. The
//! scratch file and the child process group are released on every path,
//! including panics and cancellation.
//!
//! Transports sit on top of [`ExecutionRequest`] / [`ExecutionOutcome`],
//! which already (de)serialize in the wire shape, and [`service_info`] for
//! health probes. No HTTP, no persistence, no global state beyond the
//! default runner.

mod autoprint;
mod config;
mod error;
mod outcome;
pub mod policy;
mod request;
mod runner;
mod service;
mod validator;

pub use config::{detect_interpreter, ConfigError, RunnerConfig};
pub use error::ExecError;
pub use outcome::{ExecStatus, ExecutionOutcome};
pub use request::{
    ExecutionRequest, RequestError, DEFAULT_MEMORY_MIB, DEFAULT_TIMEOUT_SECS, MAX_CODE_BYTES,
    MAX_MEMORY_MIB, MAX_TIMEOUT_SECS, MIN_MEMORY_MIB, MIN_TIMEOUT_SECS,
};
pub use runner::{execute, Runner};
pub use service::{service_info, ServiceInfo, SERVICE_NAME};
pub use validator::{validate, Rejection};

// Re-exported for callers that drive cancellation.
pub use pyrunner_sandbox::CancelToken;
