//! Execution outcomes.
//!
//! The four-way classification plus everything observed about the run.
//! Serialization follows the transport contract: lowercase status strings,
//! wire names `execution_time` / `memory_used` / `error`, times rounded to
//! 3 fractional digits and memory to 2.

use serde::{Serialize, Serializer};

/// Outcome classification assigned by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecStatus {
    Success,
    Error,
    Timeout,
    MemoryExceeded,
}

/// Result of one execution request.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionOutcome {
    pub status: ExecStatus,
    /// Captured standard output, lossily decoded.
    pub stdout: String,
    /// Captured standard error, lossily decoded; enforcement firings append
    /// a canonical notice here.
    pub stderr: String,
    /// Wall-clock duration in seconds, monotonic.
    #[serde(rename = "execution_time", serialize_with = "round3")]
    pub execution_time_seconds: f64,
    /// Peak resident-set size in MiB; absent if never sampled.
    #[serde(rename = "memory_used", serialize_with = "round2_opt")]
    pub peak_memory_mib: Option<f64>,
    /// Short failure description; always present when status is not
    /// `Success`, never present when it is.
    #[serde(rename = "error")]
    pub error_summary: Option<String>,
}

fn round3<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64((value * 1000.0).round() / 1000.0)
}

fn round2_opt<S: Serializer>(value: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(v) => serializer.serialize_some(&((v * 100.0).round() / 100.0)),
        None => serializer.serialize_none(),
    }
}
