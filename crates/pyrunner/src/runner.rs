//! The execution supervisor: one request in, one classified outcome out.
//!
//! Pipeline per request, in order:
//!
//! 1. request bounds check
//! 2. static validation (policy catalog + AST walk)
//! 3. optional auto-print rewrite
//! 4. scratch file write (RAII guard, removed on every path)
//! 5. spawn under OS caps
//! 6. supervision: stream collection + RSS sampling + deadline
//! 7. classification
//!
//! `execute` never panics outward and always returns an outcome; requests
//! are independent, so any number may run in parallel.

use std::borrow::Cow;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use pyrunner_sandbox::{
    spawn, supervise, CancelToken, EnforcementKind, ScratchFile, SpawnPlan, Supervision,
};

use crate::autoprint;
use crate::config::{ConfigError, RunnerConfig};
use crate::error::ExecError;
use crate::outcome::{ExecStatus, ExecutionOutcome};
use crate::request::ExecutionRequest;
use crate::validator;

/// Executes requests against one interpreter/scratch configuration.
///
/// Cheap to clone; holds no per-request state.
#[derive(Debug, Clone)]
pub struct Runner {
    config: RunnerConfig,
}

impl Runner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    #[inline]
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Run one request to completion.
    pub fn execute(&self, request: &ExecutionRequest) -> ExecutionOutcome {
        self.execute_cancellable(request, None)
    }

    /// Run one request, aborting early if `cancel` fires. Cancellation
    /// tears the process group down and surfaces as an `Error` outcome;
    /// the child is reaped and the scratch file removed either way.
    pub fn execute_cancellable(
        &self,
        request: &ExecutionRequest,
        cancel: Option<&CancelToken>,
    ) -> ExecutionOutcome {
        let start = Instant::now();
        tracing::info!(code_len = request.code().len(), "execution requested");

        if let Err(e) = request.validate() {
            tracing::warn!(error = %e, "request bounds rejected");
            return failure_outcome(e.into(), start);
        }
        if let Err(e) = validator::validate(request.code()) {
            tracing::warn!(error = %e, "static validation rejected");
            return failure_outcome(e.into(), start);
        }

        let outcome = match self.run_sandboxed(request, cancel, start) {
            Ok(outcome) => outcome,
            Err(e) => failure_outcome(e, start),
        };
        tracing::info!(
            status = ?outcome.status,
            execution_time = outcome.execution_time_seconds,
            "execution completed"
        );
        outcome
    }

    fn run_sandboxed(
        &self,
        request: &ExecutionRequest,
        cancel: Option<&CancelToken>,
        start: Instant,
    ) -> Result<ExecutionOutcome, ExecError> {
        let code: Cow<'_, str> = if request.auto_print_enabled() {
            autoprint::wrap(request.code())
        } else {
            Cow::Borrowed(request.code())
        };

        let scratch = ScratchFile::create(self.config.scratch_path(), &code).map_err(|e| {
            tracing::error!(error = %e, "failed to create scratch file");
            ExecError::InternalDefect
        })?;

        let plan = SpawnPlan::new(self.config.interpreter(), scratch.path())
            .memory_limit(request.memory_limit() * 1024 * 1024)
            .timeout(Duration::from_secs(request.timeout()));

        let mut child = spawn(&plan)?;
        let supervised = supervise(&mut child, &plan, cancel).map_err(|e| {
            tracing::error!(error = %e, "supervision failed");
            ExecError::InternalDefect
        })?;

        Ok(classify(request, &supervised, start))
        // scratch and child guards drop here on every path
    }
}

static DEFAULT_RUNNER: LazyLock<Result<Runner, ConfigError>> =
    LazyLock::new(|| RunnerConfig::detect().map(Runner::new));

/// Run one request with a process-wide default configuration (detected
/// interpreter, OS temp directory for scratch files).
pub fn execute(request: &ExecutionRequest) -> ExecutionOutcome {
    match &*DEFAULT_RUNNER {
        Ok(runner) => runner.execute(request),
        Err(e) => failure_outcome(ExecError::SpawnFailed(e.to_string()), Instant::now()),
    }
}

/// Derive the outcome from what the supervisor observed.
fn classify(
    request: &ExecutionRequest,
    supervised: &Supervision,
    start: Instant,
) -> ExecutionOutcome {
    let stdout = String::from_utf8_lossy(&supervised.stdout).into_owned();
    let mut stderr = String::from_utf8_lossy(&supervised.stderr).into_owned();
    let peak_memory_mib = supervised.peak_rss.map(|b| b as f64 / (1024.0 * 1024.0));

    let category = match supervised.enforcement() {
        // Both enforcers may have fired during one run; `enforcement()`
        // already picked the earlier firing. An enforcer that acted wins
        // even over a zero exit status.
        Some(e) => Some(match e.kind {
            EnforcementKind::Deadline => ExecError::Timeout {
                limit_secs: request.timeout(),
            },
            EnforcementKind::MemoryCap => ExecError::MemoryExceeded {
                limit_mib: request.memory_limit(),
            },
            EnforcementKind::Cancel => ExecError::Cancelled,
        }),
        None => {
            if supervised.exit_code == Some(0) {
                None
            } else if supervised.killed_by_kernel() || interpreter_reported_oom(&stderr) {
                // Address-space violations surface either as a kernel kill
                // or as an allocation failure the interpreter reports; both
                // classify as the memory cap doing its job.
                Some(ExecError::MemoryExceeded {
                    limit_mib: request.memory_limit(),
                })
            } else {
                Some(ExecError::ChildRuntime {
                    summary: child_error_summary(
                        &stderr,
                        supervised.exit_code,
                        supervised.signal,
                    ),
                })
            }
        }
    };

    if let Some(err) = &category {
        match err {
            ExecError::Timeout { .. }
            | ExecError::MemoryExceeded { .. }
            | ExecError::Cancelled => append_notice(&mut stderr, &err.to_string()),
            _ => {}
        }
    }

    let status = category.as_ref().map_or(ExecStatus::Success, ExecError::status);
    ExecutionOutcome {
        status,
        stdout,
        stderr,
        execution_time_seconds: start.elapsed().as_secs_f64(),
        peak_memory_mib,
        error_summary: category.map(|e| e.to_string()),
    }
}

fn failure_outcome(err: ExecError, start: Instant) -> ExecutionOutcome {
    let summary = err.to_string();
    ExecutionOutcome {
        status: err.status(),
        stdout: String::new(),
        stderr: format!("{summary}\n"),
        execution_time_seconds: start.elapsed().as_secs_f64(),
        peak_memory_mib: None,
        error_summary: Some(summary),
    }
}

/// Output already buffered when enforcement fired is preserved; the
/// canonical notice goes on its own line after it.
fn append_notice(stderr: &mut String, notice: &str) {
    if !stderr.is_empty() && !stderr.ends_with('\n') {
        stderr.push('\n');
    }
    stderr.push_str(notice);
    stderr.push('\n');
}

fn interpreter_reported_oom(stderr: &str) -> bool {
    stderr.contains("MemoryError")
}

fn child_error_summary(stderr: &str, exit_code: Option<i32>, signal: Option<i32>) -> String {
    if let Some(line) = stderr.lines().rev().find(|l| !l.trim().is_empty()) {
        return line.trim().to_string();
    }
    match (exit_code, signal) {
        (Some(code), _) => format!("process exited with status {code}"),
        (None, Some(sig)) => format!("process killed by signal {sig}"),
        (None, None) => "process ended abnormally".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_outcome_shape() {
        let start = Instant::now();
        let outcome = failure_outcome(
            ExecError::ValidationRejected {
                reason: "import of 'os' is not allowed".into(),
            },
            start,
        );
        assert_eq!(outcome.status, ExecStatus::Error);
        assert!(outcome.stdout.is_empty());
        assert!(outcome.stderr.contains("os"));
        assert!(outcome.error_summary.unwrap().contains("os"));
        assert!(outcome.execution_time_seconds < 0.1);
        assert!(outcome.peak_memory_mib.is_none());
    }

    #[test]
    fn notice_appended_after_buffered_output() {
        let mut stderr = String::from("partial line");
        append_notice(&mut stderr, "execution timed out after 2 seconds");
        assert_eq!(
            stderr,
            "partial line\nexecution timed out after 2 seconds\n"
        );
    }

    #[test]
    fn notice_on_empty_stderr() {
        let mut stderr = String::new();
        append_notice(&mut stderr, "execution cancelled");
        assert_eq!(stderr, "execution cancelled\n");
    }

    #[test]
    fn summary_prefers_last_stderr_line() {
        let stderr = "Traceback (most recent call last):\n  ...\nZeroDivisionError: division by zero\n";
        assert_eq!(
            child_error_summary(stderr, Some(1), None),
            "ZeroDivisionError: division by zero"
        );
    }

    #[test]
    fn summary_falls_back_to_exit_status() {
        assert_eq!(
            child_error_summary("", Some(3), None),
            "process exited with status 3"
        );
        assert_eq!(
            child_error_summary("", None, Some(9)),
            "process killed by signal 9"
        );
    }

    #[test]
    fn oom_detection() {
        assert!(interpreter_reported_oom(
            "Traceback ...\nMemoryError\n"
        ));
        assert!(!interpreter_reported_oom("ValueError: nope"));
    }
}
