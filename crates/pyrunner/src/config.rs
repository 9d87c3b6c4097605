//! Runner configuration: interpreter path and scratch directory.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Fallback locations tried when the interpreter is not on PATH.
const INTERPRETER_FALLBACKS: &[&str] = &[
    "/usr/bin/python3",
    "/usr/local/bin/python3",
    "/opt/python/bin/python3",
];

#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("interpreter not found: {name}\n  searched: $PATH, {searched}")]
    InterpreterNotFound { name: String, searched: String },
}

/// Service-startup configuration, immutable once the runner is built.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    interpreter: PathBuf,
    scratch_dir: PathBuf,
}

impl RunnerConfig {
    /// Configuration with an explicit interpreter path.
    pub fn new(interpreter: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
            scratch_dir: std::env::temp_dir(),
        }
    }

    /// Detect `python3` via PATH and the usual fallback locations.
    pub fn detect() -> Result<Self, ConfigError> {
        let interpreter =
            detect_interpreter().ok_or_else(|| ConfigError::InterpreterNotFound {
                name: "python3".into(),
                searched: INTERPRETER_FALLBACKS.join(", "),
            })?;
        Ok(Self::new(interpreter))
    }

    /// Override the scratch directory (default: the OS temp directory).
    pub fn scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    #[inline]
    pub fn interpreter(&self) -> &Path {
        &self.interpreter
    }

    #[inline]
    pub fn scratch_path(&self) -> &Path {
        &self.scratch_dir
    }
}

/// Resolve a `python3` binary: PATH first, then fixed fallbacks, then a
/// bare `python`.
pub fn detect_interpreter() -> Option<PathBuf> {
    if let Ok(path) = which::which("python3") {
        return Some(path);
    }
    for fallback in INTERPRETER_FALLBACKS {
        let path = Path::new(fallback);
        if is_executable(path) {
            return Some(path.to_path_buf());
        }
    }
    which::which("python").ok()
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}
