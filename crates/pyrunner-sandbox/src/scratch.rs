//! Scratch files and pipes for one request.
//!
//! Each request gets a uniquely-named temporary `.py` file holding the user
//! code. The file is owned by a guard and removed on drop, so it disappears
//! on every exit path — success, failure, or panic.
//!
//! ## Pipe hygiene
//!
//! After `fork()`, each side must close the pipe ends it does not use:
//! the parent keeps the read ends of stdout/stderr, the child's write ends
//! become fds 1 and 2 via `dup2`. EOF is only signaled once all write ends
//! are closed.

use std::io::{self, Write as _};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::Path;

use tempfile::NamedTempFile;

/// Per-request code file, deleted when the guard drops.
#[derive(Debug)]
pub struct ScratchFile {
    file: NamedTempFile,
}

impl ScratchFile {
    /// Create a fresh scratch file under `dir` and write `code` to it.
    ///
    /// The name is unique per request and the file is created with owner-only
    /// permissions, so concurrent requests and other tenants never collide.
    pub fn create(dir: &Path, code: &str) -> io::Result<Self> {
        let mut file = tempfile::Builder::new()
            .prefix("pyrunner-")
            .suffix(".py")
            .tempfile_in(dir)?;
        file.write_all(code.as_bytes())?;
        file.flush()?;
        Ok(Self { file })
    }

    #[inline]
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

/// Unidirectional pipe, both ends close-on-exec.
#[derive(Debug)]
pub struct Pipe {
    pub read: OwnedFd,
    pub write: OwnedFd,
}

impl Pipe {
    pub fn new() -> io::Result<Self> {
        let mut fds = [0i32; 2];
        // SAFETY: pipe2 writes to a valid two-element array.
        if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) } != 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: on success both fds are valid and owned by us.
        Ok(Self {
            read: unsafe { OwnedFd::from_raw_fd(fds[0]) },
            write: unsafe { OwnedFd::from_raw_fd(fds[1]) },
        })
    }

    #[inline]
    pub fn read_fd(&self) -> RawFd {
        self.read.as_raw_fd()
    }

    #[inline]
    pub fn write_fd(&self) -> RawFd {
        self.write.as_raw_fd()
    }

    pub fn into_parts(self) -> (OwnedFd, OwnedFd) {
        (self.read, self.write)
    }
}
