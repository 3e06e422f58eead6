//! Backgrounding and PID lock file.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Which side of the fork the caller is on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Forked {
    /// Original process; should exit successfully
    Parent(i32),
    /// Detached daemon process
    Child,
}

/// Detaches from the controlling terminal.
///
/// Must run before any thread is started. A process whose parent is already
/// init is treated as daemonized and left alone.
pub fn daemonize() -> Result<Forked> {
    // SAFETY: getppid has no preconditions.
    if unsafe { libc::getppid() } == 1 {
        return Ok(Forked::Child);
    }

    // SAFETY: called before the runtime starts, the process is single-threaded.
    let pid = unsafe { libc::fork() };
    if pid < 0 {
        return Err(std::io::Error::last_os_error()).context("fork failed");
    }
    if pid > 0 {
        return Ok(Forked::Parent(pid));
    }

    // SAFETY: umask and setsid only touch this process' attributes.
    unsafe {
        libc::umask(0o027);
        if libc::setsid() < 0 {
            return Err(std::io::Error::last_os_error()).context("setsid failed");
        }
    }

    redirect_stdio().context("Failed to detach standard streams")?;
    std::env::set_current_dir("/").context("chdir / failed")?;

    Ok(Forked::Child)
}

fn redirect_stdio() -> std::io::Result<()> {
    let null = OpenOptions::new().read(true).write(true).open("/dev/null")?;
    for fd in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
        // SAFETY: both descriptors are valid for the duration of the call.
        if unsafe { libc::dup2(null.as_raw_fd(), fd) } < 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

/// PID lock file, removed when dropped
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
    _file: File,
}

impl PidFile {
    /// Writes the current process id as `<pid>\n`, readable by owner and group.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o640)
            .open(&path)
            .with_context(|| format!("Could not lock PID lock file {}", path.display()))?;

        writeln!(file, "{}", std::process::id())
            .with_context(|| format!("Could not write PID lock file {}", path.display()))?;

        debug!(path = %path.display(), "PID file written");
        Ok(Self { path, _file: file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to remove PID file");
        }
    }
}
