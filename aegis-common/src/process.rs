//! Pid file handling and process liveness checks.
//!
//! The worker daemon records its pid in a file; the control commands and the
//! health checker read it back and probe the process with `kill(pid, 0)`.

use std::{
    fs::{self, File, OpenOptions},
    io,
    os::fd::AsRawFd,
    path::{Path, PathBuf},
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PidFileError {
    #[error("Another instance is already running with pid {0}")]
    AlreadyRunning(i32),

    #[error("Another instance is starting (lock held on {})", .0.display())]
    Contended(PathBuf),

    #[error("Pid file {path} is malformed: {contents:?}")]
    Malformed { path: PathBuf, contents: String },

    #[error("Pid file I/O error: {0}")]
    Io(#[from] io::Error),
}

/// What a pid file says about the process it names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// The pid file names a live process
    Running(i32),
    /// The pid file exists but the process is gone
    Stale(i32),
    /// There is no pid file
    NotRunning,
}

/// Check whether a process exists, without signalling it.
#[must_use]
pub fn is_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }

    // SAFETY: signal 0 performs only the existence and permission checks.
    let rc = unsafe { libc::kill(pid, 0) };
    // EPERM means the process exists but belongs to someone else.
    rc == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Read the pid recorded in `path`, if any.
///
/// # Errors
///
/// Fails if the file cannot be read or does not contain a positive integer.
pub fn read_pid(path: &Path) -> Result<Option<i32>, PidFileError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    match contents.trim().parse::<i32>() {
        Ok(pid) if pid > 0 => Ok(Some(pid)),
        _ => Err(PidFileError::Malformed {
            path: path.to_path_buf(),
            contents,
        }),
    }
}

/// Inspect the pid file at `path`.
///
/// # Errors
///
/// See [`read_pid`].
pub fn inspect(path: &Path) -> Result<ProcessState, PidFileError> {
    Ok(match read_pid(path)? {
        Some(pid) if is_alive(pid) => ProcessState::Running(pid),
        Some(pid) => ProcessState::Stale(pid),
        None => ProcessState::NotRunning,
    })
}

/// Pid file owned by the running process; removed again on drop.
///
/// Ownership is an exclusive `flock` on `<pid file>.lock`, held until drop, so
/// two instances starting together cannot both pass the liveness check. The
/// lock file itself is never removed.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
    pid: i32,
    _lock: File,
}

impl PidFile {
    /// Record the current process in `path`.
    ///
    /// A stale pid file left behind by a crashed process is replaced.
    ///
    /// # Errors
    ///
    /// Returns [`PidFileError::AlreadyRunning`] if the file names a live
    /// process other than this one, or an I/O error if it cannot be written.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self, PidFileError> {
        let path = path.into();
        let pid = i32::try_from(std::process::id()).map_err(|e| {
            PidFileError::Io(io::Error::new(io::ErrorKind::InvalidData, e))
        })?;

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let lock_path = path.with_extension("pid.lock");
        let lock = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)?;

        if !try_lock(&lock)? {
            return Err(match read_pid(&path) {
                Ok(Some(existing)) if is_alive(existing) => {
                    PidFileError::AlreadyRunning(existing)
                }
                _ => PidFileError::Contended(lock_path),
            });
        }

        match read_pid(&path) {
            Ok(Some(existing)) if existing != pid && is_alive(existing) => {
                return Err(PidFileError::AlreadyRunning(existing));
            }
            Ok(_) | Err(PidFileError::Malformed { .. }) => {}
            Err(e) => return Err(e),
        }

        let temp = path.with_extension("pid.tmp");
        fs::write(&temp, format!("{pid}\n"))?;
        fs::rename(&temp, &path)?;

        Ok(Self {
            path,
            pid,
            _lock: lock,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub const fn pid(&self) -> i32 {
        self.pid
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        // Only remove the file if it still names us.
        if matches!(read_pid(&self.path), Ok(Some(pid)) if pid == self.pid) {
            let _ = fs::remove_file(&self.path);
        }
    }
}

/// Non-blocking exclusive `flock`; `false` if someone else holds it
fn try_lock(file: &File) -> io::Result<bool> {
    loop {
        // SAFETY: the descriptor is owned by `file` and stays open for the call.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc == 0 {
            return Ok(true);
        }

        let error = io::Error::last_os_error();
        match error.raw_os_error() {
            Some(libc::EINTR) => {}
            Some(libc::EWOULDBLOCK) => return Ok(false),
            _ => return Err(error),
        }
    }
}
