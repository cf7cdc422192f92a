//! Running the worker in the background and controlling it through its pid
//! file.

use std::{
    fs::{File, OpenOptions},
    io,
    os::unix::process::CommandExt,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    thread,
    time::{Duration, Instant},
};

use aegis_common::process::{self, PidFileError, ProcessState};
use serde::Deserialize;
use thiserror::Error;

/// How long `start --daemon` waits for the child to write its pid file
const STARTUP_TIMEOUT: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("Aegis is already running with pid {0}")]
    AlreadyRunning(i32),

    #[error("Aegis is not running")]
    NotRunning,

    #[error(transparent)]
    PidFile(#[from] PidFileError),

    #[error("Failed to spawn the daemon: {0}")]
    Spawn(#[source] io::Error),

    #[error("Daemon exited during startup with {0}")]
    ChildExited(std::process::ExitStatus),

    #[error("Daemon did not write {} within {timeout:?}", .path.display())]
    StartTimeout { path: PathBuf, timeout: Duration },

    #[error("Failed to signal pid {pid}: {source}")]
    Signal {
        pid: i32,
        #[source]
        source: io::Error,
    },
}

mod defaults {
    use std::path::PathBuf;

    pub fn pid_file() -> PathBuf {
        PathBuf::from("/var/run/aegis/aegis.pid")
    }

    pub const fn stop_timeout_secs() -> u64 {
        30
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "defaults::pid_file")]
    pub pid_file: PathBuf,

    /// Where a detached worker writes its output; discarded when unset
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Grace period between SIGTERM and SIGKILL on `stop`
    #[serde(default = "defaults::stop_timeout_secs")]
    pub stop_timeout_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            pid_file: defaults::pid_file(),
            log_file: None,
            stop_timeout_secs: defaults::stop_timeout_secs(),
        }
    }
}

/// How `stop` got rid of the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Exited after SIGTERM
    Terminated(i32),
    /// Ignored SIGTERM for the whole grace period
    Killed(i32),
    /// The pid file named a process that was already gone
    StaleRemoved(i32),
}

fn stdio_for(log_file: Option<&Path>) -> io::Result<(Stdio, Stdio)> {
    let Some(path) = log_file else {
        return Ok((Stdio::null(), Stdio::null()));
    };

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    let file: File = OpenOptions::new().create(true).append(true).open(path)?;
    Ok((Stdio::from(file.try_clone()?), Stdio::from(file)))
}

/// Re-launch the current executable in the background, running `args`.
///
/// The child gets its own process group, so it survives the terminal that
/// started it. Returns the child's pid once it has written the pid file.
///
/// # Errors
///
/// Fails if a live worker already owns the pid file, the child cannot be
/// spawned, or it exits or stays silent during startup.
pub fn spawn_detached<I, S>(config: &DaemonConfig, args: I) -> Result<i32, DaemonError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<std::ffi::OsStr>,
{
    if let ProcessState::Running(pid) = process::inspect(&config.pid_file)? {
        return Err(DaemonError::AlreadyRunning(pid));
    }

    let exe = std::env::current_exe().map_err(DaemonError::Spawn)?;
    let (stdout, stderr) = stdio_for(config.log_file.as_deref()).map_err(DaemonError::Spawn)?;

    let mut child = Command::new(exe)
        .args(args)
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr)
        .process_group(0)
        .spawn()
        .map_err(DaemonError::Spawn)?;

    let expected = i32::try_from(child.id())
        .map_err(|e| DaemonError::Spawn(io::Error::new(io::ErrorKind::InvalidData, e)))?;

    let deadline = Instant::now() + STARTUP_TIMEOUT;
    while Instant::now() < deadline {
        if let Some(status) = child.try_wait().map_err(DaemonError::Spawn)? {
            return Err(DaemonError::ChildExited(status));
        }

        if matches!(process::read_pid(&config.pid_file), Ok(Some(pid)) if pid == expected) {
            return Ok(expected);
        }

        thread::sleep(POLL_INTERVAL);
    }

    Err(DaemonError::StartTimeout {
        path: config.pid_file.clone(),
        timeout: STARTUP_TIMEOUT,
    })
}

fn send_signal(pid: i32, signal: libc::c_int) -> Result<(), DaemonError> {
    // SAFETY: kill has no memory safety requirements; pid is positive
    // because it came from a validated pid file.
    let rc = unsafe { libc::kill(pid, signal) };
    if rc == 0 {
        return Ok(());
    }

    let source = io::Error::last_os_error();
    if source.raw_os_error() == Some(libc::ESRCH) {
        // Already gone
        return Ok(());
    }

    Err(DaemonError::Signal { pid, source })
}

fn wait_for_exit(pid: i32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if !process::is_alive(pid) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn remove_pid_file(path: &Path) -> Result<(), DaemonError> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(PidFileError::Io(e).into()),
        _ => Ok(()),
    }
}

/// Stop the worker named by the pid file.
///
/// The worker gets SIGTERM and `stop_timeout_secs` to finish its current
/// delivery before it is killed. The pid file is removed in every case.
///
/// # Errors
///
/// [`DaemonError::NotRunning`] without a pid file; otherwise signal and pid
/// file errors.
pub fn stop(config: &DaemonConfig) -> Result<StopOutcome, DaemonError> {
    let pid = match process::inspect(&config.pid_file)? {
        ProcessState::Running(pid) => pid,
        ProcessState::Stale(pid) => {
            remove_pid_file(&config.pid_file)?;
            return Ok(StopOutcome::StaleRemoved(pid));
        }
        ProcessState::NotRunning => return Err(DaemonError::NotRunning),
    };

    tracing::info!(pid, "Sending SIGTERM to worker");
    send_signal(pid, libc::SIGTERM)?;

    let outcome = if wait_for_exit(pid, Duration::from_secs(config.stop_timeout_secs)) {
        StopOutcome::Terminated(pid)
    } else {
        tracing::warn!(
            pid,
            timeout_secs = config.stop_timeout_secs,
            "Worker ignored SIGTERM, sending SIGKILL"
        );
        send_signal(pid, libc::SIGKILL)?;
        wait_for_exit(pid, Duration::from_secs(5));
        StopOutcome::Killed(pid)
    };

    remove_pid_file(&config.pid_file)?;
    Ok(outcome)
}

/// What the pid file says about the worker.
///
/// # Errors
///
/// Fails if the pid file exists but cannot be read or parsed.
pub fn status(config: &DaemonConfig) -> Result<ProcessState, DaemonError> {
    Ok(process::inspect(&config.pid_file)?)
}
