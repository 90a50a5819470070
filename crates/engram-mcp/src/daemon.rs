//! Daemon lifecycle
//!
//! PID-file based control of a background `engram-mcp` process. The
//! daemon writes its PID file on startup and unlinks it on clean
//! shutdown; readers tolerate stale PIDs by probing the OS for
//! liveness and rewriting.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

/// PID file location under the data directory
pub fn pid_file(data_dir: &Path) -> PathBuf {
    data_dir.join("engram.pid")
}

/// Probe whether a process is alive (signal 0)
pub fn process_alive(pid: i32) -> bool {
    // SAFETY: kill with signal 0 performs no action, only an
    // existence and permission check.
    unsafe { libc::kill(pid, 0) == 0 }
}

/// Read the PID file; stale entries (dead process, garbage content)
/// are removed and reported as absent.
pub fn read_live_pid(data_dir: &Path) -> Option<i32> {
    let path = pid_file(data_dir);
    let content = std::fs::read_to_string(&path).ok()?;
    match content.trim().parse::<i32>() {
        Ok(pid) if process_alive(pid) => Some(pid),
        Ok(pid) => {
            warn!(pid, "removing stale pid file");
            let _ = std::fs::remove_file(&path);
            None
        }
        Err(_) => {
            warn!("removing unparseable pid file");
            let _ = std::fs::remove_file(&path);
            None
        }
    }
}

/// Write the current process id; called by the daemon on startup.
pub fn write_pid_file(data_dir: &Path) -> Result<()> {
    let path = pid_file(data_dir);
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("cannot create data dir {}", data_dir.display()))?;
    std::fs::write(&path, std::process::id().to_string())
        .with_context(|| format!("cannot write pid file {}", path.display()))
}

/// Unlink the PID file; called by the daemon on clean shutdown.
pub fn remove_pid_file(data_dir: &Path) {
    let _ = std::fs::remove_file(pid_file(data_dir));
}

/// Outcome of a start request
pub enum StartOutcome {
    Started(i32),
    AlreadyRunning(i32),
}

/// Spawn a detached daemon process and wait for its PID file.
pub fn start(data_dir: &Path) -> Result<StartOutcome> {
    if let Some(pid) = read_live_pid(data_dir) {
        return Ok(StartOutcome::AlreadyRunning(pid));
    }

    let server_bin = sibling_binary("engram-mcp")?;
    let child = std::process::Command::new(&server_bin)
        .arg("--daemon")
        .arg("--data-dir")
        .arg(data_dir)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .with_context(|| format!("cannot spawn {}", server_bin.display()))?;

    // The daemon writes its own pid file once it is up
    for _ in 0..40 {
        std::thread::sleep(Duration::from_millis(50));
        if let Some(pid) = read_live_pid(data_dir) {
            info!(pid, "daemon started");
            return Ok(StartOutcome::Started(pid));
        }
    }
    bail!(
        "daemon (pid {}) did not write its pid file in time",
        child.id()
    )
}

/// Outcome of a stop request
pub enum StopOutcome {
    Stopped(i32),
    NotRunning,
}

/// Signal the daemon to terminate and wait for it to exit.
pub fn stop(data_dir: &Path) -> Result<StopOutcome> {
    let Some(pid) = read_live_pid(data_dir) else {
        return Ok(StopOutcome::NotRunning);
    };

    // SAFETY: standard termination signal to a process we own.
    if unsafe { libc::kill(pid, libc::SIGTERM) } != 0 {
        bail!("failed to signal pid {pid}");
    }

    for _ in 0..100 {
        std::thread::sleep(Duration::from_millis(50));
        if !process_alive(pid) {
            // The daemon unlinks on clean shutdown; tolerate a crash
            remove_pid_file(data_dir);
            info!(pid, "daemon stopped");
            return Ok(StopOutcome::Stopped(pid));
        }
    }
    bail!("daemon (pid {pid}) did not exit after SIGTERM")
}

/// Current daemon status. Never fails: unreadable state means "not
/// running".
pub fn status(data_dir: &Path) -> Option<i32> {
    read_live_pid(data_dir)
}

/// Path of a binary installed next to the current executable,
/// falling back to PATH lookup.
fn sibling_binary(name: &str) -> Result<PathBuf> {
    if let Ok(current) = std::env::current_exe() {
        if let Some(dir) = current.parent() {
            let candidate = dir.join(name);
            if candidate.exists() {
                return Ok(candidate);
            }
        }
    }
    Ok(PathBuf::from(name))
}
