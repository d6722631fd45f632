//! Pid file for the rotation daemon, used by `stop` and `restart`

use std::path::Path;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

use crate::error::{FleetError, Result};
use crate::repository::write_atomic;

pub fn write(path: &Path) -> Result<()> {
    write_atomic(path, format!("{}\n", std::process::id()).as_bytes())
}

/// Pid recorded in `path`, or `None` when no daemon left one behind
pub fn read(path: &Path) -> Result<Option<u32>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    raw.trim().parse().map(Some).map_err(|_| {
        FleetError::InvalidConfig(format!(
            "pid file {} holds {:?}, not a process id",
            path.display(),
            raw.trim()
        ))
    })
}

/// Remove the pid file, unless a newer daemon has already replaced it
pub fn release(path: &Path) -> Result<bool> {
    if read(path)? != Some(std::process::id()) {
        return Ok(false);
    }
    std::fs::remove_file(path)?;
    Ok(true)
}

fn to_pid(pid: u32) -> Result<Pid> {
    i32::try_from(pid)
        .ok()
        .filter(|p| *p > 0)
        .map(Pid::from_raw)
        .ok_or_else(|| FleetError::InvalidConfig(format!("refusing to signal pid {}", pid)))
}

fn send(pid: u32, sig: Option<Signal>) -> Result<bool> {
    match signal::kill(to_pid(pid)?, sig) {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(e) => Err(std::io::Error::from(e).into()),
    }
}

/// Send SIGTERM to `pid`; `false` when no such process exists
pub fn terminate(pid: u32) -> Result<bool> {
    send(pid, Some(Signal::SIGTERM))
}

pub fn is_running(pid: u32) -> Result<bool> {
    send(pid, None)
}

/// Poll until `pid` is gone; `false` if it is still running after `timeout`
pub async fn wait_for_exit(pid: u32, timeout: Duration) -> Result<bool> {
    let deadline = tokio::time::Instant::now() + timeout;
    while is_running(pid)? {
        if tokio::time::Instant::now() >= deadline {
            return Ok(false);
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    Ok(true)
}
