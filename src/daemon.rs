// ABOUTME: Background daemon management: pid file, detachment, stop, status
// ABOUTME: Unix only; the legacy deployment wrapped a service manager on Windows

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};

/// Directory holding the daemon pid and log files (`~/.esl-sync/`).
pub fn daemon_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Failed to determine home directory")?;
    let dir = home.join(".esl-sync");
    if !dir.exists() {
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create daemon directory {:?}", dir))?;
    }
    Ok(dir)
}

pub fn pid_file_path() -> Result<PathBuf> {
    Ok(daemon_dir()?.join("esl-sync.pid"))
}

pub fn log_file_path() -> Result<PathBuf> {
    Ok(daemon_dir()?.join("esl-sync.log"))
}

#[cfg(unix)]
fn is_process_running(pid: i32) -> bool {
    // signal 0 probes for existence without touching the process
    unsafe { libc::kill(pid, 0) == 0 }
}

#[cfg(not(unix))]
fn is_process_running(_pid: i32) -> bool {
    false
}

/// Reads the PID from the pid file, if one exists.
pub fn read_pid() -> Result<Option<i32>> {
    let pid_file = pid_file_path()?;
    if !pid_file.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&pid_file)
        .with_context(|| format!("Failed to read pid file {:?}", pid_file))?;
    let pid: i32 = content
        .trim()
        .parse()
        .with_context(|| format!("Invalid pid in file: {}", content.trim()))?;
    Ok(Some(pid))
}

pub fn remove_pid_file() -> Result<()> {
    let pid_file = pid_file_path()?;
    if pid_file.exists() {
        fs::remove_file(&pid_file)
            .with_context(|| format!("Failed to remove pid file {:?}", pid_file))?;
    }
    Ok(())
}

#[derive(Debug)]
pub struct DaemonStatus {
    pub running: bool,
    pub pid: Option<i32>,
    pub pid_file_exists: bool,
}

pub fn check_status() -> Result<DaemonStatus> {
    let pid_file_exists = pid_file_path()?.exists();
    let (running, pid) = match read_pid()? {
        Some(pid) => (is_process_running(pid), Some(pid)),
        None => (false, None),
    };
    Ok(DaemonStatus {
        running,
        pid,
        pid_file_exists,
    })
}

/// Stops a running daemon; returns false when none was running.
#[cfg(unix)]
pub fn stop_daemon() -> Result<bool> {
    let status = check_status()?;
    if !status.running {
        if status.pid_file_exists {
            remove_pid_file()?;
            println!("Removed stale pid file (process was not running)");
        }
        return Ok(false);
    }

    let pid = status.pid.unwrap_or_default();
    println!("Sending SIGTERM to daemon (PID: {})", pid);
    let result = unsafe { libc::kill(pid, libc::SIGTERM) };
    if result != 0 {
        anyhow::bail!(
            "Failed to send SIGTERM to process {}: {}",
            pid,
            std::io::Error::last_os_error()
        );
    }

    // give it a graceful window, then force it
    let start = std::time::Instant::now();
    let timeout = std::time::Duration::from_secs(10);
    while is_process_running(pid) {
        if start.elapsed() > timeout {
            println!("Process did not exit within 10 seconds, sending SIGKILL");
            unsafe { libc::kill(pid, libc::SIGKILL) };
            std::thread::sleep(std::time::Duration::from_millis(500));
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(100));
    }

    remove_pid_file()?;
    Ok(true)
}

#[cfg(not(unix))]
pub fn stop_daemon() -> Result<bool> {
    anyhow::bail!("Daemon mode is only supported on Unix; use a service wrapper instead")
}

/// Detaches the current process into the background, redirecting stdout and
/// stderr to the daemon log file.
#[cfg(unix)]
pub fn daemonize() -> Result<()> {
    use daemonize::Daemonize;
    use std::fs::OpenOptions;

    let pid_file = pid_file_path()?;
    let log_file = log_file_path()?;

    let status = check_status()?;
    if status.running {
        anyhow::bail!(
            "Daemon is already running (PID: {}). Stop it first with `run --stop`.",
            status.pid.unwrap_or_default()
        );
    }
    if status.pid_file_exists {
        remove_pid_file()?;
    }

    let stdout = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file)
        .with_context(|| format!("Failed to open log file {:?}", log_file))?;
    let stderr = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file)
        .with_context(|| format!("Failed to open log file {:?}", log_file))?;

    println!("Starting daemon...");
    println!("PID file: {:?}", pid_file);
    println!("Log file: {:?}", log_file);

    Daemonize::new()
        .pid_file(&pid_file)
        .chown_pid_file(true)
        .working_directory(".")
        .stdout(stdout)
        .stderr(stderr)
        .start()
        .context("Failed to daemonize process")?;

    Ok(())
}

#[cfg(not(unix))]
pub fn daemonize() -> Result<()> {
    anyhow::bail!("Daemon mode is only supported on Unix; use a service wrapper instead")
}

/// Prints daemon liveness plus the tail of its log file.
pub fn print_status() -> Result<()> {
    let status = check_status()?;
    let log_file = log_file_path()?;

    if status.running {
        println!("Daemon status: RUNNING");
        println!("PID: {}", status.pid.unwrap_or_default());
        println!("Log file: {:?}", log_file);
        if log_file.exists() {
            println!("\nRecent log entries:");
            println!("-------------------");
            let content = fs::read_to_string(&log_file)?;
            let lines: Vec<&str> = content.lines().collect();
            let start = lines.len().saturating_sub(10);
            for line in &lines[start..] {
                println!("{}", line);
            }
        }
    } else {
        println!("Daemon status: NOT RUNNING");
        if status.pid_file_exists {
            println!(
                "Note: stale pid file exists (PID {} is not running)",
                status.pid.unwrap_or(0)
            );
            println!("Run with --stop to clean it up");
        }
    }
    Ok(())
}

/// Removes daemon bookkeeping on normal shutdown.
pub fn cleanup() -> Result<()> {
    remove_pid_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_live_under_the_daemon_dir() {
        let pid = pid_file_path().unwrap();
        assert!(pid.to_string_lossy().ends_with("esl-sync.pid"));
        let log = log_file_path().unwrap();
        assert!(log.to_string_lossy().ends_with("esl-sync.log"));
    }

    #[test]
    fn check_status_never_panics_without_a_daemon() {
        let status = check_status().unwrap();
        // can't assert liveness in a shared environment, only coherence
        if status.pid.is_none() {
            assert!(!status.running);
        }
    }
}
