//! Pidfile-based daemon control for the agent binary.

use anyhow::{bail, Context, Result};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::path::Path;
use std::time::Duration;

pub const PIDFILE: &str = "/var/run/ddson.pid";
pub const DEFAULT_LOGFILE: &str = "/var/log/ddson.log";

/// Fork into the background, detach, and write the pidfile. Refuses to
/// start when a pidfile already exists unless `force` is set, in which case
/// the existing daemon is stopped first.
pub fn daemonize(force: bool, logfile: &Path) -> Result<()> {
    if Path::new(PIDFILE).exists() {
        if force {
            tracing::info!("pidfile exists, stopping previous daemon first");
            stop()?;
        } else {
            bail!("pidfile {PIDFILE} already exists; use --force or --stop first");
        }
    }

    let stdout = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(logfile)
        .with_context(|| format!("open daemon log {}", logfile.display()))?;
    let stderr = stdout.try_clone().context("clone daemon log handle")?;

    daemonize::Daemonize::new()
        .pid_file(PIDFILE)
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr)
        .start()
        .context("daemonize")?;
    Ok(())
}

/// Stop a running daemon: read the pidfile, send TERM, escalate to KILL if
/// it ignores us, then remove the pidfile.
pub fn stop() -> Result<()> {
    let raw = std::fs::read_to_string(PIDFILE)
        .with_context(|| format!("read pidfile {PIDFILE}"))?;
    let pid: i32 = raw.trim().parse().context("pidfile does not hold a pid")?;
    let pid = Pid::from_raw(pid);

    if let Err(e) = kill(pid, Signal::SIGTERM) {
        tracing::warn!(%pid, error = %e, "SIGTERM failed; process may already be gone");
    } else {
        std::thread::sleep(Duration::from_millis(500));
        // Signal 0 probes liveness without sending anything.
        if kill(pid, None).is_ok() {
            tracing::warn!(%pid, "daemon ignored SIGTERM, sending SIGKILL");
            let _ = kill(pid, Signal::SIGKILL);
        }
    }

    std::fs::remove_file(PIDFILE).with_context(|| format!("remove pidfile {PIDFILE}"))?;
    Ok(())
}
