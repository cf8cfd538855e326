//! The `apply-update` side of the self-update handoff.
//!
//! Runs in a short-lived detached process:
//! 1. wait until the agent process is gone,
//! 2. copy the artifact over the executable, retrying while the file is locked,
//! 3. relaunch the executable and clean up.

use super::installer::detached_command;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HelperError {
    #[error("process {pid} still running after {waited:?}")]
    StillRunning { pid: u32, waited: Duration },
    #[error("could not replace {target} after {attempts} attempts: {source}")]
    Copy {
        target: PathBuf,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },
    #[error("could not relaunch {0}: {1}")]
    Relaunch(PathBuf, std::io::Error),
}

#[derive(Debug, Clone)]
pub struct HelperPlan {
    pub wait_pid: u32,
    pub artifact: PathBuf,
    pub target: PathBuf,
    pub copy_retries: u32,
    pub retry_delay: Duration,
    pub poll_interval: Duration,
    pub max_wait: Duration,
    pub relaunch_args: Vec<OsString>,
}

/// Answers whether a process is still alive.
pub trait ProcessProbe {
    fn is_running(&mut self, pid: u32) -> bool;
}

pub struct SysinfoProbe {
    system: System,
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self { system: System::new() }
    }
}

impl ProcessProbe for SysinfoProbe {
    fn is_running(&mut self, pid: u32) -> bool {
        let pid = Pid::from_u32(pid);
        self.system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        self.system
            .process(pid)
            .is_some_and(|p| !matches!(p.status(), ProcessStatus::Zombie | ProcessStatus::Dead))
    }
}

/// Runs the whole protocol. A failed copy still relaunches the old
/// executable so the host is not left without an agent.
pub async fn apply(plan: &HelperPlan, probe: &mut dyn ProcessProbe) -> Result<(), HelperError> {
    if let Err(e) = wait_for_exit(plan.wait_pid, probe, plan.poll_interval, plan.max_wait).await {
        tracing::error!("{}", e);
        cleanup(&plan.artifact);
        return Err(e);
    }
    tracing::info!(pid = plan.wait_pid, "Agent exited, replacing executable");

    let copied = replace_with_retry(&plan.artifact, &plan.target, plan.copy_retries, plan.retry_delay).await;
    if let Err(e) = &copied {
        tracing::error!("{}", e);
    }

    let relaunched = relaunch(&plan.target, &plan.relaunch_args);
    cleanup(&plan.artifact);
    remove_self();

    copied?;
    relaunched
}

pub async fn wait_for_exit(
    pid: u32,
    probe: &mut dyn ProcessProbe,
    poll_interval: Duration,
    max_wait: Duration,
) -> Result<(), HelperError> {
    let started = tokio::time::Instant::now();
    while probe.is_running(pid) {
        let waited = started.elapsed();
        if waited >= max_wait {
            return Err(HelperError::StillRunning { pid, waited });
        }
        tokio::time::sleep(poll_interval).await;
    }
    Ok(())
}

/// Copies `artifact` next to `target` and renames it into place.
pub fn replace_executable(artifact: &Path, target: &Path) -> std::io::Result<()> {
    let dir = target
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let temp = tempfile::NamedTempFile::new_in(dir)?;
    std::fs::copy(artifact, temp.path())?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(temp.path(), std::fs::Permissions::from_mode(0o755))?;
    }
    temp.persist(target).map_err(|e| e.error)?;
    Ok(())
}

pub async fn replace_with_retry(
    artifact: &Path,
    target: &Path,
    retries: u32,
    retry_delay: Duration,
) -> Result<(), HelperError> {
    let attempts = retries.max(1);
    let mut attempt = 1;
    loop {
        match replace_executable(artifact, target) {
            Ok(()) => return Ok(()),
            Err(source) if attempt >= attempts => {
                return Err(HelperError::Copy {
                    target: target.to_path_buf(),
                    attempts,
                    source,
                });
            }
            Err(e) => {
                tracing::warn!(attempt, attempts, "Executable still locked: {}", e);
                tokio::time::sleep(retry_delay).await;
                attempt += 1;
            }
        }
    }
}

fn relaunch(target: &Path, args: &[OsString]) -> Result<(), HelperError> {
    let mut cmd = detached_command(target);
    cmd.args(args);
    match cmd.spawn() {
        Ok(child) => {
            tracing::info!(pid = child.id(), "Agent relaunched");
            Ok(())
        }
        Err(e) => Err(HelperError::Relaunch(target.to_path_buf(), e)),
    }
}

fn cleanup(artifact: &Path) {
    if let Err(e) = std::fs::remove_file(artifact) {
        tracing::debug!(path = %artifact.display(), "Could not remove artifact: {}", e);
    }
}

fn remove_self() {
    let Ok(exe) = std::env::current_exe() else {
        return;
    };
    if let Err(e) = std::fs::remove_file(&exe) {
        // Windows keeps running images locked; the next update overwrites it.
        tracing::debug!(path = %exe.display(), "Could not remove helper binary: {}", e);
    }
}
