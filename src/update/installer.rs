use super::{StagedUpdate, UpdateError};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

/// Hands a validated artifact to whatever replaces the executable.
pub trait UpdateInstaller: Send + Sync {
    fn launch(&self, staged: &StagedUpdate) -> Result<(), UpdateError>;
}

/// Copy-with-retry policy passed to the helper.
#[derive(Debug, Clone)]
pub struct HelperPolicy {
    pub copy_retries: u32,
    pub retry_delay: Duration,
}

impl Default for HelperPolicy {
    fn default() -> Self {
        Self {
            copy_retries: 10,
            retry_delay: Duration::from_secs(2),
        }
    }
}

/// Launches a copy of this binary in `apply-update` mode, detached from the
/// agent, to wait for the agent to exit and swap the executable.
pub struct HelperInstaller {
    target_exe: PathBuf,
    relaunch_args: Vec<OsString>,
    policy: HelperPolicy,
}

impl HelperInstaller {
    pub fn new(target_exe: PathBuf, relaunch_args: Vec<OsString>, policy: HelperPolicy) -> Self {
        Self {
            target_exe,
            relaunch_args,
            policy,
        }
    }

    /// Targets the running executable and relaunches it with the same
    /// arguments it was started with.
    pub fn for_current_process(policy: HelperPolicy) -> Result<Self, UpdateError> {
        let target_exe = std::env::current_exe()?;
        let relaunch_args = std::env::args_os().skip(1).collect();
        Ok(Self::new(target_exe, relaunch_args, policy))
    }

    /// Arguments for the helper process, excluding the program itself.
    pub fn helper_args(&self, staged: &StagedUpdate, wait_pid: u32) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "apply-update".into(),
            "--wait-pid".into(),
            wait_pid.to_string().into(),
            "--artifact".into(),
            staged.artifact.clone().into_os_string(),
            "--target".into(),
            self.target_exe.clone().into_os_string(),
            "--retries".into(),
            self.policy.copy_retries.to_string().into(),
            "--retry-delay-ms".into(),
            self.policy.retry_delay.as_millis().to_string().into(),
        ];
        if !self.relaunch_args.is_empty() {
            args.push("--".into());
            args.extend(self.relaunch_args.iter().cloned());
        }
        args
    }

    /// The helper runs from its own copy so the target can be overwritten.
    fn stage_helper(&self, staged: &StagedUpdate) -> Result<PathBuf, UpdateError> {
        let dir = staged
            .artifact
            .parent()
            .ok_or_else(|| UpdateError::Install("artifact has no parent directory".to_string()))?;
        let helper = dir.join(format!("spool-update-helper{}", std::env::consts::EXE_SUFFIX));
        std::fs::copy(&self.target_exe, &helper)?;
        make_executable(&helper)?;
        make_executable(&staged.artifact)?;
        Ok(helper)
    }
}

impl UpdateInstaller for HelperInstaller {
    fn launch(&self, staged: &StagedUpdate) -> Result<(), UpdateError> {
        let helper = self.stage_helper(staged)?;
        let mut cmd = detached_command(&helper);
        cmd.args(self.helper_args(staged, std::process::id()));
        let child = cmd
            .spawn()
            .map_err(|e| UpdateError::Install(format!("{}: {}", helper.display(), e)))?;
        tracing::info!(pid = child.id(), helper = %helper.display(), "Update helper launched");
        Ok(())
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(windows)]
const DETACHED_PROCESS: u32 = 0x0000_0008;
#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Command with null stdio that outlives its parent.
pub fn detached_command(program: &Path) -> Command {
    let mut cmd = Command::new(program);
    cmd.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        cmd.creation_flags(DETACHED_PROCESS | CREATE_NO_WINDOW);
    }
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn helper_args_carry_protocol_and_relaunch_args() {
        let installer = HelperInstaller::new(
            PathBuf::from("/opt/spool/print-agent"),
            vec!["run".into(), "--config".into(), "/etc/spool.toml".into()],
            HelperPolicy::default(),
        );
        let staged = StagedUpdate {
            version: "2.0.0".into(),
            artifact: PathBuf::from("/tmp/spool-update/spool-agent-2.0.0"),
            size: 11 * 1024 * 1024,
        };
        let args: Vec<String> = installer
            .helper_args(&staged, 4242)
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec![
                "apply-update", "--wait-pid", "4242",
                "--artifact", "/tmp/spool-update/spool-agent-2.0.0",
                "--target", "/opt/spool/print-agent",
                "--retries", "10", "--retry-delay-ms", "2000",
                "--", "run", "--config", "/etc/spool.toml",
            ]
        );
    }
}
