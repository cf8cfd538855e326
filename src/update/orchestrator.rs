use super::{
    is_different_version, is_newer_version, StagedUpdate, UpdateError, UpdateInstaller,
    MIN_ARTIFACT_BYTES,
};
use crate::observer::{AgentEvent, AgentObserver, AgentStatus, ProgressSink, UpdatePrompt};
use crate::transport::http::resolve_download_url;
use crate::transport::{Transport, TransportError};
use spool_shared::UpdateInfo;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

const PART_SUFFIX: &str = ".part";
const ARTIFACT_PREFIX: &str = "spool-agent-";

#[derive(Debug, Clone)]
pub struct UpdateSettings {
    pub current_version: String,
    pub update_dir: PathBuf,
    pub download_timeout: Duration,
    pub min_artifact_bytes: u64,
}

impl UpdateSettings {
    pub fn from_config(config: &spool_shared::AgentConfig) -> Self {
        Self {
            current_version: spool_shared::AGENT_VERSION.to_string(),
            update_dir: config.update_dir(),
            download_timeout: config.download_timeout(),
            min_artifact_bytes: MIN_ARTIFACT_BYTES,
        }
    }
}

/// Where the orchestrator currently is in its state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateState {
    Idle,
    Checking,
    Offered,
    Downloading,
    Validating,
    Applying,
    Exited,
}

/// How one run of [`UpdateOrchestrator::run_once`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// A check or download was already in progress.
    Busy,
    CheckFailed,
    UpToDate,
    /// The offered version was declined earlier in this process.
    Suppressed(String),
    Declined(String),
    Cancelled,
    Failed(String),
    /// Helper launched; the agent is shutting down.
    Applied(String),
}

pub struct UpdateOrchestrator {
    transport: Arc<dyn Transport>,
    prompt: Arc<dyn UpdatePrompt>,
    progress: Arc<dyn ProgressSink>,
    observer: Arc<dyn AgentObserver>,
    installer: Arc<dyn UpdateInstaller>,
    settings: UpdateSettings,
    declined: Mutex<Option<String>>,
    state: Mutex<UpdateState>,
    in_flight: tokio::sync::Mutex<()>,
    shutdown_tx: Option<broadcast::Sender<()>>,
    /// Cancelled when the agent stops. The only thing that can stop a
    /// forced download besides its timeout.
    process_token: CancellationToken,
}

impl UpdateOrchestrator {
    pub fn new(
        transport: Arc<dyn Transport>,
        prompt: Arc<dyn UpdatePrompt>,
        progress: Arc<dyn ProgressSink>,
        observer: Arc<dyn AgentObserver>,
        installer: Arc<dyn UpdateInstaller>,
        settings: UpdateSettings,
    ) -> Self {
        Self {
            transport,
            prompt,
            progress,
            observer,
            installer,
            settings,
            declined: Mutex::new(None),
            state: Mutex::new(UpdateState::Idle),
            in_flight: tokio::sync::Mutex::new(()),
            shutdown_tx: None,
            process_token: CancellationToken::new(),
        }
    }

    /// Lets a successful install stop the agent.
    pub fn with_shutdown(mut self, shutdown_tx: broadcast::Sender<()>, process_token: CancellationToken) -> Self {
        self.shutdown_tx = Some(shutdown_tx);
        self.process_token = process_token;
        self
    }

    pub fn state(&self) -> UpdateState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn declined_version(&self) -> Option<String> {
        self.declined.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set_state(&self, state: UpdateState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// One full pass: check, decide, download, validate, hand off.
    ///
    /// `cancel` aborts an optional update's download. Forced updates only
    /// stop when the agent itself shuts down.
    pub async fn run_once(&self, cancel: &CancellationToken) -> UpdateOutcome {
        let Ok(_guard) = self.in_flight.try_lock() else {
            tracing::debug!("Update check already running");
            return UpdateOutcome::Busy;
        };
        let outcome = self.run_locked(cancel).await;
        if !matches!(outcome, UpdateOutcome::Applied(_)) {
            self.set_state(UpdateState::Idle);
        }
        outcome
    }

    async fn run_locked(&self, cancel: &CancellationToken) -> UpdateOutcome {
        self.set_state(UpdateState::Checking);
        let Some(info) = self.check().await else {
            return UpdateOutcome::CheckFailed;
        };
        if !self.should_install(&info) {
            tracing::debug!(current = %self.settings.current_version, "No update available");
            return UpdateOutcome::UpToDate;
        }

        let version = info.latest_version.clone();
        let download_token = if info.force {
            self.observer.on_event(AgentEvent::ForcedUpdate(info.clone()));
            self.process_token.clone()
        } else {
            if self.declined_version().as_deref() == Some(version.as_str()) {
                tracing::debug!(%version, "Update previously declined, not offering again");
                return UpdateOutcome::Suppressed(version);
            }
            self.set_state(UpdateState::Offered);
            self.observer.on_event(AgentEvent::UpdateOffered(info.clone()));
            if !self.prompt.offer(&info).await {
                *self.declined.lock().unwrap_or_else(|e| e.into_inner()) = Some(version.clone());
                return UpdateOutcome::Declined(version);
            }
            cancel.clone()
        };

        let staged = match self.download_and_validate(&info, &download_token).await {
            Ok(staged) => staged,
            Err(UpdateError::Cancelled) => {
                tracing::info!(%version, "Update download cancelled");
                return UpdateOutcome::Cancelled;
            }
            Err(e) => {
                tracing::error!(%version, "Update failed: {}", e);
                self.alert_failure(&info, &e);
                return UpdateOutcome::Failed(e.to_string());
            }
        };

        match self.apply(&staged) {
            Ok(()) => UpdateOutcome::Applied(version),
            Err(e) => {
                tracing::error!(%version, "Could not hand off update: {}", e);
                self.alert_failure(&info, &e);
                UpdateOutcome::Failed(e.to_string())
            }
        }
    }

    /// Optional offers must be newer. A forced offer only has to differ,
    /// which lets the server roll a broken build back.
    fn should_install(&self, info: &UpdateInfo) -> bool {
        let current = &self.settings.current_version;
        if !info.available {
            return false;
        }
        if info.force {
            is_different_version(&info.latest_version, current)
        } else {
            is_newer_version(&info.latest_version, current)
        }
    }

    /// Asks the server for the latest version. `None` when the check failed.
    pub async fn check(&self) -> Option<UpdateInfo> {
        tracing::debug!(current = %self.settings.current_version, "Checking for updates");
        let info = self.transport.check_version(&self.settings.current_version).await;
        if info.is_none() {
            tracing::info!("Update check did not complete, will retry on schedule");
        }
        info
    }

    pub async fn download_and_validate(
        &self,
        info: &UpdateInfo,
        cancel: &CancellationToken,
    ) -> Result<StagedUpdate, UpdateError> {
        self.set_state(UpdateState::Downloading);
        tokio::fs::create_dir_all(&self.settings.update_dir).await?;
        let artifact = self.artifact_path(&info.latest_version);
        let part = part_path(&artifact);
        remove_stale_artifacts(&self.settings.update_dir, &[artifact.as_path(), part.as_path()]).await;

        let url = resolve_download_url(&self.transport.base_url(), &info.download_url);
        tracing::info!(version = %info.latest_version, %url, "Downloading update");

        let download = self.transport.download(&url, &part, self.progress.as_ref(), cancel);
        match tokio::time::timeout(self.settings.download_timeout, download).await {
            Ok(Ok(_)) => {}
            Ok(Err(TransportError::Cancelled)) => return Err(UpdateError::Cancelled),
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(UpdateError::TimedOut),
        }

        self.set_state(UpdateState::Validating);
        let size = validate_artifact(&part, self.settings.min_artifact_bytes).await?;
        tokio::fs::rename(&part, &artifact).await?;
        tracing::info!(version = %info.latest_version, size, "Update downloaded and validated");
        Ok(StagedUpdate {
            version: info.latest_version.clone(),
            artifact,
            size,
        })
    }

    /// Starts the helper and asks the agent to stop. Never touches the
    /// running executable itself.
    pub fn apply(&self, staged: &StagedUpdate) -> Result<(), UpdateError> {
        self.set_state(UpdateState::Applying);
        self.installer.launch(staged)?;
        self.set_state(UpdateState::Exited);
        tracing::info!(version = %staged.version, "Update helper started, shutting down for restart");
        self.observer.on_event(AgentEvent::StatusChanged(AgentStatus::ShuttingDown));
        if let Some(tx) = &self.shutdown_tx {
            let _ = tx.send(());
        }
        Ok(())
    }

    fn artifact_path(&self, version: &str) -> PathBuf {
        let safe: String = version
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
            .collect();
        self.settings
            .update_dir
            .join(format!("{}{}{}", ARTIFACT_PREFIX, safe, std::env::consts::EXE_SUFFIX))
    }

    fn alert_failure(&self, info: &UpdateInfo, error: &UpdateError) {
        // Only failures the operator has to know about get a blocking notice.
        if info.force || matches!(error, UpdateError::ArtifactTooSmall { .. }) {
            self.observer.on_event(AgentEvent::Alert {
                title: format!("Update to {} failed", info.latest_version),
                message: error.to_string(),
            });
        }
    }
}

fn part_path(artifact: &Path) -> PathBuf {
    let mut name = artifact.as_os_str().to_owned();
    name.push(PART_SUFFIX);
    PathBuf::from(name)
}

/// Rejects (and deletes) artifacts below `min_bytes`.
pub async fn validate_artifact(path: &Path, min_bytes: u64) -> Result<u64, UpdateError> {
    let size = tokio::fs::metadata(path).await?.len();
    if size < min_bytes {
        if let Err(e) = tokio::fs::remove_file(path).await {
            tracing::warn!(path = %path.display(), "Could not delete rejected download: {}", e);
        }
        return Err(UpdateError::ArtifactTooSmall { size, min: min_bytes });
    }
    Ok(size)
}

/// Drops partial downloads and staged builds of other versions so the
/// directory does not grow.
async fn remove_stale_artifacts(dir: &Path, keep: &[&Path]) {
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let ours = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with(ARTIFACT_PREFIX));
        if ours && !keep.contains(&path.as_path()) {
            tracing::debug!(path = %path.display(), "Removing stale update artifact");
            let _ = tokio::fs::remove_file(&path).await;
        }
    }
}
