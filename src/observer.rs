//! Typed events emitted by the core, and the seams a presentation layer
//! plugs into.
//!
//! Observers are called from whichever task produced the event. An adapter
//! that needs a particular thread does its own marshalling.

use async_trait::async_trait;
use serde::Serialize;
use spool_shared::{DownloadProgress, UpdateInfo};
use std::sync::{Arc, RwLock};

/// Coarse agent status as seen by an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Starting,
    AwaitingCredentials,
    Operational,
    Degraded,
    Updating,
    ShuttingDown,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    StatusChanged(AgentStatus),
    JobCompleted { job_id: i64, printer: String, copies: u32 },
    JobFailed { job_id: i64, reason: String },
    /// The breaker rejected a poll cycle. Transient, never escalated.
    CircuitOpen,
    UpdateOffered(UpdateInfo),
    /// One-way notice before a forced update starts downloading.
    ForcedUpdate(UpdateInfo),
    /// Something the operator has to act on.
    Alert { title: String, message: String },
}

pub trait AgentObserver: Send + Sync {
    fn on_event(&self, event: AgentEvent);
}

/// Decides whether an optional update is accepted.
#[async_trait]
pub trait UpdatePrompt: Send + Sync {
    async fn offer(&self, info: &UpdateInfo) -> bool;
}

pub trait ProgressSink: Send + Sync {
    fn report(&self, progress: DownloadProgress);
}

/// Forwards every event to each registered observer in order.
#[derive(Default, Clone)]
pub struct ObserverSet {
    observers: Vec<Arc<dyn AgentObserver>>,
}

impl ObserverSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, observer: Arc<dyn AgentObserver>) -> Self {
        self.observers.push(observer);
        self
    }
}

impl AgentObserver for ObserverSet {
    fn on_event(&self, event: AgentEvent) {
        for observer in &self.observers {
            observer.on_event(event.clone());
        }
    }
}

/// Headless observer: every event becomes a log line.
pub struct LoggingObserver;

impl AgentObserver for LoggingObserver {
    fn on_event(&self, event: AgentEvent) {
        match event {
            AgentEvent::StatusChanged(status) => tracing::info!(?status, "Agent status changed"),
            AgentEvent::JobCompleted { job_id, printer, copies } => {
                tracing::info!(job_id, %printer, copies, "Job printed")
            }
            AgentEvent::JobFailed { job_id, reason } => tracing::error!(job_id, %reason, "Job failed"),
            AgentEvent::CircuitOpen => tracing::debug!("Poll skipped, circuit open"),
            AgentEvent::UpdateOffered(info) => {
                tracing::info!(version = %info.latest_version, notes = %info.release_notes, "Update available")
            }
            AgentEvent::ForcedUpdate(info) => {
                tracing::warn!(version = %info.latest_version, "Mandatory update, installing now")
            }
            AgentEvent::Alert { title, message } => tracing::error!(%title, "{}", message),
        }
    }
}

/// Keeps the latest [`AgentStatus`] for readers such as the status API.
#[derive(Clone)]
pub struct StatusTracker {
    status: Arc<RwLock<AgentStatus>>,
}

impl Default for StatusTracker {
    fn default() -> Self {
        Self {
            status: Arc::new(RwLock::new(AgentStatus::Starting)),
        }
    }
}

impl StatusTracker {
    pub fn current(&self) -> AgentStatus {
        *self.status.read().unwrap_or_else(|e| e.into_inner())
    }
}

impl AgentObserver for StatusTracker {
    fn on_event(&self, event: AgentEvent) {
        if let AgentEvent::StatusChanged(status) = event {
            *self.status.write().unwrap_or_else(|e| e.into_inner()) = status;
        }
    }
}

/// Answers update offers from configuration instead of a person.
pub struct PolicyPrompt {
    pub accept: bool,
}

#[async_trait]
impl UpdatePrompt for PolicyPrompt {
    async fn offer(&self, info: &UpdateInfo) -> bool {
        if self.accept {
            tracing::info!(version = %info.latest_version, "Accepting update by policy");
        } else {
            tracing::info!(
                version = %info.latest_version,
                "Update declined; set auto_accept_updates to install optional updates"
            );
        }
        self.accept
    }
}

const UNKNOWN_TOTAL_LOG_STEP: u64 = 1024 * 1024;

/// Logs download progress in 10 % steps, or every MiB when the size is unknown.
#[derive(Default)]
pub struct LogProgress {
    last_step: std::sync::atomic::AtomicU64,
}

impl ProgressSink for LogProgress {
    fn report(&self, progress: DownloadProgress) {
        use std::sync::atomic::Ordering;
        let step = match progress.percent() {
            Some(pct) => u64::from(pct / 10),
            None => progress.received / UNKNOWN_TOTAL_LOG_STEP,
        };
        if self.last_step.swap(step, Ordering::Relaxed) == step {
            return;
        }
        match progress.percent() {
            Some(pct) => tracing::info!(received = progress.received, "Downloading update: {}%", pct),
            None => tracing::info!(
                received = progress.received,
                total = progress.total_or_unknown(),
                "Downloading update: size unknown"
            ),
        }
    }
}
