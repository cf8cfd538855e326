//! Per-job retry loop.
//!
//! A job gets `max_retries` attempts with a linear backoff of one second per
//! previous attempt. Device faults stay inside this loop. The terminal
//! outcome is reported to the server through the breaker-gated client, and
//! a failed report is only logged: the job is already finished locally.

use crate::observer::{AgentEvent, AgentObserver};
use crate::printer::{Printer, PrinterError};
use crate::stats::AgentStats;
use crate::transport::GuardedClient;
use spool_shared::{Job, JobState};
use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

/// Backoff unit; attempt `n` waits `n` of these first.
pub const RETRY_BACKOFF_STEP: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub max_retries: u32,
    pub copy_delay: Duration,
    pub default_printer: Option<String>,
    /// Used for jobs that arrive without a copy count.
    pub default_copies: u32,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            copy_delay: Duration::from_millis(500),
            default_printer: None,
            default_copies: 1,
        }
    }
}

impl From<&spool_shared::AgentConfig> for ProcessorSettings {
    fn from(config: &spool_shared::AgentConfig) -> Self {
        Self {
            max_retries: config.max_retries.max(1),
            copy_delay: config.copy_delay(),
            default_printer: config.default_printer.clone(),
            default_copies: config.default_copies.max(1),
        }
    }
}

pub struct JobProcessor {
    client: GuardedClient,
    printer: Arc<dyn Printer>,
    observer: Arc<dyn AgentObserver>,
    stats: Arc<AgentStats>,
    settings: ProcessorSettings,
}

impl JobProcessor {
    pub fn new(
        client: GuardedClient,
        printer: Arc<dyn Printer>,
        observer: Arc<dyn AgentObserver>,
        stats: Arc<AgentStats>,
        settings: ProcessorSettings,
    ) -> Self {
        Self {
            client,
            printer,
            observer,
            stats,
            settings,
        }
    }

    pub fn settings(&self) -> &ProcessorSettings {
        &self.settings
    }

    /// Runs the retry loop for one job and returns its terminal state.
    pub async fn process(&self, job: &Job) -> JobState {
        let job = self.with_default_copies(job);
        let job: &Job = &job;
        let max_retries = self.settings.max_retries.max(1);
        let mut last_error = String::new();

        for attempt in 0..max_retries {
            if attempt > 0 {
                tokio::time::sleep(RETRY_BACKOFF_STEP * attempt).await;
            }
            tracing::debug!(job_id = job.id, attempt = attempt + 1, max_retries, "Attempting job");

            match self.attempt(job).await {
                Ok(device) => {
                    self.finish_completed(job, device).await;
                    return JobState::Completed;
                }
                Err(e) => {
                    last_error = e.to_string();
                    if attempt + 1 < max_retries {
                        tracing::warn!(
                            job_id = job.id,
                            attempt = attempt + 1,
                            max_retries,
                            "Print attempt failed: {}",
                            last_error
                        );
                    }
                }
            }
        }

        let reason = format!("failed after {} attempts: {}", max_retries, last_error);
        self.finish_failed(job, &reason).await;
        JobState::Failed(reason)
    }

    fn with_default_copies<'a>(&self, job: &'a Job) -> Cow<'a, Job> {
        if job.copies > 0 {
            return Cow::Borrowed(job);
        }
        let mut job = job.clone();
        job.copies = self.settings.default_copies.max(1);
        Cow::Owned(job)
    }

    async fn attempt(&self, job: &Job) -> Result<String, PrinterError> {
        let device = self.resolve_device(job).ok_or(PrinterError::NoDevice)?;
        self.printer.print(job, &device, self.settings.copy_delay).await?;
        Ok(device)
    }

    fn resolve_device(&self, job: &Job) -> Option<String> {
        job.printer_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .map(str::to_string)
            .or_else(|| self.settings.default_printer.clone())
            .or_else(|| self.printer.default_printer())
    }

    async fn finish_completed(&self, job: &Job, device: String) {
        match self.client.report_complete(job.id).await {
            Ok(_) => tracing::debug!(job_id = job.id, "Completion reported"),
            Err(e) => tracing::warn!(job_id = job.id, "Could not report completion: {}", e),
        }
        self.stats.record_processed();
        tracing::info!(job_id = job.id, printer = %device, copies = job.effective_copies(), "Job printed");
        self.observer.on_event(AgentEvent::JobCompleted {
            job_id: job.id,
            printer: device,
            copies: job.effective_copies(),
        });
    }

    async fn finish_failed(&self, job: &Job, reason: &str) {
        tracing::error!(job_id = job.id, "Job {}", reason);
        match self.client.report_failed(job.id, reason).await {
            Ok(_) => tracing::debug!(job_id = job.id, "Failure reported"),
            Err(e) => tracing::warn!(job_id = job.id, "Could not report failure: {}", e),
        }
        self.stats.record_failed();
        self.observer.on_event(AgentEvent::JobFailed {
            job_id: job.id,
            reason: reason.to_string(),
        });
    }
}
