//! Single-flight fetch-and-dispatch cycle.

use crate::job_processor::JobProcessor;
use crate::observer::{AgentEvent, AgentObserver, AgentStatus};
use crate::stats::AgentStats;
use crate::transport::{GuardedClient, TransportError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// What one tick ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Another cycle still held the slot.
    Skipped,
    CircuitOpen,
    Idle,
    Dispatched(usize),
    FetchFailed,
}

pub struct Poller {
    client: GuardedClient,
    processor: Arc<JobProcessor>,
    observer: Arc<dyn AgentObserver>,
    stats: Arc<AgentStats>,
    slot: Mutex<()>,
    degraded: AtomicBool,
}

impl Poller {
    pub fn new(
        client: GuardedClient,
        processor: Arc<JobProcessor>,
        observer: Arc<dyn AgentObserver>,
        stats: Arc<AgentStats>,
    ) -> Self {
        Self {
            client,
            processor,
            observer,
            stats,
            slot: Mutex::new(()),
            degraded: AtomicBool::new(false),
        }
    }

    /// Runs one cycle unless one is already in flight.
    pub async fn tick(&self) -> CycleOutcome {
        let Ok(_guard) = self.slot.try_lock() else {
            tracing::trace!("Previous poll cycle still running, skipping tick");
            return CycleOutcome::Skipped;
        };

        let fetched = match self.client.fetch_jobs().await {
            Ok(result) => result,
            Err(TransportError::CircuitOpen) => {
                self.observer.on_event(AgentEvent::CircuitOpen);
                return CycleOutcome::CircuitOpen;
            }
            Err(e) => {
                tracing::warn!("Failed to fetch jobs: {}", e);
                self.set_degraded(true);
                return CycleOutcome::FetchFailed;
            }
        };
        self.stats.mark_polled();
        self.set_degraded(false);

        if fetched.jobs.is_empty() {
            return CycleOutcome::Idle;
        }

        let count = fetched.jobs.len();
        tracing::info!(count, "Processing fetched jobs");
        for job in &fetched.jobs {
            self.processor.process(job).await;
        }
        CycleOutcome::Dispatched(count)
    }

    fn set_degraded(&self, degraded: bool) {
        if self.degraded.swap(degraded, Ordering::SeqCst) != degraded {
            let status = if degraded { AgentStatus::Degraded } else { AgentStatus::Operational };
            self.observer.on_event(AgentEvent::StatusChanged(status));
        }
    }
}
