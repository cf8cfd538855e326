//! Named recurring tasks with a shared shutdown signal.
//!
//! Every tick is spawned so a slow run never holds back the timer; tasks
//! that must not overlap guard themselves (see [`crate::poller::Poller`]).
//! After shutdown no task fires again, and ticks already running are
//! allowed to finish.

use std::future::Future;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};

pub struct Scheduler {
    shutdown_tx: broadcast::Sender<()>,
    tasks: Vec<(String, JoinHandle<()>)>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            shutdown_tx,
            tasks: Vec::new(),
        }
    }

    /// Sender that stops every task when fired. Handed to components that
    /// may end the process, such as the update orchestrator.
    pub fn shutdown_sender(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    pub fn task_names(&self) -> Vec<&str> {
        self.tasks.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Runs `task` after `initial_delay`, then every `period`.
    pub fn every<F, Fut>(
        &mut self,
        name: impl Into<String>,
        initial_delay: Duration,
        period: Duration,
        task: F,
    ) where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let task_name = name.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            let mut in_flight = JoinSet::new();
            let mut interval = tokio::time::interval_at(Instant::now() + initial_delay, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::debug!(task = %task_name, "Scheduled task shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        in_flight.spawn(task());
                    }
                    Some(result) = in_flight.join_next(), if !in_flight.is_empty() => {
                        log_join(&task_name, result);
                    }
                }
            }

            while let Some(result) = in_flight.join_next().await {
                log_join(&task_name, result);
            }
        });
        self.tasks.push((name, handle));
    }

    /// Signals every task and waits for them, including running ticks.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        for (name, handle) in self.tasks {
            if let Err(e) = handle.await {
                tracing::error!(task = %name, "Scheduled task ended abnormally: {}", e);
            }
        }
        tracing::info!("Scheduler stopped");
    }
}

fn log_join(task: &str, result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        tracing::error!(task, "Scheduled run panicked: {}", e);
    }
}
