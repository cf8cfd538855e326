//! Process-scoped counters owned by the agent.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Debug)]
pub struct AgentStats {
    session_id: Uuid,
    started: Instant,
    started_at: DateTime<Utc>,
    jobs_processed: AtomicU64,
    jobs_failed: AtomicU64,
    last_poll: RwLock<Option<DateTime<Utc>>>,
}

/// Point-in-time copy of [`AgentStats`] for serialization.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatsSnapshot {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub uptime_minutes: u64,
    pub jobs_processed: u64,
    pub jobs_failed: u64,
    pub last_poll: Option<DateTime<Utc>>,
}

impl Default for AgentStats {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentStats {
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4(),
            started: Instant::now(),
            started_at: Utc::now(),
            jobs_processed: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            last_poll: RwLock::new(None),
        }
    }

    pub fn record_processed(&self) {
        self.jobs_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mark_polled(&self) {
        *self.last_poll.write().unwrap_or_else(|e| e.into_inner()) = Some(Utc::now());
    }

    pub fn jobs_processed(&self) -> u64 {
        self.jobs_processed.load(Ordering::Relaxed)
    }

    pub fn jobs_failed(&self) -> u64 {
        self.jobs_failed.load(Ordering::Relaxed)
    }

    pub fn uptime_minutes(&self) -> u64 {
        self.started.elapsed().as_secs() / 60
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            session_id: self.session_id,
            started_at: self.started_at,
            uptime_minutes: self.uptime_minutes(),
            jobs_processed: self.jobs_processed(),
            jobs_failed: self.jobs_failed(),
            last_poll: *self.last_poll.read().unwrap_or_else(|e| e.into_inner()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn uptime_follows_clock() {
        let stats = AgentStats::new();
        tokio::time::advance(Duration::from_secs(15 * 60 + 5)).await;
        assert_eq!(stats.uptime_minutes(), 15);
    }

    #[test]
    fn snapshot_reflects_counters() {
        let stats = AgentStats::new();
        stats.record_processed();
        stats.record_processed();
        stats.record_failed();
        stats.mark_polled();
        let snap = stats.snapshot();
        assert_eq!(snap.jobs_processed, 2);
        assert_eq!(snap.jobs_failed, 1);
        assert!(snap.last_poll.is_some());
    }
}
