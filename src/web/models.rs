//! Response bodies of the local status API.

use crate::breaker::CircuitState;
use crate::observer::AgentStatus;
use crate::stats::StatsSnapshot;
use crate::update::orchestrator::UpdateState;
use serde::Serialize;

#[derive(Serialize, Debug, Clone)]
pub struct StatusResponse {
    pub status: AgentStatus,
    pub version: String,
    pub circuit: CircuitState,
    pub consecutive_failures: u32,
    /// Only present while the circuit is open.
    pub cooldown_remaining_ms: Option<u64>,
    pub update: Option<UpdateState>,
    pub stats: StatsSnapshot,
}

#[derive(Serialize, Debug, Clone)]
pub struct PrintersResponse {
    pub default: Option<String>,
    pub printers: Vec<String>,
}

/// Result of a manually triggered poll cycle.
#[derive(Serialize, Debug, Clone)]
pub struct PollResponse {
    pub outcome: String,
    pub dispatched: usize,
}
