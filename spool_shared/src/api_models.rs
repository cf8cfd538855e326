//! Wire models for the job server's client API.

use crate::model::{AuthOutcome, FetchResult, Job, UpdateInfo};
use serde::{Deserialize, Serialize};

/// Body of `GET /api/windows-clients/jobs`.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct JobsResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub jobs: Vec<Job>,
    #[serde(default)]
    pub count: Option<u64>,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
}

impl From<JobsResponse> for FetchResult {
    fn from(resp: JobsResponse) -> Self {
        FetchResult {
            success: resp.success,
            total: resp.total.or(resp.count),
            jobs: resp.jobs,
            error: resp.error,
        }
    }
}

/// Body of `POST /api/windows-clients/auth`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AuthRequest {
    pub api_key: String,
    pub secret_key: String,
    pub hostname: String,
    pub sistema_operacional: String,
    pub versao_client: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ClientInfo {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub nome: Option<String>,
    #[serde(default)]
    pub local: Option<String>,
    #[serde(default)]
    pub descricao: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct AuthResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub authenticated: bool,
    #[serde(default)]
    pub client: Option<ClientInfo>,
    #[serde(default)]
    pub error: Option<String>,
}

impl From<AuthResponse> for AuthOutcome {
    fn from(resp: AuthResponse) -> Self {
        let client = resp.client.unwrap_or_default();
        AuthOutcome {
            authenticated: resp.success && resp.authenticated,
            client_id: client.id,
            client_name: client.nome,
            client_location: client.local,
            client_description: client.descricao,
            error: resp.error,
        }
    }
}

/// Body of `PUT /api/windows-clients/jobs?id={id}`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JobStatusUpdate {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub erro: Option<String>,
}

impl JobStatusUpdate {
    pub fn completed() -> Self {
        Self { status: "concluido".to_string(), erro: None }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self { status: "erro".to_string(), erro: Some(reason.into()) }
    }
}

/// Generic `{success, error}` acknowledgement.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Ack {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// Body of `GET /api/windows-clients/check-update`.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct UpdateCheckResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(flatten)]
    pub info: UpdateInfo,
    #[serde(default)]
    pub error: Option<String>,
}

/// One buffered log line shipped with telemetry.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub timestamp: String,
    pub level: String,
    pub message: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct TelemetryStats {
    pub jobs_impressos: u64,
    pub jobs_erro: u64,
    pub uptime_minutes: u64,
    pub versao: String,
}

/// Body of `POST /api/windows-clients/logs`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TelemetryPayload {
    pub logs: Vec<LogEntry>,
    pub stats: TelemetryStats,
}
