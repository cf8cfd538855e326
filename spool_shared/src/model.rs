//! Domain types exchanged between the transport, the job pipeline and the
//! update orchestrator.

use serde::{Deserialize, Serialize};

fn default_format() -> String { "text".to_string() }
fn default_copies() -> u32 { 1 }
fn default_priority() -> i32 { 5 }

/// Paper width used when a job does not carry one.
pub const DEFAULT_PAPER_WIDTH_MM: u32 = 80;

/// One unit of remote-queued work. Fetched read-only; only mutated on the
/// server through an outcome report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    #[serde(rename = "conteudo", default)]
    pub content: String,
    #[serde(rename = "formato", default = "default_format")]
    pub format: String,
    #[serde(rename = "impressora_nome", default)]
    pub printer_name: Option<String>,
    #[serde(rename = "copias", default = "default_copies")]
    pub copies: u32,
    #[serde(default)]
    pub created_at: String,
    #[serde(rename = "largura_papel", default)]
    pub paper_width: Option<u32>,
    #[serde(rename = "tipo_documento", default)]
    pub document_type: Option<String>,
    #[serde(rename = "documento_id", default)]
    pub document_id: Option<i64>,
    #[serde(rename = "prioridade", default = "default_priority")]
    pub priority: i32,
    /// Server-side attempt counter. Independent of the local retry loop.
    #[serde(rename = "tentativas", default)]
    pub attempts: u32,
    #[serde(rename = "impressora_id", default)]
    pub printer_id: Option<i64>,
    #[serde(rename = "impressora_modelo", default)]
    pub printer_model: Option<String>,
}

impl Job {
    /// Builds a plain text job, mostly useful for tests and diagnostics.
    pub fn text(id: i64, content: impl Into<String>) -> Self {
        Self {
            id,
            content: content.into(),
            format: default_format(),
            printer_name: None,
            copies: 1,
            created_at: String::new(),
            paper_width: None,
            document_type: None,
            document_id: None,
            priority: default_priority(),
            attempts: 0,
            printer_id: None,
            printer_model: None,
        }
    }

    pub fn paper_width_mm(&self) -> u32 {
        self.paper_width.unwrap_or(DEFAULT_PAPER_WIDTH_MM)
    }

    /// Copy count with the `>= 1` floor applied.
    pub fn effective_copies(&self) -> u32 {
        self.copies.max(1)
    }
}

/// Result of one fetch call. Jobs keep server-delivery order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchResult {
    pub success: bool,
    pub jobs: Vec<Job>,
    pub total: Option<u64>,
    pub error: Option<String>,
}

impl FetchResult {
    pub fn ok(jobs: Vec<Job>) -> Self {
        Self {
            success: true,
            total: Some(jobs.len() as u64),
            jobs,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            jobs: Vec::new(),
            total: None,
            error: Some(error.into()),
        }
    }
}

/// Outcome of a version check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateInfo {
    #[serde(rename = "update_available", default)]
    pub available: bool,
    #[serde(default)]
    pub latest_version: String,
    /// Absolute URL or a path relative to the API base.
    #[serde(default)]
    pub download_url: String,
    #[serde(default)]
    pub release_notes: String,
    #[serde(rename = "force_update", default)]
    pub force: bool,
}

/// Download progress snapshot. `total` is `None` when the server omits the
/// content length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadProgress {
    pub received: u64,
    pub total: Option<u64>,
}

impl DownloadProgress {
    /// Percentage in `0..=100`, or `None` for an indeterminate download.
    pub fn percent(&self) -> Option<u8> {
        match self.total {
            Some(0) | None => None,
            Some(total) => Some(((self.received.min(total) * 100) / total) as u8),
        }
    }

    /// Legacy integer total, `-1` when unknown.
    pub fn total_or_unknown(&self) -> i64 {
        self.total.map(|t| t as i64).unwrap_or(-1)
    }
}

/// Result of the authentication handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthOutcome {
    pub authenticated: bool,
    pub client_id: Option<i64>,
    pub client_name: Option<String>,
    pub client_location: Option<String>,
    pub client_description: Option<String>,
    pub error: Option<String>,
}
