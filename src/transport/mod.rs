//! Job server client surface.
//!
//! The core only talks to the server through [`Transport`]. Job traffic goes
//! through [`GuardedClient`], which puts the circuit breaker in front of it;
//! authentication, health, version checks, downloads and telemetry call the
//! transport directly.

pub mod http;

use crate::breaker::CircuitBreaker;
use crate::observer::ProgressSink;
use async_trait::async_trait;
use spool_shared::api_models::TelemetryPayload;
use spool_shared::{AuthOutcome, FetchResult, UpdateInfo};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use http::HttpTransport;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("circuit open, request not attempted")]
    CircuitOpen,
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out")]
    TimedOut,
    #[error("server returned HTTP {0}")]
    Status(u16),
    #[error("malformed response: {0}")]
    Decode(String),
    #[error("server rejected request: {0}")]
    Rejected(String),
    #[error("credentials are not configured")]
    NotAuthenticated,
    #[error("cancelled")]
    Cancelled,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Whether the error says something about reaching the server.
    /// Only these are fed to the circuit breaker.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            TransportError::Network(_)
                | TransportError::TimedOut
                | TransportError::Status(_)
                | TransportError::Decode(_)
        )
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::TimedOut
        } else if e.is_decode() {
            TransportError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            TransportError::Status(status.as_u16())
        } else {
            TransportError::Network(e.to_string())
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn authenticate(
        &self,
        hostname: &str,
        os: &str,
        version: &str,
    ) -> Result<AuthOutcome, TransportError>;

    /// Unauthenticated reachability probe.
    async fn health(&self) -> Result<(), TransportError>;

    async fn fetch_jobs(&self) -> Result<FetchResult, TransportError>;

    async fn report_complete(&self, job_id: i64) -> Result<bool, TransportError>;

    async fn report_failed(&self, job_id: i64, reason: &str) -> Result<bool, TransportError>;

    /// `None` when the check could not be completed.
    async fn check_version(&self, current: &str) -> Option<UpdateInfo>;

    /// Streams `url` into `dest`, resuming a partial file when the server
    /// supports ranges. Returns the final file length.
    async fn download(
        &self,
        url: &str,
        dest: &Path,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<u64, TransportError>;

    /// Best effort; failures are never escalated.
    async fn send_telemetry(&self, payload: &TelemetryPayload) -> bool;

    /// Base URL used to resolve relative download references.
    fn base_url(&self) -> String;
}

/// Breaker-gated access to the job endpoints.
#[derive(Clone)]
pub struct GuardedClient {
    transport: Arc<dyn Transport>,
    breaker: Arc<CircuitBreaker>,
}

impl GuardedClient {
    pub fn new(transport: Arc<dyn Transport>, breaker: Arc<CircuitBreaker>) -> Self {
        Self { transport, breaker }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub async fn fetch_jobs(&self) -> Result<FetchResult, TransportError> {
        if !self.breaker.allow() {
            return Err(TransportError::CircuitOpen);
        }
        let result = self.transport.fetch_jobs().await;
        self.record(&result);
        result
    }

    pub async fn report_complete(&self, job_id: i64) -> Result<bool, TransportError> {
        if !self.breaker.allow() {
            return Err(TransportError::CircuitOpen);
        }
        let result = self.transport.report_complete(job_id).await;
        self.record(&result);
        result
    }

    pub async fn report_failed(&self, job_id: i64, reason: &str) -> Result<bool, TransportError> {
        if !self.breaker.allow() {
            return Err(TransportError::CircuitOpen);
        }
        let result = self.transport.report_failed(job_id, reason).await;
        self.record(&result);
        result
    }

    fn record<T>(&self, result: &Result<T, TransportError>) {
        match result {
            Ok(_) => self.breaker.record_success(),
            Err(e) if e.is_connectivity() => self.breaker.record_failure(),
            Err(_) => {}
        }
    }
}
