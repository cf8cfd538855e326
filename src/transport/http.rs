//! reqwest implementation of [`Transport`].

use super::{Transport, TransportError};
use crate::observer::ProgressSink;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::RANGE;
use reqwest::{Client, RequestBuilder, StatusCode};
use spool_shared::api_models::{
    Ack, AuthRequest, AuthResponse, JobStatusUpdate, JobsResponse, TelemetryPayload, UpdateCheckResponse,
};
use spool_shared::{AgentConfig, AuthOutcome, DownloadProgress, FetchResult, UpdateInfo};
use std::path::Path;
use std::sync::RwLock;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
struct Endpoint {
    base_url: String,
    api_key: Option<String>,
    secret_key: Option<String>,
}

impl Endpoint {
    fn from_config(config: &AgentConfig) -> Self {
        Self {
            base_url: config.api_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            secret_key: config.secret_key.clone(),
        }
    }
}

pub struct HttpTransport {
    client: Client,
    /// Separate client so the short request timeout does not cut downloads.
    download_client: Client,
    endpoint: RwLock<Endpoint>,
}

impl HttpTransport {
    pub fn new(config: &AgentConfig) -> Result<Self, TransportError> {
        let user_agent = format!("spool-agent/{}", spool_shared::AGENT_VERSION);
        let client = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(user_agent.clone())
            .build()?;
        let download_client = Client::builder()
            .connect_timeout(config.request_timeout())
            .timeout(config.download_timeout())
            .user_agent(user_agent)
            .build()?;
        Ok(Self {
            client,
            download_client,
            endpoint: RwLock::new(Endpoint::from_config(config)),
        })
    }

    /// Picks up new URL or credentials after the settings file changed.
    pub fn apply_config(&self, config: &AgentConfig) {
        *self.endpoint.write().unwrap_or_else(|e| e.into_inner()) = Endpoint::from_config(config);
    }

    fn endpoint(&self) -> Endpoint {
        self.endpoint.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint().base_url, path)
    }

    fn with_auth(&self, request: RequestBuilder) -> Result<RequestBuilder, TransportError> {
        let endpoint = self.endpoint();
        match (endpoint.api_key, endpoint.secret_key) {
            (Some(key), Some(secret)) => Ok(request.header("X-API-Key", key).header("X-Secret-Key", secret)),
            _ => Err(TransportError::NotAuthenticated),
        }
    }

    async fn put_status(&self, job_id: i64, body: &JobStatusUpdate) -> Result<bool, TransportError> {
        let request = self
            .client
            .put(self.url("/api/windows-clients/jobs"))
            .query(&[("id", job_id)])
            .json(body);
        let response = self.with_auth(request)?.send().await?;
        if !response.status().is_success() {
            return Err(TransportError::Status(response.status().as_u16()));
        }
        // A 2xx with an empty or unexpected body still counts as accepted.
        let text = response.text().await?;
        match serde_json::from_str::<Ack>(&text) {
            Ok(ack) if !ack.success => {
                tracing::warn!(job_id, error = ?ack.error, "Server refused status update");
                Ok(false)
            }
            _ => Ok(true),
        }
    }

    async fn request_update_info(&self, current: &str) -> Result<UpdateCheckResponse, TransportError> {
        let request = self
            .client
            .get(self.url("/api/windows-clients/check-update"))
            .query(&[("version", current)]);
        let response = self.with_auth(request)?.send().await?;
        if !response.status().is_success() {
            return Err(TransportError::Status(response.status().as_u16()));
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn authenticate(
        &self,
        hostname: &str,
        os: &str,
        version: &str,
    ) -> Result<AuthOutcome, TransportError> {
        let endpoint = self.endpoint();
        let (Some(api_key), Some(secret_key)) = (endpoint.api_key, endpoint.secret_key) else {
            return Err(TransportError::NotAuthenticated);
        };
        let body = AuthRequest {
            api_key,
            secret_key,
            hostname: hostname.to_string(),
            sistema_operacional: os.to_string(),
            versao_client: version.to_string(),
        };
        let response = self
            .client
            .post(self.url("/api/windows-clients/auth"))
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(TransportError::Status(response.status().as_u16()));
        }
        let auth: AuthResponse = response.json().await?;
        Ok(auth.into())
    }

    async fn health(&self) -> Result<(), TransportError> {
        let response = self.client.get(self.url("/api/windows-clients/status")).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(TransportError::Status(response.status().as_u16()))
        }
    }

    async fn fetch_jobs(&self) -> Result<FetchResult, TransportError> {
        let request = self.client.get(self.url("/api/windows-clients/jobs"));
        let response = self.with_auth(request)?.send().await?;
        if !response.status().is_success() {
            return Err(TransportError::Status(response.status().as_u16()));
        }
        let body: JobsResponse = response.json().await?;
        if !body.success {
            let reason = body.error.unwrap_or_else(|| "unspecified".to_string());
            return Err(TransportError::Rejected(reason));
        }
        Ok(body.into())
    }

    async fn report_complete(&self, job_id: i64) -> Result<bool, TransportError> {
        self.put_status(job_id, &JobStatusUpdate::completed()).await
    }

    async fn report_failed(&self, job_id: i64, reason: &str) -> Result<bool, TransportError> {
        self.put_status(job_id, &JobStatusUpdate::failed(reason)).await
    }

    async fn check_version(&self, current: &str) -> Option<UpdateInfo> {
        match self.request_update_info(current).await {
            Ok(body) if body.success => Some(body.info),
            Ok(body) => {
                tracing::warn!(error = ?body.error, "Update check refused by server");
                None
            }
            Err(e) => {
                tracing::warn!("Update check failed: {}", e);
                None
            }
        }
    }

    async fn download(
        &self,
        url: &str,
        dest: &Path,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<u64, TransportError> {
        let existing = match tokio::fs::metadata(dest).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };

        let mut request = self.download_client.get(url);
        if existing > 0 {
            request = request.header(RANGE, format!("bytes={}-", existing));
        }
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            response = request.send() => response?,
        };

        let status = response.status();
        if status == StatusCode::RANGE_NOT_SATISFIABLE && existing > 0 {
            // Partial file already holds the whole artifact.
            tracing::debug!(bytes = existing, "Server reports nothing left to resume");
            return Ok(existing);
        }
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        let resumed = status == StatusCode::PARTIAL_CONTENT && existing > 0;
        let offset = if resumed { existing } else { 0 };
        let total = response.content_length().map(|len| len + offset);
        let mut file = if resumed {
            tracing::info!(offset, "Resuming update download");
            tokio::fs::OpenOptions::new().append(true).open(dest).await?
        } else {
            tokio::fs::File::create(dest).await?
        };

        let mut received = offset;
        progress.report(DownloadProgress { received, total });
        let mut stream = response.bytes_stream();
        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => {
                    file.flush().await?;
                    return Err(TransportError::Cancelled);
                }
                chunk = stream.next() => chunk,
            };
            match chunk {
                Some(Ok(bytes)) => {
                    file.write_all(&bytes).await?;
                    received += bytes.len() as u64;
                    progress.report(DownloadProgress { received, total });
                }
                Some(Err(e)) => {
                    file.flush().await?;
                    return Err(e.into());
                }
                None => break,
            }
        }
        file.flush().await?;
        file.sync_all().await?;
        Ok(received)
    }

    async fn send_telemetry(&self, payload: &TelemetryPayload) -> bool {
        let request = self.client.post(self.url("/api/windows-clients/logs")).json(payload);
        let request = match self.with_auth(request) {
            Ok(request) => request,
            Err(_) => return false,
        };
        match request.send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                // Debug level only: a warning here would be captured and re-sent.
                tracing::debug!("Telemetry upload failed: {}", e);
                false
            }
        }
    }

    fn base_url(&self) -> String {
        self.endpoint().base_url
    }
}

/// Joins a server-relative download reference onto the API base URL.
pub fn resolve_download_url(base_url: &str, reference: &str) -> String {
    if reference.starts_with("http://") || reference.starts_with("https://") {
        reference.to_string()
    } else {
        format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            reference.trim_start_matches('/')
        )
    }
}
