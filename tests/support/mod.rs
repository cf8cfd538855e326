// Shared fakes for the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use spool_rs::observer::{AgentEvent, AgentObserver, ProgressSink, UpdatePrompt};
use spool_rs::printer::{Printer, PrinterError};
use spool_rs::transport::{Transport, TransportError};
use spool_shared::api_models::TelemetryPayload;
use spool_shared::{AuthOutcome, DownloadProgress, FetchResult, Job, UpdateInfo};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub enum Report {
    Complete(i64),
    Failed(i64, String),
}

#[derive(Default)]
pub struct FakeTransport {
    pub fetches: Mutex<VecDeque<Result<FetchResult, TransportError>>>,
    pub fetch_calls: AtomicUsize,
    pub fetch_delay: Mutex<Duration>,
    pub reports: Mutex<Vec<Report>>,
    pub fail_reports: AtomicBool,
    pub update: Mutex<Option<UpdateInfo>>,
    pub artifact_size: Mutex<u64>,
    pub downloaded_urls: Mutex<Vec<String>>,
    pub telemetry: Mutex<Vec<TelemetryPayload>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_fetch(&self, result: Result<FetchResult, TransportError>) {
        self.fetches.lock().unwrap().push_back(result);
    }

    pub fn set_fetch_delay(&self, delay: Duration) {
        *self.fetch_delay.lock().unwrap() = delay;
    }

    pub fn offer_update(&self, info: UpdateInfo, artifact_size: u64) {
        *self.update.lock().unwrap() = Some(info);
        *self.artifact_size.lock().unwrap() = artifact_size;
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn reports(&self) -> Vec<Report> {
        self.reports.lock().unwrap().clone()
    }

    fn report(&self, report: Report) -> Result<bool, TransportError> {
        self.reports.lock().unwrap().push(report);
        if self.fail_reports.load(Ordering::SeqCst) {
            Err(TransportError::Network("connection reset".into()))
        } else {
            Ok(true)
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn authenticate(&self, _h: &str, _o: &str, _v: &str) -> Result<AuthOutcome, TransportError> {
        Ok(AuthOutcome { authenticated: true, ..Default::default() })
    }

    async fn health(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn fetch_jobs(&self) -> Result<FetchResult, TransportError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.fetch_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.fetches
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(FetchResult::ok(vec![])))
    }

    async fn report_complete(&self, job_id: i64) -> Result<bool, TransportError> {
        self.report(Report::Complete(job_id))
    }

    async fn report_failed(&self, job_id: i64, reason: &str) -> Result<bool, TransportError> {
        self.report(Report::Failed(job_id, reason.to_string()))
    }

    async fn check_version(&self, _current: &str) -> Option<UpdateInfo> {
        self.update.lock().unwrap().clone()
    }

    async fn download(
        &self,
        url: &str,
        dest: &Path,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<u64, TransportError> {
        self.downloaded_urls.lock().unwrap().push(url.to_string());
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        let size = *self.artifact_size.lock().unwrap();
        progress.report(DownloadProgress { received: 0, total: Some(size) });
        tokio::fs::write(dest, vec![0u8; size as usize]).await?;
        progress.report(DownloadProgress { received: size, total: Some(size) });
        Ok(size)
    }

    async fn send_telemetry(&self, payload: &TelemetryPayload) -> bool {
        self.telemetry.lock().unwrap().push(payload.clone());
        true
    }

    fn base_url(&self) -> String {
        "https://jobs.example.com".to_string()
    }
}

#[derive(Debug, Clone)]
pub struct PrintCall {
    pub job_id: i64,
    pub device: String,
    pub started: Instant,
    pub finished: Instant,
}

/// Printer whose outcomes are scripted per call.
#[derive(Default)]
pub struct FakePrinter {
    pub outcomes: Mutex<VecDeque<Result<(), String>>>,
    pub delays: Mutex<HashMap<i64, Duration>>,
    pub calls: Mutex<Vec<PrintCall>>,
    pub default: Option<String>,
}

impl FakePrinter {
    pub fn with_default(name: &str) -> Self {
        Self { default: Some(name.to_string()), ..Default::default() }
    }

    pub fn without_default() -> Self {
        Self::default()
    }

    pub fn script(&self, outcomes: impl IntoIterator<Item = Result<(), String>>) {
        self.outcomes.lock().unwrap().extend(outcomes);
    }

    pub fn always_fail(&self, times: usize) {
        self.script((0..times).map(|_| Err("paper out".to_string())));
    }

    pub fn delay_job(&self, job_id: i64, delay: Duration) {
        self.delays.lock().unwrap().insert(job_id, delay);
    }

    pub fn calls(&self) -> Vec<PrintCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Printer for FakePrinter {
    async fn print(&self, job: &Job, device: &str, _copy_delay: Duration) -> Result<(), PrinterError> {
        let started = Instant::now();
        let delay = self.delays.lock().unwrap().get(&job.id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.calls.lock().unwrap().push(PrintCall {
            job_id: job.id,
            device: device.to_string(),
            started,
            finished: Instant::now(),
        });
        let outcome = self.outcomes.lock().unwrap().pop_front().unwrap_or(Ok(()));
        outcome.map_err(PrinterError::Rejected)
    }

    fn list_available(&self) -> Vec<String> {
        self.default.iter().cloned().collect()
    }

    fn default_printer(&self) -> Option<String> {
        self.default.clone()
    }
}

#[derive(Default)]
pub struct RecordingObserver {
    pub events: Mutex<Vec<AgentEvent>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<AgentEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl AgentObserver for RecordingObserver {
    fn on_event(&self, event: AgentEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Prompt with a fixed answer that counts how often it was asked.
pub struct ScriptedPrompt {
    pub accept: bool,
    pub asked: AtomicUsize,
}

impl ScriptedPrompt {
    pub fn new(accept: bool) -> Self {
        Self { accept, asked: AtomicUsize::new(0) }
    }

    pub fn asked(&self) -> usize {
        self.asked.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UpdatePrompt for ScriptedPrompt {
    async fn offer(&self, _info: &UpdateInfo) -> bool {
        self.asked.fetch_add(1, Ordering::SeqCst);
        self.accept
    }
}

#[derive(Default)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn report(&self, _progress: DownloadProgress) {}
}

pub fn job(id: i64) -> Job {
    Job::text(id, format!("order #{id}"))
}

pub fn temp_update_dir() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("updates");
    (dir, path)
}
