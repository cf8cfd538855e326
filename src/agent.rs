//! Wires the components together and drives the agent lifecycle:
//! startup checks, the recurring tasks, and shutdown.

use crate::breaker::CircuitBreaker;
use crate::health::host_metadata;
use crate::job_processor::{JobProcessor, ProcessorSettings};
use crate::observer::{
    AgentEvent, AgentObserver, AgentStatus, LogProgress, LoggingObserver, ObserverSet, PolicyPrompt,
    StatusTracker,
};
use crate::poller::Poller;
use crate::printer::{Printer, SerialPrinter};
use crate::scheduler::Scheduler;
use crate::stats::AgentStats;
use crate::telemetry::{RemoteLogBuffer, TelemetryReporter};
use crate::transport::{GuardedClient, HttpTransport, Transport, TransportError};
use crate::update::installer::HelperPolicy;
use crate::update::{HelperInstaller, UpdateOrchestrator, UpdateSettings};
use crate::web;
use spool_shared::{AgentConfig, ConfigManager};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// How often settings are re-read while waiting for credentials.
const CREDENTIAL_RECHECK: Duration = Duration::from_secs(10);
const SETTINGS_RELOAD: Duration = Duration::from_secs(30);
/// Delay before the first poll after startup.
const POLL_START_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("transport setup failed: {0}")]
    Transport(#[from] TransportError),
}

pub struct Agent {
    config: Arc<Mutex<ConfigManager>>,
    transport: Arc<HttpTransport>,
    printer: Arc<dyn Printer>,
    breaker: Arc<CircuitBreaker>,
    stats: Arc<AgentStats>,
    status: StatusTracker,
    observer: Arc<dyn AgentObserver>,
    log_buffer: RemoteLogBuffer,
    scheduler: Scheduler,
    process_token: CancellationToken,
}

impl Agent {
    pub fn new(manager: ConfigManager, log_buffer: RemoteLogBuffer) -> Result<Self, AgentError> {
        let config = manager.get_config().clone();
        let transport = Arc::new(HttpTransport::new(&config)?);
        let printer: Arc<dyn Printer> = Arc::new(SerialPrinter::new(
            config.printers.clone(),
            config.default_printer.clone(),
        ));
        let status = StatusTracker::default();
        let observer: Arc<dyn AgentObserver> = Arc::new(
            ObserverSet::new()
                .with(Arc::new(LoggingObserver))
                .with(Arc::new(status.clone())),
        );
        Ok(Self {
            config: Arc::new(Mutex::new(manager)),
            transport,
            printer,
            breaker: Arc::new(CircuitBreaker::default()),
            stats: Arc::new(AgentStats::new()),
            status,
            observer,
            log_buffer,
            scheduler: Scheduler::new(),
            process_token: CancellationToken::new(),
        })
    }

    fn config(&self) -> AgentConfig {
        self.config.lock().unwrap_or_else(|e| e.into_inner()).get_config().clone()
    }

    /// Runs until ctrl-c or until an installed update asks for a restart.
    pub async fn run(mut self) -> Result<(), AgentError> {
        let shutdown_tx = self.scheduler.shutdown_sender();
        let mut shutdown_rx = shutdown_tx.subscribe();
        self.observer.on_event(AgentEvent::StatusChanged(AgentStatus::Starting));
        tracing::info!(
            version = spool_shared::AGENT_VERSION,
            session = %self.stats.session_id(),
            "Print agent starting"
        );

        if !self.wait_for_credentials().await {
            self.observer.on_event(AgentEvent::StatusChanged(AgentStatus::ShuttingDown));
            return Ok(());
        }
        self.startup_checks().await;

        let config = self.config();
        let client = GuardedClient::new(self.transport.clone(), self.breaker.clone());
        let processor = Arc::new(JobProcessor::new(
            client.clone(),
            self.printer.clone(),
            self.observer.clone(),
            self.stats.clone(),
            ProcessorSettings::from(&config),
        ));
        let poller = Arc::new(Poller::new(
            client,
            processor,
            self.observer.clone(),
            self.stats.clone(),
        ));
        let updater = self.build_updater(&config, shutdown_tx.clone());

        self.schedule(&config, poller.clone(), updater.clone());
        if let Some(addr) = config.status_api.clone() {
            self.spawn_status_api(addr, poller, updater, shutdown_tx.subscribe());
        }

        self.observer.on_event(AgentEvent::StatusChanged(AgentStatus::Operational));
        tracing::info!(
            interval_ms = config.polling_interval().as_millis() as u64,
            tasks = ?self.scheduler.task_names(),
            "Print agent running"
        );

        tokio::select! {
            _ = tokio::signal::ctrl_c() => tracing::info!("Interrupt received"),
            _ = shutdown_rx.recv() => tracing::info!("Shutdown requested"),
        }
        self.observer.on_event(AgentEvent::StatusChanged(AgentStatus::ShuttingDown));
        self.process_token.cancel();
        self.scheduler.shutdown().await;
        tracing::info!("Print agent stopped");
        Ok(())
    }

    /// Without credentials the agent stays up and re-reads its settings so
    /// the operator can fix them without a restart. Returns `false` if
    /// interrupted while waiting.
    async fn wait_for_credentials(&self) -> bool {
        if self.config().has_credentials() {
            return true;
        }
        let path = self.config.lock().unwrap_or_else(|e| e.into_inner()).path().to_path_buf();
        tracing::error!(config = %path.display(), "API credentials missing, waiting for api_key and secret_key");
        self.observer.on_event(AgentEvent::StatusChanged(AgentStatus::AwaitingCredentials));
        self.observer.on_event(AgentEvent::Alert {
            title: "Not configured".to_string(),
            message: format!("Set api_key and secret_key in {}", path.display()),
        });

        let mut interval = tokio::time::interval(CREDENTIAL_RECHECK);
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => return false,
                _ = interval.tick() => {}
            }
            let reloaded = {
                let mut manager = self.config.lock().unwrap_or_else(|e| e.into_inner());
                manager.reload().map(|c| c.clone())
            };
            match reloaded {
                Ok(config) if config.has_credentials() => {
                    tracing::info!("Credentials found, continuing startup");
                    self.transport.apply_config(&config);
                    return true;
                }
                Ok(_) => {}
                Err(e) => tracing::debug!("Settings not usable yet: {}", e),
            }
        }
    }

    /// Health and authentication. Neither failure stops the agent.
    async fn startup_checks(&self) {
        match self.transport.health().await {
            Ok(()) => tracing::info!("Job server reachable"),
            Err(e) => tracing::warn!("Job server health check failed: {}", e),
        }

        let (hostname, os) = host_metadata();
        match self
            .transport
            .authenticate(&hostname, &os, spool_shared::AGENT_VERSION)
            .await
        {
            Ok(outcome) if outcome.authenticated => {
                tracing::info!(
                    client = outcome.client_name.as_deref().unwrap_or("-"),
                    location = outcome.client_location.as_deref().unwrap_or("-"),
                    "Authenticated"
                );
                self.remember_location(outcome.client_location);
            }
            Ok(outcome) => {
                let reason = outcome.error.unwrap_or_else(|| "credentials rejected".to_string());
                self.observer.on_event(AgentEvent::Alert {
                    title: "Authentication failed".to_string(),
                    message: reason,
                });
            }
            Err(e) => self.observer.on_event(AgentEvent::Alert {
                title: "Authentication failed".to_string(),
                message: e.to_string(),
            }),
        }
    }

    fn remember_location(&self, location: Option<String>) {
        let mut manager = self.config.lock().unwrap_or_else(|e| e.into_inner());
        if location.is_none() || manager.get_config().client_location == location {
            return;
        }
        let mut config = manager.get_config().clone();
        config.client_location = location;
        manager.set_config(config);
        if let Err(e) = manager.save() {
            tracing::warn!("Could not save client location: {}", e);
        }
    }

    fn build_updater(
        &self,
        config: &AgentConfig,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Option<Arc<UpdateOrchestrator>> {
        if !config.auto_update {
            tracing::info!("Automatic updates disabled");
            return None;
        }
        let installer = match HelperInstaller::for_current_process(HelperPolicy::default()) {
            Ok(installer) => installer,
            Err(e) => {
                tracing::warn!("Automatic updates unavailable: {}", e);
                return None;
            }
        };
        let orchestrator = UpdateOrchestrator::new(
            self.transport.clone(),
            Arc::new(PolicyPrompt { accept: config.auto_accept_updates }),
            Arc::new(LogProgress::default()),
            self.observer.clone(),
            Arc::new(installer),
            UpdateSettings::from_config(config),
        )
        .with_shutdown(shutdown_tx, self.process_token.clone());
        Some(Arc::new(orchestrator))
    }

    fn schedule(
        &mut self,
        config: &AgentConfig,
        poller: Arc<Poller>,
        updater: Option<Arc<UpdateOrchestrator>>,
    ) {
        schedule_poll(&mut self.scheduler, config.polling_interval(), move || {
            let poller = poller.clone();
            async move {
                poller.tick().await;
            }
        });

        if let Some(updater) = updater {
            let token = self.process_token.clone();
            self.scheduler.every(
                "update-check",
                config.update_check_delay(),
                config.update_check_interval(),
                move || {
                    let updater = updater.clone();
                    let token = token.child_token();
                    async move {
                        updater.run_once(&token).await;
                    }
                },
            );
        }

        let transport: Arc<dyn Transport> = self.transport.clone();
        let reporter = Arc::new(TelemetryReporter::new(
            transport,
            self.log_buffer.clone(),
            self.stats.clone(),
        ));
        self.scheduler.every(
            "telemetry",
            config.telemetry_interval(),
            config.telemetry_interval(),
            move || {
                let reporter = reporter.clone();
                async move {
                    reporter.flush().await;
                }
            },
        );

        let settings = self.config.clone();
        let transport = self.transport.clone();
        self.scheduler.every("settings", SETTINGS_RELOAD, SETTINGS_RELOAD, move || {
            let settings = settings.clone();
            let transport = transport.clone();
            async move {
                reload_settings(&settings, &transport);
            }
        });
    }

    fn spawn_status_api(
        &self,
        addr: String,
        poller: Arc<Poller>,
        updater: Option<Arc<UpdateOrchestrator>>,
        shutdown_rx: broadcast::Receiver<()>,
    ) {
        let state = Arc::new(web::api::AppStateInner {
            stats: self.stats.clone(),
            breaker: self.breaker.clone(),
            status: self.status.clone(),
            printer: self.printer.clone(),
            poller: Some(poller),
            updater,
        });
        tokio::spawn(async move {
            if let Err(e) = web::api::serve(&addr, state, shutdown_rx).await {
                tracing::error!(%addr, "Status API failed: {}", e);
            }
        });
    }
}

/// Applies changed endpoint or credentials. Other settings take effect on
/// the next start.
fn reload_settings(settings: &Mutex<ConfigManager>, transport: &HttpTransport) {
    let mut manager = settings.lock().unwrap_or_else(|e| e.into_inner());
    let before = manager.get_config().clone();
    match manager.reload() {
        Ok(after) => {
            if after.api_url != before.api_url
                || after.api_key != before.api_key
                || after.secret_key != before.secret_key
            {
                tracing::info!("Server settings changed, applying");
                transport.apply_config(after);
            }
        }
        Err(e) => {
            tracing::warn!("Keeping previous settings: {}", e);
        }
    }
}

/// Registers the poll loop: first tick after [`POLL_START_DELAY`], then every `interval`.
fn schedule_poll<F, Fut>(scheduler: &mut Scheduler, interval: Duration, tick: F)
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    scheduler.every("poll", POLL_START_DELAY, interval, tick);
}
