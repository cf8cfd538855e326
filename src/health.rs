//! Connectivity and device diagnostics for the `diagnose` command.

use crate::printer::Printer;
use crate::transport::Transport;
use spool_shared::{AgentConfig, AuthOutcome};
use std::fmt;

#[derive(Debug)]
pub struct DiagnosticReport {
    pub api_url: String,
    pub reachable: Result<(), String>,
    /// `None` when no credentials are configured.
    pub auth: Option<Result<AuthOutcome, String>>,
    pub printers: Vec<String>,
    pub default_printer: Option<String>,
}

impl DiagnosticReport {
    pub fn is_healthy(&self) -> bool {
        self.reachable.is_ok()
            && matches!(&self.auth, Some(Ok(outcome)) if outcome.authenticated)
            && self.default_printer.is_some()
    }
}

pub fn host_metadata() -> (String, String) {
    let hostname = sysinfo::System::host_name().unwrap_or_else(|| "unknown".to_string());
    let os = sysinfo::System::long_os_version()
        .unwrap_or_else(|| std::env::consts::OS.to_string());
    (hostname, os)
}

pub async fn run_diagnostics(
    config: &AgentConfig,
    transport: &dyn Transport,
    printer: &dyn Printer,
) -> DiagnosticReport {
    let reachable = transport.health().await.map_err(|e| e.to_string());
    let auth = if config.has_credentials() {
        let (hostname, os) = host_metadata();
        Some(
            transport
                .authenticate(&hostname, &os, spool_shared::AGENT_VERSION)
                .await
                .map_err(|e| e.to_string()),
        )
    } else {
        None
    };
    DiagnosticReport {
        api_url: config.api_url.clone(),
        reachable,
        auth,
        printers: printer.list_available(),
        default_printer: config.default_printer.clone().or_else(|| printer.default_printer()),
    }
}

impl fmt::Display for DiagnosticReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Server: {}", self.api_url)?;
        match &self.reachable {
            Ok(()) => writeln!(f, "  [ok]   reachable")?,
            Err(e) => writeln!(f, "  [fail] unreachable: {}", e)?,
        }
        match &self.auth {
            None => writeln!(f, "  [skip] no credentials configured")?,
            Some(Ok(outcome)) if outcome.authenticated => writeln!(
                f,
                "  [ok]   authenticated as {} ({})",
                outcome.client_name.as_deref().unwrap_or("unnamed client"),
                outcome.client_location.as_deref().unwrap_or("no location"),
            )?,
            Some(Ok(outcome)) => writeln!(
                f,
                "  [fail] authentication refused: {}",
                outcome.error.as_deref().unwrap_or("no reason given")
            )?,
            Some(Err(e)) => writeln!(f, "  [fail] authentication error: {}", e)?,
        }
        writeln!(f, "Printers:")?;
        if self.printers.is_empty() {
            writeln!(f, "  (none found)")?;
        }
        for name in &self.printers {
            let marker = if self.default_printer.as_deref() == Some(name.as_str()) { "*" } else { " " };
            writeln!(f, "  {} {}", marker, name)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_marks_default_printer() {
        let report = DiagnosticReport {
            api_url: "https://jobs.example.com".into(),
            reachable: Ok(()),
            auth: Some(Ok(AuthOutcome {
                authenticated: true,
                client_name: Some("Front".into()),
                client_location: Some("Lobby".into()),
                ..Default::default()
            })),
            printers: vec!["kitchen".into(), "bar".into()],
            default_printer: Some("bar".into()),
        };
        let text = report.to_string();
        assert!(text.contains("authenticated as Front (Lobby)"));
        assert!(text.contains("* bar"));
        assert!(report.is_healthy());
    }

    #[test]
    fn missing_credentials_is_not_healthy() {
        let report = DiagnosticReport {
            api_url: "https://jobs.example.com".into(),
            reachable: Ok(()),
            auth: None,
            printers: vec![],
            default_printer: None,
        };
        assert!(!report.is_healthy());
        assert!(report.to_string().contains("no credentials configured"));
    }
}
