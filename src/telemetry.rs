//! Remote log shipping.
//!
//! [`CaptureLayer`] copies WARN and ERROR events into a bounded in-memory
//! buffer; [`TelemetryReporter`] periodically drains it and posts it to the
//! server together with the job counters.

use crate::stats::AgentStats;
use crate::transport::Transport;
use chrono::Utc;
use spool_shared::api_models::{LogEntry, TelemetryPayload, TelemetryStats};
use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

pub const MAX_BUFFERED_LOGS: usize = 200;
pub const MAX_MESSAGE_CHARS: usize = 500;
/// A heartbeat goes out on these uptime boundaries even with no logs.
const HEARTBEAT_MINUTES: u64 = 15;

#[derive(Clone, Default)]
pub struct RemoteLogBuffer {
    entries: Arc<Mutex<VecDeque<LogEntry>>>,
}

impl RemoteLogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry, dropping the oldest once full.
    pub fn push(&self, level: &str, message: &str) {
        let entry = LogEntry {
            timestamp: Utc::now().to_rfc3339(),
            level: level.to_string(),
            message: truncate_message(message),
        };
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.len() >= MAX_BUFFERED_LOGS {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    pub fn drain(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn truncate_message(message: &str) -> String {
    if message.chars().count() <= MAX_MESSAGE_CHARS {
        return message.to_string();
    }
    let mut out: String = message.chars().take(MAX_MESSAGE_CHARS).collect();
    out.push_str("...");
    out
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn record(&mut self, field: &Field, value: String) {
        if field.name() == "message" {
            self.message = value;
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn finish(self) -> String {
        format!("{}{}", self.message, self.fields)
    }
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.record(field, format!("{value:?}"));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.record(field, value.to_string());
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.record(field, value.to_string());
    }
}

/// Feeds WARN and ERROR events into a [`RemoteLogBuffer`].
pub struct CaptureLayer {
    buffer: RemoteLogBuffer,
}

impl CaptureLayer {
    pub fn new(buffer: RemoteLogBuffer) -> Self {
        Self { buffer }
    }
}

impl<S> Layer<S> for CaptureLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > Level::WARN {
            return;
        }
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        self.buffer.push(level.as_str(), &visitor.finish());
    }
}

pub struct TelemetryReporter {
    transport: Arc<dyn Transport>,
    buffer: RemoteLogBuffer,
    stats: Arc<AgentStats>,
    version: String,
}

impl TelemetryReporter {
    pub fn new(transport: Arc<dyn Transport>, buffer: RemoteLogBuffer, stats: Arc<AgentStats>) -> Self {
        Self {
            transport,
            buffer,
            stats,
            version: spool_shared::AGENT_VERSION.to_string(),
        }
    }

    /// Ships buffered logs. Returns whether anything was sent successfully.
    /// A failed batch is dropped.
    pub async fn flush(&self) -> bool {
        let uptime_minutes = self.stats.uptime_minutes();
        if self.buffer.is_empty() && uptime_minutes % HEARTBEAT_MINUTES != 0 {
            return false;
        }
        let payload = TelemetryPayload {
            logs: self.buffer.drain(),
            stats: TelemetryStats {
                jobs_impressos: self.stats.jobs_processed(),
                jobs_erro: self.stats.jobs_failed(),
                uptime_minutes,
                versao: self.version.clone(),
            },
        };
        let count = payload.logs.len();
        let sent = self.transport.send_telemetry(&payload).await;
        if sent {
            tracing::debug!(count, "Telemetry sent");
        } else {
            tracing::debug!(count, "Telemetry not delivered, batch dropped");
        }
        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    #[test]
    fn buffer_drops_oldest_when_full() {
        let buffer = RemoteLogBuffer::new();
        for i in 0..(MAX_BUFFERED_LOGS + 5) {
            buffer.push("WARN", &format!("entry {i}"));
        }
        let entries = buffer.drain();
        assert_eq!(entries.len(), MAX_BUFFERED_LOGS);
        assert_eq!(entries[0].message, "entry 5");
        assert!(buffer.is_empty());
    }

    #[test]
    fn long_messages_are_truncated() {
        let buffer = RemoteLogBuffer::new();
        buffer.push("ERROR", &"a".repeat(MAX_MESSAGE_CHARS + 20));
        let entry = &buffer.drain()[0];
        assert_eq!(entry.message.len(), MAX_MESSAGE_CHARS + 3);
        assert!(entry.message.ends_with("..."));
    }

    #[test]
    fn layer_keeps_only_warnings_and_errors() {
        let buffer = RemoteLogBuffer::new();
        let subscriber = tracing_subscriber::registry().with(CaptureLayer::new(buffer.clone()));
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("routine");
            tracing::debug!("noise");
            tracing::warn!(job_id = 7, "printer slow");
            tracing::error!("printer gone");
        });
        let entries = buffer.drain();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].level, "WARN");
        assert_eq!(entries[0].message, "printer slow job_id=7");
        assert_eq!(entries[1].level, "ERROR");
    }
}
