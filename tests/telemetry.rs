mod support;

use spool_rs::stats::AgentStats;
use spool_rs::telemetry::{RemoteLogBuffer, TelemetryReporter};
use std::sync::Arc;
use std::time::Duration;
use support::FakeTransport;

const MINUTE: Duration = Duration::from_secs(60);

#[tokio::test(start_paused = true)]
async fn test_flush_sends_logs_and_heartbeats() {
    let transport = Arc::new(FakeTransport::new());
    let buffer = RemoteLogBuffer::new();
    let stats = Arc::new(AgentStats::new());
    let reporter = TelemetryReporter::new(transport.clone(), buffer.clone(), stats.clone());

    tokio::time::advance(5 * MINUTE).await;
    assert!(!reporter.flush().await);
    assert!(transport.telemetry.lock().unwrap().is_empty());

    buffer.push("ERROR", "printer offline");
    stats.record_failed();
    tokio::time::advance(5 * MINUTE).await;
    assert!(reporter.flush().await);
    assert!(buffer.is_empty());

    tokio::time::advance(5 * MINUTE).await;
    assert!(reporter.flush().await);

    let sent = transport.telemetry.lock().unwrap().clone();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].logs.len(), 1);
    assert_eq!(sent[0].logs[0].message, "printer offline");
    assert_eq!(sent[0].stats.jobs_erro, 1);
    assert_eq!(sent[0].stats.uptime_minutes, 10);
    assert!(sent[1].logs.is_empty());
    assert_eq!(sent[1].stats.uptime_minutes, 15);
}
