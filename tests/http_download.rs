use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use spool_rs::observer::ProgressSink;
use spool_rs::transport::{HttpTransport, Transport, TransportError};
use spool_shared::{AgentConfig, DownloadProgress};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

const ARTIFACT_LEN: usize = 100;

type SeenRanges = Arc<Mutex<Vec<Option<String>>>>;

fn artifact() -> Vec<u8> {
    (0..ARTIFACT_LEN as u8).collect()
}

#[derive(Default)]
struct RecordingProgress(Mutex<Vec<DownloadProgress>>);

impl RecordingProgress {
    fn reports(&self) -> Vec<DownloadProgress> {
        self.0.lock().unwrap().clone()
    }
}

impl ProgressSink for RecordingProgress {
    fn report(&self, progress: DownloadProgress) {
        self.0.lock().unwrap().push(progress);
    }
}

/// Honors `Range: bytes=N-` with a 206.
async fn ranged(State(seen): State<SeenRanges>, headers: HeaderMap) -> Response {
    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    seen.lock().unwrap().push(range.clone());
    let body = artifact();
    let start = range
        .as_deref()
        .and_then(|r| r.strip_prefix("bytes="))
        .and_then(|r| r.trim_end_matches('-').parse::<usize>().ok());
    match start {
        Some(start) if start < body.len() => (
            StatusCode::PARTIAL_CONTENT,
            [(
                header::CONTENT_RANGE,
                format!("bytes {}-{}/{}", start, body.len() - 1, body.len()),
            )],
            body[start..].to_vec(),
        )
            .into_response(),
        _ => (StatusCode::OK, body).into_response(),
    }
}

/// Always sends the whole file, whatever was asked.
async fn full_only(State(seen): State<SeenRanges>, headers: HeaderMap) -> Response {
    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    seen.lock().unwrap().push(range);
    (StatusCode::OK, artifact()).into_response()
}

/// Chunked body without a Content-Length.
async fn streamed() -> Response {
    let body = artifact();
    let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
        Ok(Bytes::copy_from_slice(&body[..50])),
        Ok(Bytes::copy_from_slice(&body[50..])),
    ];
    Body::from_stream(futures::stream::iter(chunks)).into_response()
}

async fn serve() -> (String, SeenRanges) {
    let seen = SeenRanges::default();
    let app = Router::new()
        .route("/ranged", get(ranged))
        .route("/full", get(full_only))
        .route("/streamed", get(streamed))
        .with_state(seen.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), seen)
}

fn transport(base: &str) -> HttpTransport {
    let config = AgentConfig {
        api_url: base.to_string(),
        ..Default::default()
    };
    HttpTransport::new(&config).unwrap()
}

#[tokio::test]
async fn test_partial_file_is_resumed_with_range() {
    let (base, seen) = serve().await;
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("spool-agent-2.0.0.part");
    std::fs::write(&dest, &artifact()[..30]).unwrap();
    let progress = RecordingProgress::default();

    let len = transport(&base)
        .download(&format!("{base}/ranged"), &dest, &progress, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(len, ARTIFACT_LEN as u64);
    assert_eq!(std::fs::read(&dest).unwrap(), artifact());
    assert_eq!(seen.lock().unwrap().as_slice(), [Some("bytes=30-".to_string())]);
    let reports = progress.reports();
    assert_eq!(reports[0], DownloadProgress { received: 30, total: Some(100) });
    assert_eq!(reports.last().copied(), Some(DownloadProgress { received: 100, total: Some(100) }));
}

#[tokio::test]
async fn test_full_response_to_range_restarts_file() {
    let (base, seen) = serve().await;
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("spool-agent-2.0.0.part");
    std::fs::write(&dest, [0xFFu8; 30]).unwrap();
    let progress = RecordingProgress::default();

    let len = transport(&base)
        .download(&format!("{base}/full"), &dest, &progress, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(len, ARTIFACT_LEN as u64);
    assert_eq!(std::fs::read(&dest).unwrap(), artifact());
    assert_eq!(seen.lock().unwrap().as_slice(), [Some("bytes=30-".to_string())]);
    assert_eq!(progress.reports()[0].received, 0);
}

#[tokio::test]
async fn test_unknown_length_reports_no_total() {
    let (base, _) = serve().await;
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("spool-agent-2.0.0.part");
    let progress = RecordingProgress::default();

    let len = transport(&base)
        .download(&format!("{base}/streamed"), &dest, &progress, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(len, ARTIFACT_LEN as u64);
    let reports = progress.reports();
    assert!(reports.iter().all(|p| p.total.is_none()));
    assert_eq!(reports.last().map(|p| p.received), Some(ARTIFACT_LEN as u64));
    assert_eq!(reports.last().map(|p| p.total_or_unknown()), Some(-1));
}

#[tokio::test]
async fn test_cancelled_download_keeps_partial_file() {
    let (base, seen) = serve().await;
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("spool-agent-2.0.0.part");
    std::fs::write(&dest, &artifact()[..30]).unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = transport(&base)
        .download(&format!("{base}/ranged"), &dest, &RecordingProgress::default(), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, TransportError::Cancelled));
    assert_eq!(std::fs::read(&dest).unwrap().len(), 30);
    assert!(seen.lock().unwrap().is_empty());
}
