//! Test doubles for the platform API: an in-process axum server that records
//! every request, and an in-memory spy implementing `RunTaskPlatform`.

use async_trait::async_trait;
use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;

use super::client::{FetchError, RunTaskPlatform};
use super::{AccessToken, TaskResult};

pub(crate) const CONFIG_BYTES: &[u8] = b"\x1f\x8b fake configuration archive bytes";

/// Number of 1 KiB chunks served by `/slow/a` and `/slow/b`.
pub(crate) const SLOW_CHUNKS: usize = 40;

pub(crate) fn sample_plan() -> Value {
    json!({
        "format_version": "1.2",
        "terraform_version": "1.7.5",
        "resource_changes": [
            { "address": "null_resource.a", "change": { "actions": ["create"] } },
            { "address": "null_resource.b", "change": { "actions": ["delete", "create"] } }
        ]
    })
}

#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub authorization: Option<String>,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

#[derive(Clone)]
struct MockState {
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

pub(crate) struct MockPlatformServer {
    base_url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

/// Streams `chunks` KiB of `fill` with a pause between chunks, so two
/// downloads of the same archive overlap on disk.
fn slow_body(fill: u8, chunks: usize) -> Response {
    let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(1);
    tokio::spawn(async move {
        for _ in 0..chunks {
            if tx.send(Ok(Bytes::from(vec![fill; 1024]))).await.is_err() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    });
    (StatusCode::OK, Body::from_stream(ReceiverStream::new(rx))).into_response()
}

fn redirect(status: StatusCode, location: String) -> Response {
    (status, [(header::LOCATION, location)]).into_response()
}

async fn platform_endpoint(
    State(state): State<MockState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let header_value = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    state
        .requests
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .push(RecordedRequest {
            method: method.to_string(),
            path: uri.path().to_string(),
            authorization: header_value(header::AUTHORIZATION),
            content_type: header_value(header::CONTENT_TYPE),
            body: body.to_vec(),
        });

    let path = uri.path();
    if let Some(n) = path.strip_prefix("/hop/") {
        let next = n.parse::<u32>().unwrap_or(0) + 1;
        return redirect(StatusCode::FOUND, format!("/hop/{next}"));
    }

    match (method.as_str(), path) {
        ("GET", "/cfg") => (StatusCode::OK, CONFIG_BYTES).into_response(),
        ("GET", "/slow/a") => slow_body(b'A', SLOW_CHUNKS),
        ("GET", "/slow/b") => slow_body(b'B', SLOW_CHUNKS),
        ("GET", "/cfg-redirect") => redirect(StatusCode::FOUND, "/cfg".to_string()),
        ("GET", "/plan") => redirect(StatusCode::TEMPORARY_REDIRECT, "/plan-content".to_string()),
        ("GET", "/plan-twice") => redirect(StatusCode::TEMPORARY_REDIRECT, "/plan".to_string()),
        ("GET", "/plan-content") => Json(sample_plan()).into_response(),
        ("GET", "/not-json") => (StatusCode::OK, "<html>nope</html>").into_response(),
        ("PATCH", "/cb") => StatusCode::OK.into_response(),
        ("PATCH", "/cb-fail") => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

impl MockPlatformServer {
    pub(crate) async fn start() -> Self {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let state = MockState {
            requests: Arc::clone(&requests),
        };
        let app = Router::new().fallback(platform_endpoint).with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("mock platform should bind");
        let addr = listener.local_addr().expect("mock platform address");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
        });

        Self {
            base_url: format!("http://{addr}"),
            requests,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub(crate) fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub(crate) fn paths(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.path).collect()
    }

    pub(crate) async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PlatformCall {
    Download {
        url: String,
        token: String,
        dest: PathBuf,
    },
    Plan {
        url: String,
        token: String,
    },
    Report {
        url: String,
        token: String,
        result: TaskResult,
    },
}

/// Records every call and answers from canned values.
#[derive(Default)]
pub(crate) struct SpyPlatform {
    pub(crate) calls: Mutex<Vec<PlatformCall>>,
    pub(crate) fail_download: bool,
    pub(crate) fail_plan: bool,
    pub(crate) fail_report: bool,
}

impl SpyPlatform {
    pub(crate) fn calls(&self) -> Vec<PlatformCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn record(&self, call: PlatformCall) {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(call);
    }
}

fn refused(url: &str) -> FetchError {
    FetchError::Status {
        url: url.to_string(),
        status: reqwest::StatusCode::BAD_GATEWAY,
    }
}

#[async_trait]
impl RunTaskPlatform for SpyPlatform {
    async fn download_configuration(
        &self,
        url: &str,
        token: &AccessToken,
        dest: &Path,
    ) -> Result<u64, FetchError> {
        self.record(PlatformCall::Download {
            url: url.to_string(),
            token: token.expose().to_string(),
            dest: dest.to_path_buf(),
        });
        if self.fail_download {
            return Err(refused(url));
        }
        Ok(CONFIG_BYTES.len() as u64)
    }

    async fn fetch_plan(&self, url: &str, token: &AccessToken) -> Result<Value, FetchError> {
        self.record(PlatformCall::Plan {
            url: url.to_string(),
            token: token.expose().to_string(),
        });
        if self.fail_plan {
            return Err(refused(url));
        }
        Ok(sample_plan())
    }

    async fn send_task_result(
        &self,
        url: &str,
        token: &AccessToken,
        result: &TaskResult,
    ) -> Result<(), FetchError> {
        self.record(PlatformCall::Report {
            url: url.to_string(),
            token: token.expose().to_string(),
            result: result.clone(),
        });
        if self.fail_report {
            return Err(refused(url));
        }
        Ok(())
    }
}
