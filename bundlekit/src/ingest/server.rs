//! HTTP surface of the manager: node bundle uploads, status and download.

use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info, warn};

use super::store::NodeBundleStore;
use crate::cancellation::CancellationToken;
use crate::core::{ManagerStatus, StatusTracker};
use crate::errors::{BundleError, Result};
use crate::events::{BundleEvent, EventSink, NODE_COMPLETED, NODE_REJECTED};
use crate::tracker::NodeSetTracker;

/// Errors returned to HTTP clients.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// The upload was refused; the node may retry.
    #[error("{0}")]
    Rejected(BundleError),

    /// The upload could not be stored.
    #[error("{0}")]
    Storage(BundleError),

    /// The final archive does not exist yet.
    #[error("support bundle is not ready")]
    NotReady,
}

impl From<BundleError> for IngestError {
    fn from(e: BundleError) -> Self {
        match e {
            BundleError::Validation { .. } => Self::Rejected(e),
            other => Self::Storage(other),
        }
    }
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Rejected(_) => StatusCode::BAD_REQUEST,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotReady => StatusCode::NOT_FOUND,
        };
        let body = serde_json::json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}

/// Reply to an accepted upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    /// The uploading node.
    pub node: String,
    /// False when the node was not expected (already reported, or unknown)
    /// or collection has closed.
    pub accepted: bool,
    /// Stored size in bytes.
    pub size: u64,
}

/// Shared state of the ingestion handlers.
#[derive(Clone)]
pub struct IngestState {
    store: NodeBundleStore,
    tracker: Arc<NodeSetTracker>,
    status: Arc<StatusTracker>,
    output_dir: PathBuf,
    events: Arc<dyn EventSink>,
}

impl IngestState {
    /// Creates handler state.
    #[must_use]
    pub fn new(
        store: NodeBundleStore,
        tracker: Arc<NodeSetTracker>,
        status: Arc<StatusTracker>,
        output_dir: PathBuf,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            store,
            tracker,
            status,
            output_dir,
            events,
        }
    }
}

impl std::fmt::Debug for IngestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestState")
            .field("store", &self.store)
            .field("output_dir", &self.output_dir)
            .finish_non_exhaustive()
    }
}

/// Builds the manager router.
pub fn ingest_router(state: IngestState) -> Router {
    Router::new()
        .route("/v1/nodebundle/{node}", post(upload_node_bundle))
        .route("/status", get(get_status))
        .route("/bundle", get(download_bundle))
        .layer(DefaultBodyLimit::disable())
        .with_state(state)
}

async fn upload_node_bundle(
    State(state): State<IngestState>,
    Path(node): Path<String>,
    body: Body,
) -> std::result::Result<Json<UploadResponse>, IngestError> {
    if state.tracker.is_closed() {
        info!(node = %node, "ignore node bundle after collection closed");
        return Ok(Json(UploadResponse {
            node,
            accepted: false,
            size: 0,
        }));
    }

    let staged = match state.store.stage(&node, body).await {
        Ok(staged) => staged,
        Err(e) => {
            warn!(node = %node, error = %e, "reject node bundle");
            state.events.record(BundleEvent::new(
                NODE_REJECTED,
                serde_json::json!({ "node": node, "error": e.to_dict() }),
            ));
            return Err(e.into());
        }
    };

    let committed = state
        .tracker
        .complete_with(&node, || state.store.commit(&staged));
    let (artifact, accepted) = match committed {
        Ok(Some(stored)) => stored,
        Ok(None) => {
            info!(
                node = %node,
                size = staged.size(),
                "drop node bundle received after collection closed"
            );
            state.store.discard(staged).await;
            return Ok(Json(UploadResponse {
                node,
                accepted: false,
                size: 0,
            }));
        }
        Err(e) => {
            error!(node = %node, error = %e, "fail to store node bundle");
            return Err(e.into());
        }
    };

    info!(
        node = %node,
        size = artifact.size,
        sha256 = %artifact.sha256,
        accepted,
        "received node bundle"
    );
    state.events.record(BundleEvent::new(
        NODE_COMPLETED,
        serde_json::json!({
            "node": node,
            "size": artifact.size,
            "sha256": artifact.sha256,
            "accepted": accepted,
        }),
    ));

    Ok(Json(UploadResponse {
        node,
        accepted,
        size: artifact.size,
    }))
}

async fn get_status(State(state): State<IngestState>) -> Json<ManagerStatus> {
    Json(state.status.snapshot())
}

async fn download_bundle(
    State(state): State<IngestState>,
) -> std::result::Result<Response, IngestError> {
    let status = state.status.snapshot();
    let filename = match (&status.filename, status.is_terminal() && !status.error) {
        (Some(name), true) => name.clone(),
        _ => return Err(IngestError::NotReady),
    };

    let path = state.output_dir.join(&filename);
    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|e| IngestError::Storage(e.into()))?;
    let length = file
        .metadata()
        .await
        .map_err(|e| IngestError::Storage(e.into()))?
        .len();
    debug!(path = %path.display(), length, "serving support bundle");

    let body = Body::from_stream(ReaderStream::new(file));
    Ok((
        [
            (header::CONTENT_TYPE, "application/gzip".to_string()),
            (header::CONTENT_LENGTH, length.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        body,
    )
        .into_response())
}

/// A running ingestion server.
#[derive(Debug)]
pub struct IngestServer {
    local_addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl IngestServer {
    /// Binds `addr` and serves `router` until `cancel` fires.
    pub async fn start(
        addr: SocketAddr,
        router: Router,
        cancel: Arc<CancellationToken>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "ingestion server listening");

        let handle = tokio::spawn(async move {
            let shutdown = async move { cancel.cancelled().await };
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown)
                .await
            {
                error!(error = %e, "ingestion server error");
            }
            debug!("ingestion server stopped");
        });

        Ok(Self { local_addr, handle })
    }

    /// The bound address.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Waits for the server task to exit.
    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            warn!(error = %e, "ingestion server task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ManagerPhase;
    use crate::testing::{node_bundle_archive, RecordingEventSink};
    use axum::http::Request;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tower::ServiceExt;

    struct Fixture {
        dir: tempfile::TempDir,
        tracker: Arc<NodeSetTracker>,
        status: Arc<StatusTracker>,
        events: Arc<RecordingEventSink>,
        router: Router,
    }

    fn fixture(nodes: &[&str]) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let tracker = Arc::new(NodeSetTracker::new());
        tracker.initialize(nodes.iter().copied()).unwrap();
        let status = Arc::new(StatusTracker::new());
        let events = Arc::new(RecordingEventSink::new());
        let state = IngestState::new(
            NodeBundleStore::new(&dir.path().join("bundle"), &dir.path().join(".incoming")),
            Arc::clone(&tracker),
            Arc::clone(&status),
            dir.path().to_path_buf(),
            events.clone(),
        );
        Fixture {
            dir,
            tracker,
            status,
            events,
            router: ingest_router(state),
        }
    }

    fn upload(node: &str, body: impl Into<Body>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(format!("/v1/nodebundle/{node}"))
            .body(body.into())
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_upload_completes_node() {
        let f = fixture(&["node-a", "node-b"]);
        let archive = node_bundle_archive(&[("journal.log", b"ok")]);

        let response = f
            .router
            .clone()
            .oneshot(upload("node-a", archive))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        assert_eq!(body["node"], "node-a");
        assert_eq!(body["accepted"], true);
        assert_eq!(f.tracker.pending(), vec!["node-b".to_string()]);
        assert!(f.dir.path().join("bundle/nodes/node-a.tar.gz").exists());
        assert_eq!(f.events.count(NODE_COMPLETED), 1);
    }

    #[tokio::test]
    async fn test_unknown_node_is_stored_but_not_accepted() {
        let f = fixture(&["node-a"]);
        let archive = node_bundle_archive(&[("journal.log", b"ok")]);

        let response = f.router.oneshot(upload("node-z", archive)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json(response).await["accepted"], false);
        assert!(f.tracker.is_pending("node-a"));
    }

    #[tokio::test]
    async fn test_empty_upload_is_bad_request() {
        let f = fixture(&["node-a", "node-b"]);

        let response = f
            .router
            .clone()
            .oneshot(upload("node-b", Body::empty()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json(response).await;
        assert!(body["error"].as_str().unwrap().contains("node-b"));
        assert!(f.tracker.is_pending("node-b"));
        assert!(!f.dir.path().join("bundle/nodes/node-b.tar.gz").exists());
        assert_eq!(f.events.count(NODE_REJECTED), 1);

        let retry = node_bundle_archive(&[("journal.log", b"ok")]);
        let response = f.router.oneshot(upload("node-b", retry)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!f.tracker.is_pending("node-b"));
    }

    #[tokio::test]
    async fn test_invalid_node_name_is_bad_request() {
        let f = fixture(&["node-a"]);
        let archive = node_bundle_archive(&[("journal.log", b"ok")]);

        let response = f.router.oneshot(upload("Node_A", archive)).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(!f.dir.path().join("bundle/nodes").exists());
    }

    #[tokio::test]
    async fn test_upload_after_close_writes_nothing() {
        let f = fixture(&["node-a", "node-b"]);
        f.tracker.close();
        let archive = node_bundle_archive(&[("journal.log", b"ok")]);

        let response = f.router.oneshot(upload("node-b", archive)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        assert_eq!(body["accepted"], false);
        assert_eq!(body["size"], 0);
        assert!(f.tracker.is_pending("node-b"));
        assert!(!f.dir.path().join("bundle").exists());
        assert!(!f.dir.path().join(".incoming").exists());
        assert!(f.events.is_empty());
    }

    #[tokio::test]
    async fn test_status_endpoint() {
        let f = fixture(&["node-a"]);
        f.status.set_phase(ManagerPhase::NodeBundle);
        f.status.set_progress(40);

        let response = f.router.oneshot(get("/status")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let status: ManagerStatus = serde_json::from_value(json(response).await).unwrap();
        assert_eq!(status.phase, ManagerPhase::NodeBundle);
        assert_eq!(status.progress, 40);
        assert!(!status.error);
    }

    #[tokio::test]
    async fn test_download_only_when_done() {
        let f = fixture(&["node-a"]);

        let response = f.router.clone().oneshot(get("/bundle")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        std::fs::write(f.dir.path().join("sb.tar.gz"), b"final archive").unwrap();
        f.status.set_file_info("sb.tar.gz", 13);
        f.status.set_phase(ManagerPhase::Done);
        f.status.set_progress(100);

        let response = f.router.oneshot(get("/bundle")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"sb.tar.gz\""
        );
        let bytes = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&bytes[..], b"final archive");
    }

    #[tokio::test]
    async fn test_server_stops_on_cancel() {
        let f = fixture(&["node-a"]);
        let cancel = Arc::new(CancellationToken::new());
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();

        let server = IngestServer::start(addr, f.router, Arc::clone(&cancel))
            .await
            .unwrap();
        assert_ne!(server.local_addr().port(), 0);

        cancel.cancel("test");
        tokio::time::timeout(Duration::from_secs(5), server.join())
            .await
            .unwrap();
    }
}
