//! Support bundle manager: the phase state machine.
//!
//! Phases run strictly in order on the calling task:
//! `Init -> ClusterBundle -> NodeBundle -> Packaging -> Done`.
//! The first failing phase stops the run and its error is recorded verbatim
//! in the status and on the bundle record. After each successful phase the
//! progress becomes `100 * completed / total`.

mod integration_tests;

use parking_lot::Mutex;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::agents::{
    format_node_selector, parse_node_selector, AgentFanout, AgentWorkloadDescriptor,
};
use crate::cancellation::CancellationToken;
use crate::cluster::{ClusterApi, ClusterExporter};
use crate::config::ManagerConfig;
use crate::core::{BundleRequest, BundleState, ManagerPhase, StatusTracker};
use crate::errors::{BundleError, Result};
use crate::events::{
    BundleEvent, EventSink, LoggingEventSink, AGENTS_DELETED, AGENTS_RETAINED, AGENTS_SPAWNED,
    NODES_TIMED_OUT, PHASE_COMPLETED, PHASE_FAILED, PHASE_STARTED,
};
use crate::ingest::{ingest_router, IngestServer, IngestState, NodeBundleStore};
use crate::packager::{BundlePackager, PackagedBundle};
use crate::state::StateStore;
use crate::tracker::{NodeSetTracker, WaitOutcome};

/// Values carried from one phase to the next.
#[derive(Debug, Default)]
struct RunState {
    request: Option<BundleRequest>,
    file_name: Option<String>,
    packaged: Option<PackagedBundle>,
}

impl RunState {
    fn request(&self) -> Result<&BundleRequest> {
        self.request
            .as_ref()
            .ok_or_else(|| BundleError::Internal("bundle request is not loaded".to_string()))
    }
}

/// Drives one support bundle collection.
pub struct SupportBundleManager {
    config: ManagerConfig,
    cluster: Arc<dyn ClusterApi>,
    state_store: Arc<dyn StateStore>,
    exporter: Arc<dyn ClusterExporter>,
    events: Arc<dyn EventSink>,
    cancel: Arc<CancellationToken>,
    tracker: Arc<NodeSetTracker>,
    status: Arc<StatusTracker>,
    packager: BundlePackager,
    ingest: IngestState,
    server: Mutex<Option<IngestServer>>,
}

impl SupportBundleManager {
    /// Creates a manager. Events go to a [`LoggingEventSink`] until
    /// [`with_events`](Self::with_events) replaces it.
    #[must_use]
    pub fn new(
        config: ManagerConfig,
        cluster: Arc<dyn ClusterApi>,
        state_store: Arc<dyn StateStore>,
        exporter: Arc<dyn ClusterExporter>,
    ) -> Self {
        let events: Arc<dyn EventSink> = Arc::new(LoggingEventSink);
        let tracker = Arc::new(NodeSetTracker::new());
        let status = Arc::new(StatusTracker::new());
        let ingest = Self::ingest_state(&config, &tracker, &status, &events);
        Self {
            config,
            cluster,
            state_store,
            exporter,
            events,
            cancel: Arc::new(CancellationToken::new()),
            tracker,
            status,
            packager: BundlePackager::new(),
            ingest,
            server: Mutex::new(None),
        }
    }

    /// Sends lifecycle events to `events`.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.ingest = Self::ingest_state(&self.config, &self.tracker, &self.status, &events);
        self.events = events;
        self
    }

    /// Uses an externally owned cancellation token.
    #[must_use]
    pub fn with_cancellation_token(mut self, cancel: Arc<CancellationToken>) -> Self {
        self.cancel = cancel;
        self
    }

    fn ingest_state(
        config: &ManagerConfig,
        tracker: &Arc<NodeSetTracker>,
        status: &Arc<StatusTracker>,
        events: &Arc<dyn EventSink>,
    ) -> IngestState {
        IngestState::new(
            NodeBundleStore::new(&config.working_dir(), &config.staging_dir()),
            Arc::clone(tracker),
            Arc::clone(status),
            config.output_dir(),
            Arc::clone(events),
        )
    }

    /// The status shared with the status endpoint.
    #[must_use]
    pub fn status(&self) -> &Arc<StatusTracker> {
        &self.status
    }

    /// The node set tracker shared with the upload endpoint.
    #[must_use]
    pub fn tracker(&self) -> &Arc<NodeSetTracker> {
        &self.tracker
    }

    /// The token that stops the wait and the ingestion server.
    #[must_use]
    pub fn cancellation_token(&self) -> &Arc<CancellationToken> {
        &self.cancel
    }

    /// A router serving the manager's HTTP endpoints.
    #[must_use]
    pub fn router(&self) -> axum::Router {
        ingest_router(self.ingest.clone())
    }

    /// Address the ingestion server is bound to, once `Init` has run.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.lock().as_ref().map(IngestServer::local_addr)
    }

    /// URL agents upload to, using the bound port when the server is up.
    #[must_use]
    pub fn callback_url(&self) -> String {
        match self.local_addr() {
            Some(addr) => format!("http://{}:{}", self.config.manager_pod_ip, addr.port()),
            None => self.config.callback_url(),
        }
    }

    /// Runs every phase in order.
    ///
    /// Returns the error of the first failing phase. The ingestion server
    /// keeps serving after `run` returns; see [`serve_until_cancelled`](Self::serve_until_cancelled).
    pub async fn run(&self) -> Result<()> {
        let mut run = RunState::default();
        let total = ManagerPhase::ALL.len();
        let started = Instant::now();

        for (index, phase) in ManagerPhase::ALL.into_iter().enumerate() {
            self.status.set_phase(phase);
            info!(phase = %phase, "running phase");
            self.events.record(BundleEvent::new(
                PHASE_STARTED,
                serde_json::json!({ "phase": phase.as_str() }),
            ));

            let phase_start = Instant::now();
            if let Err(e) = self.run_phase(phase, &mut run).await {
                self.fail(phase, &e).await;
                return Err(e);
            }

            let progress = u8::try_from(100 * (index + 1) / total).unwrap_or(100);
            self.status.set_progress(progress);
            self.events.record(BundleEvent::new(
                PHASE_COMPLETED,
                serde_json::json!({
                    "phase": phase.as_str(),
                    "progress": progress,
                    "duration_ms": phase_start.elapsed().as_secs_f64() * 1000.0,
                }),
            ));
        }

        info!(
            duration_ms = started.elapsed().as_secs_f64() * 1000.0,
            "support bundle collection finished"
        );
        Ok(())
    }

    /// Waits for cancellation, then for the ingestion server to drain.
    pub async fn serve_until_cancelled(&self) {
        self.cancel.cancelled().await;
        let server = self.server.lock().take();
        if let Some(server) = server {
            server.join().await;
        }
    }

    async fn fail(&self, phase: ManagerPhase, e: &BundleError) {
        error!(phase = %phase, error = %e, "phase failed");
        self.tracker.close();
        self.status.set_error(e.to_string());
        self.events.record(BundleEvent::new(
            PHASE_FAILED,
            serde_json::json!({ "phase": phase.as_str(), "error": e.to_dict() }),
        ));

        // The record belongs to someone else when the start state was wrong.
        if matches!(e, BundleError::InvalidState { .. }) {
            return;
        }
        if let Err(store_err) = self
            .state_store
            .set_error(&self.config.namespace, &self.config.bundle_name, &e.to_string())
            .await
        {
            warn!(error = %store_err, "fail to record error on support bundle");
        }
    }

    async fn run_phase(&self, phase: ManagerPhase, run: &mut RunState) -> Result<()> {
        if let Some(reason) = self.cancel.reason() {
            return Err(BundleError::Cancelled(reason));
        }
        match phase {
            ManagerPhase::Init => self.init(run).await,
            ManagerPhase::ClusterBundle => self.collect_cluster_bundle(run).await,
            ManagerPhase::NodeBundle => {
                let collected = self.collect_node_bundles(run).await;
                // Nothing may land in the working tree once packaging can start.
                self.tracker.close();
                collected
            }
            ManagerPhase::Packaging => self.package(run).await,
            ManagerPhase::Done => self.done(run).await,
        }
    }

    async fn init(&self, run: &mut RunState) -> Result<()> {
        self.config.validate()?;

        let working_dir = self.config.working_dir();
        tokio::fs::create_dir_all(&working_dir).await?;
        info!(dir = %working_dir.display(), "created working directory");

        let (namespace, name) = (&self.config.namespace, &self.config.bundle_name);
        let state = self.state_store.get_state(namespace, name).await?;
        if state != BundleState::Generating {
            return Err(BundleError::InvalidState {
                state: state.to_string(),
            });
        }
        run.request = Some(self.state_store.get_request(namespace, name).await?);

        let server =
            IngestServer::start(self.config.listen_addr, self.router(), Arc::clone(&self.cancel))
                .await?;
        *self.server.lock() = Some(server);
        Ok(())
    }

    async fn collect_cluster_bundle(&self, run: &mut RunState) -> Result<()> {
        let request = run.request()?;
        let file_name = self
            .exporter
            .generate(request, &self.config.working_dir())
            .await?;
        info!(file = %file_name, "generated cluster bundle");
        run.file_name = Some(file_name);
        Ok(())
    }

    async fn collect_node_bundles(&self, run: &RunState) -> Result<()> {
        let request = run.request()?;
        let selector = &request.node_selector;

        let nodes = self.cluster.list_nodes(selector).await?;
        if nodes.is_empty() {
            return Err(BundleError::NoNodesMatched {
                selector: selector.clone(),
            });
        }
        info!(nodes = ?nodes, selector = %selector, "expecting node bundles");
        self.tracker.initialize(nodes)?;

        let descriptor = AgentWorkloadDescriptor::new(
            &self.config.namespace,
            &self.config.bundle_name,
            &self.config.image,
            &self.config.image_pull_policy,
            self.callback_url(),
        )
        .with_node_selector(parse_node_selector(selector));

        let fanout = AgentFanout::new(Arc::clone(&self.cluster));
        let handle = fanout.spawn(&descriptor).await?;
        self.events.record(BundleEvent::new(
            AGENTS_SPAWNED,
            serde_json::json!({
                "name": handle.name,
                "namespace": handle.namespace,
                "nodeSelector": format_node_selector(&descriptor.node_selector),
            }),
        ));

        match self
            .tracker
            .await_completion(request.timeout(), &self.cancel)
            .await
        {
            WaitOutcome::Completed => {
                info!("all node bundles are collected");
                if fanout.teardown(&handle).await.is_ok() {
                    self.events.record(BundleEvent::new(
                        AGENTS_DELETED,
                        serde_json::json!({ "name": handle.name }),
                    ));
                }
                Ok(())
            }
            WaitOutcome::TimedOut => {
                let pending = self.tracker.pending();
                warn!(
                    pending = ?pending,
                    timeout_secs = request.timeout_seconds,
                    "timed out waiting for node bundles"
                );
                self.events.record(BundleEvent::new(
                    NODES_TIMED_OUT,
                    serde_json::json!({ "pending": pending }),
                ));
                self.events.record(BundleEvent::new(
                    AGENTS_RETAINED,
                    serde_json::json!({ "name": handle.name }),
                ));
                Ok(())
            }
            WaitOutcome::Cancelled => {
                self.events.record(BundleEvent::new(
                    AGENTS_RETAINED,
                    serde_json::json!({ "name": handle.name }),
                ));
                let reason = self
                    .cancel
                    .reason()
                    .unwrap_or_else(|| "wait cancelled".to_string());
                Err(BundleError::Cancelled(reason))
            }
        }
    }

    async fn package(&self, run: &mut RunState) -> Result<()> {
        let file_name = run
            .file_name
            .clone()
            .ok_or_else(|| BundleError::Internal("bundle file name is not set".to_string()))?;

        let packaged = self
            .packager
            .package_async(self.config.working_dir(), self.config.output_dir(), file_name)
            .await?;
        self.status.set_file_info(&packaged.name, packaged.size);
        run.packaged = Some(packaged);
        Ok(())
    }

    async fn done(&self, run: &RunState) -> Result<()> {
        let packaged = run
            .packaged
            .as_ref()
            .ok_or_else(|| BundleError::Internal("bundle is not packaged".to_string()))?;

        self.state_store
            .set_ready(
                &self.config.namespace,
                &self.config.bundle_name,
                &packaged.name,
                packaged.size,
            )
            .await?;
        info!(
            file = %packaged.name,
            size = packaged.size,
            "support bundle is ready to download"
        );
        Ok(())
    }

    /// The directory the final archive is written to.
    #[must_use]
    pub fn output_dir(&self) -> PathBuf {
        self.config.output_dir()
    }
}

impl std::fmt::Debug for SupportBundleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupportBundleManager")
            .field("namespace", &self.config.namespace)
            .field("bundle_name", &self.config.bundle_name)
            .field("status", &self.status.snapshot())
            .finish_non_exhaustive()
    }
}
