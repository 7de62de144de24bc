//! End-to-end runs of the phase state machine against in-memory fakes.

#[cfg(test)]
mod tests {
    use crate::cancellation::CancellationToken;
    use crate::core::{BundleState, ManagerPhase};
    use crate::errors::BundleError;
    use crate::events::{
        AGENTS_DELETED, AGENTS_RETAINED, AGENTS_SPAWNED, NODES_TIMED_OUT, PHASE_COMPLETED,
        PHASE_FAILED,
    };
    use crate::manager::SupportBundleManager;
    use crate::state::{BundleRecord, InMemoryStateStore};
    use crate::testing::{
        assert_status_done, assert_status_failed, node_bundle_archive, test_config, test_request,
        FakeClusterApi, FakeExporter, RecordingEventSink, TEST_BUNDLE, TEST_NAMESPACE,
    };
    use crate::utils::bundle_stem;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use flate2::read::GzDecoder;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;
    use tar::Archive;
    use tower::ServiceExt;

    const LONG_WAIT: Duration = Duration::from_secs(30);
    const SHORT_WAIT: Duration = Duration::from_secs(1);

    struct Harness {
        dir: tempfile::TempDir,
        cluster: Arc<FakeClusterApi>,
        store: Arc<InMemoryStateStore>,
        events: Arc<RecordingEventSink>,
        manager: Arc<SupportBundleManager>,
    }

    fn harness(cluster: FakeClusterApi, wait: Duration) -> Harness {
        harness_with(cluster, wait, FakeExporter::new(), BundleState::Generating)
    }

    fn harness_with(
        cluster: FakeClusterApi,
        wait: Duration,
        exporter: FakeExporter,
        state: BundleState,
    ) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let cluster = Arc::new(cluster);
        let store = Arc::new(InMemoryStateStore::new());
        store.insert(BundleRecord {
            state,
            ..BundleRecord::generating(test_request(wait))
        });
        let events = Arc::new(RecordingEventSink::new());
        let manager = SupportBundleManager::new(
            test_config(dir.path(), wait),
            cluster.clone(),
            store.clone(),
            Arc::new(exporter),
        )
        .with_events(events.clone());

        Harness {
            dir,
            cluster,
            store,
            events,
            manager: Arc::new(manager),
        }
    }

    impl Harness {
        fn start(&self) -> tokio::task::JoinHandle<crate::errors::Result<()>> {
            let manager = Arc::clone(&self.manager);
            tokio::spawn(async move { manager.run().await })
        }

        async fn wait_for_agents(&self) {
            for _ in 0..500 {
                if !self.cluster.created().is_empty() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            panic!("agents were never created");
        }

        async fn upload(&self, node: &str, body: Vec<u8>) -> StatusCode {
            self.upload_reply(node, body).await.0
        }

        async fn upload_reply(&self, node: &str, body: Vec<u8>) -> (StatusCode, serde_json::Value) {
            let request = Request::builder()
                .method("POST")
                .uri(format!("/v1/nodebundle/{node}"))
                .body(Body::from(body))
                .unwrap();
            let response = self.manager.router().oneshot(request).await.unwrap();
            let status = response.status();
            let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
                .await
                .unwrap();
            (status, serde_json::from_slice(&bytes).unwrap())
        }

        fn archive_listing(&self) -> Vec<String> {
            let path = self.dir.path().join(FakeExporter::FILE_NAME);
            let file = std::fs::File::open(path).unwrap();
            Archive::new(GzDecoder::new(file))
                .entries()
                .unwrap()
                .map(|e| e.unwrap().path().unwrap().display().to_string())
                .collect()
        }

        fn record(&self) -> BundleRecord {
            self.store.record(TEST_NAMESPACE, TEST_BUNDLE).unwrap()
        }
    }

    fn node_archive(node: &str) -> Vec<u8> {
        node_bundle_archive(&[("journal.log", format!("{node} boot ok\n").as_bytes())])
    }

    fn node_entry(node: &str) -> String {
        format!("{}/nodes/{node}.tar.gz", bundle_stem(FakeExporter::FILE_NAME))
    }

    #[tokio::test]
    async fn test_all_nodes_report_and_agents_are_deleted() {
        let h = harness(FakeClusterApi::with_nodes(["node-a", "node-b"]), LONG_WAIT);
        let run = h.start();
        h.wait_for_agents().await;

        assert_eq!(h.upload("node-a", node_archive("node-a")).await, StatusCode::OK);
        assert_eq!(h.upload("node-b", node_archive("node-b")).await, StatusCode::OK);

        run.await.unwrap().unwrap();

        assert_status_done(&h.manager.status().snapshot());
        assert_eq!(h.cluster.deleted().len(), 1);
        assert_eq!(h.events.count(AGENTS_DELETED), 1);
        assert_eq!(h.events.count(PHASE_COMPLETED), 5);

        let listing = h.archive_listing();
        assert!(listing.contains(&node_entry("node-a")));
        assert!(listing.contains(&node_entry("node-b")));

        let record = h.record();
        assert_eq!(record.state, BundleState::Ready);
        assert_eq!(record.filename.as_deref(), Some(FakeExporter::FILE_NAME));
        assert_eq!(record.filesize, h.manager.status().snapshot().filesize);
    }

    #[tokio::test]
    async fn test_partial_timeout_packages_reported_nodes_only() {
        let h = harness(
            FakeClusterApi::with_nodes(["node-a", "node-b", "node-c"]),
            SHORT_WAIT,
        );
        let run = h.start();
        h.wait_for_agents().await;

        assert_eq!(h.upload("node-a", node_archive("node-a")).await, StatusCode::OK);
        assert_eq!(h.upload("node-c", node_archive("node-c")).await, StatusCode::OK);

        run.await.unwrap().unwrap();

        let status = h.manager.status().snapshot();
        assert_status_done(&status);
        assert!(status.filename.is_some());
        assert!(h.cluster.deleted().is_empty());
        assert_eq!(h.events.count(AGENTS_RETAINED), 1);

        let timed_out = h.events.of_kind(NODES_TIMED_OUT);
        assert_eq!(timed_out[0].data["pending"], serde_json::json!(["node-b"]));

        let listing = h.archive_listing();
        assert!(listing.contains(&node_entry("node-a")));
        assert!(listing.contains(&node_entry("node-c")));
        assert!(!listing.iter().any(|entry| entry.contains("node-b")));
    }

    #[tokio::test]
    async fn test_upload_after_packaging_is_not_stored() {
        let h = harness(FakeClusterApi::with_nodes(["node-a", "node-b"]), SHORT_WAIT);
        let run = h.start();
        h.wait_for_agents().await;

        assert_eq!(h.upload("node-a", node_archive("node-a")).await, StatusCode::OK);
        run.await.unwrap().unwrap();
        assert!(h.manager.tracker().is_closed());

        let (status, reply) = h.upload_reply("node-b", node_archive("node-b")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(reply["accepted"], false);
        assert!(!h.dir.path().join("bundle").exists());
        let staged = std::fs::read_dir(h.dir.path().join(".incoming")).unwrap();
        assert_eq!(staged.count(), 0);
        assert!(!h.archive_listing().iter().any(|entry| entry.contains("node-b")));
        assert!(h.manager.tracker().is_pending("node-b"));
    }

    #[tokio::test]
    async fn test_zero_matching_nodes_fails_node_bundle_phase() {
        let h = harness(FakeClusterApi::default(), LONG_WAIT);

        let err = h.manager.run().await.unwrap_err();

        assert!(matches!(err, BundleError::NoNodesMatched { .. }));
        let status = h.manager.status().snapshot();
        assert_status_failed(&status, ManagerPhase::NodeBundle, "no nodes are found");
        assert_eq!(status.progress, 40);
        assert!(h.cluster.created().is_empty());
        assert!(!h.dir.path().join(FakeExporter::FILE_NAME).exists());
        assert_eq!(h.record().state, BundleState::Error);
        assert_eq!(h.events.count(PHASE_FAILED), 1);
    }

    #[tokio::test]
    async fn test_empty_upload_then_valid_reupload() {
        let h = harness(FakeClusterApi::with_nodes(["node-a"]), LONG_WAIT);
        let run = h.start();
        h.wait_for_agents().await;

        assert_eq!(h.upload("node-a", Vec::new()).await, StatusCode::BAD_REQUEST);
        assert!(h.manager.tracker().is_pending("node-a"));
        assert!(!run.is_finished());

        assert_eq!(h.upload("node-a", node_archive("node-a")).await, StatusCode::OK);
        run.await.unwrap().unwrap();

        assert_status_done(&h.manager.status().snapshot());
        assert_eq!(h.cluster.deleted().len(), 1);
        assert!(h.archive_listing().contains(&node_entry("node-a")));
    }

    #[tokio::test]
    async fn test_schedule_error_aborts_run() {
        let h = harness(
            FakeClusterApi::with_nodes(["node-a"]).failing_create("daemonsets.apps is forbidden"),
            LONG_WAIT,
        );

        let err = h.manager.run().await.unwrap_err();

        assert!(matches!(err, BundleError::Schedule(_)));
        assert_status_failed(
            &h.manager.status().snapshot(),
            ManagerPhase::NodeBundle,
            "daemonsets.apps is forbidden",
        );
        assert_eq!(h.record().state, BundleState::Error);
    }

    #[tokio::test]
    async fn test_cleanup_failure_is_not_fatal() {
        let h = harness(
            FakeClusterApi::with_nodes(["node-a"]).failing_delete("connection refused"),
            LONG_WAIT,
        );
        let run = h.start();
        h.wait_for_agents().await;

        assert_eq!(h.upload("node-a", node_archive("node-a")).await, StatusCode::OK);

        run.await.unwrap().unwrap();
        assert_status_done(&h.manager.status().snapshot());
        assert_eq!(h.cluster.deleted().len(), 1);
        assert_eq!(h.events.count(AGENTS_DELETED), 0);
    }

    #[tokio::test]
    async fn test_cancel_during_wait() {
        let h = harness(FakeClusterApi::with_nodes(["node-a"]), LONG_WAIT);
        let run = h.start();
        h.wait_for_agents().await;

        h.manager.cancellation_token().cancel("SIGTERM");

        let err = run.await.unwrap().unwrap_err();
        assert!(matches!(err, BundleError::Cancelled(_)));
        assert!(h.cluster.deleted().is_empty());
        assert_status_failed(
            &h.manager.status().snapshot(),
            ManagerPhase::NodeBundle,
            "SIGTERM",
        );
    }

    #[tokio::test]
    async fn test_invalid_start_state_leaves_record_alone() {
        let h = harness_with(
            FakeClusterApi::with_nodes(["node-a"]),
            LONG_WAIT,
            FakeExporter::new(),
            BundleState::Ready,
        );

        let err = h.manager.run().await.unwrap_err();

        assert!(matches!(err, BundleError::InvalidState { .. }));
        assert_status_failed(&h.manager.status().snapshot(), ManagerPhase::Init, "ready");
        assert_eq!(h.record().state, BundleState::Ready);
        assert!(h.manager.local_addr().is_none());
    }

    #[tokio::test]
    async fn test_exporter_failure_stops_before_agents() {
        let h = harness_with(
            FakeClusterApi::with_nodes(["node-a"]),
            LONG_WAIT,
            FakeExporter::failing("pods is forbidden"),
            BundleState::Generating,
        );

        let err = h.manager.run().await.unwrap_err();

        assert!(matches!(err, BundleError::Exporter(_)));
        assert_status_failed(
            &h.manager.status().snapshot(),
            ManagerPhase::ClusterBundle,
            "pods is forbidden",
        );
        assert!(h.cluster.created().is_empty());
    }

    #[tokio::test]
    async fn test_missing_image_fails_init() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path(), LONG_WAIT);
        config.image = String::new();
        let store = Arc::new(InMemoryStateStore::seeded(test_request(LONG_WAIT)));
        let manager = SupportBundleManager::new(
            config,
            Arc::new(FakeClusterApi::with_nodes(["node-a"])),
            store.clone(),
            Arc::new(FakeExporter::new()),
        );

        let err = manager.run().await.unwrap_err();

        assert_eq!(err.to_string(), "image name is not specified");
        assert_status_failed(&manager.status().snapshot(), ManagerPhase::Init, "image");
        assert_eq!(
            store.record(TEST_NAMESPACE, TEST_BUNDLE).unwrap().state,
            BundleState::Error
        );
    }

    #[tokio::test]
    async fn test_agents_get_callback_url_and_selector() {
        let wait = SHORT_WAIT;
        let dir = tempfile::tempdir().unwrap();
        let cluster = Arc::new(FakeClusterApi::with_nodes(["node-a"]));
        let store = Arc::new(InMemoryStateStore::seeded(
            test_request(wait).with_node_selector("role=worker,zone=a"),
        ));
        let cancel = Arc::new(CancellationToken::new());
        let manager = SupportBundleManager::new(
            test_config(dir.path(), wait),
            cluster.clone(),
            store,
            Arc::new(FakeExporter::new()),
        )
        .with_cancellation_token(Arc::clone(&cancel));
        let events = Arc::new(RecordingEventSink::new());
        let manager = manager.with_events(events.clone());

        manager.run().await.unwrap();

        let addr = manager.local_addr().unwrap();
        let created = cluster.created();
        assert_eq!(created[0].callback_url, format!("http://127.0.0.1:{}", addr.port()));
        assert_eq!(created[0].node_selector.get("zone").map(String::as_str), Some("a"));
        assert_eq!(cluster.listed_selectors(), vec!["role=worker,zone=a".to_string()]);
        let spawned = events.of_kind(AGENTS_SPAWNED);
        assert_eq!(spawned[0].field("nodeSelector"), Some("role=worker,zone=a"));

        cancel.cancel("test finished");
        tokio::time::timeout(Duration::from_secs(5), manager.serve_until_cancelled())
            .await
            .unwrap();
    }

    #[test]
    fn test_archive_entry_naming() {
        assert!(node_entry("node-a").ends_with("/nodes/node-a.tar.gz"));
        assert!(Path::new(&node_entry("node-a")).starts_with(bundle_stem(FakeExporter::FILE_NAME)));
    }
}
