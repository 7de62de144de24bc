use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use bundlekit::cancellation::CancellationToken;
use bundlekit::cluster::{ClusterApi, KubeClusterApi, MetadataExporter};
use bundlekit::config::{env, ManagerConfig};
use bundlekit::core::BundleRequest;
use bundlekit::manager::SupportBundleManager;
use bundlekit::state::InMemoryStateStore;

/// Product name written into bundle metadata.
const PROJECT_NAME: &str = "Harvester";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = ManagerConfig::from_env()?;
    config.validate()?;

    let mut request = BundleRequest::new(
        &config.namespace,
        &config.bundle_name,
        config.wait_timeout(),
    )
    .with_node_selector(&config.node_selector);
    if let Some(url) = non_empty_env(env::ISSUE_URL) {
        request = request.with_issue_url(url);
    }
    if let Some(description) = non_empty_env(env::DESCRIPTION) {
        request = request.with_description(description);
    }

    let cluster: Arc<dyn ClusterApi> = Arc::new(
        KubeClusterApi::try_default()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to create kubernetes client: {e}"))?,
    );
    let exporter = Arc::new(MetadataExporter::new(Arc::clone(&cluster), PROJECT_NAME));
    let state_store = Arc::new(InMemoryStateStore::seeded(request));

    info!(
        namespace = %config.namespace,
        bundle = %config.bundle_name,
        "starting support bundle manager"
    );
    let cancel = Arc::new(CancellationToken::new());
    let manager = SupportBundleManager::new(config, cluster, state_store, exporter)
        .with_cancellation_token(Arc::clone(&cancel));

    tokio::spawn(async move {
        shutdown_signal().await;
        cancel.cancel("received shutdown signal");
    });

    if let Err(e) = manager.run().await {
        error!(error = %e, "support bundle collection failed");
    }

    // Keep serving status and the archive until the pod is stopped.
    manager.serve_until_cancelled().await;
    info!("support bundle manager stopped");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("BUNDLEKIT_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutting down");
}
