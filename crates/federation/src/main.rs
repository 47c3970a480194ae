use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use agora_federation::{
    router, AppState, FederationState, GossipOrchestrator, GossipTransport, HttpTransport,
    MemoryStore,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = agora_common::config::load().context("load configuration")?;
    let bind_addr: SocketAddr = config.bind_addr.parse().context("parse bind_addr")?;
    let timeout = Duration::from_secs(config.gossip_timeout_secs.max(1));

    let store = Arc::new(MemoryStore::new());
    let state = Arc::new(
        FederationState::new(config, store).map_err(|e| anyhow::anyhow!(e.to_string()))?,
    );
    let transport =
        Arc::new(HttpTransport::new(timeout).map_err(|e| anyhow::anyhow!(e.to_string()))?)
            as Arc<dyn GossipTransport>;
    let orchestrator = Arc::new(GossipOrchestrator::new(Arc::clone(&state), transport));

    if state.config.federation_enabled && state.profile.gossip_enabled() {
        orchestrator
            .start_scheduler()
            .map_err(|e| anyhow::anyhow!(e.to_string()))?;
        tracing::info!(
            interval_secs = state.config.gossip_interval_secs,
            "gossip scheduler started"
        );
    } else {
        tracing::info!("gossip scheduler not started (federation or gossip disabled)");
    }

    let app = router(Arc::new(AppState {
        federation: state,
        orchestrator,
    }));

    tracing::info!("agora federation listening on {}", bind_addr);
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .context("bind listener")?;
    axum::serve(listener, app).await.context("serve")?;
    Ok(())
}
