//! Coordinator server

use crate::common::{Result, ServiceConfig};
use crate::coordinator::http::{create_router, CoordState};
use crate::coordinator::QuorumEngine;

pub struct Coordinator {
    config: ServiceConfig,
}

impl Coordinator {
    pub fn new(config: ServiceConfig) -> Self {
        Self { config }
    }

    /// Build the replica set, then serve HTTP until ctrl-c.
    ///
    /// Invalid quorum settings fail here, before the listener is bound.
    pub async fn serve(self) -> Result<()> {
        let engine = QuorumEngine::from_config(&self.config)?;
        let policy = engine.policy();

        tracing::info!("Starting leaderless coordinator");
        tracing::info!("  HTTP API: {}", self.config.bind_addr);
        tracing::info!(
            "  Replicas: {}",
            self.config
                .endpoints()?
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        );
        tracing::info!(
            "  Quorum: W={} R={} (read threshold {}, {} agreement)",
            policy.write_quorum(),
            policy.read_quorum(),
            policy.read_threshold(),
            policy.agreement()
        );
        tracing::info!("  Replica timeout: {:?}", self.config.replica_timeout());

        let router = create_router(CoordState { engine });
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;

        tracing::info!("✓ Coordinator ready");

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("Coordinator stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
