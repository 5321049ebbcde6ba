//! Server setup and lifecycle management
//!
//! Startup: open the file-backed log and progress store, register job
//! agents, start the workspace registry and the consumer, then serve the
//! read API. Shutdown reverses it: stop serving, stop the consumer (which
//! flushes progress), then close the registry and its reconcilers.

use crate::api::{create_router, AppState};
use crate::config::DaemonConfig;
use crate::error::{DaemonError, DaemonResult};
use engine_core::{
    Consumer, FileLog, FileProgressStore, InMemoryDeadLetterQueue, Registry, WorkspaceServices,
};
use engine_dispatch::{AgentRegistry, DispatchGateway, InMemoryAgent, InMemoryJobLedger, WebhookAgent};
use engine_store::InMemorySnapshotSink;
use engine_types::{ShutdownTrigger, SystemClock};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Engine daemon server
#[derive(Debug)]
pub struct Server {
    config: DaemonConfig,
    registry: Arc<Registry>,
    consumer: Arc<Consumer>,
}

impl Server {
    /// Create a new server with the given configuration
    pub async fn new(config: DaemonConfig) -> DaemonResult<Self> {
        let agents = AgentRegistry::new();
        if config.dispatch.recording_agent {
            agents.register(Arc::new(InMemoryAgent::new(
                config.dispatch.default_agent_kind.clone(),
            )));
        }
        let webhook = WebhookAgent::new(config.dispatch.webhook_timeout())
            .map_err(|e| DaemonError::Config(e.to_string()))?;
        agents.register(Arc::new(webhook));
        info!(kinds = ?agents.kinds(), "Job agents registered");

        let gateway = Arc::new(DispatchGateway::new(
            agents,
            Arc::new(InMemoryJobLedger::new()),
            config.dispatch.to_gateway_config(),
        ));
        let services = WorkspaceServices::new(
            gateway,
            Arc::new(SystemClock),
            Arc::new(InMemorySnapshotSink::new()),
        )
        .with_retry(config.dispatch.to_retry_policy())
        .with_reconciler(config.reconciler.to_reconciler_config())
        .with_notification_capacity(config.reconciler.notification_capacity)
        .with_early_result_limit(config.reconciler.early_result_limit);
        let registry = Arc::new(Registry::new(services));

        let log = FileLog::open(&config.consumer.log_dir).await?;
        let progress = FileProgressStore::open(&config.consumer.progress_path).await?;
        let consumer = Arc::new(Consumer::new(
            config.consumer.to_consumer_config(),
            Arc::new(log),
            Arc::new(progress),
            Arc::new(InMemoryDeadLetterQueue::new()),
            Arc::clone(&registry),
        ));

        Ok(Self {
            config,
            registry,
            consumer,
        })
    }

    /// Run until a shutdown signal arrives
    pub async fn run(self) -> DaemonResult<()> {
        let addr = self.config.server.listen_addr()?;
        let state = AppState::new(Arc::clone(&self.registry), Arc::clone(self.consumer.health()));
        let app = create_router(state, self.config.server.enable_cors);
        let listener = TcpListener::bind(addr).await?;

        self.registry.run()?;
        let (trigger, shutdown) = ShutdownTrigger::new();
        let consumer = Arc::clone(&self.consumer);
        let consuming = tokio::spawn(async move { consumer.run(shutdown).await });

        info!(%addr, topic = %self.config.consumer.topic, "Workspace engine listening");

        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| DaemonError::Server(e.to_string()));

        info!("Workspace engine shutting down");
        trigger.trigger();
        match consuming.await {
            Ok(Ok(stats)) => info!(
                applied = stats.applied,
                skipped = stats.skipped,
                dead_lettered = stats.dead_lettered,
                "Consumer stopped"
            ),
            Ok(Err(e)) => error!(error = %e, "Consumer stopped with error"),
            Err(e) => error!(error = %e, "Consumer task failed"),
        }
        self.registry.close().await;

        served
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
