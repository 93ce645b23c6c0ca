use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use inpaint_cloud::{MemoryObjectStore, ObjectStore, S3Config, S3ObjectStore, StoreGateway};
use inpaint_core::naming::naming_from_name;
use inpaint_pipeline::{sweeper, Executor, InferenceConfig, JobContext, SubprocessEngine, TaskRegistry};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use inpaint_api::config::ServerConfig;
use inpaint_api::router::build_app_router;
use inpaint_api::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "inpaint_api=debug,inpaint_pipeline=debug,inpaint_cloud=debug,tower_http=debug"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env()?;
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    let naming = naming_from_name(&config.output_naming)?;

    // --- Object store ---
    let store: Arc<dyn ObjectStore> = match std::env::var("OBJECT_STORE").as_deref() {
        Ok("memory") => {
            tracing::warn!("Using in-memory object store; artifacts are not persisted");
            Arc::new(MemoryObjectStore::new())
        }
        _ => {
            let s3_config = S3Config::from_env()?;
            Arc::new(
                S3ObjectStore::connect(s3_config)
                    .await
                    .context("Failed to initialise S3 object store")?,
            )
        }
    };

    // --- Inference engine ---
    let inference_config = InferenceConfig::from_env();
    tracing::info!(program = %inference_config.program, "Inference engine configured");
    let engine = SubprocessEngine::new(inference_config);

    // --- Registry and executor ---
    let cancel = CancellationToken::new();
    let registry = TaskRegistry::start(cancel.clone());
    let executor = Arc::new(Executor::start(config.worker_pool_size, registry.clone())?);

    let sweeper_handle = config.task_ttl_secs.map(|ttl| {
        tokio::spawn(sweeper::run(
            registry.clone(),
            Duration::from_secs(ttl),
            cancel.clone(),
        ))
    });

    // --- App state ---
    let mut jobs = JobContext::new(
        StoreGateway::new(store),
        Arc::new(engine),
        naming,
        config.work_root.clone(),
    );
    jobs.canonical_size = config.canonical_size;

    let state = AppState {
        executor: Arc::clone(&executor),
        jobs,
    };
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().context("Invalid HOST address")?,
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, draining queued jobs");
    executor.shutdown().await;

    cancel.cancel();
    if let Some(handle) = sweeper_handle {
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    }

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
