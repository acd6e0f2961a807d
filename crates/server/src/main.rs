use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use perle_core::{
    create_infra_services, load_config, open_request_store, validate_config, ConfigCatalog,
    ProvisioningOrchestrator, RequestState, RequestUpdateCallback,
};
use perle_server::api::create_router;
use perle_server::metrics::REQUEST_TRANSITIONS;
use perle_server::state::AppState;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Determine config path
    let config_path = std::env::var("PERLE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    // Validate configuration
    validate_config(&config).context("Configuration validation failed")?;

    info!("Configuration loaded successfully");
    info!(
        "Storage backend: {:?} (database {:?}, log dir {:?})",
        config.storage.backend, config.storage.path, config.storage.log_dir
    );
    info!("Infrastructure backend: {:?}", config.infrastructure.backend);

    // Track catalog with configured overrides
    let catalog = Arc::new(
        ConfigCatalog::with_overrides(&config.tracks).context("Invalid track templates")?,
    );

    // Durable request log
    let store = open_request_store(&config.storage).context("Failed to open request store")?;
    info!("Request store initialized");

    // Infrastructure leaves
    let infra = create_infra_services(&config.infrastructure)
        .context("Failed to create infrastructure clients")?;

    let update_callback: RequestUpdateCallback =
        Arc::new(|request_id: &str, state: RequestState| {
            debug!("Request {} entered {}", request_id, state);
            REQUEST_TRANSITIONS
                .with_label_values(&[state.as_str()])
                .inc();
        });

    let orchestrator = Arc::new(
        ProvisioningOrchestrator::new(config.orchestrator.clone(), catalog, store, infra)
            .with_update_callback(update_callback),
    );

    orchestrator.start().await;
    info!("Provisioning orchestrator started");

    // Create app state
    let state = Arc::new(AppState::new(config.clone(), Arc::clone(&orchestrator)));

    // Create router
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Stopping orchestrator...");
    orchestrator.stop().await;
    info!("Server shut down");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
