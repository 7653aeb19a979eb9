//! Dashboard Sync Server - keeps a local dashboard cache in step with a REST upstream.

use dashsync_engine::{JsonFileStore, SyncEngine};
use dashsync_server::config::Config;
use dashsync_server::upstream::{HttpProbe, RestSource};
use dashsync_server::websocket::{forward_engine_events, ConnectionManager};
use dashsync_server::{app, AppState};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "dashsync_server=debug,dashsync_engine=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!(
        "Starting Dashboard Sync Server on {}:{} (upstream {})",
        config.host,
        config.port,
        config.upstream_url
    );

    // Build the engine
    let remote = Arc::new(RestSource::new(
        config.upstream_url.clone(),
        config.upstream_api_key.clone(),
    ));
    let probe = Arc::new(HttpProbe::new(
        &config.upstream_url,
        &config.health_path,
        config.upstream_api_key.clone(),
    ));
    let store = Arc::new(JsonFileStore::open(&config.data_dir).await?);

    let engine = SyncEngine::builder(remote, probe)
        .store(store)
        .config(config.engine_config())
        .build()
        .await?;

    tracing::info!(
        pending = engine.pending_count(),
        "Offline queue restored from {}",
        config.data_dir.display()
    );

    // Push engine events to WebSocket clients
    let conn_manager = ConnectionManager::new_shared();
    let subscriptions = forward_engine_events(engine.bus(), engine.config(), &conn_manager);

    engine.start();

    let state = AppState {
        engine: engine.clone(),
        config: Arc::new(config.clone()),
        conn_manager,
    };

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    for subscription in subscriptions {
        subscription.unsubscribe();
    }
    engine.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
