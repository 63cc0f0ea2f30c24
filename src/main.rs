use livedesk::config::Config;
use livedesk::interface::api::{build_router, init_metrics, AppState};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting LiveDesk relay");

    // Load configuration
    let config_path = std::env::args().nth(1);
    let config = Config::load(config_path.as_deref())?;
    info!(
        "Configuration loaded: calls_enabled={} require_room_key={} max_room_members={}",
        config.calls.enabled, config.calls.require_room_key, config.calls.max_room_members
    );
    if config.security.room_key_secret == "change-me" {
        warn!("security.room_key_secret is the default; set LIVEDESK__SECURITY__ROOM_KEY_SECRET");
    }

    info!("Initializing Prometheus metrics exporter");
    let prometheus_handle = init_metrics()?;

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let app = build_router(AppState::new(config), Some(prometheus_handle));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Relay listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutting down...");
        })
        .await?;

    info!("Relay stopped");
    Ok(())
}
