use anyhow::Result;
use axum::Router;
use smart_flex_bridge::{api, config::Config, coordinator, telemetry};
use telemetry::init_tracing;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cfg = Config::load()?;

    if cfg.auth.token.is_empty() || cfg.auth.token.starts_with("__SET_VIA_ENV") {
        anyhow::bail!(
            "SFB__AUTH__TOKEN environment variable must be set to a secure random token (min 32 chars). \
            Generate one with: openssl rand -base64 32"
        );
    }

    let app_state = coordinator::AppState::new(cfg.clone())?;

    // First derivation before we accept traffic; a failure is survivable,
    // the poll loop will retry.
    match app_state.coordinator.refresh().await {
        Ok(generation) => info!(generation, "initial snapshot derived"),
        Err(e) => warn!(error = %e, "initial refresh failed, serving degraded until retry"),
    }

    coordinator::spawn_refresh_task(&app_state);

    let app: Router = api::router(app_state.clone(), &cfg);
    let addr = cfg.server.socket_addr()?;

    if cfg.server.host == "0.0.0.0" {
        warn!(
            "Server binding to 0.0.0.0 - service will be accessible from network! \
            For production, bind to 127.0.0.1 unless behind a firewall/reverse proxy."
        );
    }

    info!(%addr, "starting Smart Flex Bridge");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(telemetry::shutdown_signal())
        .await?;

    warn!("shutdown complete");
    Ok(())
}
