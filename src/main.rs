use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use lending_aggregator::{
    adapters::build_adapters,
    blockchain::EthereumClient,
    cache::TieredCache,
    config::Settings,
    handlers,
    models::MarketFilter,
    risk::RiskPolicy,
    services::{HealthMonitor, LendingAggregator, PriceService, SimulationService, VaultApiClient, YieldsApiClient},
    AppState,
};
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let settings = Settings::new()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(settings.logging.level.clone()))
        .init();

    info!("Starting lending aggregator core");

    let client = EthereumClient::new(&settings.blockchain.rpc_url).await?;
    let chain_id = settings.blockchain.chain_id;

    // Data source clients, shared across adapters
    let price_service = Arc::new(PriceService::new(
        client.clone(),
        settings.sources.price_api_url.clone(),
    )?);
    let vault_api = Arc::new(VaultApiClient::new(settings.sources.vault_api_url.clone())?);
    let yields = Arc::new(YieldsApiClient::new(
        settings.sources.yields_api_url.clone(),
        "Ethereum",
    )?);

    // One explicitly-constructed cache pair per process, injected into the
    // aggregation layer
    let redis_url = settings.cache.redis_url.as_deref();
    let markets_cache = TieredCache::new("markets", settings.cache.max_capacity, redis_url)?;
    let positions_cache = TieredCache::new("positions", settings.cache.max_capacity, redis_url)?;

    let adapters = Arc::new(build_adapters(
        client.clone(),
        chain_id,
        price_service.clone(),
        vault_api.clone(),
        yields.clone(),
    ));
    info!(adapter_count = adapters.len(), chain_id, "Adapters initialized");

    let aggregator = Arc::new(LendingAggregator::new(
        adapters.clone(),
        markets_cache,
        positions_cache,
        chain_id,
    ));
    let simulation = Arc::new(SimulationService::new(client.clone(), adapters.clone()));

    let policy = RiskPolicy::with_safety_margin(settings.risk.safety_margin);
    let health_monitor = Arc::new(HealthMonitor::new(policy.clone()));

    let state = AppState {
        settings: settings.clone(),
        policy,
        aggregator: aggregator.clone(),
        simulation,
        health_monitor: health_monitor.clone(),
    };

    // Free-running refresh loops; each is idempotent and none share a
    // scheduler
    spawn_market_refresh(aggregator.clone(), settings.risk.markets_refresh_seconds);
    spawn_health_monitoring(
        aggregator.clone(),
        health_monitor,
        settings.risk.health_check_interval_seconds,
    );

    let app = Router::new()
        .route("/health", get(handlers::health::health_check))
        .nest("/api/v1", handlers::api_router())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("{}:{}", settings.api.host, settings.api.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "API server listening");

    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Web server error: {}", e);
        }
    });

    tokio::select! {
        _ = server => {
            error!("Web server stopped unexpectedly");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    info!("Shutting down lending aggregator");
    Ok(())
}

fn spawn_market_refresh(aggregator: Arc<LendingAggregator>, interval_seconds: u64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_seconds));
        loop {
            interval.tick().await;
            match aggregator.get_markets(&MarketFilter::default()).await {
                Ok(snapshot) => {
                    info!(
                        market_count = snapshot.markets.len(),
                        protocols_succeeded = snapshot.protocols_succeeded,
                        protocols_attempted = snapshot.protocols_attempted,
                        source = ?snapshot.source,
                        "Market refresh tick"
                    );
                }
                Err(e) => {
                    warn!(error = %e, "Market refresh failed");
                }
            }
        }
    });
}

fn spawn_health_monitoring(
    aggregator: Arc<LendingAggregator>,
    monitor: Arc<HealthMonitor>,
    interval_seconds: u64,
) {
    // Watched addresses come from the environment; health monitoring is a
    // no-op without them
    let watched: Vec<String> = std::env::var("WATCH_ADDRESSES")
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    if watched.is_empty() {
        info!("No WATCH_ADDRESSES configured, health monitoring idle");
        return;
    }

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_seconds));
        loop {
            interval.tick().await;
            for raw in &watched {
                let user = match EthereumClient::validate_address(raw) {
                    Ok(address) => address,
                    Err(e) => {
                        warn!(address = %raw, error = %e, "Skipping invalid watch address");
                        continue;
                    }
                };

                match aggregator.get_user_positions(user).await {
                    Ok(snapshot) => {
                        let alerts = monitor.evaluate(user, &snapshot.positions).await;
                        for alert in alerts {
                            warn!(
                                user = %alert.user,
                                protocol = %alert.protocol,
                                severity = ?alert.severity,
                                health_factor = alert.health_factor,
                                "{}",
                                alert.message
                            );
                        }
                    }
                    Err(e) => {
                        warn!(user = %raw, error = %e, "Health monitoring fetch failed");
                    }
                }
            }
        }
    });
}
