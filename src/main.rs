//! x402 Facilitator HTTP entrypoint.
//!
//! This binary launches an Axum-based HTTP server that exposes the x402
//! protocol interface for payment verification and settlement.
//!
//! Endpoints:
//! - `POST /verify` – Verify a payment payload against requirements
//! - `POST /settle` – Settle an accepted payment payload on-chain
//! - `GET /supported` – List supported payment kinds (version/scheme/network)
//! - `GET /discovery/resources` – Page through catalogued merchant resources
//!
//! The server includes OpenTelemetry tracing, CORS support, a per-network
//! provider cache, and background loops for wallet health and gas balances.
//!
//! Environment:
//! - `.env` values loaded at startup
//! - `HOST`, `PORT` control the binding address
//! - `OTEL_*` variables enable tracing export

use axum::Router;
use axum::http::Method;
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors;
use tower_http::trace::TraceLayer;

use x402_facilitator::config::Config;
use x402_facilitator::discovery::{DiscoveryRegistry, InMemoryResourceStore};
use x402_facilitator::facilitator_local::FacilitatorLocal;
use x402_facilitator::provider_cache::ProviderCache;
use x402_facilitator::sig_down::SigDown;
use x402_facilitator::telemetry::Telemetry;
use x402_facilitator::{handlers, scheduler};

/// Initializes the x402 facilitator server.
///
/// - Loads `.env` variables.
/// - Initializes telemetry.
/// - Connects chain providers for the configured networks.
/// - Spawns the background loops.
/// - Starts the Axum HTTP server with graceful shutdown.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let _telemetry = Telemetry::new();

    let config = Arc::new(Config::from_env()?);
    let providers = Arc::new(ProviderCache::from_config(&config).await?);
    let discovery = Arc::new(DiscoveryRegistry::new(
        Some(Arc::new(InMemoryResourceStore::new())),
        config.allow_localhost_resources(),
    ));

    let sig_down = SigDown::try_new()?;
    let shutdown = sig_down.cancellation_token();
    let background = scheduler::spawn(
        Arc::clone(&providers),
        Arc::clone(&discovery),
        config.wallet_pool().health_check_interval,
        shutdown.clone(),
    );

    let facilitator = Arc::new(FacilitatorLocal::new(
        providers,
        discovery,
        Arc::clone(&config),
    ));

    let http_endpoints = Router::new()
        .merge(handlers::routes())
        .with_state(facilitator)
        .layer(TraceLayer::new_for_http())
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any),
        );

    let addr = SocketAddr::new(config.host(), config.port());
    tracing::info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        });

    let axum_cancellation_token = shutdown.clone();
    let axum_graceful_shutdown = async move { axum_cancellation_token.cancelled().await };
    axum::serve(listener, http_endpoints)
        .with_graceful_shutdown(axum_graceful_shutdown)
        .await?;

    background.wait().await;
    Ok(())
}
