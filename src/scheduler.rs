//! Background loops: gas-balance refresh, wallet-pool health checks, and
//! discovery cleanup.
//!
//! Each loop runs as its own long-lived task and honors the process-level
//! shutdown token; in-flight RPC work is abandoned on cancellation and its
//! results discarded.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::chain::NetworkProvider;
use crate::discovery::DiscoveryRegistry;
use crate::provider_cache::ProviderCache;

/// Cadence of the gas-balance refresher.
const GAS_REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);
/// Cadence of the discovery cleanup sweep.
const DISCOVERY_CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Spawn all periodic jobs. Returns the tracker so the caller can await
/// their completion after cancelling the token.
pub fn spawn(
    providers: Arc<ProviderCache>,
    discovery: Arc<DiscoveryRegistry>,
    health_check_interval: Duration,
    shutdown: CancellationToken,
) -> TaskTracker {
    let tracker = TaskTracker::new();
    tracker.spawn(gas_balance_loop(Arc::clone(&providers), shutdown.clone()));
    tracker.spawn(health_check_loop(
        providers,
        health_check_interval,
        shutdown.clone(),
    ));
    tracker.spawn(discovery_cleanup_loop(discovery, shutdown));
    tracker.close();
    tracker
}

/// Every five minutes (and once at startup), read and publish the native
/// balance of every `(network, wallet)` pair. Per-wallet failures are
/// logged and skipped inside the providers.
async fn gas_balance_loop(providers: Arc<ProviderCache>, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(GAS_REFRESH_INTERVAL);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let refreshes = providers.into_iter().map(|(_, provider)| async move {
                    match provider {
                        NetworkProvider::Evm(evm) => evm.refresh_gas_balances().await,
                        NetworkProvider::Solana(svm) => svm.refresh_gas_balances().await,
                    }
                });
                futures_util::future::join_all(refreshes).await;
            }
            _ = shutdown.cancelled() => {
                tracing::debug!("gas balance refresher stopped");
                return;
            }
        }
    }
}

/// Per-pool health sweep: balances, stale-transaction reaping, idle nonce
/// re-sync. Providers are fanned out so one slow RPC does not stall others.
async fn health_check_loop(
    providers: Arc<ProviderCache>,
    health_check_interval: Duration,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(health_check_interval);
    // The startup health check already ran inside provider init.
    interval.tick().await;
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let checks = providers.into_iter().filter_map(|(_, provider)| match provider {
                    NetworkProvider::Evm(evm) => Some(evm.health_check()),
                    NetworkProvider::Solana(_) => None,
                });
                futures_util::future::join_all(checks).await;
            }
            _ = shutdown.cancelled() => {
                tracing::debug!("wallet health checker stopped");
                return;
            }
        }
    }
}

/// Daily purge of long-deleted discovery records.
async fn discovery_cleanup_loop(discovery: Arc<DiscoveryRegistry>, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(DISCOVERY_CLEANUP_INTERVAL);
    interval.tick().await;
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = discovery.cleanup().await {
                    tracing::warn!(error = %e, "discovery cleanup failed");
                }
            }
            _ = shutdown.cancelled() => {
                tracing::debug!("discovery cleanup stopped");
                return;
            }
        }
    }
}
