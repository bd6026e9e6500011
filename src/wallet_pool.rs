//! Pool of EVM signing identities used for settlement.
//!
//! Each facilitator wallet tracks its pending transactions, health, and
//! native balance. The pool bounds concurrency per wallet, gates on gas
//! balance, and recovers from stuck transactions by reaping stale entries.
//!
//! All mutation happens under a single coarse mutex; pool sizes are small
//! (typically well under 32 wallets) so contention is bounded.

use alloy_primitives::{B256, U256};
use std::collections::{HashMap, HashSet};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub type WalletAddress = alloy_primitives::Address;

/// How the pool picks among eligible wallets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionStrategy {
    /// Circular cursor over the wallet list in insertion order.
    RoundRobin,
    /// Smallest pending count, ties broken by least-recently-used.
    LeastPending,
    /// Round-robin with a 3-step probe that skips nearly-saturated wallets,
    /// falling back to least-pending.
    #[default]
    Hybrid,
}

impl Display for SelectionStrategy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SelectionStrategy::RoundRobin => "round-robin",
            SelectionStrategy::LeastPending => "least-pending",
            SelectionStrategy::Hybrid => "hybrid",
        };
        write!(f, "{s}")
    }
}

impl FromStr for SelectionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "round-robin" => Ok(SelectionStrategy::RoundRobin),
            "least-pending" => Ok(SelectionStrategy::LeastPending),
            "hybrid" => Ok(SelectionStrategy::Hybrid),
            other => Err(format!("Unknown wallet selection strategy: {other}")),
        }
    }
}

/// Tuning knobs of the wallet pool.
#[derive(Debug, Clone)]
pub struct WalletPoolConfig {
    /// Maximum in-flight transactions per wallet.
    pub max_pending_per_wallet: u32,
    /// Minimum native balance (wei) below which a wallet is unhealthy.
    pub min_native_balance: U256,
    /// Cadence of the background health check.
    pub health_check_interval: Duration,
    /// Age beyond which a tracked pending transaction is reaped.
    pub pending_tx_timeout: Duration,
    pub selection_strategy: SelectionStrategy,
    /// Broadcast retries on nonce conflicts.
    pub max_retry_attempts: u32,
    /// Backoff between broadcast retries.
    pub retry_delay: Duration,
}

impl Default for WalletPoolConfig {
    fn default() -> Self {
        WalletPoolConfig {
            max_pending_per_wallet: 3,
            // 0.01 ETH
            min_native_balance: U256::from(10_000_000_000_000_000u64),
            health_check_interval: Duration::from_secs(60),
            pending_tx_timeout: Duration::from_secs(300),
            selection_strategy: SelectionStrategy::default(),
            max_retry_attempts: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Why no wallet could be handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AcquireError {
    #[error("no wallets configured")]
    NoWalletsConfigured,
    #[error("all wallets unhealthy")]
    AllUnhealthy,
    #[error("all wallets busy")]
    AllBusy,
}

/// A borrowed wallet. The holder must hand it back via [`WalletPool::release`].
///
/// Each lease is a one-shot token: the pool decrements the wallet's pending
/// count exactly once per lease, whether through release or through the
/// stale-transaction reaper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalletLease {
    pub address: WalletAddress,
    lease_id: u64,
}

/// Point-in-time view of one wallet, used for gauges and logs.
#[derive(Debug, Clone)]
pub struct WalletSnapshot {
    pub address: WalletAddress,
    pub pending_tx_count: u32,
    pub is_healthy: bool,
    pub native_balance: U256,
}

/// One transaction reaped by the health check.
#[derive(Debug, Clone)]
pub struct ReapedTx {
    pub wallet: WalletAddress,
    pub tx: B256,
    pub age: Duration,
}

#[derive(Debug)]
struct PendingTx {
    submitted_at: Instant,
    lease_id: u64,
}

#[derive(Debug)]
struct WalletState {
    address: WalletAddress,
    pending_tx_count: u32,
    last_used_at: Option<Instant>,
    is_healthy: bool,
    native_balance: U256,
    pending_txs: HashMap<B256, PendingTx>,
    // Leases handed out but not yet consumed by release or the reaper.
    live_leases: HashSet<u64>,
}

impl WalletState {
    fn new(address: WalletAddress) -> Self {
        WalletState {
            address,
            pending_tx_count: 0,
            last_used_at: None,
            is_healthy: true,
            native_balance: U256::ZERO,
            pending_txs: HashMap::new(),
            live_leases: HashSet::new(),
        }
    }

    fn eligible(&self, max_pending: u32) -> bool {
        self.is_healthy && self.pending_tx_count < max_pending
    }

    /// Consume a lease. Returns false when it was already consumed, in
    /// which case the caller must not decrement again.
    fn consume_lease(&mut self, lease_id: u64) -> bool {
        self.live_leases.remove(&lease_id)
    }
}

#[derive(Debug)]
struct PoolInner {
    wallets: Vec<WalletState>,
    cursor: usize,
    next_lease_id: u64,
}

/// Pool of facilitator wallets. Wallets are created at startup from the
/// configured key list and never removed at runtime.
#[derive(Debug)]
pub struct WalletPool {
    inner: Mutex<PoolInner>,
    config: WalletPoolConfig,
}

impl WalletPool {
    pub fn new(addresses: Vec<WalletAddress>, config: WalletPoolConfig) -> Self {
        let wallets = addresses.into_iter().map(WalletState::new).collect();
        WalletPool {
            inner: Mutex::new(PoolInner {
                wallets,
                cursor: 0,
                next_lease_id: 0,
            }),
            config,
        }
    }

    pub fn config(&self) -> &WalletPoolConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("wallet pool lock").wallets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn addresses(&self) -> Vec<WalletAddress> {
        let inner = self.inner.lock().expect("wallet pool lock");
        inner.wallets.iter().map(|w| w.address).collect()
    }

    /// Borrow a wallet for one settlement.
    ///
    /// On success the wallet's pending count is bumped and its last-used
    /// stamp refreshed atomically. There is no internal queueing: when every
    /// wallet is saturated the call fails immediately.
    pub fn acquire(&self) -> Result<WalletLease, AcquireError> {
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("wallet pool lock");
        if inner.wallets.is_empty() {
            return Err(AcquireError::NoWalletsConfigured);
        }
        if !inner.wallets.iter().any(|w| w.is_healthy) {
            return Err(AcquireError::AllUnhealthy);
        }
        let max_pending = self.config.max_pending_per_wallet;
        if !inner.wallets.iter().any(|w| w.eligible(max_pending)) {
            return Err(AcquireError::AllBusy);
        }

        let index = match self.config.selection_strategy {
            SelectionStrategy::RoundRobin => Self::pick_round_robin(&inner, max_pending),
            SelectionStrategy::LeastPending => Self::pick_least_pending(&inner, max_pending),
            SelectionStrategy::Hybrid => Self::pick_hybrid(&inner, max_pending),
        };
        let index = index.ok_or(AcquireError::AllBusy)?;

        inner.cursor = (index + 1) % inner.wallets.len();
        let lease_id = inner.next_lease_id;
        inner.next_lease_id += 1;
        let wallet = &mut inner.wallets[index];
        wallet.pending_tx_count += 1;
        wallet.last_used_at = Some(now);
        wallet.live_leases.insert(lease_id);
        Ok(WalletLease {
            address: wallet.address,
            lease_id,
        })
    }

    fn pick_round_robin(inner: &PoolInner, max_pending: u32) -> Option<usize> {
        let len = inner.wallets.len();
        (0..len)
            .map(|step| (inner.cursor + step) % len)
            .find(|&i| inner.wallets[i].eligible(max_pending))
    }

    fn pick_least_pending(inner: &PoolInner, max_pending: u32) -> Option<usize> {
        inner
            .wallets
            .iter()
            .enumerate()
            .filter(|(_, w)| w.eligible(max_pending))
            .min_by_key(|(_, w)| (w.pending_tx_count, w.last_used_at))
            .map(|(i, _)| i)
    }

    fn pick_hybrid(inner: &PoolInner, max_pending: u32) -> Option<usize> {
        let len = inner.wallets.len();
        let probes = len.min(3);
        for step in 0..probes {
            let i = (inner.cursor + step) % len;
            let wallet = &inner.wallets[i];
            if wallet.eligible(max_pending) && wallet.pending_tx_count < max_pending.saturating_sub(1)
            {
                return Some(i);
            }
        }
        Self::pick_least_pending(inner, max_pending)
    }

    /// Record a broadcast transaction against the leased wallet.
    pub fn track_pending(&self, lease: &WalletLease, tx: B256, nonce: u64) {
        let mut inner = self.inner.lock().expect("wallet pool lock");
        if let Some(wallet) = inner.wallets.iter_mut().find(|w| w.address == lease.address) {
            // A consumed lease has nothing left to track against.
            if wallet.live_leases.contains(&lease.lease_id) {
                wallet.pending_txs.insert(
                    tx,
                    PendingTx {
                        submitted_at: Instant::now(),
                        lease_id: lease.lease_id,
                    },
                );
                tracing::debug!(wallet = %lease.address, tx = %tx, nonce, "tracking pending transaction");
            }
        }
    }

    /// Hand a leased wallet back after settlement.
    ///
    /// Idempotent against double invocation on both paths: the lease is a
    /// one-shot token, so a second release of the same lease — with or
    /// without a transaction id, and regardless of whether the health check
    /// already reaped the transaction — is a no-op.
    pub fn release(&self, lease: &WalletLease, tx: Option<B256>, success: bool) {
        let mut inner = self.inner.lock().expect("wallet pool lock");
        let Some(wallet) = inner.wallets.iter_mut().find(|w| w.address == lease.address) else {
            return;
        };
        if let Some(tx) = tx {
            wallet.pending_txs.remove(&tx);
        }
        if wallet.consume_lease(lease.lease_id) {
            wallet.pending_tx_count = wallet.pending_tx_count.saturating_sub(1);
            tracing::debug!(wallet = %lease.address, tx = ?tx, success, "released wallet");
        }
    }

    /// Refresh a wallet's observed native balance and recompute its health.
    pub fn apply_balance(&self, address: WalletAddress, balance: U256) {
        let mut inner = self.inner.lock().expect("wallet pool lock");
        if let Some(wallet) = inner.wallets.iter_mut().find(|w| w.address == address) {
            wallet.native_balance = balance;
            let healthy = balance >= self.config.min_native_balance;
            if wallet.is_healthy != healthy {
                tracing::warn!(wallet = %address, balance = %balance, healthy, "wallet health changed");
            }
            wallet.is_healthy = healthy;
        }
    }

    /// Drop pending transactions older than the configured timeout.
    ///
    /// Reaping consumes the transaction's lease, so a late release of the
    /// same lease does not decrement a second time. Returns the reaped
    /// entries so the caller can log them.
    pub fn reap_stale(&self) -> Vec<ReapedTx> {
        let now = Instant::now();
        let timeout = self.config.pending_tx_timeout;
        let mut inner = self.inner.lock().expect("wallet pool lock");
        let mut reaped = Vec::new();
        for wallet in inner.wallets.iter_mut() {
            let stale: Vec<B256> = wallet
                .pending_txs
                .iter()
                .filter(|(_, pending)| now.duration_since(pending.submitted_at) > timeout)
                .map(|(tx, _)| *tx)
                .collect();
            for tx in stale {
                if let Some(pending) = wallet.pending_txs.remove(&tx) {
                    if wallet.consume_lease(pending.lease_id) {
                        wallet.pending_tx_count = wallet.pending_tx_count.saturating_sub(1);
                    }
                    reaped.push(ReapedTx {
                        wallet: wallet.address,
                        tx,
                        age: now.duration_since(pending.submitted_at),
                    });
                }
            }
        }
        reaped
    }

    /// Wallets with no in-flight transactions; their nonce counters are safe
    /// to re-sync from chain.
    pub fn idle_wallets(&self) -> Vec<WalletAddress> {
        let inner = self.inner.lock().expect("wallet pool lock");
        inner
            .wallets
            .iter()
            .filter(|w| w.pending_tx_count == 0)
            .map(|w| w.address)
            .collect()
    }

    pub fn snapshot(&self) -> Vec<WalletSnapshot> {
        let inner = self.inner.lock().expect("wallet pool lock");
        inner
            .wallets
            .iter()
            .map(|w| WalletSnapshot {
                address: w.address,
                pending_tx_count: w.pending_tx_count,
                is_healthy: w.is_healthy,
                native_balance: w.native_balance,
            })
            .collect()
    }

    pub fn total_pending(&self) -> u32 {
        let inner = self.inner.lock().expect("wallet pool lock");
        inner.wallets.iter().map(|w| w.pending_tx_count).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn addr(byte: u8) -> WalletAddress {
        WalletAddress::from([byte; 20])
    }

    fn pool(n: u8, strategy: SelectionStrategy) -> WalletPool {
        let config = WalletPoolConfig {
            selection_strategy: strategy,
            ..WalletPoolConfig::default()
        };
        WalletPool::new((1..=n).map(addr).collect(), config)
    }

    fn tx(byte: u8) -> B256 {
        B256::from([byte; 32])
    }

    #[test]
    fn empty_pool_reports_no_wallets_configured() {
        let pool = pool(0, SelectionStrategy::RoundRobin);
        assert_eq!(pool.acquire(), Err(AcquireError::NoWalletsConfigured));
    }

    #[test]
    fn unhealthy_wallets_report_all_unhealthy() {
        let pool = pool(2, SelectionStrategy::RoundRobin);
        pool.apply_balance(addr(1), U256::ZERO);
        pool.apply_balance(addr(2), U256::ZERO);
        assert_eq!(pool.acquire(), Err(AcquireError::AllUnhealthy));
    }

    #[test]
    fn saturated_pool_reports_all_busy() {
        let pool = pool(3, SelectionStrategy::Hybrid);
        for _ in 0..9 {
            pool.acquire().unwrap();
        }
        assert_eq!(pool.acquire(), Err(AcquireError::AllBusy));
        assert_eq!(pool.total_pending(), 9);
    }

    #[test]
    fn round_robin_cycles_in_insertion_order() {
        let pool = pool(3, SelectionStrategy::RoundRobin);
        let picks: Vec<_> = (0..6)
            .map(|_| {
                let lease = pool.acquire().unwrap();
                pool.release(&lease, None, true);
                lease.address
            })
            .collect();
        assert_eq!(
            picks,
            vec![addr(1), addr(2), addr(3), addr(1), addr(2), addr(3)]
        );
    }

    #[test]
    fn round_robin_skips_unhealthy_wallets() {
        let pool = pool(3, SelectionStrategy::RoundRobin);
        pool.apply_balance(addr(2), U256::ZERO);
        let picks: Vec<_> = (0..4)
            .map(|_| {
                let lease = pool.acquire().unwrap();
                pool.release(&lease, None, true);
                lease.address
            })
            .collect();
        assert_eq!(picks, vec![addr(1), addr(3), addr(1), addr(3)]);
    }

    #[test]
    fn least_pending_prefers_the_emptiest_wallet() {
        let pool = pool(3, SelectionStrategy::LeastPending);
        // Load wallet 1 with two slots and wallet 2 with one.
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        let c = pool.acquire().unwrap();
        assert_eq!(a.address, addr(1));
        assert_eq!(b.address, addr(2));
        assert_eq!(c.address, addr(3));
        pool.release(&c, None, true);
        // Wallet 3 now has zero pending; it must win.
        assert_eq!(pool.acquire().unwrap().address, addr(3));
    }

    #[test]
    fn hybrid_skips_nearly_saturated_wallets() {
        let config = WalletPoolConfig {
            selection_strategy: SelectionStrategy::Hybrid,
            max_pending_per_wallet: 3,
            ..WalletPoolConfig::default()
        };
        let pool = WalletPool::new(vec![addr(1), addr(2)], config);
        // Alternating acquisitions drive both wallets to pending=2 == max-1.
        let leases: Vec<_> = (0..4).map(|_| pool.acquire().unwrap()).collect();
        // Drain wallet 2; wallet 1 stays at the near-saturation mark.
        for lease in leases.iter().filter(|lease| lease.address == addr(2)) {
            pool.release(lease, None, true);
        }
        // The probe starts at wallet 1 but must skip it for wallet 2.
        assert_eq!(pool.acquire().unwrap().address, addr(2));
    }

    #[test]
    fn hybrid_falls_back_to_least_pending_when_probes_fail() {
        let config = WalletPoolConfig {
            selection_strategy: SelectionStrategy::Hybrid,
            max_pending_per_wallet: 2,
            ..WalletPoolConfig::default()
        };
        let pool = WalletPool::new(vec![addr(1), addr(2), addr(3)], config);
        // Every wallet at pending=1 == max-1, so all three probes fail.
        for _ in 0..3 {
            pool.acquire().unwrap();
        }
        let lease = pool.acquire().unwrap();
        assert_eq!(lease.address, addr(1));
    }

    #[test]
    fn hybrid_is_fair_under_fast_release() {
        let pool = pool(4, SelectionStrategy::Hybrid);
        let rounds = 4000;
        let mut counts: HashMap<WalletAddress, u32> = HashMap::new();
        for _ in 0..rounds {
            let lease = pool.acquire().unwrap();
            *counts.entry(lease.address).or_default() += 1;
            pool.release(&lease, None, true);
        }
        let mean = rounds / 4;
        for (_, count) in counts {
            let deviation = count.abs_diff(mean);
            assert!(deviation * 4 <= 2 * mean, "share deviates too much: {count}");
        }
    }

    #[test]
    fn release_with_tx_is_idempotent() {
        let pool = pool(1, SelectionStrategy::RoundRobin);
        let lease = pool.acquire().unwrap();
        pool.track_pending(&lease, tx(9), 0);
        assert_eq!(pool.total_pending(), 1);

        pool.release(&lease, Some(tx(9)), true);
        pool.release(&lease, Some(tx(9)), true);
        assert_eq!(pool.total_pending(), 0);
    }

    #[test]
    fn release_without_tx_is_idempotent() {
        let pool = pool(1, SelectionStrategy::RoundRobin);
        let first = pool.acquire().unwrap();
        let second = pool.acquire().unwrap();
        assert_eq!(pool.total_pending(), 2);

        // A retried pre-broadcast failure path releases the same lease twice;
        // the second call must not touch the other live lease's slot.
        pool.release(&first, None, false);
        pool.release(&first, None, false);
        assert_eq!(pool.total_pending(), 1);

        pool.release(&second, None, true);
        assert_eq!(pool.total_pending(), 0);
    }

    #[test]
    fn pending_invariant_holds_under_churn() {
        let pool = pool(3, SelectionStrategy::Hybrid);
        let mut live = Vec::new();
        for i in 0..100u32 {
            if let Ok(lease) = pool.acquire() {
                live.push(lease);
            }
            if i % 3 == 0 {
                if let Some(lease) = live.pop() {
                    pool.release(&lease, None, true);
                }
            }
            assert!(pool.total_pending() <= 3 * pool.config.max_pending_per_wallet);
        }
    }

    #[test]
    fn reap_stale_drops_old_transactions() {
        let config = WalletPoolConfig {
            pending_tx_timeout: Duration::from_secs(0),
            ..WalletPoolConfig::default()
        };
        let pool = WalletPool::new(vec![addr(1)], config);
        let lease = pool.acquire().unwrap();
        pool.track_pending(&lease, tx(7), 3);
        std::thread::sleep(Duration::from_millis(5));

        let reaped = pool.reap_stale();
        assert_eq!(reaped.len(), 1);
        assert_eq!(reaped[0].wallet, addr(1));
        assert_eq!(pool.total_pending(), 0);
        assert_eq!(pool.idle_wallets(), vec![addr(1)]);

        // Reaping consumed the lease; a late release must not double-decrement.
        pool.release(&lease, Some(tx(7)), false);
        pool.release(&lease, None, false);
        assert_eq!(pool.total_pending(), 0);
    }
}
