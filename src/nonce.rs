//! Per-address transaction nonce management for EVM settlement.
//!
//! The registry caches nonces locally and fetches the pending-tag count from
//! the chain on first use, which includes transactions still in the mempool.
//! This prevents "nonce too low" errors when the facilitator restarts while
//! transactions are pending.
//!
//! # How it works
//!
//! - **First call for an address** (or after [`NonceRegistry::reset`]):
//!   fetches the pending-tag transaction count from the chain.
//! - **Subsequent calls**: increment the cached nonce locally without an RPC
//!   round-trip.
//! - **Per-address serialization**: each address's counter is guarded by its
//!   own `Mutex`; the tokio mutex hands the lock out in FIFO order, so
//!   concurrent callers for one address receive strictly increasing values
//!   while different addresses proceed in parallel.

use alloy_primitives::Address;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Where a handed-out nonce came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceSource {
    /// Incremented from the locally cached counter.
    Cache,
    /// Fetched from the chain's pending tag.
    Chain,
}

/// Source of pending-tag transaction counts, implemented by the EVM provider.
#[async_trait::async_trait]
pub trait PendingNonceSource: Send + Sync {
    /// The pending-tag transaction count of `address`, i.e. the next usable nonce.
    async fn pending_transaction_count(&self, address: Address) -> Result<u64, String>;
}

/// Substrings that vendor RPC nodes put into nonce-related rejections.
const NONCE_ERROR_MARKERS: &[&str] = &[
    "nonce too low",
    "nonce too high",
    "replacement transaction underpriced",
    "already known",
    "OldNonce",
    "NonceTooLow",
];

/// Whether an RPC error message indicates a nonce conflict that should be
/// healed by [`NonceRegistry::reset`] and a retry.
pub fn is_nonce_error(message: &str) -> bool {
    NONCE_ERROR_MARKERS
        .iter()
        .any(|marker| message.contains(marker))
}

// Sentinel meaning "not fetched yet"; a real nonce never reaches u64::MAX.
const UNSET: u64 = u64::MAX;

/// Per-address monotonic nonce counters.
///
/// The registry exclusively owns every counter. Within one address, values
/// handed out by [`NonceRegistry::next`] are unique and gap-free for the
/// lifetime of the registry, unless an external transaction raises the
/// on-chain nonce; [`NonceRegistry::set_if_higher`] realigns after such an
/// observation.
#[derive(Clone, Debug, Default)]
pub struct NonceRegistry {
    nonces: Arc<DashMap<Address, Arc<Mutex<u64>>>>,
}

impl NonceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, address: Address) -> Arc<Mutex<u64>> {
        // Locks dashmap internally for a short duration to clone the `Arc`.
        // The dashmap lock must not be held across the await points below.
        let entry = self
            .nonces
            .entry(address)
            .or_insert_with(|| Arc::new(Mutex::new(UNSET)));
        Arc::clone(entry.value())
    }

    /// Reserve the next nonce for `address`.
    ///
    /// The first call (and the first call after [`NonceRegistry::reset`])
    /// adopts the chain's pending-tag count; later calls increment locally.
    pub async fn next<S: PendingNonceSource + ?Sized>(
        &self,
        address: Address,
        chain: &S,
    ) -> Result<(u64, NonceSource), String> {
        let entry = self.entry(address);
        let mut nonce = entry.lock().await;
        if *nonce == UNSET {
            tracing::trace!(%address, "fetching pending nonce");
            let fetched = chain.pending_transaction_count(address).await?;
            *nonce = fetched;
            Ok((fetched, NonceSource::Chain))
        } else {
            let new_nonce = *nonce + 1;
            tracing::trace!(%address, nonce = new_nonce, "incrementing nonce");
            *nonce = new_nonce;
            Ok((new_nonce, NonceSource::Cache))
        }
    }

    /// Raise the cached counter to `n` if it is currently lower.
    ///
    /// Called after observing an externally submitted transaction so the next
    /// hand-out does not collide with it.
    pub async fn set_if_higher(&self, address: Address, n: u64) {
        let entry = self.entry(address);
        let mut nonce = entry.lock().await;
        if *nonce == UNSET || *nonce < n {
            *nonce = n;
        }
    }

    /// Return a reserved-but-unused nonce.
    ///
    /// Callers that reserved a nonce and aborted before broadcast must
    /// decrement before releasing their wallet, otherwise a gap forms that
    /// only [`NonceRegistry::reset`] heals.
    pub async fn decrement(&self, address: Address) {
        let entry = self.entry(address);
        let mut nonce = entry.lock().await;
        if *nonce != UNSET && *nonce > 0 {
            *nonce -= 1;
        }
    }

    /// Drop the cached counter and re-adopt the chain's pending-tag count.
    pub async fn reset<S: PendingNonceSource + ?Sized>(
        &self,
        address: Address,
        chain: &S,
    ) -> Result<u64, String> {
        let entry = self.entry(address);
        let mut nonce = entry.lock().await;
        let fetched = chain.pending_transaction_count(address).await?;
        tracing::debug!(%address, nonce = fetched, "nonce re-synced from chain");
        *nonce = fetched;
        Ok(fetched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct FixedChain {
        nonce: AtomicU64,
        fetches: AtomicU64,
    }

    impl FixedChain {
        fn new(nonce: u64) -> Self {
            Self {
                nonce: AtomicU64::new(nonce),
                fetches: AtomicU64::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl PendingNonceSource for FixedChain {
        async fn pending_transaction_count(&self, _address: Address) -> Result<u64, String> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.nonce.load(Ordering::SeqCst))
        }
    }

    fn addr(byte: u8) -> Address {
        Address::from([byte; 20])
    }

    #[tokio::test]
    async fn first_next_fetches_from_chain_then_increments() {
        let registry = NonceRegistry::new();
        let chain = FixedChain::new(7);

        let (n, source) = registry.next(addr(1), &chain).await.unwrap();
        assert_eq!((n, source), (7, NonceSource::Chain));

        let (n, source) = registry.next(addr(1), &chain).await.unwrap();
        assert_eq!((n, source), (8, NonceSource::Cache));
        assert_eq!(chain.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_next_calls_hand_out_a_contiguous_permutation() {
        let registry = Arc::new(NonceRegistry::new());
        let chain = Arc::new(FixedChain::new(100));

        let mut handles = Vec::new();
        for _ in 0..32 {
            let registry = Arc::clone(&registry);
            let chain = Arc::clone(&chain);
            handles.push(tokio::spawn(async move {
                registry.next(addr(2), chain.as_ref()).await.unwrap().0
            }));
        }
        let mut seen = HashSet::new();
        for handle in handles {
            seen.insert(handle.await.unwrap());
        }
        let expected: HashSet<u64> = (100..132).collect();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn set_if_higher_is_monotonic() {
        let registry = NonceRegistry::new();
        let chain = FixedChain::new(10);
        registry.next(addr(3), &chain).await.unwrap();

        registry.set_if_higher(addr(3), 5).await;
        let (n, _) = registry.next(addr(3), &chain).await.unwrap();
        assert_eq!(n, 11);

        registry.set_if_higher(addr(3), 50).await;
        let (n, _) = registry.next(addr(3), &chain).await.unwrap();
        assert_eq!(n, 51);
    }

    #[tokio::test]
    async fn decrement_floors_at_zero() {
        let registry = NonceRegistry::new();
        let chain = FixedChain::new(0);
        registry.next(addr(4), &chain).await.unwrap();

        registry.decrement(addr(4)).await;
        registry.decrement(addr(4)).await;
        let (n, _) = registry.next(addr(4), &chain).await.unwrap();
        assert_eq!(n, 1);
    }

    #[tokio::test]
    async fn reset_overwrites_cached_counter() {
        let registry = NonceRegistry::new();
        let chain = FixedChain::new(3);
        registry.next(addr(5), &chain).await.unwrap();
        registry.next(addr(5), &chain).await.unwrap();

        chain.nonce.store(42, Ordering::SeqCst);
        let n = registry.reset(addr(5), &chain).await.unwrap();
        assert_eq!(n, 42);

        let (n, source) = registry.next(addr(5), &chain).await.unwrap();
        assert_eq!((n, source), (43, NonceSource::Cache));
    }

    #[test]
    fn nonce_error_classifier_matches_vendor_messages() {
        assert!(is_nonce_error("rpc error: nonce too low: next nonce 5"));
        assert!(is_nonce_error("ErrOldNonce: OldNonce"));
        assert!(is_nonce_error("replacement transaction underpriced"));
        assert!(is_nonce_error("already known"));
        assert!(!is_nonce_error("execution reverted"));
        assert!(!is_nonce_error("insufficient funds for gas"));
    }
}
