//! Network provider cache and initialization.
//!
//! Builds one [`NetworkProvider`] per served network from the [`Config`]:
//! EVM providers with the shared signing wallet pool, and SVM providers with
//! the single fee-payer identity.
//!
//! Which networks get a provider:
//! - with a non-empty `ALLOWED_NETWORKS`, exactly the listed networks
//!   (falling back to built-in public RPC endpoints where no override is
//!   set);
//! - with an empty allow-list, the networks with an explicit RPC override,
//!   the default EVM network, and both SVM networks when an SVM key exists.

use alloy_network::EthereumWallet;
use alloy_primitives::Address;
use alloy_signer_local::PrivateKeySigner;
use solana_keypair::Keypair;
use std::borrow::Borrow;
use std::collections::HashMap;

use crate::chain::evm::EvmProvider;
use crate::chain::solana::SolanaProvider;
use crate::chain::NetworkProvider;
use crate::config::Config;
use crate::network::{Network, NetworkFamily};

/// A cache of pre-initialized network providers keyed by network.
///
/// Use [`ProviderCache::from_config`] to connect all served networks.
#[derive(Debug, Default)]
pub struct ProviderCache {
    providers: HashMap<Network, NetworkProvider>,
}

impl<'a> IntoIterator for &'a ProviderCache {
    type Item = (&'a Network, &'a NetworkProvider);
    type IntoIter = std::collections::hash_map::Iter<'a, Network, NetworkProvider>;

    fn into_iter(self) -> Self::IntoIter {
        self.providers.iter()
    }
}

impl ProviderCache {
    /// Connect providers for every network the configuration serves.
    ///
    /// A network that fails to initialize is logged and skipped rather than
    /// failing startup; the facilitator serves the networks that came up.
    pub async fn from_config(config: &Config) -> Result<Self, Box<dyn std::error::Error>> {
        let mut providers = HashMap::new();

        let evm_wallet = build_evm_wallet(config)?;
        for network in Network::variants().iter().copied() {
            if !should_serve(config, network) {
                continue;
            }
            match network.family() {
                NetworkFamily::Evm => {
                    let Some((wallet, addresses)) = evm_wallet.clone() else {
                        continue;
                    };
                    let rpc_url = config.rpc_url(network);
                    match EvmProvider::try_new(
                        wallet,
                        addresses,
                        &rpc_url,
                        network,
                        config.wallet_pool().clone(),
                    )
                    .await
                    {
                        Ok(provider) => {
                            providers.insert(network, NetworkProvider::Evm(provider));
                        }
                        Err(e) => {
                            tracing::warn!(network = %network, error = %e, "skipping network: provider init failed");
                        }
                    }
                }
                NetworkFamily::Svm => {
                    let Some(key) = config.svm_private_key() else {
                        continue;
                    };
                    let keypair = match Keypair::try_from(key.as_bytes().as_slice()) {
                        Ok(keypair) => keypair,
                        Err(e) => return Err(format!("Invalid SVM keypair: {e}").into()),
                    };
                    match SolanaProvider::new(
                        keypair,
                        config.rpc_url(network),
                        network,
                        config.max_compute_unit_limit(),
                        config.max_compute_unit_price(),
                        config.gas_balance_threshold_svm(),
                    ) {
                        Ok(provider) => {
                            providers.insert(network, NetworkProvider::Solana(provider));
                        }
                        Err(e) => {
                            tracing::warn!(network = %network, error = %e, "skipping network: provider init failed");
                        }
                    }
                }
            }
        }

        if providers.is_empty() {
            tracing::warn!("no networks configured; verify and settle will reject all requests");
        }
        Ok(ProviderCache { providers })
    }

    /// Returns the provider for the specified network, if configured.
    pub fn by_network<N: Borrow<Network>>(&self, network: N) -> Option<&NetworkProvider> {
        self.providers.get(network.borrow())
    }

    pub fn networks(&self) -> Vec<Network> {
        let mut networks: Vec<Network> = Network::variants()
            .iter()
            .copied()
            .filter(|network| self.providers.contains_key(network))
            .collect();
        networks.sort_by_key(|network| network.to_string());
        networks
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// Build the shared signing wallet and the configured-order address list.
fn build_evm_wallet(
    config: &Config,
) -> Result<Option<(EthereumWallet, Vec<Address>)>, Box<dyn std::error::Error>> {
    let signers = config
        .evm_private_keys()
        .iter()
        .map(|key| {
            PrivateKeySigner::from_bytes(key.as_b256())
                .map_err(|e| format!("Invalid EVM key: {e}"))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let mut signers = signers.into_iter();
    let Some(first) = signers.next() else {
        return Ok(None);
    };
    let mut addresses = vec![first.address()];
    let mut wallet = EthereumWallet::new(first);
    for signer in signers {
        addresses.push(signer.address());
        wallet.register_signer(signer);
    }
    Ok(Some((wallet, addresses)))
}

fn should_serve(config: &Config, network: Network) -> bool {
    if !config.network_allowed(network) {
        return false;
    }
    if !config.allowed_networks().is_empty() {
        return true;
    }
    // With no explicit allow-list, serve what the environment points at.
    match network.family() {
        NetworkFamily::Evm => {
            network == config.default_evm_network() || config.has_rpc_override(network)
        }
        NetworkFamily::Svm => true,
    }
}
