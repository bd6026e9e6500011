//! Configuration for the facilitator, loaded from environment variables.
//!
//! Environment variables used:
//! - `EVM_PRIVATE_KEY` — single EVM signing key, or `FACILITATOR_WALLETS` —
//!   comma-separated list of keys for the wallet pool,
//! - `SVM_PRIVATE_KEY` — base58 Solana keypair (fee payer),
//! - `EVM_RPC_URL`, `SVM_RPC_URL` — endpoint overrides, plus per-network
//!   `RPC_URL_<NETWORK>` overrides,
//! - `ALLOWED_NETWORKS` — comma-separated allow-list (empty means all
//!   configured networks),
//! - `GAS_BALANCE_THRESHOLD_EVM` (decimal ETH), `GAS_BALANCE_THRESHOLD_SVM`
//!   (decimal SOL),
//! - wallet-pool tuning: `MAX_PENDING_PER_WALLET`,
//!   `HEALTH_CHECK_INTERVAL_MS`, `PENDING_TX_TIMEOUT_MS`,
//!   `WALLET_SELECTION_STRATEGY`, `MAX_RETRY_ATTEMPTS`, `RETRY_DELAY_MS`,
//! - `DEFAULT_EVM_NETWORK`, `ALLOW_LOCALHOST_RESOURCES`, `HOST`, `PORT`.

use alloy_primitives::{B256, U256};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::env;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use crate::network::Network;
use crate::wallet_pool::{SelectionStrategy, WalletPoolConfig};

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_HOST: &str = "0.0.0.0";

/// A validated EVM private key (32 bytes, 0x-prefixed hex).
#[derive(Clone, Copy)]
pub struct EvmPrivateKey(B256);

impl EvmPrivateKey {
    pub fn as_b256(&self) -> &B256 {
        &self.0
    }
}

// Key material stays out of Debug output.
impl std::fmt::Debug for EvmPrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EvmPrivateKey(..)")
    }
}

impl FromStr for EvmPrivateKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        B256::from_str(s)
            .map(Self)
            .map_err(|e| format!("Invalid EVM private key: {e}"))
    }
}

/// A validated Solana keypair in its standard 64-byte base58 form
/// (32-byte seed followed by the 32-byte public key).
#[derive(Clone)]
pub struct SolanaPrivateKey([u8; 64]);

impl SolanaPrivateKey {
    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

impl std::fmt::Debug for SolanaPrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SolanaPrivateKey(..)")
    }
}

impl FromStr for SolanaPrivateKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|e| format!("Invalid base58: {e}"))?;
        if bytes.len() != 64 {
            return Err(format!(
                "Private key must be 64 bytes (standard Solana format), got {} bytes",
                bytes.len()
            ));
        }
        let mut arr = [0u8; 64];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}

/// Immutable, fully parsed facilitator configuration.
#[derive(Debug, Clone)]
pub struct Config {
    host: IpAddr,
    port: u16,
    evm_private_keys: Vec<EvmPrivateKey>,
    svm_private_key: Option<SolanaPrivateKey>,
    evm_rpc_url: Option<Url>,
    svm_rpc_url: Option<Url>,
    allowed_networks: Vec<Network>,
    gas_balance_threshold_evm: U256,
    gas_balance_threshold_svm: u64,
    wallet_pool: WalletPoolConfig,
    default_evm_network: Network,
    allow_localhost_resources: bool,
    max_compute_unit_limit: u32,
    max_compute_unit_price: u64,
}

impl Config {
    /// Load and validate all settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = match env_var("HOST") {
            Some(raw) => raw
                .parse()
                .map_err(|_| ConfigError::Invalid("HOST", raw))?,
            None => DEFAULT_HOST.parse().expect("valid default host"),
        };
        let port = parse_env("PORT")?.unwrap_or(DEFAULT_PORT);

        let evm_private_keys = match env_var("FACILITATOR_WALLETS") {
            Some(list) => parse_wallet_list(&list)
                .map_err(|e| ConfigError::Invalid("FACILITATOR_WALLETS", e))?,
            None => match env_var("EVM_PRIVATE_KEY") {
                Some(raw) => vec![
                    raw.parse()
                        .map_err(|e: String| ConfigError::Invalid("EVM_PRIVATE_KEY", e))?,
                ],
                None => Vec::new(),
            },
        };
        let svm_private_key = env_var("SVM_PRIVATE_KEY")
            .map(|raw| {
                raw.parse()
                    .map_err(|e: String| ConfigError::Invalid("SVM_PRIVATE_KEY", e))
            })
            .transpose()?;

        let evm_rpc_url = parse_env::<Url>("EVM_RPC_URL")?;
        let svm_rpc_url = parse_env::<Url>("SVM_RPC_URL")?;

        let allowed_networks = match env_var("ALLOWED_NETWORKS") {
            Some(list) => parse_network_list(&list)
                .map_err(|e| ConfigError::Invalid("ALLOWED_NETWORKS", e))?,
            None => Vec::new(),
        };

        let gas_balance_threshold_evm = match env_var("GAS_BALANCE_THRESHOLD_EVM") {
            Some(raw) => parse_decimal_units(&raw, 18)
                .map(U256::from)
                .map_err(|e| ConfigError::Invalid("GAS_BALANCE_THRESHOLD_EVM", e))?,
            // 0.01 ETH
            None => U256::from(10_000_000_000_000_000u64),
        };
        let gas_balance_threshold_svm = match env_var("GAS_BALANCE_THRESHOLD_SVM") {
            Some(raw) => parse_decimal_units(&raw, 9)
                .and_then(|lamports| {
                    u64::try_from(lamports).map_err(|_| "value out of range".to_string())
                })
                .map_err(|e| ConfigError::Invalid("GAS_BALANCE_THRESHOLD_SVM", e))?,
            // 0.1 SOL
            None => 100_000_000,
        };

        let defaults = WalletPoolConfig::default();
        let wallet_pool = WalletPoolConfig {
            max_pending_per_wallet: parse_env("MAX_PENDING_PER_WALLET")?
                .unwrap_or(defaults.max_pending_per_wallet),
            min_native_balance: gas_balance_threshold_evm,
            health_check_interval: parse_env("HEALTH_CHECK_INTERVAL_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.health_check_interval),
            pending_tx_timeout: parse_env("PENDING_TX_TIMEOUT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.pending_tx_timeout),
            selection_strategy: match env_var("WALLET_SELECTION_STRATEGY") {
                Some(raw) => raw
                    .parse()
                    .map_err(|e: String| ConfigError::Invalid("WALLET_SELECTION_STRATEGY", e))?,
                None => SelectionStrategy::default(),
            },
            max_retry_attempts: parse_env("MAX_RETRY_ATTEMPTS")?
                .unwrap_or(defaults.max_retry_attempts),
            retry_delay: parse_env("RETRY_DELAY_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_delay),
        };

        let default_evm_network = match env_var("DEFAULT_EVM_NETWORK") {
            Some(raw) => raw
                .parse()
                .map_err(|_| ConfigError::Invalid("DEFAULT_EVM_NETWORK", raw))?,
            None => Network::Base,
        };
        let allow_localhost_resources = env_var("ALLOW_LOCALHOST_RESOURCES")
            .map(|raw| parse_bool(&raw))
            .unwrap_or(false);

        let max_compute_unit_limit = parse_env("MAX_COMPUTE_UNIT_LIMIT")?.unwrap_or(400_000);
        let max_compute_unit_price = parse_env("MAX_COMPUTE_UNIT_PRICE")?.unwrap_or(1_000_000);

        Ok(Config {
            host,
            port,
            evm_private_keys,
            svm_private_key,
            evm_rpc_url,
            svm_rpc_url,
            allowed_networks,
            gas_balance_threshold_evm,
            gas_balance_threshold_svm,
            wallet_pool,
            default_evm_network,
            allow_localhost_resources,
            max_compute_unit_limit,
            max_compute_unit_price,
        })
    }

    pub fn host(&self) -> IpAddr {
        self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn evm_private_keys(&self) -> &[EvmPrivateKey] {
        &self.evm_private_keys
    }

    pub fn svm_private_key(&self) -> Option<&SolanaPrivateKey> {
        self.svm_private_key.as_ref()
    }

    /// Whether the allow-list admits `network`. An empty list admits all.
    pub fn network_allowed(&self, network: Network) -> bool {
        self.allowed_networks.is_empty() || self.allowed_networks.contains(&network)
    }

    pub fn allowed_networks(&self) -> &[Network] {
        &self.allowed_networks
    }

    pub fn gas_balance_threshold_evm(&self) -> U256 {
        self.gas_balance_threshold_evm
    }

    pub fn gas_balance_threshold_svm(&self) -> u64 {
        self.gas_balance_threshold_svm
    }

    pub fn wallet_pool(&self) -> &WalletPoolConfig {
        &self.wallet_pool
    }

    pub fn default_evm_network(&self) -> Network {
        self.default_evm_network
    }

    pub fn allow_localhost_resources(&self) -> bool {
        self.allow_localhost_resources
    }

    pub fn max_compute_unit_limit(&self) -> u32 {
        self.max_compute_unit_limit
    }

    pub fn max_compute_unit_price(&self) -> u64 {
        self.max_compute_unit_price
    }

    /// The RPC endpoint to use for `network`: the per-network env override,
    /// then the family-wide override, then the built-in default.
    pub fn rpc_url(&self, network: Network) -> String {
        if let Some(url) = env_var(network.rpc_env_var()) {
            return url;
        }
        match network {
            Network::Solana | Network::SolanaDevnet => {
                if let Some(url) = &self.svm_rpc_url {
                    return url.to_string();
                }
            }
            _ => {
                if network == self.default_evm_network
                    && let Some(url) = &self.evm_rpc_url
                {
                    return url.to_string();
                }
            }
        }
        network.default_rpc_url().to_string()
    }

    /// Whether an explicit RPC endpoint was configured for `network`.
    pub fn has_rpc_override(&self, network: Network) -> bool {
        if env_var(network.rpc_env_var()).is_some() {
            return true;
        }
        match network.family() {
            crate::network::NetworkFamily::Svm => self.svm_rpc_url.is_some(),
            crate::network::NetworkFamily::Evm => {
                network == self.default_evm_network && self.evm_rpc_url.is_some()
            }
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_env<T: FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match env_var(name) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid(name, raw)),
        None => Ok(None),
    }
}

fn parse_bool(raw: &str) -> bool {
    matches!(raw.to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}

fn parse_wallet_list(list: &str) -> Result<Vec<EvmPrivateKey>, String> {
    list.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(EvmPrivateKey::from_str)
        .collect()
}

fn parse_network_list(list: &str) -> Result<Vec<Network>, String> {
    list.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.parse::<Network>().map_err(|e| e.to_string()))
        .collect()
}

/// Parse a human-readable decimal amount into integer atomic units
/// (e.g. `"0.01"` ETH with 18 decimals into wei).
fn parse_decimal_units(raw: &str, decimals: u32) -> Result<u128, String> {
    let amount = Decimal::from_str(raw).map_err(|e| format!("not a decimal: {e}"))?;
    if amount.is_sign_negative() {
        return Err("negative value is not allowed".to_string());
    }
    if amount.scale() > decimals {
        return Err(format!("more than {decimals} decimal places"));
    }
    let mantissa = amount.mantissa().unsigned_abs();
    let multiplier = 10u128
        .checked_pow(decimals - amount.scale())
        .ok_or_else(|| "value out of range".to_string())?;
    mantissa
        .checked_mul(multiplier)
        .ok_or_else(|| "value out of range".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wallet_lists() {
        let single = parse_wallet_list(
            "0xcafe000000000000000000000000000000000000000000000000000000000001",
        )
        .unwrap();
        assert_eq!(single.len(), 1);

        let many = parse_wallet_list(
            "0xcafe000000000000000000000000000000000000000000000000000000000001, \
             0xcafe000000000000000000000000000000000000000000000000000000000002,",
        )
        .unwrap();
        assert_eq!(many.len(), 2);

        assert!(parse_wallet_list("0x1234").is_err());
    }

    #[test]
    fn parses_network_lists() {
        let networks = parse_network_list("base, solana-devnet,base-sepolia").unwrap();
        assert_eq!(
            networks,
            vec![Network::Base, Network::SolanaDevnet, Network::BaseSepolia]
        );
        assert!(parse_network_list("base,mystery-chain").is_err());
    }

    #[test]
    fn parses_decimal_thresholds() {
        assert_eq!(
            parse_decimal_units("0.01", 18).unwrap(),
            10_000_000_000_000_000
        );
        assert_eq!(parse_decimal_units("1", 18).unwrap(), 1_000_000_000_000_000_000);
        assert_eq!(parse_decimal_units("0.1", 9).unwrap(), 100_000_000);
        assert!(parse_decimal_units("-1", 18).is_err());
        assert!(parse_decimal_units("0.0000000001", 9).is_err());
        assert!(parse_decimal_units("abc", 18).is_err());
    }

    #[test]
    fn solana_key_requires_64_bytes() {
        let key = bs58::encode([7u8; 64]).into_string();
        assert!(key.parse::<SolanaPrivateKey>().is_ok());

        let short = bs58::encode([7u8; 32]).into_string();
        assert!(short.parse::<SolanaPrivateKey>().is_err());
        assert!("not-base58!".parse::<SolanaPrivateKey>().is_err());
    }

    #[test]
    fn debug_output_redacts_key_material() {
        let key: EvmPrivateKey =
            "0xcafe000000000000000000000000000000000000000000000000000000000001"
                .parse()
                .unwrap();
        assert_eq!(format!("{key:?}"), "EvmPrivateKey(..)");
    }
}
