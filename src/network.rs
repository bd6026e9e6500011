//! Network definitions and known token deployments.
//!
//! This module defines the networks the facilitator can serve, partitioned
//! into the EVM (EIP-155) and SVM (Solana) families, together with their
//! chain IDs, default RPC endpoints, and statically known USDC deployments.

use alloy_primitives::address;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt::{Display, Formatter};
use std::ops::Deref;
use std::str::FromStr;

/// Blockchain family a [`Network`] belongs to.
///
/// The facilitator routes verification and settlement to a family-specific
/// provider: ERC-3009 flows for EVM, SPL token transfers for SVM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkFamily {
    Evm,
    Svm,
}

/// Supported networks.
///
/// Used to differentiate between testnet and mainnet environments for the
/// x402 protocol across both chain families.
#[derive(Debug, Hash, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Network {
    /// Base mainnet (chain ID 8453).
    #[serde(rename = "base")]
    Base,
    /// Base Sepolia testnet (chain ID 84532).
    #[serde(rename = "base-sepolia")]
    BaseSepolia,
    /// Polygon PoS mainnet (chain ID 137).
    #[serde(rename = "polygon")]
    Polygon,
    /// Polygon Amoy testnet (chain ID 80002).
    #[serde(rename = "polygon-amoy")]
    PolygonAmoy,
    /// Avalanche C-Chain (chain ID 43114).
    #[serde(rename = "avalanche")]
    Avalanche,
    /// Avalanche Fuji testnet (chain ID 43113).
    #[serde(rename = "avalanche-fuji")]
    AvalancheFuji,
    /// Abstract mainnet (chain ID 2741), a zkStack chain.
    #[serde(rename = "abstract")]
    Abstract,
    /// Abstract testnet (chain ID 11124), a zkStack chain.
    #[serde(rename = "abstract-testnet")]
    AbstractTestnet,
    /// Sei EVM mainnet (chain ID 1329).
    #[serde(rename = "sei")]
    Sei,
    /// Sei EVM testnet (chain ID 1328).
    #[serde(rename = "sei-testnet")]
    SeiTestnet,
    /// IoTeX mainnet (chain ID 4689).
    #[serde(rename = "iotex")]
    Iotex,
    /// Peaq mainnet (chain ID 3338).
    #[serde(rename = "peaq")]
    Peaq,
    /// Solana mainnet-beta.
    #[serde(rename = "solana")]
    Solana,
    /// Solana devnet.
    #[serde(rename = "solana-devnet")]
    SolanaDevnet,
}

impl Display for Network {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Network::Base => "base",
            Network::BaseSepolia => "base-sepolia",
            Network::Polygon => "polygon",
            Network::PolygonAmoy => "polygon-amoy",
            Network::Avalanche => "avalanche",
            Network::AvalancheFuji => "avalanche-fuji",
            Network::Abstract => "abstract",
            Network::AbstractTestnet => "abstract-testnet",
            Network::Sei => "sei",
            Network::SeiTestnet => "sei-testnet",
            Network::Iotex => "iotex",
            Network::Peaq => "peaq",
            Network::Solana => "solana",
            Network::SolanaDevnet => "solana-devnet",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown network: {0}")]
pub struct UnknownNetworkError(pub String);

impl FromStr for Network {
    type Err = UnknownNetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Network::variants()
            .iter()
            .find(|n| n.to_string() == s)
            .copied()
            .ok_or_else(|| UnknownNetworkError(s.to_string()))
    }
}

impl Network {
    /// Return all known [`Network`] variants.
    pub fn variants() -> &'static [Network] {
        &[
            Network::Base,
            Network::BaseSepolia,
            Network::Polygon,
            Network::PolygonAmoy,
            Network::Avalanche,
            Network::AvalancheFuji,
            Network::Abstract,
            Network::AbstractTestnet,
            Network::Sei,
            Network::SeiTestnet,
            Network::Iotex,
            Network::Peaq,
            Network::Solana,
            Network::SolanaDevnet,
        ]
    }

    /// Which chain family this network belongs to.
    pub fn family(&self) -> NetworkFamily {
        match self {
            Network::Solana | Network::SolanaDevnet => NetworkFamily::Svm,
            _ => NetworkFamily::Evm,
        }
    }

    /// All EVM networks, in declaration order.
    pub fn evm_networks() -> impl Iterator<Item = Network> {
        Network::variants()
            .iter()
            .copied()
            .filter(|n| n.family() == NetworkFamily::Evm)
    }

    /// All SVM networks, in declaration order.
    pub fn svm_networks() -> impl Iterator<Item = Network> {
        Network::variants()
            .iter()
            .copied()
            .filter(|n| n.family() == NetworkFamily::Svm)
    }

    /// Return the numeric chain ID associated with an EVM network.
    ///
    /// SVM networks have no EIP-155 chain ID and return `None`.
    pub fn chain_id(&self) -> Option<u64> {
        match self {
            Network::Base => Some(8453),
            Network::BaseSepolia => Some(84532),
            Network::Polygon => Some(137),
            Network::PolygonAmoy => Some(80002),
            Network::Avalanche => Some(43114),
            Network::AvalancheFuji => Some(43113),
            Network::Abstract => Some(2741),
            Network::AbstractTestnet => Some(11124),
            Network::Sei => Some(1329),
            Network::SeiTestnet => Some(1328),
            Network::Iotex => Some(4689),
            Network::Peaq => Some(3338),
            Network::Solana | Network::SolanaDevnet => None,
        }
    }

    /// Whether the network supports EIP-1559 gas pricing.
    pub fn eip1559(&self) -> bool {
        match self {
            Network::Iotex => false,
            Network::Solana | Network::SolanaDevnet => false,
            _ => true,
        }
    }

    /// Whether the network is a zkStack chain with EIP-712-native account
    /// signatures that cannot always be recovered through plain ECDSA.
    pub fn zk_stack(&self) -> bool {
        matches!(self, Network::Abstract | Network::AbstractTestnet)
    }

    /// Rough block time in seconds, used as a margin when validating the
    /// `validBefore` window of an authorization.
    pub fn estimated_block_time_secs(&self) -> u64 {
        match self {
            Network::Base | Network::BaseSepolia => 2,
            Network::Polygon | Network::PolygonAmoy => 2,
            Network::Avalanche | Network::AvalancheFuji => 2,
            Network::Abstract | Network::AbstractTestnet => 1,
            Network::Sei | Network::SeiTestnet => 1,
            Network::Iotex => 5,
            Network::Peaq => 6,
            Network::Solana | Network::SolanaDevnet => 1,
        }
    }

    /// Environment variable that overrides the RPC endpoint for this network.
    pub fn rpc_env_var(&self) -> &'static str {
        match self {
            Network::Base => "RPC_URL_BASE",
            Network::BaseSepolia => "RPC_URL_BASE_SEPOLIA",
            Network::Polygon => "RPC_URL_POLYGON",
            Network::PolygonAmoy => "RPC_URL_POLYGON_AMOY",
            Network::Avalanche => "RPC_URL_AVALANCHE",
            Network::AvalancheFuji => "RPC_URL_AVALANCHE_FUJI",
            Network::Abstract => "RPC_URL_ABSTRACT",
            Network::AbstractTestnet => "RPC_URL_ABSTRACT_TESTNET",
            Network::Sei => "RPC_URL_SEI",
            Network::SeiTestnet => "RPC_URL_SEI_TESTNET",
            Network::Iotex => "RPC_URL_IOTEX",
            Network::Peaq => "RPC_URL_PEAQ",
            Network::Solana => "RPC_URL_SOLANA",
            Network::SolanaDevnet => "RPC_URL_SOLANA_DEVNET",
        }
    }

    /// Built-in public RPC endpoint, used when no override is configured.
    pub fn default_rpc_url(&self) -> &'static str {
        match self {
            Network::Base => "https://mainnet.base.org",
            Network::BaseSepolia => "https://sepolia.base.org",
            Network::Polygon => "https://polygon-rpc.com",
            Network::PolygonAmoy => "https://rpc-amoy.polygon.technology",
            Network::Avalanche => "https://api.avax.network/ext/bc/C/rpc",
            Network::AvalancheFuji => "https://api.avax-test.network/ext/bc/C/rpc",
            Network::Abstract => "https://api.mainnet.abs.xyz",
            Network::AbstractTestnet => "https://api.testnet.abs.xyz",
            Network::Sei => "https://evm-rpc.sei-apis.com",
            Network::SeiTestnet => "https://evm-rpc-testnet.sei-apis.com",
            Network::Iotex => "https://babel-api.mainnet.iotex.io",
            Network::Peaq => "https://peaq.api.onfinality.io/public",
            Network::Solana => "https://api.mainnet-beta.solana.com",
            Network::SolanaDevnet => "https://api.devnet.solana.com",
        }
    }
}

/// EIP-712 domain metadata of a known token deployment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenEip712 {
    pub name: String,
    pub version: String,
}

/// A statically known token deployment on one network.
#[derive(Clone, Debug)]
pub struct TokenDeployment {
    /// Token contract (EVM) or mint (SVM) address, canonical string form.
    pub address: TokenAddress,
    pub network: Network,
    pub decimals: u8,
    /// EIP-712 domain fields, present for EVM deployments only.
    pub eip712: Option<TokenEip712>,
}

/// Address of a token deployment: either an EVM contract or an SVM mint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TokenAddress {
    Evm(alloy_primitives::Address),
    Svm(solana_pubkey::Pubkey),
}

impl Display for TokenAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenAddress::Evm(address) => write!(f, "{address}"),
            TokenAddress::Svm(pubkey) => write!(f, "{pubkey}"),
        }
    }
}

/// A known USDC deployment as a wrapper around [`TokenDeployment`].
#[derive(Clone, Debug)]
pub struct USDCDeployment(pub TokenDeployment);

impl Deref for USDCDeployment {
    type Target = TokenDeployment;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

macro_rules! usdc_evm {
    ($network:expr, $address:literal, $name:literal, $version:literal) => {
        USDCDeployment(TokenDeployment {
            address: TokenAddress::Evm(address!($address)),
            network: $network,
            decimals: 6,
            eip712: Some(TokenEip712 {
                name: $name.into(),
                version: $version.into(),
            }),
        })
    };
}

static KNOWN_USDC: Lazy<Vec<USDCDeployment>> = Lazy::new(|| {
    vec![
        usdc_evm!(
            Network::Base,
            "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913",
            "USD Coin",
            "2"
        ),
        usdc_evm!(
            Network::BaseSepolia,
            "0x036CbD53842c5426634e7929541eC2318f3dCF7e",
            "USDC",
            "2"
        ),
        usdc_evm!(
            Network::Polygon,
            "0x3c499c542cEF5E3811e1192ce70d8cC03d5c3359",
            "USD Coin",
            "2"
        ),
        usdc_evm!(
            Network::PolygonAmoy,
            "0x41E94Eb019C0762f9Bfcf9Fb1E58725BfB0e7582",
            "USDC",
            "2"
        ),
        usdc_evm!(
            Network::Avalanche,
            "0xB97EF9Ef8734C71904D8002F8b6Bc66Dd9c48a6E",
            "USD Coin",
            "2"
        ),
        usdc_evm!(
            Network::AvalancheFuji,
            "0x5425890298aed601595a70AB815c96711a31Bc65",
            "USD Coin",
            "2"
        ),
        usdc_evm!(
            Network::Sei,
            "0xe15fC38F6D8c56aF07bbCbe3baf5708A2Bf42392",
            "USDC",
            "2"
        ),
        USDCDeployment(TokenDeployment {
            address: TokenAddress::Svm(solana_pubkey::pubkey!(
                "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v"
            )),
            network: Network::Solana,
            decimals: 6,
            eip712: None,
        }),
        USDCDeployment(TokenDeployment {
            address: TokenAddress::Svm(solana_pubkey::pubkey!(
                "4zMMC9srt5Ri5X14GAgXhaHii3GnPAEERYPJgZ5nc4pb"
            )),
            network: Network::SolanaDevnet,
            decimals: 6,
            eip712: None,
        }),
    ]
});

impl USDCDeployment {
    /// Return the known USDC deployment for the given network, if any.
    pub fn by_network<N: Borrow<Network>>(network: N) -> Option<&'static USDCDeployment> {
        let network = *network.borrow();
        KNOWN_USDC.iter().find(|d| d.network == network)
    }
}
