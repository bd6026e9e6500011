//! x402 EVM flow: verification (off-chain checks + read-only probes) and
//! on-chain settlement.
//!
//! - **Verify**: resolve the token's EIP-712 domain, recover the signer of
//!   the ERC-3009 `TransferWithAuthorization` struct (unwrapping ERC-6492
//!   signatures first), validate the authorization window, amount, and
//!   recipient, and probe the payer's token balance.
//! - **Settle**: re-verify, borrow a wallet from the pool, reserve a nonce,
//!   broadcast `transferWithAuthorization`, and await the receipt.
//!
//! Invariants:
//! - Verification never touches a state-changing path.
//! - A user-signed authorization is submitted as-is, never rewritten.
//! - Wallet leases are always released, on success and on every error path.

use alloy_network::{Ethereum as AlloyEthereum, EthereumWallet, NetworkWallet};
use alloy_primitives::{Address, B256, Bytes, FixedBytes, U256, hex};
use alloy_provider::fillers::{
    BlobGasFiller, ChainIdFiller, FillProvider, GasFiller, JoinFill, WalletFiller,
};
use alloy_provider::{Identity, Provider, ProviderBuilder, RootProvider};
use alloy_rpc_client::RpcClient;
use alloy_sol_types::{Eip712Domain, SolValue, eip712_domain, sol};
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;
use tracing_core::Level;

use crate::chain::{FacilitatorLocalError, NetworkProviderOps};
use crate::facilitator::Facilitator;
use crate::network::{Network, TokenAddress, USDCDeployment};
use crate::nonce::{NonceRegistry, PendingNonceSource, is_nonce_error};
use crate::timestamp::UnixTimestamp;
use crate::types::{
    ErrorReason, EvmAddress, EvmSignature, ExactPaymentPayload, HexEncodedNonce, MixedAddress,
    PaymentPayload, PaymentRequirements, Scheme, SettleRequest, SettleResponse,
    SupportedPaymentKind, SupportedPaymentKindsResponse, TokenAmount, TransactionHash,
    TransferWithAuthorization, VerifyRequest, VerifyResponse, X402Version,
};
use crate::wallet_pool::{WalletPool, WalletPoolConfig};

sol! {
    /// Minimal ERC-3009 + ERC-20 interface for USDC-style tokens.
    ///
    /// Only the functions actually used by the facilitator are declared.
    #[allow(missing_docs)]
    #[allow(clippy::too_many_arguments)]
    #[derive(Debug)]
    #[sol(rpc)]
    interface IEIP3009 {
        function name() external view returns (string);
        function version() external view returns (string);
        function balanceOf(address account) external view returns (uint256);
        function transferWithAuthorization(
            address from,
            address to,
            uint256 value,
            uint256 validAfter,
            uint256 validBefore,
            bytes32 nonce,
            bytes signature
        ) external;
    }
}

sol! {
    /// ERC-1271 contract-signature validation interface.
    #[allow(missing_docs)]
    #[derive(Debug)]
    #[sol(rpc)]
    interface IERC1271 {
        function isValidSignature(bytes32 hash, bytes signature) external view returns (bytes4);
    }
}

sol! {
    /// Solidity-compatible struct for decoding the prefix of an EIP-6492 signature.
    ///
    /// Matches the tuple `(address factory, bytes factoryCalldata, bytes innerSig)`.
    #[derive(Debug)]
    struct Sig6492 {
        address factory;
        bytes   factoryCalldata;
        bytes   innerSig;
    }
}

/// The fixed 32-byte magic suffix defined by [EIP-6492](https://eips.ethereum.org/EIPS/eip-6492).
///
/// Any signature ending with this constant is treated as a 6492-wrapped
/// signature; the preceding bytes are ABI-decoded as
/// `(address factory, bytes factoryCalldata, bytes innerSig)`.
const EIP6492_MAGIC_SUFFIX: [u8; 32] =
    hex!("6492649264926492649264926492649264926492649264926492649264926492");

/// Magic return value of a successful ERC-1271 `isValidSignature` call.
const ERC1271_MAGIC: [u8; 4] = hex!("1626ba7e");

/// Gas limit attached to `transferWithAuthorization` settlement transactions.
const TRANSFER_GAS_LIMIT: u64 = 150_000;

/// Ceiling of the per-request settlement wait budget, seconds.
const MAX_SETTLE_WAIT_SECS: u64 = 120;

type InnerFiller = JoinFill<GasFiller, JoinFill<BlobGasFiller, ChainIdFiller>>;

/// The fully composed Ethereum provider type used in this project.
///
/// Combines filler layers for gas, blob gas, and chain ID with wallet
/// signing, and wraps a [`RootProvider`] for actual JSON-RPC communication.
/// Nonces are deliberately not filled here: the [`NonceRegistry`] assigns
/// them explicitly so the wallet pool stays authoritative.
pub type InnerProvider = FillProvider<
    JoinFill<JoinFill<Identity, InnerFiller>, WalletFiller<EthereumWallet>>,
    RootProvider,
>;

/// Chain descriptor used by the EVM provider.
#[derive(Clone, Debug)]
pub struct EvmChain {
    /// x402 network name (Base, Polygon, etc.).
    pub network: Network,
    /// Numeric chain id used in transactions and EIP-712 domains.
    pub chain_id: u64,
}

impl TryFrom<Network> for EvmChain {
    type Error = FacilitatorLocalError;

    fn try_from(network: Network) -> Result<Self, Self::Error> {
        match network.chain_id() {
            Some(chain_id) => Ok(EvmChain { network, chain_id }),
            None => Err(FacilitatorLocalError::UnsupportedNetwork(None, network)),
        }
    }
}

/// A fully specified ERC-3009 authorization payload for EVM settlement.
pub struct ExactEvmPayment {
    /// Authorized sender (`from`), an EOA or smart wallet.
    pub from: EvmAddress,
    /// Authorized recipient (`to`).
    pub to: EvmAddress,
    /// Transfer amount (token atomic units).
    pub value: TokenAmount,
    /// Not valid before this timestamp (inclusive).
    pub valid_after: UnixTimestamp,
    /// Not valid at/after this timestamp (exclusive).
    pub valid_before: UnixTimestamp,
    /// Unique 32-byte nonce (prevents replay).
    pub nonce: HexEncodedNonce,
    /// Raw signature bytes (plain ECDSA, EIP-1271, or EIP-6492-wrapped).
    pub signature: EvmSignature,
}

/// EVM implementation of the x402 facilitator.
///
/// Holds a composed Alloy provider, the signing wallet pool, and the nonce
/// registry for this network.
#[derive(Debug)]
pub struct EvmProvider {
    inner: InnerProvider,
    chain: EvmChain,
    pool: Arc<WalletPool>,
    nonces: NonceRegistry,
}

#[async_trait::async_trait]
impl PendingNonceSource for EvmProvider {
    async fn pending_transaction_count(&self, address: Address) -> Result<u64, String> {
        self.inner
            .get_transaction_count(address)
            .pending()
            .await
            .map_err(|e| format!("{e}"))
    }
}

impl EvmProvider {
    /// Connect a provider for `network` with the given signing identities.
    ///
    /// `signer_addresses` carries the configured key order, which the
    /// pool's round-robin rotation preserves. Pre-fetches the pending-tag
    /// nonce for every wallet and runs a first health check so the pool
    /// starts with fresh balances.
    pub async fn try_new(
        wallet: EthereumWallet,
        signer_addresses: Vec<Address>,
        rpc_url: &str,
        network: Network,
        pool_config: WalletPoolConfig,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let chain = EvmChain::try_from(network)?;
        if signer_addresses.is_empty() {
            return Err("wallet must contain at least one signer".into());
        }
        debug_assert_eq!(
            NetworkWallet::<AlloyEthereum>::signer_addresses(&wallet).count(),
            signer_addresses.len()
        );
        let client = RpcClient::builder()
            .connect(rpc_url)
            .await
            .map_err(|e| format!("Failed to connect to {network}: {e}"))?;
        let inner = ProviderBuilder::default()
            .filler(InnerFiller::default())
            .wallet(wallet)
            .connect_client(client);
        let pool = Arc::new(WalletPool::new(signer_addresses.clone(), pool_config));
        let provider = Self {
            inner,
            chain,
            pool,
            nonces: NonceRegistry::new(),
        };
        for address in &signer_addresses {
            if let Err(e) = provider.nonces.reset(*address, &provider).await {
                tracing::warn!(network = %network, wallet = %address, error = %e, "initial nonce fetch failed");
            }
        }
        provider.health_check().await;
        tracing::info!(
            network = %network,
            chain_id = provider.chain.chain_id,
            wallets = signer_addresses.len(),
            "Using EVM provider"
        );
        Ok(provider)
    }

    pub fn wallet_pool(&self) -> Arc<WalletPool> {
        Arc::clone(&self.pool)
    }

    pub fn nonces(&self) -> &NonceRegistry {
        &self.nonces
    }

    /// Refresh every wallet's native balance, recompute health, reap stale
    /// pending transactions, and re-sync nonces of idle wallets.
    ///
    /// Per-wallet RPC failures are logged and skipped so one slow endpoint
    /// does not stall the rest.
    pub async fn health_check(&self) {
        let addresses = self.pool.addresses();
        let snapshots = join_all(addresses.iter().map(|address| {
            let address = *address;
            async move {
                let balance = self.inner.get_balance(address).await;
                let pending = self
                    .inner
                    .get_transaction_count(address)
                    .pending()
                    .await;
                (address, balance, pending)
            }
        }))
        .await;
        for (address, balance, pending) in snapshots {
            match balance {
                Ok(balance) => self.pool.apply_balance(address, balance),
                Err(e) => {
                    tracing::warn!(network = %self.network(), wallet = %address, error = %e, "balance refresh failed");
                }
            }
            // An externally submitted transaction raises the chain's pending
            // tag past our counter; realign so the next hand-out is usable.
            if let Ok(pending) = pending
                && pending > 0
            {
                self.nonces.set_if_higher(address, pending - 1).await;
            }
        }
        for reaped in self.pool.reap_stale() {
            tracing::warn!(
                network = %self.network(),
                wallet = %reaped.wallet,
                tx = %reaped.tx,
                age_secs = reaped.age.as_secs(),
                "reaped stale pending transaction"
            );
        }
        for address in self.pool.idle_wallets() {
            if let Err(e) = self.nonces.reset(address, self).await {
                tracing::warn!(network = %self.network(), wallet = %address, error = %e, "nonce re-sync failed");
            }
        }
    }

    /// Read every wallet's native balance and publish it as a gauge.
    pub async fn refresh_gas_balances(&self) {
        for address in self.pool.addresses() {
            match self.inner.get_balance(address).await {
                Ok(balance) => {
                    self.pool.apply_balance(address, balance);
                    let eth = u128::try_from(balance).unwrap_or(u128::MAX) as f64 / 1e18;
                    tracing::info!(
                        gauge.facilitator_wallet_gas_balance = eth,
                        network = %self.network(),
                        wallet = %address,
                        "wallet gas balance"
                    );
                }
                Err(e) => {
                    tracing::warn!(network = %self.network(), wallet = %address, error = %e, "gas balance read failed");
                }
            }
        }
    }

    /// Runs the verification preconditions of a payment, in order:
    /// domain, signature, time window, amount, recipient, payer balance.
    #[instrument(skip_all, err)]
    async fn assert_valid_payment(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<(IEIP3009::IEIP3009Instance<&InnerProvider>, ExactEvmPayment), FacilitatorLocalError>
    {
        let payment_payload = match &payload.payload {
            ExactPaymentPayload::Evm(payload) => payload,
            ExactPaymentPayload::Svm(_) => {
                return Err(FacilitatorLocalError::SchemeMismatch(None));
            }
        };
        let payer: MixedAddress = payment_payload.authorization.from.into();
        if payload.scheme != requirements.scheme {
            return Err(FacilitatorLocalError::SchemeMismatch(Some(payer)));
        }
        if payload.network != self.network() {
            return Err(FacilitatorLocalError::NetworkMismatch(
                Some(payer),
                self.network(),
                payload.network,
            ));
        }
        if requirements.network != self.network() {
            return Err(FacilitatorLocalError::NetworkMismatch(
                Some(payer),
                self.network(),
                requirements.network,
            ));
        }
        let asset_address: Address = requirements
            .asset
            .clone()
            .try_into()
            .map_err(|e| FacilitatorLocalError::InvalidAddress(Some(payer.clone()), format!("{e}")))?;
        let contract = IEIP3009::new(asset_address, &self.inner);

        let payment = ExactEvmPayment {
            from: payment_payload.authorization.from,
            to: payment_payload.authorization.to,
            value: payment_payload.authorization.value,
            valid_after: payment_payload.authorization.valid_after,
            valid_before: payment_payload.authorization.valid_before,
            nonce: payment_payload.authorization.nonce,
            signature: payment_payload.signature.clone(),
        };

        let domain = self
            .resolve_domain(&contract, requirements, &asset_address)
            .await?;
        self.assert_signature(&payment, &domain).await?;
        assert_time(
            payer.clone(),
            payment.valid_after,
            payment.valid_before,
            self.network().estimated_block_time_secs(),
        )?;
        assert_enough_value(&payment.from, &payment.value, &requirements.max_amount_required)?;

        let requirements_to: EvmAddress = requirements
            .pay_to
            .clone()
            .try_into()
            .map_err(|e| FacilitatorLocalError::InvalidAddress(Some(payer.clone()), format!("{e}")))?;
        if payment.to != requirements_to {
            return Err(FacilitatorLocalError::ReceiverMismatch(
                payer,
                payment.to.to_string(),
                requirements_to.to_string(),
            ));
        }

        assert_enough_balance(&contract, &payment.from, payment.value.into()).await?;
        Ok((contract, payment))
    }

    /// Constructs the correct EIP-712 domain for signature verification.
    ///
    /// Resolves `name` and `version` from `requirements.extra`, then from
    /// static [`USDCDeployment`] metadata, then by reading the token
    /// contract. When the chain read fails and `extra` carried nothing,
    /// the requirements are unusable.
    #[instrument(skip_all, err, fields(network = %self.network(), asset = %asset_address))]
    async fn resolve_domain(
        &self,
        contract: &IEIP3009::IEIP3009Instance<&InnerProvider>,
        requirements: &PaymentRequirements,
        asset_address: &Address,
    ) -> Result<Eip712Domain, FacilitatorLocalError> {
        let known = USDCDeployment::by_network(self.network())
            .filter(|usdc| usdc.address == TokenAddress::Evm(*asset_address))
            .and_then(|usdc| usdc.eip712.clone());
        let name = match requirements
            .extra_str("name")
            .or_else(|| known.as_ref().map(|eip712| eip712.name.clone()))
        {
            Some(name) => name,
            None => contract.name().call().await.map_err(|e| {
                FacilitatorLocalError::InvalidPaymentRequirements(format!(
                    "EIP-712 name unavailable: {e}"
                ))
            })?,
        };
        let version = match requirements
            .extra_str("version")
            .or_else(|| known.as_ref().map(|eip712| eip712.version.clone()))
        {
            Some(version) => version,
            None => contract.version().call().await.map_err(|e| {
                FacilitatorLocalError::InvalidPaymentRequirements(format!(
                    "EIP-712 version unavailable: {e}"
                ))
            })?,
        };
        Ok(eip712_domain! {
            name: name,
            version: version,
            chain_id: self.chain.chain_id,
            verifying_contract: *asset_address,
        })
    }

    /// Verifies the signature in the payment payload.
    ///
    /// Plain 65-byte signatures are recovered locally. Wrapped (ERC-6492)
    /// and contract signatures, and zkStack accounts whose native signature
    /// scheme does not recover through plain ECDSA, are validated through
    /// ERC-1271 `isValidSignature` on the signer's contract.
    #[instrument(skip_all, err)]
    async fn assert_signature(
        &self,
        payment: &ExactEvmPayment,
        domain: &Eip712Domain,
    ) -> Result<(), FacilitatorLocalError> {
        let disposition =
            check_signature_offline(payment, domain, self.network().zk_stack())?;
        match disposition {
            SignatureDisposition::Verified => Ok(()),
            SignatureDisposition::NeedsOnchain { hash, signature } => {
                let payer: Address = payment.from.into();
                let validator = IERC1271::new(payer, &self.inner);
                let magic = validator
                    .isValidSignature(hash, signature)
                    .call()
                    .await
                    .map_err(|e| {
                        FacilitatorLocalError::InvalidSignature(
                            payment.from.into(),
                            format!("isValidSignature call failed: {e}"),
                        )
                    })?;
                if magic == FixedBytes(ERC1271_MAGIC) {
                    Ok(())
                } else {
                    Err(FacilitatorLocalError::InvalidSignature(
                        payment.from.into(),
                        "ERC-1271 validation rejected the signature".to_string(),
                    ))
                }
            }
        }
    }

    /// Broadcast `transferWithAuthorization` from `wallet` with an explicit
    /// nonce, retrying on nonce conflicts.
    ///
    /// Returns the pending transaction and the nonce that won.
    async fn broadcast_transfer(
        &self,
        contract: &IEIP3009::IEIP3009Instance<&InnerProvider>,
        payment: &ExactEvmPayment,
        wallet: Address,
    ) -> Result<(alloy_provider::PendingTransactionBuilder<AlloyEthereum>, u64), FacilitatorLocalError>
    {
        let config = self.pool.config().clone();
        let payer: MixedAddress = payment.from.into();
        let (mut nonce, _) = self
            .nonces
            .next(wallet, self)
            .await
            .map_err(|e| FacilitatorLocalError::RpcFailure(Some(payer.clone()), e))?;
        let mut attempt = 0u32;
        loop {
            let mut tx = contract
                .transferWithAuthorization(
                    payment.from.into(),
                    payment.to.into(),
                    payment.value.into(),
                    payment.valid_after.into(),
                    payment.valid_before.into(),
                    FixedBytes(payment.nonce.0),
                    Bytes::from(payment.signature.0.clone()),
                )
                .from(wallet)
                .nonce(nonce)
                .gas(TRANSFER_GAS_LIMIT);
            if !self.network().eip1559() {
                let gas_price = self.inner.get_gas_price().await.map_err(|e| {
                    FacilitatorLocalError::RpcFailure(Some(payer.clone()), format!("{e}"))
                })?;
                tx = tx.gas_price(gas_price);
            }
            match tx.send().await {
                Ok(pending) => {
                    return Ok((pending, nonce));
                }
                Err(e) => {
                    let message = format!("{e:?}");
                    if is_nonce_error(&message) && attempt < config.max_retry_attempts {
                        attempt += 1;
                        tracing::warn!(
                            network = %self.network(),
                            wallet = %wallet,
                            attempt,
                            error = %message,
                            "nonce conflict, re-syncing and retrying"
                        );
                        nonce = self
                            .nonces
                            .reset(wallet, self)
                            .await
                            .map_err(|e| FacilitatorLocalError::RpcFailure(Some(payer.clone()), e))?;
                        tokio::time::sleep(config.retry_delay).await;
                        continue;
                    }
                    // The reserved nonce never reached the chain.
                    self.nonces.decrement(wallet).await;
                    return Err(FacilitatorLocalError::ContractCall(
                        Some(payer),
                        message,
                    ));
                }
            }
        }
    }
}

impl NetworkProviderOps for EvmProvider {
    fn signer_address(&self) -> MixedAddress {
        let addresses = self.pool.addresses();
        let first = addresses.first().copied().unwrap_or(Address::ZERO);
        EvmAddress(first).into()
    }

    fn network(&self) -> Network {
        self.chain.network
    }
}

impl Facilitator for EvmProvider {
    type Error = FacilitatorLocalError;

    /// Verify an x402 payment intent without touching a state-changing path.
    ///
    /// # Errors
    /// - [`FacilitatorLocalError::InvalidSignature`] on signer mismatch,
    /// - [`FacilitatorLocalError::ValidAfterInFuture`] / [`FacilitatorLocalError::Expired`] outside the window,
    /// - [`FacilitatorLocalError::InsufficientValue`] / [`FacilitatorLocalError::InsufficientFunds`] on amount checks,
    /// - [`FacilitatorLocalError::ReceiverMismatch`] on recipient mismatch.
    #[instrument(skip_all, err, fields(network = %self.network()))]
    async fn verify(&self, request: &VerifyRequest) -> Result<VerifyResponse, Self::Error> {
        let (_, payment) = self
            .assert_valid_payment(&request.payment_payload, &request.payment_requirements)
            .await?;
        Ok(VerifyResponse::valid(payment.from.into()))
    }

    /// Settle a verified payment on-chain through the wallet pool.
    ///
    /// Verification runs exactly once, before wallet acquisition. The
    /// acquired wallet is gas-gated, a nonce is reserved, and the transfer
    /// is broadcast with nonce-conflict retries. The lease is released on
    /// every exit path.
    #[instrument(skip_all, err, fields(network = %self.network()))]
    async fn settle(&self, request: &SettleRequest) -> Result<SettleResponse, Self::Error> {
        let payload = &request.payment_payload;
        let (contract, payment) = self
            .assert_valid_payment(payload, &request.payment_requirements)
            .await?;
        let payer: MixedAddress = payment.from.into();

        let lease = self.pool.acquire()?;
        let wallet = lease.address;

        let wallet_balance = match self.inner.get_balance(wallet).await {
            Ok(balance) => balance,
            Err(e) => {
                self.pool.release(&lease, None, false);
                return Err(FacilitatorLocalError::RpcFailure(
                    Some(payer),
                    format!("{e}"),
                ));
            }
        };
        self.pool.apply_balance(wallet, wallet_balance);
        if wallet_balance < self.pool.config().min_native_balance {
            self.pool.release(&lease, None, false);
            return Err(FacilitatorLocalError::GasBalanceTooLow(
                self.network(),
                wallet,
            ));
        }

        let (pending, nonce) = match self.broadcast_transfer(&contract, &payment, wallet).await {
            Ok(result) => result,
            Err(e) => {
                self.pool.release(&lease, None, false);
                return Err(e);
            }
        };
        let tx_hash = *pending.tx_hash();
        self.pool.track_pending(&lease, tx_hash, nonce);

        let wait_budget = settle_wait_budget(request.payment_requirements.max_timeout_seconds);
        let receipt = pending
            .with_timeout(Some(wait_budget))
            .get_receipt()
            .await;
        let receipt = match receipt {
            Ok(receipt) => receipt,
            Err(e) => {
                // The transaction may still land later; we do not chase orphans.
                self.pool.release(&lease, Some(tx_hash), false);
                return Err(FacilitatorLocalError::TransactionFailed(
                    payer,
                    Some(TransactionHash::Evm(tx_hash.0)),
                    format!("receipt wait failed: {e}"),
                ));
            }
        };
        let success = receipt.status();
        self.pool.release(&lease, Some(tx_hash), success);
        if success {
            tracing::event!(Level::INFO,
                status = "ok",
                tx = %receipt.transaction_hash,
                "transferWithAuthorization succeeded"
            );
            Ok(SettleResponse {
                success: true,
                error_reason: None,
                payer,
                transaction: Some(TransactionHash::Evm(receipt.transaction_hash.0)),
                network: payload.network,
            })
        } else {
            tracing::event!(
                Level::WARN,
                status = "failed",
                tx = %receipt.transaction_hash,
                "transferWithAuthorization reverted"
            );
            Ok(SettleResponse {
                success: false,
                error_reason: Some(ErrorReason::BlockchainTransactionFailed),
                payer,
                transaction: Some(TransactionHash::Evm(receipt.transaction_hash.0)),
                network: payload.network,
            })
        }
    }

    /// Report payment kinds supported by this provider on its network.
    async fn supported(&self) -> Result<SupportedPaymentKindsResponse, Self::Error> {
        let kinds = vec![SupportedPaymentKind {
            network: self.network(),
            x402_version: X402Version::V1,
            scheme: Scheme::Exact,
            extra: None,
        }];
        Ok(SupportedPaymentKindsResponse { kinds })
    }
}

/// Wait budget for the settlement receipt, clamped to a safety ceiling.
fn settle_wait_budget(max_timeout_seconds: u64) -> Duration {
    let secs = if max_timeout_seconds == 0 {
        MAX_SETTLE_WAIT_SECS
    } else {
        max_timeout_seconds.min(MAX_SETTLE_WAIT_SECS)
    };
    Duration::from_secs(secs)
}

/// Validates the authorization window.
///
/// `validAfter` must be at least 6 seconds in the past (skew tolerance for
/// slow chains), and `validBefore` must leave room for at least one block.
#[instrument(skip_all, err)]
fn assert_time(
    payer: MixedAddress,
    valid_after: UnixTimestamp,
    valid_before: UnixTimestamp,
    block_time_secs: u64,
) -> Result<(), FacilitatorLocalError> {
    let now = UnixTimestamp::try_now().map_err(FacilitatorLocalError::ClockError)?;
    if valid_after + 6 > now {
        return Err(FacilitatorLocalError::ValidAfterInFuture(
            payer,
            format!("valid_after {valid_after} within 6s of now {now}"),
        ));
    }
    if valid_before <= now + block_time_secs {
        return Err(FacilitatorLocalError::Expired(
            payer,
            format!("valid_before {valid_before} <= now {now} + block time {block_time_secs}"),
        ));
    }
    Ok(())
}

/// Verifies that the authorized `value` covers the required amount.
#[instrument(skip_all, err, fields(sent = %value, max_amount_required = %max_amount_required))]
fn assert_enough_value(
    payer: &EvmAddress,
    value: &TokenAmount,
    max_amount_required: &TokenAmount,
) -> Result<(), FacilitatorLocalError> {
    if value < max_amount_required {
        Err(FacilitatorLocalError::InsufficientValue((*payer).into()))
    } else {
        Ok(())
    }
}

/// Checks the payer's on-chain token balance against the authorized value.
#[instrument(skip_all, err, fields(sender = %sender, token_contract = %contract.address()))]
async fn assert_enough_balance(
    contract: &IEIP3009::IEIP3009Instance<&InnerProvider>,
    sender: &EvmAddress,
    required: U256,
) -> Result<(), FacilitatorLocalError> {
    let balance = contract
        .balanceOf(sender.0)
        .call()
        .await
        .map_err(|e| FacilitatorLocalError::ContractCall(Some((*sender).into()), format!("{e:?}")))?;
    if balance < required {
        Err(FacilitatorLocalError::InsufficientFunds((*sender).into()))
    } else {
        Ok(())
    }
}

/// Outcome of offline signature checking.
#[derive(Debug)]
enum SignatureDisposition {
    /// ECDSA recovery succeeded and matched the authorization's `from`.
    Verified,
    /// The signature requires ERC-1271 validation against the signer contract.
    NeedsOnchain { hash: B256, signature: Bytes },
}

/// A structured representation of an Ethereum signature.
///
/// Normalizes the two supported encodings:
///
/// - **EIP-6492 wrapped signatures**: used for counterfactual contract
///   wallets. They carry deployment metadata plus the inner signature the
///   wallet contract validates after deployment.
/// - **Plain signatures**: 65-byte ECDSA or contract (EIP-1271) bytes.
#[derive(Debug, Clone)]
enum StructuredSignature {
    Eip6492 {
        #[allow(dead_code)]
        factory: Address,
        #[allow(dead_code)]
        factory_calldata: Bytes,
        inner: Bytes,
    },
    Plain(Bytes),
}

impl TryFrom<&EvmSignature> for StructuredSignature {
    type Error = FacilitatorLocalError;

    /// Parse raw signature bytes.
    ///
    /// If the last 32 bytes equal [`EIP6492_MAGIC_SUFFIX`], the prefix is
    /// decoded as a [`Sig6492`] tuple; anything else is a plain signature.
    fn try_from(signature: &EvmSignature) -> Result<Self, Self::Error> {
        let bytes = &signature.0;
        let is_eip6492 = bytes.len() >= 32 && bytes[bytes.len() - 32..] == EIP6492_MAGIC_SUFFIX;
        if is_eip6492 {
            let body = &bytes[..bytes.len() - 32];
            let sig6492 = Sig6492::abi_decode_params(body).map_err(|e| {
                FacilitatorLocalError::InvalidAddress(
                    None,
                    format!("Failed to decode EIP-6492 signature: {e}"),
                )
            })?;
            Ok(StructuredSignature::Eip6492 {
                factory: sig6492.factory,
                factory_calldata: sig6492.factoryCalldata,
                inner: sig6492.innerSig,
            })
        } else {
            Ok(StructuredSignature::Plain(Bytes::from(bytes.clone())))
        }
    }
}

/// Unwrap the signature, compute the EIP-712 signing hash, and recover the
/// signer when possible without chain access.
fn check_signature_offline(
    payment: &ExactEvmPayment,
    domain: &Eip712Domain,
    zk_stack: bool,
) -> Result<SignatureDisposition, FacilitatorLocalError> {
    use alloy_sol_types::SolStruct;

    let transfer_with_authorization = TransferWithAuthorization {
        from: payment.from.0,
        to: payment.to.0,
        value: payment.value.into(),
        validAfter: payment.valid_after.into(),
        validBefore: payment.valid_before.into(),
        nonce: FixedBytes(payment.nonce.0),
    };
    let hash = transfer_with_authorization.eip712_signing_hash(domain);
    let structured: StructuredSignature = (&payment.signature).try_into()?;
    let effective = match &structured {
        StructuredSignature::Eip6492 { inner, .. } => inner.clone(),
        StructuredSignature::Plain(bytes) => bytes.clone(),
    };
    if effective.len() == 65 {
        let raw: [u8; 65] = effective
            .as_ref()
            .try_into()
            .expect("length checked above");
        let signature = alloy_primitives::Signature::from_raw_array(&raw).map_err(|e| {
            FacilitatorLocalError::InvalidSignature(payment.from.into(), format!("{e}"))
        })?;
        let recovered = signature.recover_address_from_prehash(&hash).map_err(|e| {
            FacilitatorLocalError::InvalidSignature(payment.from.into(), format!("{e}"))
        })?;
        if recovered == payment.from.0 {
            return Ok(SignatureDisposition::Verified);
        }
        // zkStack native accounts sign EIP-712 transactions through their
        // account contract; the recovery path is ERC-1271, not ecrecover.
        if zk_stack {
            return Ok(SignatureDisposition::NeedsOnchain {
                hash,
                signature: effective,
            });
        }
        return Err(FacilitatorLocalError::InvalidSignature(
            payment.from.into(),
            format!(
                "Address mismatch: recovered {recovered}, expected {}",
                payment.from
            ),
        ));
    }
    Ok(SignatureDisposition::NeedsOnchain {
        hash,
        signature: effective,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_signer::SignerSync;
    use alloy_signer_local::PrivateKeySigner;
    use alloy_sol_types::SolStruct;

    fn domain() -> Eip712Domain {
        eip712_domain! {
            name: "USDC",
            version: "2",
            chain_id: 84532,
            verifying_contract: alloy_primitives::address!("0x036CbD53842c5426634e7929541eC2318f3dCF7e"),
        }
    }

    fn payment_signed_by(signer: &PrivateKeySigner, from: Address) -> ExactEvmPayment {
        let to = Address::from([0xA5; 20]);
        let value = TokenAmount::from(1_000_000);
        let valid_after = UnixTimestamp(0);
        let valid_before = UnixTimestamp(99_999_999_999);
        let nonce = HexEncodedNonce([0x01; 32]);
        let message = TransferWithAuthorization {
            from,
            to,
            value: value.into(),
            validAfter: valid_after.into(),
            validBefore: valid_before.into(),
            nonce: FixedBytes(nonce.0),
        };
        let hash = message.eip712_signing_hash(&domain());
        let signature = signer.sign_hash_sync(&hash).unwrap();
        ExactEvmPayment {
            from: EvmAddress(from),
            to: EvmAddress(to),
            value,
            valid_after,
            valid_before,
            nonce,
            signature: EvmSignature(signature.as_bytes().to_vec()),
        }
    }

    #[test]
    fn recovers_valid_signature() {
        let signer = PrivateKeySigner::random();
        let payment = payment_signed_by(&signer, signer.address());
        let disposition = check_signature_offline(&payment, &domain(), false).unwrap();
        assert!(matches!(disposition, SignatureDisposition::Verified));
    }

    #[test]
    fn rejects_signature_from_another_signer() {
        let signer = PrivateKeySigner::random();
        let impostor = PrivateKeySigner::random();
        // Authorization claims `from` is the first signer, but the impostor signed.
        let payment = payment_signed_by(&impostor, signer.address());
        let result = check_signature_offline(&payment, &domain(), false);
        assert!(matches!(
            result,
            Err(FacilitatorLocalError::InvalidSignature(_, _))
        ));
    }

    #[test]
    fn rejects_signature_under_wrong_domain() {
        let signer = PrivateKeySigner::random();
        let mut payment = payment_signed_by(&signer, signer.address());
        // Tamper with the value after signing.
        payment.value = TokenAmount::from(2_000_000);
        let result = check_signature_offline(&payment, &domain(), false);
        assert!(matches!(
            result,
            Err(FacilitatorLocalError::InvalidSignature(_, _))
        ));
    }

    #[test]
    fn zk_stack_mismatch_defers_to_contract_validation() {
        let signer = PrivateKeySigner::random();
        let impostor = PrivateKeySigner::random();
        let payment = payment_signed_by(&impostor, signer.address());
        let disposition = check_signature_offline(&payment, &domain(), true).unwrap();
        assert!(matches!(
            disposition,
            SignatureDisposition::NeedsOnchain { .. }
        ));
    }

    #[test]
    fn unwraps_eip6492_signatures() {
        let signer = PrivateKeySigner::random();
        let payment = payment_signed_by(&signer, signer.address());
        let inner = payment.signature.0.clone();

        let wrapped = Sig6492 {
            factory: Address::from([0xFA; 20]),
            factoryCalldata: Bytes::from(vec![0xde, 0xad]),
            innerSig: Bytes::from(inner),
        };
        let mut bytes = wrapped.abi_encode_params();
        bytes.extend_from_slice(&EIP6492_MAGIC_SUFFIX);

        let wrapped_payment = ExactEvmPayment {
            signature: EvmSignature(bytes),
            ..payment
        };
        let disposition = check_signature_offline(&wrapped_payment, &domain(), false).unwrap();
        assert!(matches!(disposition, SignatureDisposition::Verified));
    }

    #[test]
    fn long_contract_signature_needs_onchain_validation() {
        let signer = PrivateKeySigner::random();
        let mut payment = payment_signed_by(&signer, signer.address());
        payment.signature = EvmSignature(vec![0xCC; 96]);
        let disposition = check_signature_offline(&payment, &domain(), false).unwrap();
        assert!(matches!(
            disposition,
            SignatureDisposition::NeedsOnchain { .. }
        ));
    }

    #[test]
    fn time_window_checks() {
        let now = UnixTimestamp::try_now().unwrap();
        let payer = MixedAddress::unknown;

        // Happy path: activated long ago, expires far in the future.
        assert_time(payer(), UnixTimestamp(0), now + 300, 2).unwrap();

        // validAfter inside the 6-second skew tolerance.
        let result = assert_time(payer(), now, now + 300, 2);
        assert!(matches!(
            result,
            Err(FacilitatorLocalError::ValidAfterInFuture(_, _))
        ));

        // Expired.
        let result = assert_time(payer(), UnixTimestamp(0), now - 1, 2);
        assert!(matches!(result, Err(FacilitatorLocalError::Expired(_, _))));

        // Expires within one block time.
        let result = assert_time(payer(), UnixTimestamp(0), now + 1, 2);
        assert!(matches!(result, Err(FacilitatorLocalError::Expired(_, _))));
    }

    #[test]
    fn value_must_cover_required_amount() {
        let payer = EvmAddress(Address::from([1u8; 20]));
        assert!(
            assert_enough_value(&payer, &TokenAmount::from(100), &TokenAmount::from(100)).is_ok()
        );
        assert!(
            assert_enough_value(&payer, &TokenAmount::from(150), &TokenAmount::from(100)).is_ok()
        );
        let result = assert_enough_value(&payer, &TokenAmount::from(99), &TokenAmount::from(100));
        assert!(matches!(
            result,
            Err(FacilitatorLocalError::InsufficientValue(_))
        ));
    }

    #[test]
    fn settle_wait_budget_is_clamped() {
        assert_eq!(settle_wait_budget(0), Duration::from_secs(120));
        assert_eq!(settle_wait_budget(30), Duration::from_secs(30));
        assert_eq!(settle_wait_budget(600), Duration::from_secs(120));
    }
}
