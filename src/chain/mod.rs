//! Blockchain providers for x402 payment processing.
//!
//! Two chain families are supported:
//!
//! - **EVM**: Ethereum-compatible chains settled through ERC-3009
//!   `transferWithAuthorization` ([`evm::EvmProvider`]).
//! - **SVM**: Solana-style chains settled through SPL `TransferChecked`
//!   transactions ([`solana::SolanaProvider`]).
//!
//! [`NetworkProvider`] wraps both behind one enum so the facilitator can
//! route by network family. [`FacilitatorLocalError`] is the single error
//! type crossing the facilitator boundary; it maps onto the wire-level
//! [`ErrorReason`] taxonomy.

pub mod evm;
pub mod solana;

use std::time::SystemTimeError;

use crate::network::Network;
use crate::types::{
    ErrorReason, MixedAddress, SettleRequest, SettleResponse, SupportedPaymentKindsResponse,
    TransactionHash, VerifyRequest, VerifyResponse,
};
use crate::wallet_pool::{AcquireError, WalletAddress};
use crate::facilitator::Facilitator;

/// Whether an error surfaced during verification or settlement; decides
/// which "unexpected" reason unclassified failures map to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Verify,
    Settle,
}

/// Operations shared by network providers regardless of chain family.
pub trait NetworkProviderOps {
    /// Address of the signer used by this provider (for tx sending).
    fn signer_address(&self) -> MixedAddress;

    /// x402 network handled by this provider.
    fn network(&self) -> Network;
}

/// A provider for one configured network, either EVM or SVM.
#[derive(Debug)]
pub enum NetworkProvider {
    Evm(evm::EvmProvider),
    Solana(solana::SolanaProvider),
}

impl NetworkProviderOps for NetworkProvider {
    fn signer_address(&self) -> MixedAddress {
        match self {
            NetworkProvider::Evm(provider) => provider.signer_address(),
            NetworkProvider::Solana(provider) => provider.signer_address(),
        }
    }

    fn network(&self) -> Network {
        match self {
            NetworkProvider::Evm(provider) => provider.network(),
            NetworkProvider::Solana(provider) => provider.network(),
        }
    }
}

impl Facilitator for NetworkProvider {
    type Error = FacilitatorLocalError;

    async fn verify(&self, request: &VerifyRequest) -> Result<VerifyResponse, Self::Error> {
        match self {
            NetworkProvider::Evm(provider) => provider.verify(request).await,
            NetworkProvider::Solana(provider) => provider.verify(request).await,
        }
    }

    async fn settle(&self, request: &SettleRequest) -> Result<SettleResponse, Self::Error> {
        match self {
            NetworkProvider::Evm(provider) => provider.settle(request).await,
            NetworkProvider::Solana(provider) => provider.settle(request).await,
        }
    }

    async fn supported(&self) -> Result<SupportedPaymentKindsResponse, Self::Error> {
        match self {
            NetworkProvider::Evm(provider) => provider.supported().await,
            NetworkProvider::Solana(provider) => provider.supported().await,
        }
    }
}

/// Represents all errors that may occur during verification or settlement.
#[derive(thiserror::Error, Debug)]
pub enum FacilitatorLocalError {
    /// The scheme/payload combination is not one this facilitator serves.
    #[error("Unsupported payload scheme")]
    SchemeMismatch(Option<MixedAddress>),
    /// The network declared in the payload doesn't match the requirements
    /// or the provider that received it.
    #[error("Incompatible networks (expected {1}, got {2})")]
    NetworkMismatch(Option<MixedAddress>, Network, Network),
    /// No provider is configured for the requested network.
    #[error("Unsupported network: {1}")]
    UnsupportedNetwork(Option<MixedAddress>, Network),
    /// The network is excluded by the facilitator's allow-list.
    #[error("Network not allowed: {0}")]
    NetworkNotAllowed(Network),
    /// A payload field could not be parsed into an address.
    #[error("Invalid address: {1}")]
    InvalidAddress(Option<MixedAddress>, String),
    /// The payment requirements are incomplete or self-contradictory.
    #[error("Invalid payment requirements: {0}")]
    InvalidPaymentRequirements(String),
    /// EIP-712 signature is invalid or recovered to the wrong signer.
    #[error("Invalid signature: {1}")]
    InvalidSignature(MixedAddress, String),
    /// The authorization is not yet active (`validAfter` violated).
    #[error("Authorization not yet active: {1}")]
    ValidAfterInFuture(MixedAddress, String),
    /// The authorization is expired or expires too soon (`validBefore`).
    #[error("Authorization expires too soon: {1}")]
    Expired(MixedAddress, String),
    /// The authorized value does not cover the required amount.
    #[error("Insufficient authorization value")]
    InsufficientValue(MixedAddress),
    /// The `to` address does not match the requirements' `payTo`.
    #[error("Receiver mismatch: payload {1}, requirements {2}")]
    ReceiverMismatch(MixedAddress, String, String),
    /// The payer's on-chain balance is insufficient for the payment.
    #[error("Insufficient funds")]
    InsufficientFunds(MixedAddress),
    /// The SVM transaction could not be decoded or fails structural checks.
    #[error("Invalid SVM transaction: {0}")]
    SvmTransaction(String),
    /// The SVM instruction sequence violates the expected shape.
    #[error("Invalid SVM transaction instructions: {0}")]
    SvmInstructions(String),
    /// The SPL transfer amount does not cover the required amount.
    #[error("SVM transfer amount mismatch: {0}")]
    SvmAmountMismatch(String),
    /// Simulation of the SVM transaction failed.
    #[error("SVM transaction simulation failed: {0}")]
    SvmSimulationFailed(String),
    /// The transaction's blockhash expired before confirmation.
    #[error("SVM block height exceeded")]
    SvmBlockHeightExceeded(MixedAddress),
    /// Confirmation polling exhausted its deadline.
    #[error("SVM transaction confirmation timed out")]
    SvmConfirmationTimedOut(MixedAddress),
    /// The acquired wallet's native balance is below the gas threshold.
    #[error("Facilitator wallet {1} gas balance too low on {0}")]
    GasBalanceTooLow(Network, WalletAddress),
    /// No wallet could be acquired from the pool.
    #[error("No available wallet: {0}")]
    WalletUnavailable(#[from] AcquireError),
    /// RPC transport failure.
    #[error("RPC failure: {1}")]
    RpcFailure(Option<MixedAddress>, String),
    /// The transaction was broadcast but failed or reverted on-chain.
    #[error("Transaction failed: {2}")]
    TransactionFailed(MixedAddress, Option<TransactionHash>, String),
    /// Low-level contract interaction failure, classified by message.
    #[error("Contract call failed: {1}")]
    ContractCall(Option<MixedAddress>, String),
    /// Failed to read the system clock.
    #[error("Can not get system clock")]
    ClockError(#[source] SystemTimeError),
    /// Anything that escaped classification.
    #[error("Unexpected error: {1}")]
    Unexpected(Option<MixedAddress>, String),
}

/// Coarse classes for errors bubbling up from chain SDKs, recognized by
/// message substrings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Rpc,
    Signature,
    Blockchain,
    Validation,
    Unknown,
}

/// Substring-based classification of an opaque lower-layer error message.
pub fn classify_message(message: &str) -> ErrorClass {
    let lowered = message.to_lowercase();
    if ["connection", "transport", "timed out", "timeout", "dns", "503", "429"]
        .iter()
        .any(|m| lowered.contains(m))
    {
        ErrorClass::Rpc
    } else if lowered.contains("signature") || lowered.contains("ecrecover") {
        ErrorClass::Signature
    } else if ["revert", "gas", "nonce", "underpriced", "receipt"]
        .iter()
        .any(|m| lowered.contains(m))
    {
        ErrorClass::Blockchain
    } else if lowered.contains("invalid") || lowered.contains("parse") || lowered.contains("decod")
    {
        ErrorClass::Validation
    } else {
        ErrorClass::Unknown
    }
}

impl FacilitatorLocalError {
    /// The payer this error pertains to, or the empty address when the payer
    /// could not be established.
    pub fn payer(&self) -> MixedAddress {
        use FacilitatorLocalError::*;
        match self {
            SchemeMismatch(payer)
            | NetworkMismatch(payer, _, _)
            | UnsupportedNetwork(payer, _)
            | InvalidAddress(payer, _)
            | RpcFailure(payer, _)
            | ContractCall(payer, _)
            | Unexpected(payer, _) => payer.clone().unwrap_or_else(MixedAddress::unknown),
            InvalidSignature(payer, _)
            | ValidAfterInFuture(payer, _)
            | Expired(payer, _)
            | InsufficientValue(payer)
            | ReceiverMismatch(payer, _, _)
            | InsufficientFunds(payer)
            | SvmBlockHeightExceeded(payer)
            | SvmConfirmationTimedOut(payer)
            | TransactionFailed(payer, _, _) => payer.clone(),
            NetworkNotAllowed(_)
            | InvalidPaymentRequirements(_)
            | SvmTransaction(_)
            | SvmInstructions(_)
            | SvmAmountMismatch(_)
            | SvmSimulationFailed(_)
            | GasBalanceTooLow(_, _)
            | WalletUnavailable(_)
            | ClockError(_) => MixedAddress::unknown(),
        }
    }

    /// The on-chain transaction reference, when the error happened after
    /// broadcast.
    pub fn transaction(&self) -> Option<TransactionHash> {
        match self {
            FacilitatorLocalError::TransactionFailed(_, tx, _) => tx.clone(),
            _ => None,
        }
    }

    /// Map this error onto the wire-level reason taxonomy.
    pub fn reason(&self, phase: Phase) -> ErrorReason {
        use FacilitatorLocalError::*;
        let unexpected = match phase {
            Phase::Verify => ErrorReason::UnexpectedVerifyError,
            Phase::Settle => ErrorReason::UnexpectedSettleError,
        };
        match self {
            SchemeMismatch(_) => ErrorReason::InvalidScheme,
            NetworkMismatch(_, _, _) | UnsupportedNetwork(_, _) => ErrorReason::InvalidNetwork,
            NetworkNotAllowed(_) => ErrorReason::NetworkNotAllowed,
            InvalidAddress(_, _) => ErrorReason::InvalidPayload,
            InvalidPaymentRequirements(_) => ErrorReason::InvalidPaymentRequirements,
            InvalidSignature(_, _) => ErrorReason::InvalidExactEvmPayloadSignature,
            ValidAfterInFuture(_, _) => {
                ErrorReason::InvalidExactEvmPayloadAuthorizationValidAfter
            }
            Expired(_, _) => ErrorReason::InvalidExactEvmPayloadAuthorizationValidBefore,
            InsufficientValue(_) => ErrorReason::InvalidExactEvmPayloadAuthorizationValue,
            ReceiverMismatch(_, _, _) => ErrorReason::InvalidExactEvmPayloadRecipientMismatch,
            InsufficientFunds(_) => ErrorReason::InsufficientFunds,
            SvmTransaction(_) => ErrorReason::InvalidExactSvmPayloadTransaction,
            SvmInstructions(_) => ErrorReason::InvalidExactSvmPayloadTransactionInstructions,
            SvmAmountMismatch(_) => {
                ErrorReason::InvalidExactSvmPayloadTransactionAmountMismatch
            }
            SvmSimulationFailed(_) => {
                ErrorReason::InvalidExactSvmPayloadTransactionSimulationFailed
            }
            SvmBlockHeightExceeded(_) => ErrorReason::SettleExactSvmBlockHeightExceeded,
            SvmConfirmationTimedOut(_) => {
                ErrorReason::SettleExactSvmTransactionConfirmationTimedOut
            }
            GasBalanceTooLow(_, _) => ErrorReason::InsufficientFacilitatorGasBalance,
            // Health is defined by the gas-balance threshold, so a pool with
            // no healthy wallet is out of facilitator gas.
            WalletUnavailable(AcquireError::NoWalletsConfigured) => {
                ErrorReason::NoWalletsConfigured
            }
            WalletUnavailable(AcquireError::AllUnhealthy) => {
                ErrorReason::InsufficientFacilitatorGasBalance
            }
            WalletUnavailable(AcquireError::AllBusy) => ErrorReason::AllWalletsBusy,
            RpcFailure(_, _) => ErrorReason::RpcConnectionFailed,
            TransactionFailed(_, _, _) => ErrorReason::BlockchainTransactionFailed,
            ContractCall(_, message) => match classify_message(message) {
                ErrorClass::Rpc => ErrorReason::RpcConnectionFailed,
                ErrorClass::Signature => ErrorReason::InvalidExactEvmPayloadSignature,
                ErrorClass::Blockchain => ErrorReason::BlockchainTransactionFailed,
                ErrorClass::Validation => ErrorReason::InvalidPayload,
                ErrorClass::Unknown => unexpected,
            },
            ClockError(_) | Unexpected(_, _) => unexpected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifier_buckets_common_messages() {
        assert_eq!(classify_message("connection refused"), ErrorClass::Rpc);
        assert_eq!(classify_message("request timed out"), ErrorClass::Rpc);
        assert_eq!(
            classify_message("invalid signature length"),
            ErrorClass::Signature
        );
        assert_eq!(classify_message("execution reverted"), ErrorClass::Blockchain);
        assert_eq!(classify_message("nonce too low"), ErrorClass::Blockchain);
        assert_eq!(classify_message("invalid opcode data"), ErrorClass::Validation);
        assert_eq!(classify_message("flux capacitor drained"), ErrorClass::Unknown);
    }

    #[test]
    fn wallet_unavailability_maps_onto_taxonomy() {
        let busy = FacilitatorLocalError::WalletUnavailable(AcquireError::AllBusy);
        assert_eq!(busy.reason(Phase::Settle), ErrorReason::AllWalletsBusy);

        let none = FacilitatorLocalError::WalletUnavailable(AcquireError::NoWalletsConfigured);
        assert_eq!(none.reason(Phase::Settle), ErrorReason::NoWalletsConfigured);

        let unhealthy = FacilitatorLocalError::WalletUnavailable(AcquireError::AllUnhealthy);
        assert_eq!(
            unhealthy.reason(Phase::Settle),
            ErrorReason::InsufficientFacilitatorGasBalance
        );
    }

    #[test]
    fn unexpected_reason_depends_on_phase() {
        let error = FacilitatorLocalError::Unexpected(None, "boom".into());
        assert_eq!(error.reason(Phase::Verify), ErrorReason::UnexpectedVerifyError);
        assert_eq!(error.reason(Phase::Settle), ErrorReason::UnexpectedSettleError);
    }
}
