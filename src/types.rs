//! Type definitions for the x402 protocol as used by this facilitator.
//!
//! This mirrors the structures and validation logic from the official x402 SDKs.
//! The key objects are `PaymentPayload`, `PaymentRequirements`, `VerifyResponse`,
//! and `SettleResponse`, which encode payment intent, authorization, and the
//! result of verification/settlement.
//!
//! EVM payments carry an ERC-3009 authorization under an EIP-712 typed signature;
//! SVM payments carry a base64-serialized, partially-signed transaction.

use alloy_primitives::U256;
use alloy_sol_types::sol;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::Error;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fmt::Display;
use std::str::FromStr;
use url::Url;

use crate::network::Network;
use crate::timestamp::UnixTimestamp;

/// Represents the protocol version. Currently only version 1 is supported.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum X402Version {
    V1,
}

impl Serialize for X402Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            X402Version::V1 => serializer.serialize_u8(1),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unsupported x402Version: {0}")]
pub struct X402VersionError(pub u8);

impl TryFrom<u8> for X402Version {
    type Error = X402VersionError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(X402Version::V1),
            _ => Err(X402VersionError(value)),
        }
    }
}

impl<'de> Deserialize<'de> for X402Version {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let num = u8::deserialize(deserializer)?;
        X402Version::try_from(num).map_err(Error::custom)
    }
}

/// Enumerates payment schemes. Only "exact" is supported in this implementation,
/// meaning the transferred amount must satisfy the required amount exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Exact,
}

impl Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Exact => write!(f, "exact"),
        }
    }
}

/// An ECDSA or wrapped (ERC-6492/ERC-1271) signature over EIP-712 typed data.
///
/// Serialized as a 0x-prefixed hex string. Plain ECDSA signatures are exactly
/// 65 bytes; ERC-6492 wrapped signatures are longer and end with the 6492
/// magic suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvmSignature(pub Vec<u8>);

impl<'de> Deserialize<'de> for EvmSignature {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        static SIG_REGEX: Lazy<Regex> = Lazy::new(|| {
            Regex::new(r"^0x(?:[0-9a-fA-F]{2})+$").expect("Invalid regex for EVM signature")
        });

        if !SIG_REGEX.is_match(&s) {
            return Err(Error::custom(
                "Invalid EVM signature format: must be 0x-prefixed hex of even length",
            ));
        }
        let bytes = hex::decode(s.trim_start_matches("0x"))
            .map_err(|_| Error::custom("Failed to decode EVM signature hex string"))?;
        if bytes.len() < 65 {
            return Err(Error::custom("Signature must be at least 65 bytes"));
        }
        Ok(EvmSignature(bytes))
    }
}

impl Serialize for EvmSignature {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let hex_string = format!("0x{}", hex::encode(&self.0));
        serializer.serialize_str(&hex_string)
    }
}

/// Wrapper around [`alloy_primitives::Address`], providing display/serialization support.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvmAddress(pub alloy_primitives::Address);

impl Display for EvmAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<EvmAddress> for alloy_primitives::Address {
    fn from(address: EvmAddress) -> Self {
        address.0
    }
}

impl From<alloy_primitives::Address> for EvmAddress {
    fn from(address: alloy_primitives::Address) -> Self {
        EvmAddress(address)
    }
}

impl From<EvmAddress> for MixedAddress {
    fn from(address: EvmAddress) -> Self {
        MixedAddress(format!("{address}"))
    }
}

/// Represents a 32-byte random nonce, hex-encoded with 0x prefix.
/// Must be exactly 64 hex characters long.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HexEncodedNonce(pub [u8; 32]);

impl<'de> Deserialize<'de> for HexEncodedNonce {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        static NONCE_REGEX: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"^0x[0-9a-fA-F]{64}$").expect("Invalid nonce regex"));

        if !NONCE_REGEX.is_match(&s) {
            return Err(Error::custom("Invalid nonce format"));
        }

        let bytes = hex::decode(&s[2..]).map_err(|_| Error::custom("Invalid hex in nonce"))?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::custom("Invalid length for nonce"))?;
        Ok(HexEncodedNonce(array))
    }
}

impl Serialize for HexEncodedNonce {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let hex_string = format!("0x{}", hex::encode(self.0));
        serializer.serialize_str(&hex_string)
    }
}

/// A token amount in atomic units, up to `2^256 - 1`.
///
/// Parsed from a decimal string to prevent loss of precision in JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TokenAmount(pub U256);

impl<'de> Deserialize<'de> for TokenAmount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::custom(
                "Amount must be a non-negative decimal integer",
            ));
        }
        let value = U256::from_str_radix(&s, 10)
            .map_err(|_| Error::custom("Amount exceeds 2^256 - 1"))?;
        Ok(TokenAmount(value))
    }
}

impl Serialize for TokenAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for TokenAmount {
    fn from(value: u64) -> Self {
        TokenAmount(U256::from(value))
    }
}

impl From<TokenAmount> for U256 {
    fn from(value: TokenAmount) -> Self {
        value.0
    }
}

/// EIP-712 structured data for ERC-3009-based authorization.
/// Defines who can transfer how much, to whom, and when.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExactEvmPayloadAuthorization {
    pub from: EvmAddress,
    pub to: EvmAddress,
    pub value: TokenAmount,
    pub valid_after: UnixTimestamp,
    pub valid_before: UnixTimestamp,
    pub nonce: HexEncodedNonce,
}

/// Full payload required to authorize an ERC-3009 transfer:
/// includes the signature and the EIP-712 struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExactEvmPayload {
    pub signature: EvmSignature,
    pub authorization: ExactEvmPayloadAuthorization,
}

/// SVM payment payload: a base64-serialized, partially-signed
/// `VersionedTransaction` carrying an SPL `TransferChecked`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExactSvmPayload {
    pub transaction: String,
}

/// The scheme-specific payload of a [`PaymentPayload`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExactPaymentPayload {
    Evm(ExactEvmPayload),
    Svm(ExactSvmPayload),
}

/// Describes a signed request to transfer a specific amount of funds on-chain.
/// Includes the scheme, network, and signed payload contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    pub x402_version: X402Version,
    pub scheme: Scheme,
    pub network: Network,
    pub payload: ExactPaymentPayload,
}

/// Represents either an EVM address (`0x...`) or an SVM base58 address.
/// Format is validated by regex and used for routing settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MixedAddress(pub String);

#[derive(Debug, thiserror::Error)]
pub enum MixedAddressError {
    #[error("Invalid EVM address: {0}")]
    InvalidEvmAddress(String),
    #[error("Invalid SVM address: {0}")]
    InvalidSvmAddress(String),
}

impl MixedAddress {
    /// An intentionally empty payer, used in failure responses where the
    /// payer could not be established.
    pub fn unknown() -> Self {
        MixedAddress(String::new())
    }
}

impl TryFrom<MixedAddress> for alloy_primitives::Address {
    type Error = MixedAddressError;

    fn try_from(value: MixedAddress) -> Result<Self, Self::Error> {
        alloy_primitives::Address::from_str(&value.0)
            .map_err(|_| MixedAddressError::InvalidEvmAddress(value.0))
    }
}

impl TryFrom<MixedAddress> for EvmAddress {
    type Error = MixedAddressError;

    fn try_from(value: MixedAddress) -> Result<Self, Self::Error> {
        let address: alloy_primitives::Address = value.try_into()?;
        Ok(EvmAddress(address))
    }
}

impl TryFrom<MixedAddress> for solana_pubkey::Pubkey {
    type Error = MixedAddressError;

    fn try_from(value: MixedAddress) -> Result<Self, Self::Error> {
        solana_pubkey::Pubkey::from_str(&value.0)
            .map_err(|_| MixedAddressError::InvalidSvmAddress(value.0))
    }
}

impl From<solana_pubkey::Pubkey> for MixedAddress {
    fn from(pubkey: solana_pubkey::Pubkey) -> Self {
        MixedAddress(pubkey.to_string())
    }
}

impl Display for MixedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for MixedAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        static MIXED_ADDRESS_REGEX: Lazy<Regex> = Lazy::new(|| {
            Regex::new(r"^(0x[a-fA-F0-9]{40}|[1-9A-HJ-NP-Za-km-z]{32,44})$")
                .expect("Invalid MixedAddress regex")
        });

        if MIXED_ADDRESS_REGEX.is_match(&s) {
            Ok(MixedAddress(s))
        } else {
            Err(Error::custom("Invalid MixedAddress format"))
        }
    }
}

/// An on-chain transaction reference: a 32-byte EVM transaction hash or an
/// SVM base58 signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionHash {
    Evm([u8; 32]),
    Svm(String),
}

impl Serialize for TransactionHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            TransactionHash::Evm(bytes) => {
                serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
            }
            TransactionHash::Svm(signature) => serializer.serialize_str(signature),
        }
    }
}

impl<'de> Deserialize<'de> for TransactionHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;

        static TX_HASH_REGEX: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"^0x[0-9a-fA-F]{64}$").expect("invalid regex"));

        if TX_HASH_REGEX.is_match(&s) {
            let bytes = hex::decode(s.trim_start_matches("0x"))
                .map_err(|_| Error::custom("Invalid hex in transaction hash"))?;
            let array: [u8; 32] = bytes
                .try_into()
                .map_err(|_| Error::custom("Transaction hash must be exactly 32 bytes"))?;
            Ok(TransactionHash::Evm(array))
        } else {
            Ok(TransactionHash::Svm(s))
        }
    }
}

impl Display for TransactionHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionHash::Evm(bytes) => write!(f, "0x{}", hex::encode(bytes)),
            TransactionHash::Svm(signature) => write!(f, "{signature}"),
        }
    }
}

/// Requirements set by the seller for an acceptable payment.
/// This includes the required amount, recipient, asset, network, and metadata.
#[derive(Debug, Serialize, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    pub scheme: Scheme,
    pub network: Network,
    pub max_amount_required: TokenAmount,
    pub resource: Url,
    pub description: String,
    pub mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<serde_json::Value>,
    pub pay_to: MixedAddress,
    pub max_timeout_seconds: u64,
    pub asset: MixedAddress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

impl PaymentRequirements {
    /// Look up a string field of the open `extra` map, if present.
    pub fn extra_str(&self, key: &str) -> Option<String> {
        self.extra
            .as_ref()
            .and_then(|extra| extra.get(key))
            .and_then(|value| value.as_str().map(str::to_string))
    }
}

/// Wrapper for a payment payload and requirements sent by the client
/// to be verified.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub payment_payload: PaymentPayload,
    pub payment_requirements: PaymentRequirements,
}

/// Wrapper for a payment payload and requirements sent by the client
/// to be used for settlement.
pub type SettleRequest = VerifyRequest;

/// Machine-readable failure reasons surfaced in verify/settle responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorReason {
    // Validation
    InvalidX402Version,
    InvalidScheme,
    InvalidNetwork,
    InvalidPayload,
    InvalidPaymentRequirements,
    NetworkNotAllowed,

    // Semantic
    PaymentExpired,
    InsufficientFunds,
    InvalidPayment,
    InvalidTransactionState,

    // EVM signature and authorization
    InvalidExactEvmPayloadSignature,
    InvalidExactEvmPayloadAuthorizationValidAfter,
    InvalidExactEvmPayloadAuthorizationValidBefore,
    InvalidExactEvmPayloadAuthorizationValue,
    InvalidExactEvmPayloadRecipientMismatch,

    // SVM structural
    InvalidExactSvmPayloadTransaction,
    InvalidExactSvmPayloadTransactionInstructions,
    InvalidExactSvmPayloadTransactionAmountMismatch,
    InvalidExactSvmPayloadTransactionSimulationFailed,

    // Settlement / RPC
    RpcConnectionFailed,
    BlockchainTransactionFailed,
    SettleExactSvmBlockHeightExceeded,
    SettleExactSvmTransactionConfirmationTimedOut,
    InsufficientFacilitatorGasBalance,
    AllWalletsBusy,
    NoWalletsConfigured,

    // Unknown
    UnexpectedVerifyError,
    UnexpectedSettleError,
}

impl Display for ErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        write!(f, "{}", json.trim_matches('"'))
    }
}

/// Returned after verifying a [`PaymentPayload`] against [`PaymentRequirements`].
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalid_reason: Option<ErrorReason>,
    pub payer: MixedAddress,
}

impl VerifyResponse {
    pub fn valid(payer: MixedAddress) -> Self {
        VerifyResponse {
            is_valid: true,
            invalid_reason: None,
            payer,
        }
    }

    pub fn invalid(reason: ErrorReason, payer: MixedAddress) -> Self {
        VerifyResponse {
            is_valid: false,
            invalid_reason: Some(reason),
            payer,
        }
    }
}

/// Returned after attempting to settle a payment on-chain.
/// Indicates success/failure, transaction reference, and payer identity.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<ErrorReason>,
    pub payer: MixedAddress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<TransactionHash>,
    pub network: Network,
}

impl SettleResponse {
    pub fn failed(reason: ErrorReason, payer: MixedAddress, network: Network) -> Self {
        SettleResponse {
            success: false,
            error_reason: Some(reason),
            payer,
            transaction: None,
            network,
        }
    }
}

/// One entry of the `/supported` listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedPaymentKind {
    pub x402_version: X402Version,
    pub scheme: Scheme,
    pub network: Network,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

/// Response of the `/supported` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedPaymentKindsResponse {
    pub kinds: Vec<SupportedPaymentKind>,
}

sol!(
    /// Solidity-compatible struct definition for ERC-3009 `transferWithAuthorization`.
    ///
    /// This matches the EIP-3009 format used in EIP-712 typed data:
    /// it defines the authorization to transfer tokens from `from` to `to`
    /// for a specific `value`, valid only between `validAfter` and `validBefore`
    /// and identified by a unique `nonce`.
    #[derive(Serialize, Deserialize)]
    struct TransferWithAuthorization {
        address from;
        address to;
        uint256 value;
        uint256 validAfter;
        uint256 validBefore;
        bytes32 nonce;
    }
);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn evm_payload_json() -> serde_json::Value {
        json!({
            "x402Version": 1,
            "scheme": "exact",
            "network": "base-sepolia",
            "payload": {
                "signature": format!("0x{}", "ab".repeat(65)),
                "authorization": {
                    "from": "0x857b06519E91e3A54538791bDbb0E22373e36b66",
                    "to": "0x209693Bc6afc0C5328bA36FaF03C514EF312287C",
                    "value": "1000000",
                    "validAfter": "0",
                    "validBefore": "99999999999",
                    "nonce": format!("0x{}", "01".repeat(32)),
                }
            }
        })
    }

    #[test]
    fn deserializes_evm_payment_payload() {
        let payload: PaymentPayload = serde_json::from_value(evm_payload_json()).unwrap();
        assert_eq!(payload.scheme, Scheme::Exact);
        assert_eq!(payload.network, Network::BaseSepolia);
        match payload.payload {
            ExactPaymentPayload::Evm(evm) => {
                assert_eq!(evm.signature.0.len(), 65);
                assert_eq!(evm.authorization.value, TokenAmount::from(1_000_000));
            }
            ExactPaymentPayload::Svm(_) => panic!("expected EVM payload"),
        }
    }

    #[test]
    fn deserializes_svm_payment_payload() {
        let payload: PaymentPayload = serde_json::from_value(json!({
            "x402Version": 1,
            "scheme": "exact",
            "network": "solana-devnet",
            "payload": { "transaction": "AQIDBA==" }
        }))
        .unwrap();
        match payload.payload {
            ExactPaymentPayload::Svm(svm) => assert_eq!(svm.transaction, "AQIDBA=="),
            ExactPaymentPayload::Evm(_) => panic!("expected SVM payload"),
        }
    }

    #[test]
    fn rejects_unsupported_version() {
        let mut body = evm_payload_json();
        body["x402Version"] = json!(2);
        assert!(serde_json::from_value::<PaymentPayload>(body).is_err());
    }

    #[test]
    fn rejects_malformed_signature() {
        for bad in [
            "0xgg".to_string(),
            "abcdef".to_string(),
            format!("0x{}", "ab".repeat(10)),
        ] {
            let result = serde_json::from_value::<EvmSignature>(json!(bad));
            assert!(result.is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn accepts_long_wrapped_signature() {
        let sig: EvmSignature =
            serde_json::from_value(json!(format!("0x{}", "cd".repeat(200)))).unwrap();
        assert_eq!(sig.0.len(), 200);
    }

    #[test]
    fn token_amount_bounds() {
        let max = U256::MAX.to_string();
        let amount: TokenAmount = serde_json::from_value(json!(max)).unwrap();
        assert_eq!(amount.0, U256::MAX);

        let too_big = format!("{max}0");
        assert!(serde_json::from_value::<TokenAmount>(json!(too_big)).is_err());
        assert!(serde_json::from_value::<TokenAmount>(json!("-5")).is_err());
        assert!(serde_json::from_value::<TokenAmount>(json!("1.5")).is_err());
    }

    #[test]
    fn mixed_address_accepts_both_families() {
        let evm: MixedAddress =
            serde_json::from_value(json!("0x857b06519E91e3A54538791bDbb0E22373e36b66")).unwrap();
        let _: alloy_primitives::Address = evm.try_into().unwrap();

        let svm: MixedAddress =
            serde_json::from_value(json!("EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v")).unwrap();
        let _: solana_pubkey::Pubkey = svm.try_into().unwrap();

        assert!(serde_json::from_value::<MixedAddress>(json!("not-an-address")).is_err());
    }

    #[test]
    fn error_reasons_serialize_to_wire_names() {
        assert_eq!(
            ErrorReason::InvalidExactEvmPayloadAuthorizationValidBefore.to_string(),
            "invalid_exact_evm_payload_authorization_valid_before"
        );
        assert_eq!(
            ErrorReason::InvalidX402Version.to_string(),
            "invalid_x402_version"
        );
        assert_eq!(
            ErrorReason::SettleExactSvmTransactionConfirmationTimedOut.to_string(),
            "settle_exact_svm_transaction_confirmation_timed_out"
        );
        assert_eq!(ErrorReason::AllWalletsBusy.to_string(), "all_wallets_busy");
    }

    #[test]
    fn transaction_hash_formats() {
        let evm = TransactionHash::Evm([0x11; 32]);
        assert_eq!(
            serde_json::to_value(&evm).unwrap(),
            json!(format!("0x{}", "11".repeat(32)))
        );
        let svm = TransactionHash::Svm("5VERv8NMvzbJMEkV8xnrLkEaWRtSz9CosKDYjCJjBRnbJLgp8uirBgmQpjKhoR4tjF3ZpRzrFmBV6UjKdiSZkQUW".into());
        let round: TransactionHash =
            serde_json::from_value(serde_json::to_value(&svm).unwrap()).unwrap();
        assert_eq!(round, svm);
    }
}
