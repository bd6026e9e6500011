//! SVM chain support for x402 payments.
//!
//! Verification decodes the base64 payload into a `VersionedTransaction`,
//! introspects its instruction sequence (an optional compute-budget prefix,
//! an optional recipient-ATA creation, and exactly one SPL `TransferChecked`
//! last), substitutes the facilitator as fee payer, signs, and simulates.
//! Settlement submits the signed transaction and polls for confirmation.
//!
//! Invariants:
//! - The fee payer pays SOL fees but never moves token funds.
//! - Verification only simulates; nothing is broadcast.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Serialize;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::{RpcSendTransactionConfig, RpcSimulateTransactionConfig};
use solana_commitment_config::CommitmentConfig;
use solana_keypair::Keypair;
use solana_message::VersionedMessage;
use solana_pubkey::{Pubkey, pubkey};
use solana_signature::Signature;
use solana_signer::Signer;
use solana_transaction::versioned::VersionedTransaction;
use spl_token::solana_program::program_pack::Pack;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::instrument;
use tracing_core::Level;

use crate::chain::{FacilitatorLocalError, NetworkProviderOps};
use crate::facilitator::Facilitator;
use crate::network::{Network, NetworkFamily};
use crate::types::{
    ExactPaymentPayload, MixedAddress, PaymentPayload, PaymentRequirements, Scheme, SettleRequest,
    SettleResponse, SupportedPaymentKind, SupportedPaymentKindsResponse, TransactionHash,
    VerifyRequest, VerifyResponse, X402Version,
};
/// The Associated Token Account program.
const ATA_PROGRAM_PUBKEY: Pubkey = pubkey!("ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL");

/// Ceiling of the SVM confirmation polling budget, seconds.
const MAX_CONFIRM_WAIT_SECS: u64 = 60;

/// `extra` payload of a supported-kind entry, naming the fee payer clients
/// must place in the fee-payer slot.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SupportedPaymentKindExtra {
    fee_payer: String,
}

/// SVM implementation of the x402 facilitator.
///
/// Holds the fee-payer keypair and a nonblocking RPC client. SVM settlement
/// does not use the wallet pool: a single fee-payer identity signs.
pub struct SolanaProvider {
    network: Network,
    keypair: Arc<Keypair>,
    rpc_client: Arc<RpcClient>,
    max_compute_unit_limit: u32,
    max_compute_unit_price: u64,
    min_fee_payer_balance: u64,
}

impl std::fmt::Debug for SolanaProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SolanaProvider")
            .field("pubkey", &self.keypair.pubkey())
            .field("network", &self.network)
            .field("rpc_url", &self.rpc_client.url())
            .finish()
    }
}

impl SolanaProvider {
    pub fn new(
        keypair: Keypair,
        rpc_url: String,
        network: Network,
        max_compute_unit_limit: u32,
        max_compute_unit_price: u64,
        min_fee_payer_balance: u64,
    ) -> Result<Self, FacilitatorLocalError> {
        if network.family() != NetworkFamily::Svm {
            return Err(FacilitatorLocalError::UnsupportedNetwork(None, network));
        }
        tracing::info!(
            network = %network,
            rpc = rpc_url,
            fee_payer = %keypair.pubkey(),
            max_compute_unit_limit,
            max_compute_unit_price,
            "Using SVM provider"
        );
        Ok(Self {
            network,
            keypair: Arc::new(keypair),
            rpc_client: Arc::new(RpcClient::new(rpc_url)),
            max_compute_unit_limit,
            max_compute_unit_price,
            min_fee_payer_balance,
        })
    }

    pub fn fee_payer(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    /// Read the fee payer's lamport balance and publish it as a gauge.
    pub async fn refresh_gas_balances(&self) {
        let fee_payer = self.fee_payer();
        match self.rpc_client.get_balance(&fee_payer).await {
            Ok(lamports) => {
                let sol = lamports as f64 / 1e9;
                tracing::info!(
                    gauge.facilitator_fee_payer_balance = sol,
                    network = %self.network,
                    wallet = %fee_payer,
                    "fee payer balance"
                );
                if lamports < self.min_fee_payer_balance {
                    tracing::warn!(
                        network = %self.network,
                        wallet = %fee_payer,
                        lamports,
                        "fee payer balance below threshold"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(network = %self.network, wallet = %fee_payer, error = %e, "fee payer balance read failed");
            }
        }
    }

    /// Decode, introspect, fee-payer-substitute, sign, and simulate a payment.
    #[instrument(skip_all, err, fields(network = %self.network))]
    async fn verify_transfer(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<SvmVerification, FacilitatorLocalError> {
        let svm_payload = match &payload.payload {
            ExactPaymentPayload::Svm(payload) => payload,
            ExactPaymentPayload::Evm(evm) => {
                return Err(FacilitatorLocalError::SchemeMismatch(Some(
                    evm.authorization.from.into(),
                )));
            }
        };
        if payload.scheme != requirements.scheme {
            return Err(FacilitatorLocalError::SchemeMismatch(None));
        }
        if payload.network != self.network {
            return Err(FacilitatorLocalError::NetworkMismatch(
                None,
                self.network,
                payload.network,
            ));
        }
        if requirements.network != self.network {
            return Err(FacilitatorLocalError::NetworkMismatch(
                None,
                self.network,
                requirements.network,
            ));
        }

        let bytes = BASE64
            .decode(svm_payload.transaction.as_bytes())
            .map_err(|e| FacilitatorLocalError::SvmTransaction(format!("base64: {e}")))?;
        let mut transaction = bincode::deserialize::<VersionedTransaction>(bytes.as_slice())
            .map_err(|e| FacilitatorLocalError::SvmTransaction(format!("deserialize: {e}")))?;

        let requirement = SvmTransferRequirement::try_from(requirements)?;
        let fee_payer = self.fee_payer();
        let transfer = introspect_transaction(
            &transaction,
            &requirement,
            &fee_payer,
            self.max_compute_unit_limit,
            self.max_compute_unit_price,
        )?;
        self.assert_accounts(&transfer).await?;

        substitute_fee_payer(&mut transaction, fee_payer)?;
        let transaction = self.sign(transaction)?;

        let simulation = self
            .rpc_client
            .simulate_transaction_with_config(
                &transaction,
                RpcSimulateTransactionConfig {
                    sig_verify: false,
                    replace_recent_blockhash: true,
                    commitment: Some(CommitmentConfig::confirmed()),
                    ..RpcSimulateTransactionConfig::default()
                },
            )
            .await
            .map_err(|e| FacilitatorLocalError::RpcFailure(None, e.to_string()))?;
        if let Some(err) = simulation.value.err {
            return Err(FacilitatorLocalError::SvmSimulationFailed(format!(
                "{err:?}"
            )));
        }

        let payer = first_non_fee_payer_signer(&transaction, &fee_payer)
            .unwrap_or(transfer.authority);
        Ok(SvmVerification { payer, transaction })
    }

    /// Chain-side account checks: the mint's on-chain decimals must match
    /// the instruction, and the sender's token account must exist.
    async fn assert_accounts(
        &self,
        transfer: &TransferCheckedInstruction,
    ) -> Result<(), FacilitatorLocalError> {
        let accounts = self
            .rpc_client
            .get_multiple_accounts(&[transfer.mint, transfer.source])
            .await
            .map_err(|e| FacilitatorLocalError::RpcFailure(None, e.to_string()))?;
        let mint_account: solana_account::Account = accounts
            .first()
            .cloned()
            .flatten()
            .ok_or_else(|| FacilitatorLocalError::SvmTransaction("mint account not found".into()))?;
        let decimals = if mint_account.owner == spl_token::id() {
            spl_token::state::Mint::unpack(&mint_account.data)
                .map_err(|e| FacilitatorLocalError::SvmTransaction(format!("mint unpack: {e}")))?
                .decimals
        } else if mint_account.owner == spl_token_2022::id() {
            spl_token_2022::extension::StateWithExtensions::<spl_token_2022::state::Mint>::unpack(
                &mint_account.data,
            )
            .map_err(|e| FacilitatorLocalError::SvmTransaction(format!("mint unpack: {e}")))?
            .base
            .decimals
        } else {
            return Err(FacilitatorLocalError::SvmTransaction(
                "mint has unknown owner program".into(),
            ));
        };
        if decimals != transfer.decimals {
            return Err(FacilitatorLocalError::SvmTransaction(format!(
                "decimals mismatch: instruction {}, mint {decimals}",
                transfer.decimals
            )));
        }
        let sender_missing = accounts.get(1).cloned().is_none_or(|a| a.is_none());
        if sender_missing {
            return Err(FacilitatorLocalError::SvmTransaction(
                "sender token account not found".into(),
            ));
        }
        Ok(())
    }

    /// Sign the transaction as fee payer, placing the signature in the
    /// matching required-signer slot.
    fn sign(
        &self,
        mut tx: VersionedTransaction,
    ) -> Result<VersionedTransaction, FacilitatorLocalError> {
        let msg_bytes = tx.message.serialize();
        let signature = self
            .keypair
            .try_sign_message(msg_bytes.as_slice())
            .map_err(|e| FacilitatorLocalError::Unexpected(None, format!("signing failed: {e}")))?;
        let num_required = tx.message.header().num_required_signatures as usize;
        let static_keys = tx.message.static_account_keys();
        let pos = static_keys[..num_required.min(static_keys.len())]
            .iter()
            .position(|k| *k == self.fee_payer())
            .ok_or_else(|| {
                FacilitatorLocalError::SvmTransaction(
                    "fee payer is not a required signer".into(),
                )
            })?;
        if tx.signatures.len() < num_required {
            tx.signatures.resize(num_required, Signature::default());
        }
        tx.signatures[pos] = signature;
        Ok(tx)
    }

    /// Submit a signed transaction, skipping preflight (already simulated).
    async fn send(
        &self,
        tx: &VersionedTransaction,
    ) -> Result<Signature, FacilitatorLocalError> {
        self.rpc_client
            .send_transaction_with_config(
                tx,
                RpcSendTransactionConfig {
                    skip_preflight: true,
                    ..RpcSendTransactionConfig::default()
                },
            )
            .await
            .map_err(|e| FacilitatorLocalError::RpcFailure(None, e.to_string()))
    }

    /// Poll for confirmation until the wait budget runs out or the
    /// transaction's blockhash expires.
    async fn confirm(
        &self,
        signature: &Signature,
        blockhash: &solana_message::Hash,
        payer: MixedAddress,
        wait_budget: Duration,
    ) -> Result<(), FacilitatorLocalError> {
        let deadline = Instant::now() + wait_budget;
        loop {
            match self
                .rpc_client
                .confirm_transaction_with_commitment(signature, CommitmentConfig::confirmed())
                .await
            {
                Ok(response) if response.value => return Ok(()),
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(error = %e, "confirmation poll failed, retrying");
                }
            }
            if Instant::now() >= deadline {
                return Err(FacilitatorLocalError::SvmConfirmationTimedOut(payer));
            }
            if let Ok(valid) = self
                .rpc_client
                .is_blockhash_valid(blockhash, CommitmentConfig::processed())
                .await
                && !valid
            {
                return Err(FacilitatorLocalError::SvmBlockHeightExceeded(payer));
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }
}

impl NetworkProviderOps for SolanaProvider {
    fn signer_address(&self) -> MixedAddress {
        self.fee_payer().into()
    }

    fn network(&self) -> Network {
        self.network
    }
}

impl Facilitator for SolanaProvider {
    type Error = FacilitatorLocalError;

    /// Verify an SVM payment by introspection and simulation.
    #[instrument(skip_all, err, fields(network = %self.network))]
    async fn verify(&self, request: &VerifyRequest) -> Result<VerifyResponse, Self::Error> {
        let verification = self
            .verify_transfer(&request.payment_payload, &request.payment_requirements)
            .await?;
        Ok(VerifyResponse::valid(verification.payer.into()))
    }

    /// Settle a verified SVM payment: submit the fee-payer-signed
    /// transaction and poll for confirmation.
    #[instrument(skip_all, err, fields(network = %self.network))]
    async fn settle(&self, request: &SettleRequest) -> Result<SettleResponse, Self::Error> {
        let verification = self
            .verify_transfer(&request.payment_payload, &request.payment_requirements)
            .await?;
        let payer: MixedAddress = verification.payer.into();
        let transaction = verification.transaction;
        if !is_fully_signed(&transaction) {
            tracing::event!(Level::WARN, status = "failed", "undersigned transaction");
            return Err(FacilitatorLocalError::Unexpected(
                Some(payer),
                "transaction is not fully signed after fee-payer signature".into(),
            ));
        }

        let blockhash = *transaction.message.recent_blockhash();
        let signature = self.send(&transaction).await?;
        let wait_budget = confirm_wait_budget(request.payment_requirements.max_timeout_seconds);
        self.confirm(&signature, &blockhash, payer.clone(), wait_budget)
            .await?;

        tracing::event!(Level::INFO, status = "ok", tx = %signature, "SPL transfer settled");
        Ok(SettleResponse {
            success: true,
            error_reason: None,
            payer,
            transaction: Some(TransactionHash::Svm(signature.to_string())),
            network: self.network,
        })
    }

    /// Report payment kinds supported by this provider, tagged with the
    /// fee payer clients must use.
    async fn supported(&self) -> Result<SupportedPaymentKindsResponse, Self::Error> {
        let extra = serde_json::to_value(SupportedPaymentKindExtra {
            fee_payer: self.fee_payer().to_string(),
        })
        .ok();
        let kinds = vec![SupportedPaymentKind {
            network: self.network,
            x402_version: X402Version::V1,
            scheme: Scheme::Exact,
            extra,
        }];
        Ok(SupportedPaymentKindsResponse { kinds })
    }
}

/// Confirmation polling budget, clamped to a safety ceiling.
fn confirm_wait_budget(max_timeout_seconds: u64) -> Duration {
    let secs = if max_timeout_seconds == 0 {
        MAX_CONFIRM_WAIT_SECS
    } else {
        max_timeout_seconds.min(MAX_CONFIRM_WAIT_SECS)
    };
    Duration::from_secs(secs)
}

/// Outcome of SVM verification: the established payer and the transaction
/// signed by the facilitator fee payer.
pub struct SvmVerification {
    pub payer: Pubkey,
    pub transaction: VersionedTransaction,
}

/// The transfer a seller's requirements demand, in SVM terms.
pub(crate) struct SvmTransferRequirement {
    pub pay_to: Pubkey,
    pub mint: Pubkey,
    pub amount: u64,
}

impl TryFrom<&PaymentRequirements> for SvmTransferRequirement {
    type Error = FacilitatorLocalError;

    fn try_from(requirements: &PaymentRequirements) -> Result<Self, Self::Error> {
        let pay_to: Pubkey = requirements
            .pay_to
            .clone()
            .try_into()
            .map_err(|e| FacilitatorLocalError::InvalidAddress(None, format!("{e}")))?;
        let mint: Pubkey = requirements
            .asset
            .clone()
            .try_into()
            .map_err(|e| FacilitatorLocalError::InvalidAddress(None, format!("{e}")))?;
        let amount: u64 = u64::try_from(requirements.max_amount_required.0).map_err(|_| {
            FacilitatorLocalError::InvalidPaymentRequirements(
                "maxAmountRequired exceeds u64 for an SPL token".into(),
            )
        })?;
        Ok(SvmTransferRequirement {
            pay_to,
            mint,
            amount,
        })
    }
}

/// A decoded SPL `TransferChecked` with resolved account keys.
#[derive(Debug)]
pub struct TransferCheckedInstruction {
    pub amount: u64,
    pub decimals: u8,
    pub source: Pubkey,
    pub mint: Pubkey,
    pub destination: Pubkey,
    pub authority: Pubkey,
    pub token_program: Pubkey,
}

fn account_key(
    tx: &VersionedTransaction,
    instruction_index: usize,
    account_position: usize,
) -> Result<Pubkey, FacilitatorLocalError> {
    let instruction = tx
        .message
        .instructions()
        .get(instruction_index)
        .ok_or_else(|| FacilitatorLocalError::SvmInstructions("instruction index out of range".into()))?;
    let key_index = instruction
        .accounts
        .get(account_position)
        .copied()
        .ok_or_else(|| FacilitatorLocalError::SvmInstructions("account index out of range".into()))?;
    tx.message
        .static_account_keys()
        .get(key_index as usize)
        .copied()
        .ok_or_else(|| FacilitatorLocalError::SvmInstructions("account key out of range".into()))
}

fn program_id(
    tx: &VersionedTransaction,
    instruction_index: usize,
) -> Result<Pubkey, FacilitatorLocalError> {
    let instruction = tx
        .message
        .instructions()
        .get(instruction_index)
        .ok_or_else(|| FacilitatorLocalError::SvmInstructions("instruction index out of range".into()))?;
    tx.message
        .static_account_keys()
        .get(instruction.program_id_index as usize)
        .copied()
        .ok_or_else(|| FacilitatorLocalError::SvmInstructions("program id out of range".into()))
}

fn is_compute_budget_instruction(
    tx: &VersionedTransaction,
    instruction_index: usize,
    discriminator: u8,
) -> bool {
    let Ok(program) = program_id(tx, instruction_index) else {
        return false;
    };
    if program != solana_compute_budget_interface::ID {
        return false;
    }
    tx.message.instructions()[instruction_index]
        .data
        .first()
        .copied()
        == Some(discriminator)
}

fn parse_compute_unit_limit(
    tx: &VersionedTransaction,
    instruction_index: usize,
) -> Result<u32, FacilitatorLocalError> {
    let data = tx.message.instructions()[instruction_index].data.as_slice();
    // 1-byte discriminator + u32 little-endian
    if data.len() != 5 {
        return Err(FacilitatorLocalError::SvmInstructions(
            "malformed SetComputeUnitLimit".into(),
        ));
    }
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&data[1..5]);
    Ok(u32::from_le_bytes(buf))
}

fn parse_compute_unit_price(
    tx: &VersionedTransaction,
    instruction_index: usize,
) -> Result<u64, FacilitatorLocalError> {
    let data = tx.message.instructions()[instruction_index].data.as_slice();
    // 1-byte discriminator + u64 little-endian
    if data.len() != 9 {
        return Err(FacilitatorLocalError::SvmInstructions(
            "malformed SetComputeUnitPrice".into(),
        ));
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&data[1..9]);
    Ok(u64::from_le_bytes(buf))
}

/// Validate an Associated-Token-Account creation for the required recipient.
fn verify_create_ata_instruction(
    tx: &VersionedTransaction,
    instruction_index: usize,
    requirement: &SvmTransferRequirement,
) -> Result<(), FacilitatorLocalError> {
    let instruction = &tx.message.instructions()[instruction_index];
    let data = instruction.data.as_slice();
    // Create = 0, CreateIdempotent = 1
    if data.is_empty() || (data[0] != 0 && data[0] != 1) {
        return Err(FacilitatorLocalError::SvmInstructions(
            "unexpected ATA instruction discriminator".into(),
        ));
    }
    if instruction.accounts.len() < 6 {
        return Err(FacilitatorLocalError::SvmInstructions(
            "ATA creation with too few accounts".into(),
        ));
    }
    // Accounts: payer, ata, owner, mint, system program, token program.
    let owner = account_key(tx, instruction_index, 2)?;
    let mint = account_key(tx, instruction_index, 3)?;
    if owner != requirement.pay_to {
        return Err(FacilitatorLocalError::SvmTransaction(
            "ATA created for the wrong owner".into(),
        ));
    }
    if mint != requirement.mint {
        return Err(FacilitatorLocalError::SvmTransaction(
            "ATA created for the wrong mint".into(),
        ));
    }
    Ok(())
}

/// Decode the SPL `TransferChecked` at `instruction_index`.
fn decode_transfer_checked(
    tx: &VersionedTransaction,
    instruction_index: usize,
) -> Result<TransferCheckedInstruction, FacilitatorLocalError> {
    let program = program_id(tx, instruction_index)?;
    let data = tx.message.instructions()[instruction_index].data.as_slice();
    let (amount, decimals) = if program == spl_token::ID {
        match spl_token::instruction::TokenInstruction::unpack(data) {
            Ok(spl_token::instruction::TokenInstruction::TransferChecked { amount, decimals }) => {
                (amount, decimals)
            }
            _ => {
                return Err(FacilitatorLocalError::SvmInstructions(
                    "last instruction is not TransferChecked".into(),
                ));
            }
        }
    } else if program == spl_token_2022::ID {
        match spl_token_2022::instruction::TokenInstruction::unpack(data) {
            Ok(spl_token_2022::instruction::TokenInstruction::TransferChecked {
                amount,
                decimals,
            }) => (amount, decimals),
            _ => {
                return Err(FacilitatorLocalError::SvmInstructions(
                    "last instruction is not TransferChecked".into(),
                ));
            }
        }
    } else {
        return Err(FacilitatorLocalError::SvmInstructions(
            "last instruction is not an SPL token instruction".into(),
        ));
    };
    Ok(TransferCheckedInstruction {
        amount,
        decimals,
        source: account_key(tx, instruction_index, 0)?,
        mint: account_key(tx, instruction_index, 1)?,
        destination: account_key(tx, instruction_index, 2)?,
        authority: account_key(tx, instruction_index, 3)?,
        token_program: program,
    })
}

/// Structural validation of the payment transaction.
///
/// The instruction sequence must be a prefix of
/// `[SetComputeUnitLimit?, SetComputeUnitPrice?, CreateAta?, TransferChecked]`
/// with exactly one `TransferChecked`, last. All transfer parameters are
/// checked against the seller's requirements.
pub(crate) fn introspect_transaction(
    tx: &VersionedTransaction,
    requirement: &SvmTransferRequirement,
    fee_payer: &Pubkey,
    max_compute_unit_limit: u32,
    max_compute_unit_price: u64,
) -> Result<TransferCheckedInstruction, FacilitatorLocalError> {
    let instructions = tx.message.instructions();
    if instructions.is_empty() || instructions.len() > 4 {
        return Err(FacilitatorLocalError::SvmInstructions(format!(
            "unexpected instruction count: {}",
            instructions.len()
        )));
    }
    let last = instructions.len() - 1;
    let mut index = 0usize;
    if index < last && is_compute_budget_instruction(tx, index, 2) {
        let units = parse_compute_unit_limit(tx, index)?;
        if units > max_compute_unit_limit {
            return Err(FacilitatorLocalError::SvmInstructions(format!(
                "compute unit limit {units} exceeds facilitator maximum"
            )));
        }
        index += 1;
    }
    if index < last && is_compute_budget_instruction(tx, index, 3) {
        let price = parse_compute_unit_price(tx, index)?;
        if price > max_compute_unit_price {
            return Err(FacilitatorLocalError::SvmInstructions(format!(
                "compute unit price {price} exceeds facilitator maximum"
            )));
        }
        index += 1;
    }
    if index < last && program_id(tx, index)? == ATA_PROGRAM_PUBKEY {
        verify_create_ata_instruction(tx, index, requirement)?;
        index += 1;
    }
    if index != last {
        return Err(FacilitatorLocalError::SvmInstructions(
            "unexpected instruction sequence".into(),
        ));
    }
    let transfer = decode_transfer_checked(tx, last)?;

    // The fee payer must never hold any role in the instructions.
    for (i, instruction) in instructions.iter().enumerate() {
        for position in 0..instruction.accounts.len() {
            if account_key(tx, i, position)? == *fee_payer {
                return Err(FacilitatorLocalError::SvmTransaction(
                    "fee payer referenced by instruction accounts".into(),
                ));
            }
        }
    }
    if transfer.authority == *fee_payer {
        return Err(FacilitatorLocalError::SvmTransaction(
            "fee payer must not transfer funds".into(),
        ));
    }

    if transfer.mint != requirement.mint {
        return Err(FacilitatorLocalError::SvmTransaction(
            "transfer mint does not match requirements asset".into(),
        ));
    }
    let (expected_ata, _) = Pubkey::find_program_address(
        &[
            requirement.pay_to.as_ref(),
            transfer.token_program.as_ref(),
            requirement.mint.as_ref(),
        ],
        &ATA_PROGRAM_PUBKEY,
    );
    if transfer.destination != expected_ata {
        return Err(FacilitatorLocalError::SvmTransaction(
            "transfer destination is not the recipient's token account".into(),
        ));
    }
    if transfer.amount < requirement.amount {
        return Err(FacilitatorLocalError::SvmAmountMismatch(format!(
            "transfer amount {} below required {}",
            transfer.amount, requirement.amount
        )));
    }
    Ok(transfer)
}

/// Replace the fee-payer slot (the first account key) with the facilitator
/// identity when the client left a different placeholder there.
fn substitute_fee_payer(
    tx: &mut VersionedTransaction,
    fee_payer: Pubkey,
) -> Result<(), FacilitatorLocalError> {
    let keys = match &mut tx.message {
        VersionedMessage::Legacy(message) => &mut message.account_keys,
        VersionedMessage::V0(message) => &mut message.account_keys,
    };
    let slot = keys
        .first_mut()
        .ok_or_else(|| FacilitatorLocalError::SvmTransaction("empty account keys".into()))?;
    if *slot != fee_payer {
        tracing::debug!(placeholder = %slot, fee_payer = %fee_payer, "substituting fee payer");
        *slot = fee_payer;
    }
    Ok(())
}

/// First required signer that is not the fee payer.
fn first_non_fee_payer_signer(
    tx: &VersionedTransaction,
    fee_payer: &Pubkey,
) -> Option<Pubkey> {
    let num_required = tx.message.header().num_required_signatures as usize;
    let static_keys = tx.message.static_account_keys();
    static_keys[..num_required.min(static_keys.len())]
        .iter()
        .find(|key| *key != fee_payer)
        .copied()
}

fn is_fully_signed(tx: &VersionedTransaction) -> bool {
    let num_required = tx.message.header().num_required_signatures as usize;
    if tx.signatures.len() < num_required {
        return false;
    }
    let default = Signature::default();
    tx.signatures.iter().all(|signature| *signature != default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_message::compiled_instruction::CompiledInstruction;
    use solana_message::{Hash, MessageHeader};

    const SYSTEM_PROGRAM: Pubkey = pubkey!("11111111111111111111111111111111");

    struct Scenario {
        fee_payer: Pubkey,
        user: Pubkey,
        pay_to: Pubkey,
        mint: Pubkey,
        source_ata: Pubkey,
        dest_ata: Pubkey,
    }

    impl Scenario {
        fn new() -> Self {
            let fee_payer = Pubkey::new_unique();
            let user = Pubkey::new_unique();
            let pay_to = Pubkey::new_unique();
            let mint = Pubkey::new_unique();
            let source_ata = Pubkey::new_unique();
            let (dest_ata, _) = Pubkey::find_program_address(
                &[pay_to.as_ref(), spl_token::ID.as_ref(), mint.as_ref()],
                &ATA_PROGRAM_PUBKEY,
            );
            Scenario {
                fee_payer,
                user,
                pay_to,
                mint,
                source_ata,
                dest_ata,
            }
        }

        fn requirement(&self, amount: u64) -> SvmTransferRequirement {
            SvmTransferRequirement {
                pay_to: self.pay_to,
                mint: self.mint,
                amount,
            }
        }

        // Account key layout used by every test transaction:
        // 0 fee payer, 1 user, 2 source ata, 3 dest ata, 4 mint, 5 pay_to,
        // 6 spl-token, 7 compute budget, 8 ata program, 9 system program.
        fn keys(&self) -> Vec<Pubkey> {
            vec![
                self.fee_payer,
                self.user,
                self.source_ata,
                self.dest_ata,
                self.mint,
                self.pay_to,
                spl_token::ID,
                solana_compute_budget_interface::ID,
                ATA_PROGRAM_PUBKEY,
                SYSTEM_PROGRAM,
            ]
        }

        fn compute_limit_ix(&self, units: u32) -> CompiledInstruction {
            let mut data = vec![2u8];
            data.extend_from_slice(&units.to_le_bytes());
            CompiledInstruction {
                program_id_index: 7,
                accounts: vec![],
                data,
            }
        }

        fn compute_price_ix(&self, micro_lamports: u64) -> CompiledInstruction {
            let mut data = vec![3u8];
            data.extend_from_slice(&micro_lamports.to_le_bytes());
            CompiledInstruction {
                program_id_index: 7,
                accounts: vec![],
                data,
            }
        }

        fn create_ata_ix(&self) -> CompiledInstruction {
            CompiledInstruction {
                program_id_index: 8,
                // payer, ata, owner, mint, system program, token program
                accounts: vec![1, 3, 5, 4, 9, 6],
                data: vec![1],
            }
        }

        fn transfer_ix(&self, amount: u64, decimals: u8) -> CompiledInstruction {
            let data = spl_token::instruction::TokenInstruction::TransferChecked {
                amount,
                decimals,
            }
            .pack();
            CompiledInstruction {
                program_id_index: 6,
                // source, mint, destination, authority
                accounts: vec![2, 4, 3, 1],
                data,
            }
        }

        fn transaction(&self, instructions: Vec<CompiledInstruction>) -> VersionedTransaction {
            let header = MessageHeader {
                num_required_signatures: 2,
                num_readonly_signed_accounts: 0,
                num_readonly_unsigned_accounts: 6,
            };
            let message = solana_message::legacy::Message {
                header,
                account_keys: self.keys(),
                recent_blockhash: Hash::default(),
                instructions,
            };
            VersionedTransaction {
                signatures: vec![Signature::default(); 2],
                message: VersionedMessage::Legacy(message),
            }
        }
    }

    fn introspect(
        scenario: &Scenario,
        tx: &VersionedTransaction,
        required: u64,
    ) -> Result<TransferCheckedInstruction, FacilitatorLocalError> {
        introspect_transaction(
            tx,
            &scenario.requirement(required),
            &scenario.fee_payer,
            400_000,
            1_000_000,
        )
    }

    #[test]
    fn accepts_full_instruction_shape() {
        let s = Scenario::new();
        let tx = s.transaction(vec![
            s.compute_limit_ix(200_000),
            s.compute_price_ix(1_000),
            s.create_ata_ix(),
            s.transfer_ix(1_000_000, 6),
        ]);
        let transfer = introspect(&s, &tx, 1_000_000).unwrap();
        assert_eq!(transfer.amount, 1_000_000);
        assert_eq!(transfer.authority, s.user);
        assert_eq!(transfer.destination, s.dest_ata);
    }

    #[test]
    fn accepts_bare_transfer() {
        let s = Scenario::new();
        let tx = s.transaction(vec![s.transfer_ix(5, 6)]);
        assert!(introspect(&s, &tx, 5).is_ok());
    }

    #[test]
    fn accepts_prefixes_of_the_shape() {
        let s = Scenario::new();
        for instructions in [
            vec![s.compute_limit_ix(100_000), s.transfer_ix(5, 6)],
            vec![s.compute_price_ix(10), s.transfer_ix(5, 6)],
            vec![s.create_ata_ix(), s.transfer_ix(5, 6)],
            vec![
                s.compute_limit_ix(100_000),
                s.compute_price_ix(10),
                s.transfer_ix(5, 6),
            ],
        ] {
            let tx = s.transaction(instructions);
            assert!(introspect(&s, &tx, 5).is_ok());
        }
    }

    #[test]
    fn rejects_out_of_order_prefix() {
        let s = Scenario::new();
        // Price before limit is not a prefix of the canonical sequence.
        let tx = s.transaction(vec![
            s.compute_price_ix(10),
            s.compute_limit_ix(100_000),
            s.transfer_ix(5, 6),
        ]);
        assert!(matches!(
            introspect(&s, &tx, 5),
            Err(FacilitatorLocalError::SvmInstructions(_))
        ));
    }

    #[test]
    fn rejects_transfer_not_last() {
        let s = Scenario::new();
        let tx = s.transaction(vec![s.transfer_ix(5, 6), s.compute_limit_ix(100_000)]);
        assert!(matches!(
            introspect(&s, &tx, 5),
            Err(FacilitatorLocalError::SvmInstructions(_))
        ));
    }

    #[test]
    fn rejects_double_transfer() {
        let s = Scenario::new();
        let tx = s.transaction(vec![s.transfer_ix(5, 6), s.transfer_ix(5, 6)]);
        assert!(matches!(
            introspect(&s, &tx, 5),
            Err(FacilitatorLocalError::SvmInstructions(_))
        ));
    }

    #[test]
    fn rejects_compute_limit_above_facilitator_maximum() {
        let s = Scenario::new();
        let tx = s.transaction(vec![s.compute_limit_ix(10_000_000), s.transfer_ix(5, 6)]);
        assert!(matches!(
            introspect(&s, &tx, 5),
            Err(FacilitatorLocalError::SvmInstructions(_))
        ));
    }

    #[test]
    fn rejects_wrong_mint() {
        let s = Scenario::new();
        let mut requirement = s.requirement(5);
        requirement.mint = Pubkey::new_unique();
        let tx = s.transaction(vec![s.transfer_ix(5, 6)]);
        let result =
            introspect_transaction(&tx, &requirement, &s.fee_payer, 400_000, 1_000_000);
        assert!(matches!(
            result,
            Err(FacilitatorLocalError::SvmTransaction(_))
        ));
    }

    #[test]
    fn rejects_destination_that_is_not_recipient_ata() {
        let s = Scenario::new();
        let mut requirement = s.requirement(5);
        // Same mint, different recipient: the destination ATA no longer derives.
        requirement.pay_to = Pubkey::new_unique();
        let tx = s.transaction(vec![s.transfer_ix(5, 6)]);
        let result =
            introspect_transaction(&tx, &requirement, &s.fee_payer, 400_000, 1_000_000);
        assert!(matches!(
            result,
            Err(FacilitatorLocalError::SvmTransaction(_))
        ));
    }

    #[test]
    fn rejects_insufficient_amount() {
        let s = Scenario::new();
        let tx = s.transaction(vec![s.transfer_ix(999, 6)]);
        assert!(matches!(
            introspect(&s, &tx, 1_000),
            Err(FacilitatorLocalError::SvmAmountMismatch(_))
        ));
        // Overpaying is acceptable.
        let tx = s.transaction(vec![s.transfer_ix(1_001, 6)]);
        assert!(introspect(&s, &tx, 1_000).is_ok());
    }

    #[test]
    fn rejects_fee_payer_as_authority() {
        let s = Scenario::new();
        let mut transfer = s.transfer_ix(5, 6);
        // Point the authority at the fee payer (key 0).
        transfer.accounts = vec![2, 4, 3, 0];
        let tx = s.transaction(vec![transfer]);
        assert!(matches!(
            introspect(&s, &tx, 5),
            Err(FacilitatorLocalError::SvmTransaction(_))
        ));
    }

    #[test]
    fn rejects_ata_creation_for_wrong_owner() {
        let s = Scenario::new();
        let mut create = s.create_ata_ix();
        // Owner slot points at the user instead of the recipient.
        create.accounts = vec![1, 3, 1, 4, 9, 6];
        let tx = s.transaction(vec![create, s.transfer_ix(5, 6)]);
        assert!(matches!(
            introspect(&s, &tx, 5),
            Err(FacilitatorLocalError::SvmTransaction(_))
        ));
    }

    #[test]
    fn substitutes_placeholder_fee_payer() {
        let s = Scenario::new();
        let mut tx = s.transaction(vec![s.transfer_ix(5, 6)]);
        let facilitator = Pubkey::new_unique();
        substitute_fee_payer(&mut tx, facilitator).unwrap();
        assert_eq!(tx.message.static_account_keys()[0], facilitator);
        // Idempotent when the slot already matches.
        substitute_fee_payer(&mut tx, facilitator).unwrap();
        assert_eq!(tx.message.static_account_keys()[0], facilitator);
    }

    #[test]
    fn finds_first_non_fee_payer_signer() {
        let s = Scenario::new();
        let tx = s.transaction(vec![s.transfer_ix(5, 6)]);
        assert_eq!(
            first_non_fee_payer_signer(&tx, &s.fee_payer),
            Some(s.user)
        );
    }

    #[test]
    fn fully_signed_requires_every_required_signature() {
        let s = Scenario::new();
        let mut tx = s.transaction(vec![s.transfer_ix(5, 6)]);
        assert!(!is_fully_signed(&tx));
        tx.signatures = vec![Signature::from([1u8; 64]), Signature::from([2u8; 64])];
        assert!(is_fully_signed(&tx));
    }

    #[test]
    fn confirm_wait_budget_is_clamped() {
        assert_eq!(confirm_wait_budget(0), Duration::from_secs(60));
        assert_eq!(confirm_wait_budget(30), Duration::from_secs(30));
        assert_eq!(confirm_wait_budget(600), Duration::from_secs(60));
    }
}
