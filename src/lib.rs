//! x402 payment facilitator.
//!
//! This crate verifies and settles exact-amount x402 payments across two
//! blockchain families: EVM chains (ERC-3009 `transferWithAuthorization`
//! under EIP-712 signatures, with ERC-6492 unwrap) and SVM chains
//! (base64-serialized SPL token transfer transactions). Clients sign
//! payment payloads off-line; sellers relay them here; the facilitator
//! decides whether a payload meets the declared requirements and submits
//! it on-chain.
//!
//! # Modules
//!
//! - [`chain`] — EVM and SVM providers: verification and settlement flows.
//! - [`config`] — Environment-driven configuration.
//! - [`discovery`] — Resource catalog fed by successful settlements.
//! - [`facilitator`] — The [`Facilitator`](facilitator::Facilitator) trait.
//! - [`facilitator_local`] — The routing facade over per-network providers.
//! - [`handlers`] — HTTP endpoint handlers (verify, settle, supported, discovery).
//! - [`network`] — Supported networks and known token deployments.
//! - [`nonce`] — Per-wallet transaction nonce registry.
//! - [`provider_cache`] — Network → provider map built from configuration.
//! - [`scheduler`] — Gas-balance and wallet-health background loops.
//! - [`sig_down`] — SIGTERM/SIGINT handling.
//! - [`telemetry`] — Tracing and OpenTelemetry setup.
//! - [`timestamp`] — Unix timestamp type for authorization windows.
//! - [`types`] — Protocol wire types and the failure-reason taxonomy.
//! - [`wallet_pool`] — The multi-wallet EVM signing pool.

pub mod chain;
pub mod config;
pub mod discovery;
pub mod facilitator;
pub mod facilitator_local;
pub mod handlers;
pub mod network;
pub mod nonce;
pub mod provider_cache;
pub mod scheduler;
pub mod sig_down;
pub mod telemetry;
pub mod timestamp;
pub mod types;
pub mod wallet_pool;
