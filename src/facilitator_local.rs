//! Reference facilitator: routes payments to chain providers and feeds the
//! discovery registry.
//!
//! The facade owns the provider cache and dispatches each request by the
//! payload's `(scheme, network)` pair. Settlement success opportunistically
//! registers the seller's resource with the discovery registry on a
//! detached task; discovery failures never propagate.

use std::sync::Arc;
use tracing::instrument;

use crate::chain::FacilitatorLocalError;
use crate::config::Config;
use crate::discovery::DiscoveryRegistry;
use crate::facilitator::Facilitator;
use crate::provider_cache::ProviderCache;
use crate::types::{
    ExactPaymentPayload, MixedAddress, SettleRequest, SettleResponse,
    SupportedPaymentKindsResponse, VerifyRequest, VerifyResponse,
};

/// A concrete [`Facilitator`] that verifies and settles x402 payments
/// using per-network providers.
pub struct FacilitatorLocal {
    providers: Arc<ProviderCache>,
    discovery: Arc<DiscoveryRegistry>,
    config: Arc<Config>,
}

impl FacilitatorLocal {
    pub fn new(
        providers: Arc<ProviderCache>,
        discovery: Arc<DiscoveryRegistry>,
        config: Arc<Config>,
    ) -> Self {
        FacilitatorLocal {
            providers,
            discovery,
            config,
        }
    }

    pub fn discovery(&self) -> Arc<DiscoveryRegistry> {
        Arc::clone(&self.discovery)
    }

    /// The payer a failure response should name, as far as the payload tells.
    fn payer_of(request: &VerifyRequest) -> Option<MixedAddress> {
        match &request.payment_payload.payload {
            ExactPaymentPayload::Evm(evm) => Some(evm.authorization.from.into()),
            ExactPaymentPayload::Svm(_) => None,
        }
    }
}

impl Facilitator for FacilitatorLocal {
    type Error = FacilitatorLocalError;

    /// Verify a payment payload against its requirements.
    ///
    /// Routing failures (no provider for the network) are structured
    /// errors, not panics; the transport renders them as domain responses.
    #[instrument(skip_all, err, fields(network = %request.payment_payload.network))]
    async fn verify(&self, request: &VerifyRequest) -> Result<VerifyResponse, Self::Error> {
        let network = request.payment_payload.network;
        let provider = self.providers.by_network(network).ok_or_else(|| {
            FacilitatorLocalError::UnsupportedNetwork(Self::payer_of(request), network)
        })?;
        provider.verify(request).await
    }

    /// Settle a payment on-chain.
    ///
    /// The allow-list gates settlement before any chain work. On success the
    /// requirements are handed to the discovery registry without blocking
    /// the response.
    #[instrument(skip_all, err, fields(network = %request.payment_payload.network))]
    async fn settle(&self, request: &SettleRequest) -> Result<SettleResponse, Self::Error> {
        let network = request.payment_payload.network;
        if !self.config.network_allowed(network) {
            return Err(FacilitatorLocalError::NetworkNotAllowed(network));
        }
        let provider = self.providers.by_network(network).ok_or_else(|| {
            FacilitatorLocalError::UnsupportedNetwork(Self::payer_of(request), network)
        })?;
        let response = provider.settle(request).await?;
        if response.success {
            let discovery = Arc::clone(&self.discovery);
            let requirements = request.payment_requirements.clone();
            tokio::spawn(async move {
                if let Err(e) = discovery.register(&requirements).await {
                    tracing::warn!(
                        resource = %requirements.resource,
                        error = %e,
                        "discovery registration failed"
                    );
                }
            });
        }
        Ok(response)
    }

    /// Enumerate supported payment kinds across all configured providers.
    async fn supported(&self) -> Result<SupportedPaymentKindsResponse, Self::Error> {
        let mut kinds = Vec::new();
        for network in self.providers.networks() {
            if let Some(provider) = self.providers.by_network(network) {
                let supported = provider.supported().await?;
                kinds.extend(supported.kinds);
            }
        }
        Ok(SupportedPaymentKindsResponse { kinds })
    }
}
