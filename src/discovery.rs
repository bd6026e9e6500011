//! Discovery registry: a catalog of merchant resources observed through
//! successful settlements.
//!
//! Registration is opportunistic and never fatal to settlement. Records are
//! upserted with a debounce window, filtered by a TTL at query time, and
//! guarded by URL safety rules in both directions (write and read).
//!
//! Persistence is behind the [`ResourceStore`] trait; the registry itself is
//! stateless. When no store is configured, registration is a no-op and
//! listings are empty pages.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use url::{Host, Url};
use uuid::Uuid;

use crate::timestamp::UnixTimestamp;
use crate::types::{PaymentRequirements, X402Version};

/// Days a record stays listable after its last update.
const TTL_DAYS: u64 = 7;
/// Debounce window for repeated registrations of an unchanged offer.
const DEBOUNCE_SECS: u64 = 24 * 60 * 60;
/// Days a soft-deleted record lingers before cleanup purges it.
const PURGE_AFTER_DAYS: u64 = 30;

const DEFAULT_PAGE_LIMIT: usize = 100;
const MAX_PAGE_LIMIT: usize = 1000;

/// A catalogued merchant resource and the payment offers it accepts.
///
/// The accepts list is keyed by the `(payTo, asset, network)` triple: an
/// upsert replaces the matching entry and appends new triples.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryResource {
    pub id: Uuid,
    /// Unique key of the record.
    pub resource: Url,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub x402_version: X402Version,
    pub accepts: Vec<PaymentRequirements>,
    pub last_updated: UnixTimestamp,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<UnixTimestamp>,
}

impl DiscoveryResource {
    /// Listable iff not soft-deleted and fresh within the TTL.
    fn visible_at(&self, now: UnixTimestamp) -> bool {
        self.deleted_at.is_none() && self.last_updated >= now - TTL_DAYS * 24 * 60 * 60
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ResourceStoreError {
    #[error("resource store failure: {0}")]
    Backend(String),
}

/// CRUD over the keyed discovery record set.
///
/// The registry relies on the store's transactional semantics for
/// `register`; implementations back onto a database in production and onto
/// a map in tests.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn find_by_resource(
        &self,
        resource: &Url,
    ) -> Result<Option<DiscoveryResource>, ResourceStoreError>;

    async fn upsert(&self, resource: DiscoveryResource) -> Result<(), ResourceStoreError>;

    async fn list(&self) -> Result<Vec<DiscoveryResource>, ResourceStoreError>;

    /// Remove soft-deleted records whose deletion is older than `cutoff`.
    async fn purge_deleted_before(
        &self,
        cutoff: UnixTimestamp,
    ) -> Result<u64, ResourceStoreError>;
}

/// Map-backed [`ResourceStore`], keyed by resource URL.
#[derive(Debug, Default)]
pub struct InMemoryResourceStore {
    records: DashMap<Url, DiscoveryResource>,
}

impl InMemoryResourceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResourceStore for InMemoryResourceStore {
    async fn find_by_resource(
        &self,
        resource: &Url,
    ) -> Result<Option<DiscoveryResource>, ResourceStoreError> {
        Ok(self.records.get(resource).map(|entry| entry.clone()))
    }

    async fn upsert(&self, resource: DiscoveryResource) -> Result<(), ResourceStoreError> {
        self.records.insert(resource.resource.clone(), resource);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<DiscoveryResource>, ResourceStoreError> {
        Ok(self
            .records
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn purge_deleted_before(
        &self,
        cutoff: UnixTimestamp,
    ) -> Result<u64, ResourceStoreError> {
        let before = self.records.len();
        self.records
            .retain(|_, record| !matches!(record.deleted_at, Some(deleted) if deleted < cutoff));
        Ok((before - self.records.len()) as u64)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error(transparent)]
    Store(#[from] ResourceStoreError),
    #[error(transparent)]
    UnsafeUrl(#[from] UrlSafetyError),
    #[error("Can not get system clock")]
    Clock,
}

/// Filters of a discovery listing request.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryListFilters {
    pub resource_type: Option<String>,
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pagination {
    pub limit: usize,
    pub offset: usize,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct DiscoveryPage {
    pub items: Vec<DiscoveryResource>,
    pub pagination: Pagination,
}

/// The resource catalog, stateless over an optional [`ResourceStore`].
#[derive(Clone)]
pub struct DiscoveryRegistry {
    store: Option<Arc<dyn ResourceStore>>,
    allow_localhost: bool,
}

impl DiscoveryRegistry {
    pub fn new(store: Option<Arc<dyn ResourceStore>>, allow_localhost: bool) -> Self {
        DiscoveryRegistry {
            store,
            allow_localhost,
        }
    }

    /// Record the requirements of a successfully settled payment.
    ///
    /// Applies URL safety, then inserts or debounce-upserts the record.
    /// Without a configured store this is a no-op.
    pub async fn register(
        &self,
        requirements: &PaymentRequirements,
    ) -> Result<(), DiscoveryError> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        assert_safe_resource(&requirements.resource, self.allow_localhost)?;
        let now = UnixTimestamp::try_now().map_err(|_| DiscoveryError::Clock)?;

        let existing = store.find_by_resource(&requirements.resource).await?;
        let Some(mut record) = existing else {
            let record = DiscoveryResource {
                id: Uuid::new_v4(),
                resource: requirements.resource.clone(),
                resource_type: "http".to_string(),
                x402_version: X402Version::V1,
                accepts: vec![requirements.clone()],
                last_updated: now,
                metadata: serde_json::Map::new(),
                deleted_at: None,
            };
            store.upsert(record).await?;
            tracing::debug!(resource = %requirements.resource, "discovery resource registered");
            return Ok(());
        };

        let matching = record.accepts.iter().position(|accept| {
            accept.pay_to == requirements.pay_to
                && accept.asset == requirements.asset
                && accept.network == requirements.network
        });
        let needs_update = match matching {
            None => true,
            Some(index) => {
                let accept = &record.accepts[index];
                let critical_changed = accept.max_amount_required
                    != requirements.max_amount_required
                    || accept.scheme != requirements.scheme;
                critical_changed || record.last_updated < now - DEBOUNCE_SECS
            }
        };
        if !needs_update {
            return Ok(());
        }
        match matching {
            Some(index) => record.accepts[index] = requirements.clone(),
            None => record.accepts.push(requirements.clone()),
        }
        record.last_updated = now;
        record.deleted_at = None;
        store.upsert(record).await?;
        tracing::debug!(resource = %requirements.resource, "discovery resource updated");
        Ok(())
    }

    /// List visible resources, newest first.
    pub async fn list(
        &self,
        filters: DiscoveryListFilters,
    ) -> Result<DiscoveryPage, DiscoveryError> {
        let limit = filters.limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT);
        let offset = filters.offset.unwrap_or(0);
        let Some(store) = &self.store else {
            return Ok(DiscoveryPage {
                items: Vec::new(),
                pagination: Pagination {
                    limit,
                    offset,
                    total: 0,
                },
            });
        };
        let now = UnixTimestamp::try_now().map_err(|_| DiscoveryError::Clock)?;
        let mut items: Vec<DiscoveryResource> = store
            .list()
            .await?
            .into_iter()
            .filter(|record| record.visible_at(now))
            .filter(|record| {
                filters
                    .resource_type
                    .as_ref()
                    .is_none_or(|wanted| record.resource_type == *wanted)
            })
            .filter(|record| {
                filters.metadata.as_ref().is_none_or(|wanted| {
                    wanted
                        .iter()
                        .all(|(key, value)| record.metadata.get(key) == Some(value))
                })
            })
            // Records written before a policy change stay out of listings.
            .filter(|record| assert_safe_resource(&record.resource, self.allow_localhost).is_ok())
            .collect();
        items.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
        let total = items.len();
        let items = items.into_iter().skip(offset).take(limit).collect();
        Ok(DiscoveryPage {
            items,
            pagination: Pagination {
                limit,
                offset,
                total,
            },
        })
    }

    /// Purge records soft-deleted more than thirty days ago.
    pub async fn cleanup(&self) -> Result<u64, DiscoveryError> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        let now = UnixTimestamp::try_now().map_err(|_| DiscoveryError::Clock)?;
        let cutoff = now - PURGE_AFTER_DAYS * 24 * 60 * 60;
        let purged = store.purge_deleted_before(cutoff).await?;
        if purged > 0 {
            tracing::info!(purged, "discovery cleanup removed records");
        }
        Ok(purged)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UrlSafetyError {
    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),
    #[error("private or local host not allowed: {0}")]
    PrivateHost(String),
    #[error("plain HTTP to a public host: {0}")]
    InsecureTransport(String),
}

fn is_private_ipv4(address: Ipv4Addr) -> bool {
    address.is_loopback()
        || address.is_private()
        || address.is_link_local()
        || address.is_unspecified()
}

fn is_private_ipv6(address: Ipv6Addr) -> bool {
    address.is_loopback() || address.is_unspecified()
}

fn is_private_host(host: &Host<&str>) -> bool {
    match host {
        Host::Domain(domain) => {
            let domain = domain.to_ascii_lowercase();
            domain == "localhost" || domain.ends_with(".localhost")
        }
        Host::Ipv4(address) => is_private_ipv4(*address),
        Host::Ipv6(address) => is_private_ipv6(*address),
    }
}

/// Validate a resource URL against the registry's safety policy.
///
/// Production mode requires HTTPS and rejects loopback, RFC1918, and
/// link-local hosts outright. Allow-localhost mode permits HTTP for those
/// ranges only; public hosts must still use HTTPS.
pub fn assert_safe_resource(url: &Url, allow_localhost: bool) -> Result<(), UrlSafetyError> {
    let scheme = url.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(UrlSafetyError::UnsupportedScheme(scheme.to_string()));
    }
    let Some(host) = url.host() else {
        return Err(UrlSafetyError::PrivateHost("<no host>".to_string()));
    };
    if is_private_host(&host) {
        if allow_localhost {
            Ok(())
        } else {
            Err(UrlSafetyError::PrivateHost(host.to_string()))
        }
    } else if scheme == "https" {
        Ok(())
    } else {
        Err(UrlSafetyError::InsecureTransport(url.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Network;
    use crate::types::{MixedAddress, Scheme, TokenAmount};

    fn requirements(resource: &str, pay_to: &str, amount: u64) -> PaymentRequirements {
        PaymentRequirements {
            scheme: Scheme::Exact,
            network: Network::BaseSepolia,
            max_amount_required: TokenAmount::from(amount),
            resource: Url::parse(resource).unwrap(),
            description: "premium weather data".to_string(),
            mime_type: "application/json".to_string(),
            output_schema: None,
            pay_to: MixedAddress(pay_to.to_string()),
            max_timeout_seconds: 60,
            asset: MixedAddress("0x036CbD53842c5426634e7929541eC2318f3dCF7e".to_string()),
            extra: None,
        }
    }

    fn registry() -> (DiscoveryRegistry, Arc<InMemoryResourceStore>) {
        let store = Arc::new(InMemoryResourceStore::new());
        let registry = DiscoveryRegistry::new(Some(store.clone()), false);
        (registry, store)
    }

    #[tokio::test]
    async fn registers_new_resource() {
        let (registry, store) = registry();
        let requirements = requirements("https://api.example.com/data", "0xA1", 100);
        registry.register(&requirements).await.unwrap();

        let record = store
            .find_by_resource(&requirements.resource)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.resource_type, "http");
        assert_eq!(record.accepts.len(), 1);
        assert!(record.deleted_at.is_none());
    }

    #[tokio::test]
    async fn identical_registration_is_debounced() {
        let (registry, store) = registry();
        let requirements = requirements("https://api.example.com/data", "0xA1", 100);
        registry.register(&requirements).await.unwrap();
        let first = store
            .find_by_resource(&requirements.resource)
            .await
            .unwrap()
            .unwrap();

        registry.register(&requirements).await.unwrap();
        let second = store
            .find_by_resource(&requirements.resource)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.last_updated, second.last_updated);
        assert_eq!(second.accepts.len(), 1);
    }

    #[tokio::test]
    async fn changed_amount_bypasses_debounce() {
        let (registry, store) = registry();
        let original = requirements("https://api.example.com/data", "0xA1", 100);
        registry.register(&original).await.unwrap();

        let repriced = requirements("https://api.example.com/data", "0xA1", 250);
        registry.register(&repriced).await.unwrap();

        let record = store
            .find_by_resource(&original.resource)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.accepts.len(), 1);
        assert_eq!(record.accepts[0].max_amount_required, TokenAmount::from(250));
    }

    #[tokio::test]
    async fn new_pay_to_appends_an_accept_entry() {
        let (registry, store) = registry();
        let first = requirements("https://api.example.com/data", "0xA1", 100);
        registry.register(&first).await.unwrap();

        let second = requirements("https://api.example.com/data", "0xB2", 100);
        registry.register(&second).await.unwrap();

        let record = store
            .find_by_resource(&first.resource)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.accepts.len(), 2);
    }

    #[tokio::test]
    async fn listing_hides_stale_and_deleted_records() {
        let (registry, store) = registry();
        let fresh = requirements("https://fresh.example.com/a", "0xA1", 100);
        registry.register(&fresh).await.unwrap();

        let now = UnixTimestamp::try_now().unwrap();
        let stale = DiscoveryResource {
            id: Uuid::new_v4(),
            resource: Url::parse("https://stale.example.com/b").unwrap(),
            resource_type: "http".to_string(),
            x402_version: X402Version::V1,
            accepts: vec![requirements("https://stale.example.com/b", "0xA1", 5)],
            last_updated: now - (TTL_DAYS * 24 * 60 * 60 + 10),
            metadata: serde_json::Map::new(),
            deleted_at: None,
        };
        store.upsert(stale).await.unwrap();
        let deleted = DiscoveryResource {
            id: Uuid::new_v4(),
            resource: Url::parse("https://deleted.example.com/c").unwrap(),
            resource_type: "http".to_string(),
            x402_version: X402Version::V1,
            accepts: vec![requirements("https://deleted.example.com/c", "0xA1", 5)],
            last_updated: now,
            metadata: serde_json::Map::new(),
            deleted_at: Some(now - 10),
        };
        store.upsert(deleted).await.unwrap();

        let page = registry.list(DiscoveryListFilters::default()).await.unwrap();
        assert_eq!(page.pagination.total, 1);
        assert_eq!(page.items[0].resource.as_str(), "https://fresh.example.com/a");
    }

    #[tokio::test]
    async fn listing_clamps_pagination() {
        let (registry, _) = registry();
        for i in 0..5 {
            let requirements =
                requirements(&format!("https://api.example.com/r{i}"), "0xA1", 100);
            registry.register(&requirements).await.unwrap();
        }
        let page = registry
            .list(DiscoveryListFilters {
                limit: Some(0),
                ..DiscoveryListFilters::default()
            })
            .await
            .unwrap();
        assert_eq!(page.pagination.limit, 1);
        assert_eq!(page.items.len(), 1);

        let page = registry
            .list(DiscoveryListFilters {
                limit: Some(5000),
                offset: Some(2),
                ..DiscoveryListFilters::default()
            })
            .await
            .unwrap();
        assert_eq!(page.pagination.limit, MAX_PAGE_LIMIT);
        assert_eq!(page.items.len(), 3);
        assert_eq!(page.pagination.total, 5);
    }

    #[tokio::test]
    async fn metadata_filter_matches_by_key_equality() {
        let (registry, store) = registry();
        let requirements = requirements("https://api.example.com/data", "0xA1", 100);
        registry.register(&requirements).await.unwrap();
        let mut record = store
            .find_by_resource(&requirements.resource)
            .await
            .unwrap()
            .unwrap();
        record
            .metadata
            .insert("category".to_string(), serde_json::json!("weather"));
        store.upsert(record).await.unwrap();

        let mut wanted = serde_json::Map::new();
        wanted.insert("category".to_string(), serde_json::json!("weather"));
        let page = registry
            .list(DiscoveryListFilters {
                metadata: Some(wanted),
                ..DiscoveryListFilters::default()
            })
            .await
            .unwrap();
        assert_eq!(page.pagination.total, 1);

        let mut wanted = serde_json::Map::new();
        wanted.insert("category".to_string(), serde_json::json!("finance"));
        let page = registry
            .list(DiscoveryListFilters {
                metadata: Some(wanted),
                ..DiscoveryListFilters::default()
            })
            .await
            .unwrap();
        assert_eq!(page.pagination.total, 0);
    }

    #[tokio::test]
    async fn cleanup_purges_old_deletions() {
        let (registry, store) = registry();
        let now = UnixTimestamp::try_now().unwrap();
        let old = DiscoveryResource {
            id: Uuid::new_v4(),
            resource: Url::parse("https://old.example.com/x").unwrap(),
            resource_type: "http".to_string(),
            x402_version: X402Version::V1,
            accepts: vec![],
            last_updated: now,
            metadata: serde_json::Map::new(),
            deleted_at: Some(now - (PURGE_AFTER_DAYS * 24 * 60 * 60 + 100)),
        };
        let recent = DiscoveryResource {
            id: Uuid::new_v4(),
            resource: Url::parse("https://recent.example.com/y").unwrap(),
            deleted_at: Some(now - 100),
            ..old.clone()
        };
        store.upsert(old).await.unwrap();
        store.upsert(recent).await.unwrap();

        let purged = registry.cleanup().await.unwrap();
        assert_eq!(purged, 1);
        assert!(
            store
                .find_by_resource(&Url::parse("https://recent.example.com/y").unwrap())
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn registry_without_store_is_a_no_op() {
        let registry = DiscoveryRegistry::new(None, false);
        let requirements = requirements("https://api.example.com/data", "0xA1", 100);
        registry.register(&requirements).await.unwrap();
        let page = registry.list(DiscoveryListFilters::default()).await.unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.pagination.total, 0);
    }

    #[test]
    fn url_safety_production_mode() {
        let cases = [
            ("https://api.example.com/data", true),
            ("http://api.example.com/data", false),
            ("https://localhost/data", false),
            ("http://127.0.0.1/data", false),
            ("https://10.1.2.3/data", false),
            ("http://172.16.5.5/data", false),
            ("https://192.168.0.1/data", false),
            ("http://169.254.1.1/data", false),
            ("http://0.0.0.0/data", false),
            ("https://[::1]/data", false),
            ("ftp://api.example.com/data", false),
        ];
        for (url, expected_ok) in cases {
            let result = assert_safe_resource(&Url::parse(url).unwrap(), false);
            assert_eq!(result.is_ok(), expected_ok, "{url}");
        }
    }

    #[test]
    fn url_safety_allow_localhost_mode() {
        let cases = [
            ("https://api.example.com/data", true),
            ("http://api.example.com/data", false),
            ("http://localhost:3000/data", true),
            ("http://127.0.0.1:8080/data", true),
            ("http://192.168.0.10/data", true),
            ("https://[::1]/data", true),
        ];
        for (url, expected_ok) in cases {
            let result = assert_safe_resource(&Url::parse(url).unwrap(), true);
            assert_eq!(result.is_ok(), expected_ok, "{url}");
        }
    }
}
