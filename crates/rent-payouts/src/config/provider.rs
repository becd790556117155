use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::payout::PayoutConfig;
use super::service::{ServiceConfig, ServiceConfigPatch};
use crate::clock::Clock;
use crate::error::PayoutError;

/// Service id holding the payout tunables in its `settings` object.
pub const PAYOUT_SETTINGS_ID: &str = "payout";

/// Persistence behind the configuration cache.
#[async_trait]
pub trait ServiceConfigStore: Send + Sync {
    async fn load_all(&self) -> Result<Vec<ServiceConfig>, ConfigStoreError>;
    async fn save(&self, config: ServiceConfig) -> Result<(), ConfigStoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigStoreError {
    #[error("configuration store unavailable: {0}")]
    Unavailable(String),
}

impl From<ConfigStoreError> for PayoutError {
    fn from(value: ConfigStoreError) -> Self {
        PayoutError::database("config.store", value.to_string())
    }
}

#[derive(Default)]
struct ConfigCache {
    data: HashMap<String, ServiceConfig>,
    last_refreshed: Option<DateTime<Utc>>,
}

impl ConfigCache {
    fn is_stale(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        match self.last_refreshed {
            Some(refreshed) => now - refreshed >= ttl,
            None => true,
        }
    }
}

/// Read-mostly cache over the service configuration store.
///
/// Reads go through [`ConfigProvider::refresh_if_stale`], so values may be up to one TTL old.
pub struct ConfigProvider {
    store: Arc<dyn ServiceConfigStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    cache: RwLock<ConfigCache>,
}

impl ConfigProvider {
    pub fn new(
        store: Arc<dyn ServiceConfigStore>,
        clock: Arc<dyn Clock>,
        ttl: std::time::Duration,
    ) -> Self {
        let ttl = Duration::from_std(ttl).unwrap_or_else(|_| Duration::minutes(5));
        Self {
            store,
            clock,
            ttl,
            cache: RwLock::new(ConfigCache::default()),
        }
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    /// Reload from the store when the cached snapshot has outlived the TTL.
    ///
    /// Returns whether a reload happened. A failed reload keeps serving the previous
    /// snapshot when one exists.
    pub async fn refresh_if_stale(&self) -> Result<bool, PayoutError> {
        let now = self.clock.now();
        if !self.cache.read().await.is_stale(now, self.ttl) {
            return Ok(false);
        }

        let mut cache = self.cache.write().await;
        if !cache.is_stale(now, self.ttl) {
            return Ok(false);
        }

        match self.store.load_all().await {
            Ok(configs) => {
                cache.data = configs
                    .into_iter()
                    .map(|config| (config.service_id.clone(), config))
                    .collect();
                cache.last_refreshed = Some(now);
                debug!(services = cache.data.len(), "service configuration refreshed");
                Ok(true)
            }
            Err(err) if cache.last_refreshed.is_some() => {
                warn!(error = %err, "config refresh failed, serving stale snapshot");
                Ok(false)
            }
            Err(err) => Err(PayoutError::database("config.refresh", err.to_string())),
        }
    }

    /// Force the next read to go back to the store.
    pub async fn invalidate(&self) {
        self.cache.write().await.last_refreshed = None;
    }

    pub async fn get_service_config(
        &self,
        service_id: &str,
    ) -> Result<Option<ServiceConfig>, PayoutError> {
        self.refresh_if_stale().await?;
        Ok(self.cache.read().await.data.get(service_id).cloned())
    }

    /// Enabled services sorted by id.
    pub async fn get_all_active_configs(&self) -> Result<Vec<ServiceConfig>, PayoutError> {
        self.refresh_if_stale().await?;
        let cache = self.cache.read().await;
        let mut active: Vec<ServiceConfig> = cache
            .data
            .values()
            .filter(|config| config.enabled)
            .cloned()
            .collect();
        active.sort_by(|a, b| a.service_id.cmp(&b.service_id));
        Ok(active)
    }

    pub async fn update_service_config(
        &self,
        service_id: &str,
        patch: ServiceConfigPatch,
    ) -> Result<ServiceConfig, PayoutError> {
        self.refresh_if_stale().await?;
        let mut cache = self.cache.write().await;
        let mut updated = cache
            .data
            .get(service_id)
            .cloned()
            .ok_or_else(|| PayoutError::NotFound {
                entity: "service config",
                id: service_id.to_string(),
            })?;

        updated.apply(patch, self.clock.now());
        self.store
            .save(updated.clone())
            .await
            .map_err(|err| PayoutError::database("config.update", err.to_string()))?;
        cache.data.insert(service_id.to_string(), updated.clone());

        info!(service = service_id, enabled = updated.enabled, "service configuration updated");
        Ok(updated)
    }

    pub async fn toggle_service(
        &self,
        service_id: &str,
        enabled: bool,
    ) -> Result<ServiceConfig, PayoutError> {
        self.update_service_config(
            service_id,
            ServiceConfigPatch {
                enabled: Some(enabled),
                ..ServiceConfigPatch::default()
            },
        )
        .await
    }

    /// Whether the stored credentials cover what the integration needs.
    pub async fn validate_credentials(&self, service_id: &str) -> Result<bool, PayoutError> {
        Ok(self
            .get_service_config(service_id)
            .await?
            .is_some_and(|config| config.has_required_credentials()))
    }

    /// Payout tunables: defaults overlaid with the `payout` service settings.
    pub async fn payout_config(&self) -> Result<PayoutConfig, PayoutError> {
        match self.get_service_config(PAYOUT_SETTINGS_ID).await? {
            Some(config) => PayoutConfig::from_settings(&config.settings)
                .map_err(|message| PayoutError::Validation(format!("payout configuration: {message}"))),
            None => Ok(PayoutConfig::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::ServiceKind;
    use crate::payouts::memory::InMemoryConfigStore;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 2, 9, 0, 0).unwrap()
    }

    fn provider(store: Arc<InMemoryConfigStore>, clock: Arc<ManualClock>) -> ConfigProvider {
        ConfigProvider::new(store, clock, std::time::Duration::from_secs(300))
    }

    #[tokio::test]
    async fn serves_cached_values_until_ttl_expires() {
        let store = Arc::new(InMemoryConfigStore::default());
        let clock = Arc::new(ManualClock::new(start()));
        store.put(ServiceConfig::new("webpay", "WebPay", ServiceKind::PaymentGateway));
        let provider = provider(store.clone(), clock.clone());

        assert!(provider.get_service_config("webpay").await.unwrap().is_some());
        assert_eq!(store.load_count(), 1);

        store.put(ServiceConfig::new("stripe", "Stripe", ServiceKind::PaymentGateway));
        clock.advance(Duration::minutes(4));
        assert!(provider.get_service_config("stripe").await.unwrap().is_none());
        assert_eq!(store.load_count(), 1);

        clock.advance(Duration::minutes(1));
        assert!(provider.get_service_config("stripe").await.unwrap().is_some());
        assert_eq!(store.load_count(), 2);
    }

    #[tokio::test]
    async fn invalidate_forces_reload() {
        let store = Arc::new(InMemoryConfigStore::default());
        let clock = Arc::new(ManualClock::new(start()));
        let provider = provider(store.clone(), clock);

        assert!(provider.refresh_if_stale().await.unwrap());
        assert!(!provider.refresh_if_stale().await.unwrap());
        provider.invalidate().await;
        assert!(provider.refresh_if_stale().await.unwrap());
        assert_eq!(store.load_count(), 2);
    }

    #[tokio::test]
    async fn stale_snapshot_survives_store_outage() {
        let store = Arc::new(InMemoryConfigStore::default());
        let clock = Arc::new(ManualClock::new(start()));
        store.put(ServiceConfig::new("webpay", "WebPay", ServiceKind::PaymentGateway));
        let provider = provider(store.clone(), clock.clone());
        provider.refresh_if_stale().await.unwrap();

        store.set_available(false);
        clock.advance(Duration::minutes(10));
        let config = provider.get_service_config("webpay").await.unwrap();
        assert!(config.is_some());
    }

    #[tokio::test]
    async fn first_load_failure_is_a_database_error() {
        let store = Arc::new(InMemoryConfigStore::default());
        store.set_available(false);
        let provider = provider(store, Arc::new(ManualClock::new(start())));
        let err = provider.get_all_active_configs().await.unwrap_err();
        assert_eq!(err.error_code(), "DATABASE_ERROR");
    }

    #[tokio::test]
    async fn update_persists_and_refreshes_cache() {
        let store = Arc::new(InMemoryConfigStore::default());
        let clock = Arc::new(ManualClock::new(start()));
        store.put(ServiceConfig::new("paypal", "PayPal", ServiceKind::Wallet));
        let provider = provider(store.clone(), clock);

        let updated = provider.toggle_service("paypal", false).await.unwrap();
        assert!(!updated.enabled);
        assert_eq!(updated.updated_at, start());
        assert!(provider.get_all_active_configs().await.unwrap().is_empty());
        assert!(!store.get("paypal").unwrap().enabled);

        let missing = provider
            .update_service_config("khipu", ServiceConfigPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(missing, PayoutError::NotFound { .. }));
    }

    #[tokio::test]
    async fn payout_config_overlays_settings() {
        let store = Arc::new(InMemoryConfigStore::default());
        let mut settings = ServiceConfig::new(PAYOUT_SETTINGS_ID, "Payouts", ServiceKind::Internal);
        settings.settings = json!({ "maximum_daily_payout": "2500000", "require_kyc": false });
        store.put(settings);
        let provider = provider(store, Arc::new(ManualClock::new(start())));

        let config = provider.payout_config().await.unwrap();
        assert_eq!(config.maximum_daily_payout, dec!(2500000));
        assert!(!config.require_kyc);
        assert_eq!(config.minimum_payout, dec!(50000));
    }
}
