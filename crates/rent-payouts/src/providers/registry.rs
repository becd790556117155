use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::accounts::BankAccountInfo;
use super::banco_estado::BancoEstadoProvider;
use super::capability::{
    BankTransactionResult, ProviderCapability, ProviderError, ProviderId, TransferRequest,
    VerificationResult,
};
use super::paypal::PaypalProvider;
use super::stripe::StripeProvider;
use super::webpay::WebpayProvider;
use crate::clock::Clock;
use crate::config::ConfigProvider;
use crate::error::{BusinessRule, PayoutError};
use crate::telemetry;

/// Builds the integration for a provider the first time the registry needs it.
pub trait ProviderFactory: Send + Sync {
    fn create(&self, provider: ProviderId) -> Arc<dyn ProviderCapability>;
}

/// Production factory: HTTP adapters sharing one connection pool and config cache.
pub struct HttpProviderFactory {
    client: Client,
    config: Arc<ConfigProvider>,
}

impl HttpProviderFactory {
    pub fn new(client: Client, config: Arc<ConfigProvider>) -> Self {
        Self { client, config }
    }
}

impl ProviderFactory for HttpProviderFactory {
    fn create(&self, provider: ProviderId) -> Arc<dyn ProviderCapability> {
        let client = self.client.clone();
        let config = self.config.clone();
        match provider {
            ProviderId::Webpay => Arc::new(WebpayProvider::new(client, config)),
            ProviderId::BancoEstado => Arc::new(BancoEstadoProvider::new(client, config)),
            ProviderId::Paypal => Arc::new(PaypalProvider::new(client, config)),
            ProviderId::Stripe => Arc::new(StripeProvider::new(client, config)),
        }
    }
}

/// When a provider's track record disqualifies it from routing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RouterPolicy {
    pub min_success_rate: f64,
    /// Attempts needed before the success rate is trusted.
    pub min_attempts: u64,
}

impl Default for RouterPolicy {
    fn default() -> Self {
        Self {
            min_success_rate: 0.5,
            min_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct StatsCell {
    attempts: u64,
    successes: u64,
    failures: u64,
    last_error: Option<String>,
    last_used: Option<DateTime<Utc>>,
}

impl StatsCell {
    fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.successes as f64 / self.attempts as f64
        }
    }
}

/// Routing history for one provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderStats {
    pub provider: ProviderId,
    pub name: &'static str,
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub success_rate: f64,
    pub last_error: Option<String>,
    pub last_used: Option<DateTime<Utc>>,
}

/// One provider's answer during [`ProviderRegistry::verify_account_multi`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationAttempt {
    pub provider: ProviderId,
    pub is_valid: bool,
    pub confidence: f64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MultiVerification {
    pub account_id: String,
    /// Highest-confidence positive answer, if any provider gave one.
    pub best: Option<VerificationResult>,
    pub attempts: Vec<VerificationAttempt>,
}

impl MultiVerification {
    pub fn is_verified(&self) -> bool {
        self.best.is_some()
    }
}

/// Resolves integrations by bank code and routes transfers across them.
///
/// Integrations are created lazily, exactly once per provider, and live as long as the
/// registry so that OAuth sessions are shared between callers.
pub struct ProviderRegistry {
    factory: Arc<dyn ProviderFactory>,
    integrations: DashMap<ProviderId, Arc<dyn ProviderCapability>>,
    stats: DashMap<ProviderId, StatsCell>,
    default_provider: ProviderId,
    policy: RouterPolicy,
    clock: Arc<dyn Clock>,
}

impl ProviderRegistry {
    pub fn new(
        factory: Arc<dyn ProviderFactory>,
        default_provider: ProviderId,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            factory,
            integrations: DashMap::new(),
            stats: DashMap::new(),
            default_provider,
            policy: RouterPolicy::default(),
            clock,
        }
    }

    pub fn with_policy(mut self, policy: RouterPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn default_provider(&self) -> ProviderId {
        self.default_provider
    }

    pub fn resolve(bank_code: &str) -> Result<ProviderId, PayoutError> {
        ProviderId::from_bank_code(bank_code).ok_or_else(|| {
            PayoutError::business(
                BusinessRule::ProviderNotSupported,
                format!("no payment integration for bank code '{bank_code}'"),
            )
        })
    }

    pub fn get_integration(&self, bank_code: &str) -> Result<Arc<dyn ProviderCapability>, PayoutError> {
        Ok(self.integration(Self::resolve(bank_code)?))
    }

    fn integration(&self, provider: ProviderId) -> Arc<dyn ProviderCapability> {
        if let Some(existing) = self.integrations.get(&provider) {
            return existing.value().clone();
        }
        self.integrations
            .entry(provider)
            .or_insert_with(|| {
                debug!(provider = provider.id(), "creating payment integration");
                self.factory.create(provider)
            })
            .value()
            .clone()
    }

    fn candidates(&self, request: &TransferRequest) -> Vec<ProviderId> {
        let mut ordered = Vec::with_capacity(3);
        let codes = [request.to.bank_code.as_str(), request.from.bank_code.as_str()];
        for provider in codes
            .into_iter()
            .filter_map(ProviderId::from_bank_code)
            .chain(std::iter::once(self.default_provider))
        {
            if !ordered.contains(&provider) {
                ordered.push(provider);
            }
        }
        ordered
    }

    async fn is_eligible(&self, provider: ProviderId, amount: Decimal) -> bool {
        let integration = self.integration(provider);
        if !integration.is_available().await {
            debug!(provider = provider.id(), "provider unavailable, skipping");
            return false;
        }
        match integration.amount_limits().await {
            Ok(limits) if limits.admits(amount) => {}
            Ok(limits) => {
                debug!(
                    provider = provider.id(),
                    %amount,
                    min = %limits.min,
                    max = %limits.max,
                    "amount outside provider limits, skipping"
                );
                return false;
            }
            Err(err) => {
                debug!(provider = provider.id(), error = %err, "provider limits unknown, skipping");
                return false;
            }
        }

        let record = self.stats.get(&provider).map(|cell| cell.value().clone());
        match record {
            Some(cell)
                if cell.attempts >= self.policy.min_attempts
                    && cell.success_rate() < self.policy.min_success_rate =>
            {
                debug!(
                    provider = provider.id(),
                    success_rate = cell.success_rate(),
                    "provider success rate below routing threshold, skipping"
                );
                false
            }
            _ => true,
        }
    }

    fn record(&self, provider: ProviderId, outcome: &Result<BankTransactionResult, ProviderError>) {
        let now = self.clock.now();
        let mut cell = self.stats.entry(provider).or_default();
        cell.attempts += 1;
        cell.last_used = Some(now);
        let label = match outcome {
            Ok(result) if result.success => {
                cell.successes += 1;
                "accepted"
            }
            Ok(result) => {
                cell.failures += 1;
                cell.last_error = result.error_code.clone();
                "declined"
            }
            Err(err) => {
                cell.failures += 1;
                cell.last_error = Some(err.to_string());
                "error"
            }
        };
        metrics::counter!(
            telemetry::TRANSFERS_TOTAL,
            "provider" => provider.id(),
            "outcome" => label
        )
        .increment(1);
    }

    async fn attempt(
        &self,
        provider: ProviderId,
        request: &TransferRequest,
    ) -> Result<BankTransactionResult, ProviderError> {
        let outcome = self.integration(provider).transfer(request).await;
        self.record(provider, &outcome);
        outcome
    }

    /// Send `request` through the best eligible provider, falling back to the default
    /// provider once if the chosen one fails outright.
    ///
    /// Declines (`success = false`) are final and returned as-is.
    pub async fn execute_smart_transfer(
        &self,
        request: &TransferRequest,
    ) -> Result<BankTransactionResult, PayoutError> {
        let mut chosen = None;
        for provider in self.candidates(request) {
            if self.is_eligible(provider, request.amount).await {
                chosen = Some(provider);
                break;
            }
        }
        let chosen = chosen.unwrap_or_else(|| {
            warn!(
                default = self.default_provider.id(),
                amount = %request.amount,
                "no eligible provider, using default as last resort"
            );
            self.default_provider
        });

        match self.attempt(chosen, request).await {
            Ok(result) => {
                info!(
                    provider = chosen.id(),
                    success = result.success,
                    status = ?result.status,
                    "transfer routed"
                );
                Ok(result)
            }
            Err(err) if chosen != self.default_provider => {
                warn!(
                    provider = chosen.id(),
                    fallback = self.default_provider.id(),
                    error = %err,
                    "provider failed, falling back to default"
                );
                match self.attempt(self.default_provider, request).await {
                    Ok(result) => Ok(result),
                    Err(fallback_err) => {
                        warn!(error = %fallback_err, "default provider failed as well");
                        Err(err.into())
                    }
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Ask several providers to confirm `account`, keeping every answer for audit.
    pub async fn verify_account_multi(
        &self,
        account: &BankAccountInfo,
    ) -> MultiVerification {
        let mut order: Vec<ProviderId> = Vec::with_capacity(3);
        for provider in ProviderId::from_bank_code(&account.bank_code)
            .into_iter()
            .chain([ProviderId::Webpay, ProviderId::BancoEstado])
        {
            if !order.contains(&provider) {
                order.push(provider);
            }
        }

        let mut attempts = Vec::with_capacity(order.len());
        let mut best: Option<VerificationResult> = None;
        for provider in order {
            let integration = self.integration(provider);
            if !integration.is_available().await {
                attempts.push(VerificationAttempt {
                    provider,
                    is_valid: false,
                    confidence: 0.0,
                    error: Some("provider unavailable".to_string()),
                });
                continue;
            }

            match integration.verify_account(account).await {
                Ok(result) => {
                    attempts.push(VerificationAttempt {
                        provider,
                        is_valid: result.is_valid,
                        confidence: result.confidence,
                        error: result.error_message.clone(),
                    });
                    let better = best
                        .as_ref()
                        .map_or(true, |current| result.confidence > current.confidence);
                    if result.is_valid && better {
                        best = Some(result);
                    }
                }
                Err(err) => {
                    warn!(provider = provider.id(), error = %err, "account verification failed");
                    attempts.push(VerificationAttempt {
                        provider,
                        is_valid: false,
                        confidence: 0.0,
                        error: Some(err.to_string()),
                    });
                }
            }
        }

        MultiVerification {
            account_id: account.id.clone(),
            best,
            attempts,
        }
    }

    /// Routing statistics for every known provider, in a stable order.
    pub fn integration_stats(&self) -> Vec<ProviderStats> {
        ProviderId::ALL
            .into_iter()
            .map(|provider| {
                let cell = self
                    .stats
                    .get(&provider)
                    .map(|cell| cell.value().clone())
                    .unwrap_or_default();
                ProviderStats {
                    provider,
                    name: provider.display_name(),
                    attempts: cell.attempts,
                    successes: cell.successes,
                    failures: cell.failures,
                    success_rate: cell.success_rate(),
                    last_error: cell.last_error,
                    last_used: cell.last_used,
                }
            })
            .collect()
    }
}
