use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;

use super::capability::{AmountLimits, ProviderError, ProviderErrorCode, ProviderId};
use crate::config::{ConfigProvider, ServiceConfig};

/// JSON-over-HTTP transport shared by the production adapters.
pub(crate) struct ProviderHttp {
    provider: ProviderId,
    client: Client,
}

impl ProviderHttp {
    pub(crate) fn new(provider: ProviderId, client: Client) -> Self {
        Self { provider, client }
    }

    pub(crate) fn client(&self) -> &Client {
        &self.client
    }

    pub(crate) async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, ProviderError> {
        let response = request.send().await.map_err(|err| ProviderError::Transport {
            provider: self.provider,
            message: describe_reqwest_error(&err),
        })?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|err| ProviderError::InvalidResponse {
                    provider: self.provider,
                    message: err.to_string(),
                });
        }

        let body = response.text().await.unwrap_or_default();
        Err(self.classify_failure(status, &body))
    }

    fn classify_failure(&self, status: StatusCode, body: &str) -> ProviderError {
        let provider = self.provider;
        let rejected_by_business_rule = status.is_client_error()
            && !matches!(
                status,
                StatusCode::UNAUTHORIZED
                    | StatusCode::FORBIDDEN
                    | StatusCode::REQUEST_TIMEOUT
                    | StatusCode::TOO_MANY_REQUESTS
            );

        if !rejected_by_business_rule {
            return ProviderError::Transport {
                provider,
                message: format!("HTTP {}: {}", status.as_u16(), snippet(body)),
            };
        }

        let (raw_code, message) = extract_error(body);
        let mut code = ProviderErrorCode::classify(&raw_code);
        if code == ProviderErrorCode::TechnicalError {
            code = match status {
                StatusCode::PAYMENT_REQUIRED => ProviderErrorCode::InsufficientFunds,
                StatusCode::NOT_FOUND => ProviderErrorCode::InvalidAccount,
                _ => code,
            };
        }

        ProviderError::Rejected {
            provider,
            code,
            message: if message.is_empty() {
                format!("HTTP {}", status.as_u16())
            } else {
                message
            },
        }
    }
}

fn describe_reqwest_error(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        "request timed out".to_string()
    } else if err.is_connect() {
        format!("connection failed: {err}")
    } else {
        err.to_string()
    }
}

fn snippet(body: &str) -> String {
    body.chars().take(200).collect()
}

/// Pull `(code, message)` out of the error shapes the supported providers return.
fn extract_error(body: &str) -> (String, String) {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return (body.to_string(), snippet(body));
    };
    let source = match value.get("error") {
        Some(nested @ Value::Object(_)) => nested,
        _ => &value,
    };

    let pick = |keys: &[&str]| {
        keys.iter()
            .find_map(|key| source.get(*key).and_then(Value::as_str))
            .unwrap_or_default()
            .to_string()
    };

    let code = pick(&["code", "error_code", "codigo", "name", "error", "decline_code"]);
    let message = pick(&["message", "error_description", "mensaje", "detail"]);
    (code, message)
}

/// Load the integration's settings, refusing disabled or incomplete configurations.
pub(crate) async fn load_settings(
    config: &ConfigProvider,
    provider: ProviderId,
) -> Result<ServiceConfig, ProviderError> {
    let not_configured = |reason: String| ProviderError::NotConfigured { provider, reason };

    let settings = config
        .get_service_config(provider.id())
        .await
        .map_err(|err| not_configured(err.to_string()))?
        .ok_or_else(|| not_configured("no service configuration".to_string()))?;

    if !settings.enabled {
        return Err(not_configured("service disabled".to_string()));
    }
    if !settings.has_required_credentials() {
        return Err(not_configured("required credentials missing".to_string()));
    }
    if settings.endpoint.base_url.trim().is_empty() {
        return Err(not_configured("base_url missing".to_string()));
    }
    Ok(settings)
}

pub(crate) async fn is_available(config: &ConfigProvider, provider: ProviderId) -> bool {
    load_settings(config, provider).await.is_ok()
}

pub(crate) async fn amount_limits(
    config: &ConfigProvider,
    provider: ProviderId,
) -> Result<AmountLimits, ProviderError> {
    let settings = load_settings(config, provider).await?;
    Ok(AmountLimits {
        min: settings.endpoint.min_amount,
        max: settings.endpoint.max_amount,
    })
}

pub(crate) fn endpoint_url(settings: &ServiceConfig, path: &str) -> String {
    format!(
        "{}/{}",
        settings.endpoint.base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

pub(crate) fn request_timeout(settings: &ServiceConfig) -> Duration {
    Duration::from_millis(settings.endpoint.timeout_ms.max(1))
}

/// Whole currency units; CLP has no minor unit.
pub(crate) fn whole_units(provider: ProviderId, amount: Decimal) -> Result<i64, ProviderError> {
    amount
        .round_dp(0)
        .to_i64()
        .ok_or_else(|| ProviderError::InvalidResponse {
            provider,
            message: format!("amount {amount} does not fit the provider format"),
        })
}

pub(crate) fn credential(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or_default()
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub(crate) access_token: String,
    #[serde(default = "default_expiry")]
    pub(crate) expires_in: i64,
}

fn default_expiry() -> i64 {
    3600
}

#[derive(Debug, Clone)]
pub(crate) struct AccessToken {
    pub(crate) value: String,
    pub(crate) expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub(crate) fn from_response(response: TokenResponse, now: DateTime<Utc>) -> Self {
        Self {
            value: response.access_token,
            expires_at: now + chrono::Duration::seconds(response.expires_in.max(0)),
        }
    }
}

/// One OAuth token per integration instance, refreshed a minute before expiry.
#[derive(Default)]
pub(crate) struct TokenCache {
    slot: Mutex<Option<AccessToken>>,
}

impl TokenCache {
    pub(crate) async fn get_or_refresh<F, Fut>(
        &self,
        now: DateTime<Utc>,
        fetch: F,
    ) -> Result<String, ProviderError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<AccessToken, ProviderError>>,
    {
        let mut slot = self.slot.lock().await;
        if let Some(token) = slot.as_ref() {
            if token.expires_at > now + chrono::Duration::seconds(60) {
                return Ok(token.value.clone());
            }
        }

        let fresh = fetch().await?;
        let value = fresh.value.clone();
        *slot = Some(fresh);
        Ok(value)
    }
}
