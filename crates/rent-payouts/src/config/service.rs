use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Broad category of an integrated service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    Bank,
    PaymentGateway,
    Wallet,
    Internal,
}

/// Secrets for an integration. Never part of serialized views.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceCredentials {
    pub api_key: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub merchant_id: Option<String>,
}

impl fmt::Debug for ServiceCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = |value: &Option<String>| if value.is_some() { "<set>" } else { "<unset>" };
        f.debug_struct("ServiceCredentials")
            .field("api_key", &mark(&self.api_key))
            .field("client_id", &mark(&self.client_id))
            .field("client_secret", &mark(&self.client_secret))
            .field("merchant_id", &mark(&self.merchant_id))
            .finish()
    }
}

impl ServiceCredentials {
    fn present(value: &Option<String>) -> bool {
        value.as_deref().is_some_and(|raw| !raw.trim().is_empty())
    }

    pub fn has_api_key(&self) -> bool {
        Self::present(&self.api_key)
    }

    pub fn has_client_pair(&self) -> bool {
        Self::present(&self.client_id) && Self::present(&self.client_secret)
    }

    pub fn has_merchant_id(&self) -> bool {
        Self::present(&self.merchant_id)
    }
}

/// Network and amount limits for an integration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub base_url: String,
    pub timeout_ms: u64,
    pub min_amount: Decimal,
    pub max_amount: Decimal,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            timeout_ms: 30_000,
            min_amount: Decimal::from(100),
            max_amount: Decimal::from(100_000_000),
        }
    }
}

impl EndpointConfig {
    pub fn admits(&self, amount: Decimal) -> bool {
        amount >= self.min_amount && amount <= self.max_amount
    }
}

/// Stored configuration for one integrated service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub service_id: String,
    pub name: String,
    pub kind: ServiceKind,
    pub enabled: bool,
    #[serde(default)]
    pub credentials: ServiceCredentials,
    #[serde(default)]
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub settings: Value,
    pub updated_at: DateTime<Utc>,
}

impl ServiceConfig {
    pub fn new(service_id: impl Into<String>, name: impl Into<String>, kind: ServiceKind) -> Self {
        Self {
            service_id: service_id.into(),
            name: name.into(),
            kind,
            enabled: true,
            credentials: ServiceCredentials::default(),
            endpoint: EndpointConfig::default(),
            settings: Value::Object(Map::new()),
            updated_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    /// Whether the credentials required by the known providers are present.
    pub fn has_required_credentials(&self) -> bool {
        let credentials = &self.credentials;
        match self.service_id.as_str() {
            "webpay" => credentials.has_api_key() && credentials.has_merchant_id(),
            "banco_estado" | "paypal" => credentials.has_client_pair(),
            "stripe" => credentials.has_api_key(),
            _ => true,
        }
    }

    pub fn setting_str(&self, key: &str) -> Option<&str> {
        self.settings.get(key).and_then(Value::as_str)
    }

    pub fn view(&self) -> ServiceConfigView {
        ServiceConfigView {
            service_id: self.service_id.clone(),
            name: self.name.clone(),
            kind: self.kind,
            enabled: self.enabled,
            credentials_configured: self.has_required_credentials(),
            endpoint: self.endpoint.clone(),
            updated_at: self.updated_at,
        }
    }

    pub(crate) fn apply(&mut self, patch: ServiceConfigPatch, now: DateTime<Utc>) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(enabled) = patch.enabled {
            self.enabled = enabled;
        }
        if let Some(credentials) = patch.credentials {
            let current = &mut self.credentials;
            if credentials.api_key.is_some() {
                current.api_key = credentials.api_key;
            }
            if credentials.client_id.is_some() {
                current.client_id = credentials.client_id;
            }
            if credentials.client_secret.is_some() {
                current.client_secret = credentials.client_secret;
            }
            if credentials.merchant_id.is_some() {
                current.merchant_id = credentials.merchant_id;
            }
        }
        if let Some(endpoint) = patch.endpoint {
            self.endpoint = endpoint;
        }
        if let Some(Value::Object(settings)) = patch.settings {
            match &mut self.settings {
                Value::Object(existing) => existing.extend(settings),
                other => *other = Value::Object(settings),
            }
        }
        self.updated_at = now;
    }
}

/// Partial update applied by `ConfigProvider::update_service_config`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServiceConfigPatch {
    pub name: Option<String>,
    pub enabled: Option<bool>,
    pub credentials: Option<ServiceCredentials>,
    pub endpoint: Option<EndpointConfig>,
    pub settings: Option<Value>,
}

/// Redacted representation returned to operators.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceConfigView {
    pub service_id: String,
    pub name: String,
    pub kind: ServiceKind,
    pub enabled: bool,
    pub credentials_configured: bool,
    pub endpoint: EndpointConfig,
    pub updated_at: DateTime<Utc>,
}
