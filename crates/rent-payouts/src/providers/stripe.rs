use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{info, warn};

use super::accounts::BankAccountInfo;
use super::capability::{
    AccountBalance, AmountLimits, BankTransactionResult, ProviderCapability, ProviderError,
    ProviderId, ProviderTransaction, TransactionStatus, TransferRequest, VerificationResult,
};
use super::http::{self, credential, endpoint_url, request_timeout, whole_units, ProviderHttp};
use crate::clock::Clock;
use crate::config::ConfigProvider;

const PROVIDER: ProviderId = ProviderId::Stripe;

/// Stripe Connect transfers to connected accounts. The destination account number is
/// the connected account id (`acct_...`).
pub struct StripeProvider {
    http: ProviderHttp,
    config: Arc<ConfigProvider>,
    clock: Arc<dyn Clock>,
}

impl StripeProvider {
    pub fn new(client: Client, config: Arc<ConfigProvider>) -> Self {
        let clock = config.clock();
        Self {
            http: ProviderHttp::new(PROVIDER, client),
            config,
            clock,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TransferResponse {
    id: String,
    #[serde(default)]
    balance_transaction: Option<String>,
    #[serde(default)]
    reversed: bool,
}

#[derive(Debug, Deserialize)]
struct ConnectedAccount {
    #[serde(default)]
    payouts_enabled: bool,
    #[serde(default)]
    business_profile: Option<BusinessProfile>,
    #[serde(default)]
    requirements: Option<Requirements>,
}

#[derive(Debug, Deserialize)]
struct BusinessProfile {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Requirements {
    #[serde(default)]
    disabled_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    #[serde(default)]
    available: Vec<BalanceFunds>,
    #[serde(default)]
    pending: Vec<BalanceFunds>,
}

#[derive(Debug, Deserialize)]
struct BalanceFunds {
    amount: i64,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct BalanceTransactions {
    #[serde(default)]
    data: Vec<BalanceTransaction>,
}

#[derive(Debug, Deserialize)]
struct BalanceTransaction {
    id: String,
    amount: i64,
    currency: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    status: String,
    created: i64,
}

fn day_bounds(start: NaiveDate, end: NaiveDate) -> (i64, i64) {
    let from = Utc.from_utc_datetime(&start.and_time(NaiveTime::MIN)).timestamp();
    let to = Utc.from_utc_datetime(&end.and_time(NaiveTime::MIN)).timestamp() + 86_399;
    (from, to)
}

#[async_trait]
impl ProviderCapability for StripeProvider {
    fn provider_id(&self) -> ProviderId {
        PROVIDER
    }

    async fn transfer(
        &self,
        request: &TransferRequest,
    ) -> Result<BankTransactionResult, ProviderError> {
        let settings = http::load_settings(&self.config, PROVIDER).await?;
        let form = [
            ("amount", whole_units(PROVIDER, request.amount)?.to_string()),
            ("currency", request.currency.to_ascii_lowercase()),
            ("destination", request.to.account_number.trim().to_string()),
            ("description", request.description.clone()),
            ("transfer_group", request.idempotency_key.clone()),
        ];

        let call = self
            .http
            .client()
            .post(endpoint_url(&settings, "/v1/transfers"))
            .timeout(request_timeout(&settings))
            .bearer_auth(credential(&settings.credentials.api_key))
            .header("Idempotency-Key", &request.idempotency_key)
            .form(&form);

        let now = self.clock.now();
        match self.http.send_json::<TransferResponse>(call).await {
            Ok(response) => {
                let status = if response.reversed {
                    TransactionStatus::Cancelled
                } else {
                    TransactionStatus::Completed
                };
                info!(provider = PROVIDER.id(), transfer = %response.id, "stripe transfer created");
                Ok(BankTransactionResult::accepted(
                    PROVIDER,
                    request,
                    response.id,
                    response.balance_transaction,
                    status,
                    now,
                ))
            }
            Err(ProviderError::Rejected { code, message, .. }) => {
                warn!(provider = PROVIDER.id(), %code, "stripe declined transfer");
                Ok(BankTransactionResult::declined(PROVIDER, request, code, message, now))
            }
            Err(other) => Err(other),
        }
    }

    async fn verify_account(
        &self,
        account: &BankAccountInfo,
    ) -> Result<VerificationResult, ProviderError> {
        let settings = http::load_settings(&self.config, PROVIDER).await?;
        let account_id = account.account_number.trim();
        if !account_id.starts_with("acct_") {
            return Ok(VerificationResult::invalid(
                PROVIDER,
                "account is not a Stripe connected account",
            ));
        }

        let call = self
            .http
            .client()
            .get(endpoint_url(&settings, &format!("/v1/accounts/{account_id}")))
            .timeout(request_timeout(&settings))
            .bearer_auth(credential(&settings.credentials.api_key));

        match self.http.send_json::<ConnectedAccount>(call).await {
            Ok(connected) => {
                let disabled_reason = connected
                    .requirements
                    .and_then(|requirements| requirements.disabled_reason);
                Ok(VerificationResult {
                    is_valid: connected.payouts_enabled,
                    account_holder: connected.business_profile.and_then(|profile| profile.name),
                    account_status: Some(
                        if connected.payouts_enabled { "enabled" } else { "restricted" }.to_string(),
                    ),
                    method: PROVIDER.id().to_string(),
                    confidence: if connected.payouts_enabled { 0.95 } else { 0.0 },
                    error_message: disabled_reason,
                })
            }
            Err(ProviderError::Rejected { message, .. }) => {
                Ok(VerificationResult::invalid(PROVIDER, message))
            }
            Err(other) => Err(other),
        }
    }

    async fn get_balance(&self, _account: &BankAccountInfo) -> Result<AccountBalance, ProviderError> {
        let settings = http::load_settings(&self.config, PROVIDER).await?;
        let call = self
            .http
            .client()
            .get(endpoint_url(&settings, "/v1/balance"))
            .timeout(request_timeout(&settings))
            .bearer_auth(credential(&settings.credentials.api_key));

        let response = self.http.send_json::<BalanceResponse>(call).await?;
        let available = response
            .available
            .first()
            .ok_or_else(|| ProviderError::InvalidResponse {
                provider: PROVIDER,
                message: "no available balance reported".to_string(),
            })?;
        let pending: i64 = response
            .pending
            .iter()
            .filter(|funds| funds.currency == available.currency)
            .map(|funds| funds.amount)
            .sum();

        Ok(AccountBalance {
            available: Decimal::from(available.amount),
            current: Decimal::from(available.amount + pending),
            currency: available.currency.to_ascii_uppercase(),
            as_of: self.clock.now(),
        })
    }

    async fn get_transaction_history(
        &self,
        _account: &BankAccountInfo,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<ProviderTransaction>, ProviderError> {
        let settings = http::load_settings(&self.config, PROVIDER).await?;
        let (from, to) = day_bounds(start, end);
        let call = self
            .http
            .client()
            .get(endpoint_url(&settings, "/v1/balance_transactions"))
            .timeout(request_timeout(&settings))
            .bearer_auth(credential(&settings.credentials.api_key))
            .query(&[
                ("created[gte]", from.to_string()),
                ("created[lte]", to.to_string()),
                ("limit", "100".to_string()),
            ]);

        let response = self.http.send_json::<BalanceTransactions>(call).await?;
        Ok(response
            .data
            .into_iter()
            .map(|entry| ProviderTransaction {
                id: entry.id,
                amount: Decimal::from(entry.amount),
                currency: entry.currency.to_ascii_uppercase(),
                description: entry.description.unwrap_or_default(),
                status: match entry.status.as_str() {
                    "available" => TransactionStatus::Completed,
                    other => TransactionStatus::from_provider(other),
                },
                occurred_at: DateTime::<Utc>::from_timestamp(entry.created, 0)
                    .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
            })
            .collect())
    }

    async fn is_available(&self) -> bool {
        http::is_available(&self.config, PROVIDER).await
    }

    async fn amount_limits(&self) -> Result<AmountLimits, ProviderError> {
        http::amount_limits(&self.config, PROVIDER).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::testing::{account, config_for, spawn_mock, transfer_request};
    use axum::extract::{Form, Path, Query};
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use rust_decimal_macros::dec;
    use serde_json::json;
    use std::collections::HashMap;

    fn stripe_request(amount: Decimal) -> TransferRequest {
        let mut request = transfer_request(amount);
        request.to.account_number = "acct_1P2Q3R".to_string();
        request
    }

    #[tokio::test]
    async fn creates_transfer_with_idempotency_header() {
        let router = Router::new().route(
            "/v1/transfers",
            post(
                |headers: HeaderMap, Form(form): Form<HashMap<String, String>>| async move {
                    assert_eq!(headers["authorization"], "Bearer sk_test_payouts");
                    assert_eq!(headers["idempotency-key"], "payout:owner-1:2025-04-01:2025-04-30");
                    assert_eq!(form["amount"], "230000");
                    assert_eq!(form["currency"], "clp");
                    assert_eq!(form["destination"], "acct_1P2Q3R");
                    Json(json!({ "id": "tr_123", "balance_transaction": "txn_9", "reversed": false }))
                },
            ),
        );
        let base_url = spawn_mock(router).await;
        let provider = StripeProvider::new(Client::new(), config_for(PROVIDER, &base_url));

        let result = provider.transfer(&stripe_request(dec!(230000))).await.unwrap();
        assert!(result.success);
        assert_eq!(result.transaction_id.as_deref(), Some("tr_123"));
        assert_eq!(result.external_reference.as_deref(), Some("txn_9"));
    }

    #[tokio::test]
    async fn insufficient_balance_is_a_decline() {
        let router = Router::new().route(
            "/v1/transfers",
            post(|| async {
                (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": {
                        "code": "balance_insufficient",
                        "message": "You have insufficient available funds in your Stripe account."
                    }})),
                )
            }),
        );
        let base_url = spawn_mock(router).await;
        let provider = StripeProvider::new(Client::new(), config_for(PROVIDER, &base_url));

        let result = provider.transfer(&stripe_request(dec!(230000))).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.error_code.as_deref(), Some("INSUFFICIENT_FUNDS"));
    }

    #[tokio::test]
    async fn verification_reads_payouts_enabled() {
        let router = Router::new().route(
            "/v1/accounts/:id",
            get(|Path(id): Path<String>| async move {
                if id == "acct_1P2Q3R" {
                    Json(json!({ "id": id, "payouts_enabled": true, "business_profile": { "name": "Servicios Soto" } }))
                        .into_response()
                } else {
                    (
                        StatusCode::NOT_FOUND,
                        Json(json!({ "error": { "code": "account_invalid", "message": "No such account" } })),
                    )
                        .into_response()
                }
            }),
        );
        let base_url = spawn_mock(router).await;
        let provider = StripeProvider::new(Client::new(), config_for(PROVIDER, &base_url));

        let mut connected = account("acc-st");
        connected.account_number = "acct_1P2Q3R".to_string();
        let verification = provider.verify_account(&connected).await.unwrap();
        assert!(verification.is_valid);
        assert_eq!(verification.account_holder.as_deref(), Some("Servicios Soto"));

        connected.account_number = "acct_missing".to_string();
        assert!(!provider.verify_account(&connected).await.unwrap().is_valid);
        assert!(!provider.verify_account(&account("acc-1")).await.unwrap().is_valid);
    }

    #[tokio::test]
    async fn balance_and_history_use_zero_decimal_amounts() {
        let router = Router::new()
            .route(
                "/v1/balance",
                get(|| async {
                    Json(json!({
                        "available": [{ "amount": 900000, "currency": "clp" }],
                        "pending": [{ "amount": 100000, "currency": "clp" }]
                    }))
                }),
            )
            .route(
                "/v1/balance_transactions",
                get(|Query(params): Query<HashMap<String, String>>| async move {
                    assert_eq!(params["created[gte]"], "1743465600");
                    Json(json!({ "data": [{
                        "id": "txn_1", "amount": -230000, "currency": "clp",
                        "status": "available", "created": 1743602400
                    }]}))
                }),
            );
        let base_url = spawn_mock(router).await;
        let provider = StripeProvider::new(Client::new(), config_for(PROVIDER, &base_url));

        let balance = provider.get_balance(&account("acc-1")).await.unwrap();
        assert_eq!(balance.available, dec!(900000));
        assert_eq!(balance.current, dec!(1000000));
        assert_eq!(balance.currency, "CLP");

        let history = provider
            .get_transaction_history(
                &account("acc-1"),
                NaiveDate::from_ymd_opt(2025, 4, 1).unwrap(),
                NaiveDate::from_ymd_opt(2025, 4, 30).unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(history[0].amount, dec!(-230000));
        assert_eq!(history[0].status, TransactionStatus::Completed);
    }
}
