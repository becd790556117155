use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::accounts::BankAccountInfo;
use super::capability::{
    AccountBalance, AmountLimits, BankTransactionResult, ProviderCapability, ProviderError,
    ProviderErrorCode, ProviderId, ProviderTransaction, TransactionStatus, TransferRequest,
    VerificationResult,
};
use super::http::{
    self, credential, endpoint_url, request_timeout, whole_units, AccessToken, ProviderHttp,
    TokenCache, TokenResponse,
};
use crate::clock::Clock;
use crate::config::{ConfigProvider, ServiceConfig};

const PROVIDER: ProviderId = ProviderId::Paypal;

/// PayPal Payouts. The destination account number carries the recipient's PayPal email.
pub struct PaypalProvider {
    http: ProviderHttp,
    config: Arc<ConfigProvider>,
    clock: Arc<dyn Clock>,
    token: TokenCache,
}

impl PaypalProvider {
    pub fn new(client: Client, config: Arc<ConfigProvider>) -> Self {
        let clock = config.clock();
        Self {
            http: ProviderHttp::new(PROVIDER, client),
            config,
            clock,
            token: TokenCache::default(),
        }
    }

    async fn access_token(&self, settings: &ServiceConfig) -> Result<String, ProviderError> {
        let now = self.clock.now();
        self.token
            .get_or_refresh(now, || async {
                let call = self
                    .http
                    .client()
                    .post(endpoint_url(settings, "/v1/oauth2/token"))
                    .timeout(request_timeout(settings))
                    .basic_auth(
                        credential(&settings.credentials.client_id),
                        Some(credential(&settings.credentials.client_secret)),
                    )
                    .form(&[("grant_type", "client_credentials")]);
                let response = self.http.send_json::<TokenResponse>(call).await?;
                debug!(provider = PROVIDER.id(), "obtained paypal access token");
                Ok(AccessToken::from_response(response, now))
            })
            .await
    }
}

fn looks_like_email(value: &str) -> bool {
    let value = value.trim();
    match value.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain
                    .split_once('.')
                    .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty())
        }
        None => false,
    }
}

#[derive(Debug, Serialize)]
struct PayoutBody<'a> {
    sender_batch_header: SenderBatchHeader<'a>,
    items: Vec<PayoutItem<'a>>,
}

#[derive(Debug, Serialize)]
struct SenderBatchHeader<'a> {
    sender_batch_id: &'a str,
    email_subject: &'static str,
    email_message: &'a str,
}

#[derive(Debug, Serialize)]
struct PayoutItem<'a> {
    recipient_type: &'static str,
    amount: Money,
    receiver: &'a str,
    note: &'a str,
    sender_item_id: &'a str,
}

#[derive(Debug, Serialize)]
struct Money {
    value: String,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct PayoutResponse {
    batch_header: BatchHeader,
}

#[derive(Debug, Deserialize)]
struct BatchHeader {
    payout_batch_id: String,
    batch_status: String,
}

#[derive(Debug, Deserialize)]
struct BalancesResponse {
    #[serde(default)]
    balances: Vec<BalanceEntry>,
}

#[derive(Debug, Deserialize)]
struct BalanceEntry {
    currency: String,
    total_balance: Amount,
    #[serde(default)]
    available_balance: Option<Amount>,
}

#[derive(Debug, Deserialize)]
struct Amount {
    value: Decimal,
}

#[derive(Debug, Deserialize)]
struct TransactionsResponse {
    #[serde(default)]
    transaction_details: Vec<TransactionDetail>,
}

#[derive(Debug, Deserialize)]
struct TransactionDetail {
    transaction_info: TransactionInfo,
}

#[derive(Debug, Deserialize)]
struct TransactionInfo {
    transaction_id: String,
    transaction_amount: ReportedAmount,
    #[serde(default)]
    transaction_status: String,
    #[serde(default)]
    transaction_subject: Option<String>,
    transaction_initiation_date: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct ReportedAmount {
    value: Decimal,
    currency_code: String,
}

/// Reporting API status letters.
fn reported_status(code: &str) -> TransactionStatus {
    match code {
        "S" => TransactionStatus::Completed,
        "D" => TransactionStatus::Failed,
        "V" => TransactionStatus::Cancelled,
        _ => TransactionStatus::Pending,
    }
}

#[async_trait]
impl ProviderCapability for PaypalProvider {
    fn provider_id(&self) -> ProviderId {
        PROVIDER
    }

    async fn transfer(
        &self,
        request: &TransferRequest,
    ) -> Result<BankTransactionResult, ProviderError> {
        let settings = http::load_settings(&self.config, PROVIDER).await?;
        let now = self.clock.now();
        if !looks_like_email(&request.to.account_number) {
            return Ok(BankTransactionResult::declined(
                PROVIDER,
                request,
                ProviderErrorCode::InvalidAccount,
                "recipient is not a PayPal email address",
                now,
            ));
        }

        let token = self.access_token(&settings).await?;
        let body = PayoutBody {
            sender_batch_header: SenderBatchHeader {
                sender_batch_id: &request.idempotency_key,
                email_subject: "You have a payout",
                email_message: &request.description,
            },
            items: vec![PayoutItem {
                recipient_type: "EMAIL",
                amount: Money {
                    value: whole_units(PROVIDER, request.amount)?.to_string(),
                    currency: request.currency.clone(),
                },
                receiver: request.to.account_number.trim(),
                note: &request.description,
                sender_item_id: &request.idempotency_key,
            }],
        };

        let call = self
            .http
            .client()
            .post(endpoint_url(&settings, "/v1/payments/payouts"))
            .timeout(request_timeout(&settings))
            .bearer_auth(token)
            .header("PayPal-Request-Id", &request.idempotency_key)
            .json(&body);

        match self.http.send_json::<PayoutResponse>(call).await {
            Ok(response) => {
                let header = response.batch_header;
                let status = TransactionStatus::from_provider(&header.batch_status);
                info!(
                    provider = PROVIDER.id(),
                    batch = %header.payout_batch_id,
                    status = ?status,
                    "paypal payout submitted"
                );
                Ok(BankTransactionResult::accepted(
                    PROVIDER,
                    request,
                    format!("pp_{}", header.payout_batch_id),
                    None,
                    status,
                    now,
                ))
            }
            Err(ProviderError::Rejected { code, message, .. }) => {
                warn!(provider = PROVIDER.id(), %code, "paypal declined payout");
                Ok(BankTransactionResult::declined(PROVIDER, request, code, message, now))
            }
            Err(other) => Err(other),
        }
    }

    /// PayPal exposes no account lookup; a well-formed email plus a working session is
    /// the strongest signal available.
    async fn verify_account(
        &self,
        account: &BankAccountInfo,
    ) -> Result<VerificationResult, ProviderError> {
        let settings = http::load_settings(&self.config, PROVIDER).await?;
        if !looks_like_email(&account.account_number) {
            return Ok(VerificationResult::invalid(
                PROVIDER,
                "account is not a PayPal email address",
            ));
        }
        self.access_token(&settings).await?;
        Ok(VerificationResult {
            is_valid: true,
            account_holder: Some(account.account_holder.clone()),
            account_status: Some("unconfirmed".to_string()),
            method: PROVIDER.id().to_string(),
            confidence: 0.8,
            error_message: None,
        })
    }

    async fn get_balance(&self, _account: &BankAccountInfo) -> Result<AccountBalance, ProviderError> {
        let settings = http::load_settings(&self.config, PROVIDER).await?;
        let token = self.access_token(&settings).await?;
        let call = self
            .http
            .client()
            .get(endpoint_url(&settings, "/v1/reporting/balances"))
            .timeout(request_timeout(&settings))
            .bearer_auth(token);

        let response = self.http.send_json::<BalancesResponse>(call).await?;
        let entry = response
            .balances
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse {
                provider: PROVIDER,
                message: "no balances reported".to_string(),
            })?;
        let current = entry.total_balance.value;
        Ok(AccountBalance {
            available: entry.available_balance.map_or(current, |amount| amount.value),
            current,
            currency: entry.currency,
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
        let token = self.access_token(&settings).await?;
        let call = self
            .http
            .client()
            .get(endpoint_url(&settings, "/v1/reporting/transactions"))
            .timeout(request_timeout(&settings))
            .bearer_auth(token)
            .query(&[
                ("start_date", format!("{start}T00:00:00Z")),
                ("end_date", format!("{end}T23:59:59Z")),
            ]);

        let response = self.http.send_json::<TransactionsResponse>(call).await?;
        Ok(response
            .transaction_details
            .into_iter()
            .map(|detail| {
                let info = detail.transaction_info;
                ProviderTransaction {
                    id: info.transaction_id,
                    amount: info.transaction_amount.value,
                    currency: info.transaction_amount.currency_code,
                    description: info.transaction_subject.unwrap_or_default(),
                    status: reported_status(&info.transaction_status),
                    occurred_at: info.transaction_initiation_date,
                }
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
