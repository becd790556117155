use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::accounts::{normalize_account_number, AccountType, BankAccountInfo};
use super::capability::{
    AccountBalance, AmountLimits, BankTransactionResult, ProviderCapability, ProviderError,
    ProviderId, ProviderTransaction, TransactionStatus, TransferRequest, VerificationResult,
};
use super::http::{self, credential, endpoint_url, request_timeout, whole_units, ProviderHttp};
use crate::clock::Clock;
use crate::config::ConfigProvider;

const PROVIDER: ProviderId = ProviderId::Webpay;

/// Transbank WebPay payouts. Authenticates with the commerce code and API key headers.
pub struct WebpayProvider {
    http: ProviderHttp,
    config: Arc<ConfigProvider>,
    clock: Arc<dyn Clock>,
}

impl WebpayProvider {
    pub fn new(client: Client, config: Arc<ConfigProvider>) -> Self {
        let clock = config.clock();
        Self {
            http: ProviderHttp::new(PROVIDER, client),
            config,
            clock,
        }
    }
}

#[derive(Debug, Serialize)]
struct TransferBody<'a> {
    commerce_code: &'a str,
    buy_order: &'a str,
    amount: i64,
    currency: &'a str,
    description: &'a str,
    destination: Destination<'a>,
}

#[derive(Debug, Serialize)]
struct Destination<'a> {
    bank_code: &'a str,
    account_number: String,
    account_type: AccountType,
    holder_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    rut: Option<&'a str>,
}

impl<'a> Destination<'a> {
    fn from_account(account: &'a BankAccountInfo) -> Self {
        Self {
            bank_code: &account.bank_code,
            account_number: normalize_account_number(&account.account_number),
            account_type: account.account_type,
            holder_name: &account.account_holder,
            rut: account.rut.as_deref(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TransferResponse {
    transfer_id: String,
    status: String,
    #[serde(default)]
    authorization_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ValidationResponse {
    valid: bool,
    #[serde(default)]
    holder_name: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

#[async_trait]
impl ProviderCapability for WebpayProvider {
    fn provider_id(&self) -> ProviderId {
        PROVIDER
    }

    async fn transfer(
        &self,
        request: &TransferRequest,
    ) -> Result<BankTransactionResult, ProviderError> {
        let settings = http::load_settings(&self.config, PROVIDER).await?;
        let commerce_code = credential(&settings.credentials.merchant_id);
        let body = TransferBody {
            commerce_code,
            buy_order: &request.idempotency_key,
            amount: whole_units(PROVIDER, request.amount)?,
            currency: &request.currency,
            description: &request.description,
            destination: Destination::from_account(&request.to),
        };

        let call = self
            .http
            .client()
            .post(endpoint_url(&settings, "/transfers"))
            .timeout(request_timeout(&settings))
            .header("Tbk-Api-Key-Id", commerce_code)
            .header("Tbk-Api-Key-Secret", credential(&settings.credentials.api_key))
            .header("Idempotency-Key", &request.idempotency_key)
            .json(&body);

        let now = self.clock.now();
        match self.http.send_json::<TransferResponse>(call).await {
            Ok(response) => {
                let status = TransactionStatus::from_provider(&response.status);
                info!(
                    provider = PROVIDER.id(),
                    transfer_id = %response.transfer_id,
                    status = ?status,
                    "webpay transfer submitted"
                );
                Ok(BankTransactionResult::accepted(
                    PROVIDER,
                    request,
                    format!("wp_{}", response.transfer_id),
                    response.authorization_code,
                    status,
                    now,
                ))
            }
            Err(ProviderError::Rejected { code, message, .. }) => {
                warn!(provider = PROVIDER.id(), %code, "webpay declined transfer");
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
        let call = self
            .http
            .client()
            .post(endpoint_url(&settings, "/accounts/validate"))
            .timeout(request_timeout(&settings))
            .header(
                "Tbk-Api-Key-Id",
                credential(&settings.credentials.merchant_id),
            )
            .header("Tbk-Api-Key-Secret", credential(&settings.credentials.api_key))
            .json(&Destination::from_account(account));

        match self.http.send_json::<ValidationResponse>(call).await {
            Ok(response) => Ok(VerificationResult {
                is_valid: response.valid,
                account_holder: response.holder_name,
                account_status: response.status,
                method: PROVIDER.id().to_string(),
                confidence: if response.valid { 0.9 } else { 0.0 },
                error_message: None,
            }),
            Err(ProviderError::Rejected { message, .. }) => {
                Ok(VerificationResult::invalid(PROVIDER, message))
            }
            Err(other) => Err(other),
        }
    }

    async fn get_balance(&self, _account: &BankAccountInfo) -> Result<AccountBalance, ProviderError> {
        Err(ProviderError::Unsupported {
            provider: PROVIDER,
            operation: "balance queries",
        })
    }

    async fn get_transaction_history(
        &self,
        _account: &BankAccountInfo,
        _start: NaiveDate,
        _end: NaiveDate,
    ) -> Result<Vec<ProviderTransaction>, ProviderError> {
        Err(ProviderError::Unsupported {
            provider: PROVIDER,
            operation: "transaction history",
        })
    }

    async fn is_available(&self) -> bool {
        http::is_available(&self.config, PROVIDER).await
    }

    async fn amount_limits(&self) -> Result<AmountLimits, ProviderError> {
        http::amount_limits(&self.config, PROVIDER).await
    }
}
