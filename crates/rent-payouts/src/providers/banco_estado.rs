use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::accounts::{normalize_account_number, BankAccountInfo};
use super::capability::{
    AccountBalance, AmountLimits, BankTransactionResult, ProviderCapability, ProviderError,
    ProviderId, ProviderTransaction, TransactionStatus, TransferRequest, VerificationResult,
};
use super::http::{
    self, credential, endpoint_url, request_timeout, whole_units, AccessToken, ProviderHttp,
    TokenCache, TokenResponse,
};
use crate::clock::Clock;
use crate::config::{ConfigProvider, ServiceConfig};

const PROVIDER: ProviderId = ProviderId::BancoEstado;

/// BancoEstado corporate transfers API with an OAuth client-credentials session.
pub struct BancoEstadoProvider {
    http: ProviderHttp,
    config: Arc<ConfigProvider>,
    clock: Arc<dyn Clock>,
    token: TokenCache,
}

impl BancoEstadoProvider {
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
                    .post(endpoint_url(settings, "/oauth/token"))
                    .timeout(request_timeout(settings))
                    .basic_auth(
                        credential(&settings.credentials.client_id),
                        Some(credential(&settings.credentials.client_secret)),
                    )
                    .form(&[("grant_type", "client_credentials")]);
                let response = self.http.send_json::<TokenResponse>(call).await?;
                debug!(provider = PROVIDER.id(), "obtained banco estado access token");
                Ok(AccessToken::from_response(response, now))
            })
            .await
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TransferBody<'a> {
    cuenta_origen: String,
    cuenta_destino: String,
    banco_destino: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    rut_destinatario: Option<&'a str>,
    nombre_destinatario: &'a str,
    monto: i64,
    moneda: &'a str,
    glosa: &'a str,
    id_idempotencia: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransferResponse {
    id_transaccion: String,
    estado: String,
    #[serde(default)]
    numero_comprobante: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VerifyBody<'a> {
    numero_cuenta: String,
    codigo_banco: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    rut: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyResponse {
    valida: bool,
    #[serde(default)]
    titular: Option<String>,
    #[serde(default)]
    estado: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BalanceResponse {
    saldo_disponible: Decimal,
    saldo_contable: Decimal,
    #[serde(default = "default_currency")]
    moneda: String,
}

fn default_currency() -> String {
    "CLP".to_string()
}

#[derive(Debug, Deserialize)]
struct MovementsResponse {
    #[serde(default)]
    movimientos: Vec<Movement>,
}

#[derive(Debug, Deserialize)]
struct Movement {
    id: String,
    monto: Decimal,
    #[serde(default = "default_currency")]
    moneda: String,
    #[serde(default)]
    glosa: String,
    #[serde(default)]
    estado: String,
    fecha: DateTime<Utc>,
}

#[async_trait]
impl ProviderCapability for BancoEstadoProvider {
    fn provider_id(&self) -> ProviderId {
        PROVIDER
    }

    async fn transfer(
        &self,
        request: &TransferRequest,
    ) -> Result<BankTransactionResult, ProviderError> {
        let settings = http::load_settings(&self.config, PROVIDER).await?;
        let token = self.access_token(&settings).await?;
        let body = TransferBody {
            cuenta_origen: normalize_account_number(&request.from.account_number),
            cuenta_destino: normalize_account_number(&request.to.account_number),
            banco_destino: &request.to.bank_code,
            rut_destinatario: request.to.rut.as_deref(),
            nombre_destinatario: &request.to.account_holder,
            monto: whole_units(PROVIDER, request.amount)?,
            moneda: &request.currency,
            glosa: &request.description,
            id_idempotencia: &request.idempotency_key,
        };

        let call = self
            .http
            .client()
            .post(endpoint_url(&settings, "/api/transferencias"))
            .timeout(request_timeout(&settings))
            .bearer_auth(token)
            .json(&body);

        let now = self.clock.now();
        match self.http.send_json::<TransferResponse>(call).await {
            Ok(response) => {
                let status = TransactionStatus::from_provider(&response.estado);
                info!(
                    provider = PROVIDER.id(),
                    transaction = %response.id_transaccion,
                    status = ?status,
                    "banco estado transfer submitted"
                );
                Ok(BankTransactionResult::accepted(
                    PROVIDER,
                    request,
                    format!("be_{}", response.id_transaccion),
                    response.numero_comprobante,
                    status,
                    now,
                ))
            }
            Err(ProviderError::Rejected { code, message, .. }) => {
                warn!(provider = PROVIDER.id(), %code, "banco estado declined transfer");
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
        let token = self.access_token(&settings).await?;
        let call = self
            .http
            .client()
            .post(endpoint_url(&settings, "/api/cuentas/verificar"))
            .timeout(request_timeout(&settings))
            .bearer_auth(token)
            .json(&VerifyBody {
                numero_cuenta: normalize_account_number(&account.account_number),
                codigo_banco: &account.bank_code,
                rut: account.rut.as_deref(),
            });

        match self.http.send_json::<VerifyResponse>(call).await {
            Ok(response) => Ok(VerificationResult {
                is_valid: response.valida,
                account_holder: response.titular,
                account_status: response.estado,
                method: PROVIDER.id().to_string(),
                confidence: if response.valida { 0.95 } else { 0.0 },
                error_message: None,
            }),
            Err(ProviderError::Rejected { message, .. }) => {
                Ok(VerificationResult::invalid(PROVIDER, message))
            }
            Err(other) => Err(other),
        }
    }

    async fn get_balance(&self, account: &BankAccountInfo) -> Result<AccountBalance, ProviderError> {
        let settings = http::load_settings(&self.config, PROVIDER).await?;
        let token = self.access_token(&settings).await?;
        let call = self
            .http
            .client()
            .get(endpoint_url(&settings, "/api/cuentas/saldo"))
            .timeout(request_timeout(&settings))
            .bearer_auth(token)
            .query(&[("numeroCuenta", normalize_account_number(&account.account_number))]);

        let response = self.http.send_json::<BalanceResponse>(call).await?;
        Ok(AccountBalance {
            available: response.saldo_disponible,
            current: response.saldo_contable,
            currency: response.moneda,
            as_of: self.clock.now(),
        })
    }

    async fn get_transaction_history(
        &self,
        account: &BankAccountInfo,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<ProviderTransaction>, ProviderError> {
        let settings = http::load_settings(&self.config, PROVIDER).await?;
        let token = self.access_token(&settings).await?;
        let call = self
            .http
            .client()
            .get(endpoint_url(&settings, "/api/cuentas/movimientos"))
            .timeout(request_timeout(&settings))
            .bearer_auth(token)
            .query(&[
                ("numeroCuenta", normalize_account_number(&account.account_number)),
                ("desde", start.to_string()),
                ("hasta", end.to_string()),
            ]);

        let response = self.http.send_json::<MovementsResponse>(call).await?;
        Ok(response
            .movimientos
            .into_iter()
            .map(|movement| ProviderTransaction {
                id: movement.id,
                amount: movement.monto,
                currency: movement.moneda,
                description: movement.glosa,
                status: TransactionStatus::from_provider(&movement.estado),
                occurred_at: movement.fecha,
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
