use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::accounts::BankAccountInfo;
use crate::error::PayoutError;

/// Integrations the registry knows how to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderId {
    Webpay,
    BancoEstado,
    Paypal,
    Stripe,
}

impl ProviderId {
    pub const ALL: [ProviderId; 4] = [
        ProviderId::Webpay,
        ProviderId::BancoEstado,
        ProviderId::Paypal,
        ProviderId::Stripe,
    ];

    pub const fn id(&self) -> &'static str {
        match self {
            ProviderId::Webpay => "webpay",
            ProviderId::BancoEstado => "banco_estado",
            ProviderId::Paypal => "paypal",
            ProviderId::Stripe => "stripe",
        }
    }

    pub const fn display_name(&self) -> &'static str {
        match self {
            ProviderId::Webpay => "WebPay",
            ProviderId::BancoEstado => "BancoEstado",
            ProviderId::Paypal => "PayPal",
            ProviderId::Stripe => "Stripe",
        }
    }

    /// Lookup table from bank codes and aliases to integrations.
    pub fn from_bank_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_lowercase().as_str() {
            "webpay" | "transbank" | "001" => Some(ProviderId::Webpay),
            "banco_estado" | "bancoestado" | "012" => Some(ProviderId::BancoEstado),
            "paypal" => Some(ProviderId::Paypal),
            "stripe" => Some(ProviderId::Stripe),
            _ => None,
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Transfer instruction handed to a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub from: BankAccountInfo,
    pub to: BankAccountInfo,
    pub amount: Decimal,
    pub currency: String,
    pub description: String,
    /// Repeated submissions with the same key must not move money twice.
    pub idempotency_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Completed,
    Pending,
    Failed,
    Cancelled,
}

impl TransactionStatus {
    pub fn from_provider(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "completed" | "complete" | "success" | "succeeded" | "paid" | "authorized"
            | "aprobada" | "realizada" => TransactionStatus::Completed,
            "failed" | "failure" | "rejected" | "denied" | "rechazada" | "returned" => {
                TransactionStatus::Failed
            }
            "cancelled" | "canceled" | "reversed" | "anulada" => TransactionStatus::Cancelled,
            _ => TransactionStatus::Pending,
        }
    }
}

/// Decline reasons providers report for transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderErrorCode {
    InsufficientFunds,
    InvalidAccount,
    AccountBlocked,
    DailyLimitExceeded,
    TechnicalError,
}

impl ProviderErrorCode {
    pub const fn code(&self) -> &'static str {
        match self {
            ProviderErrorCode::InsufficientFunds => "INSUFFICIENT_FUNDS",
            ProviderErrorCode::InvalidAccount => "INVALID_ACCOUNT",
            ProviderErrorCode::AccountBlocked => "ACCOUNT_BLOCKED",
            ProviderErrorCode::DailyLimitExceeded => "DAILY_LIMIT_EXCEEDED",
            ProviderErrorCode::TechnicalError => "TECHNICAL_ERROR",
        }
    }

    /// Map a provider-specific error string onto the shared codes.
    pub fn classify(raw: &str) -> Self {
        let raw = raw.to_ascii_lowercase();
        if raw.contains("insufficient") || raw.contains("fondos") {
            ProviderErrorCode::InsufficientFunds
        } else if raw.contains("blocked") || raw.contains("frozen") || raw.contains("bloqueada") {
            ProviderErrorCode::AccountBlocked
        } else if raw.contains("limit") || raw.contains("limite") {
            ProviderErrorCode::DailyLimitExceeded
        } else if raw.contains("invalid_account")
            || raw.contains("invalid_recipient")
            || raw.contains("account_not_found")
            || raw.contains("no_such")
            || raw.contains("cuenta_invalida")
        {
            ProviderErrorCode::InvalidAccount
        } else {
            ProviderErrorCode::TechnicalError
        }
    }
}

impl fmt::Display for ProviderErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Outcome of a provider transfer call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankTransactionResult {
    pub success: bool,
    pub transaction_id: Option<String>,
    pub external_reference: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub status: TransactionStatus,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub processed_at: DateTime<Utc>,
    pub provider: String,
}

impl BankTransactionResult {
    pub fn accepted(
        provider: ProviderId,
        request: &TransferRequest,
        transaction_id: String,
        external_reference: Option<String>,
        status: TransactionStatus,
        processed_at: DateTime<Utc>,
    ) -> Self {
        let success = matches!(status, TransactionStatus::Completed | TransactionStatus::Pending);
        Self {
            success,
            transaction_id: Some(transaction_id),
            external_reference,
            amount: request.amount,
            currency: request.currency.clone(),
            status,
            error_code: None,
            error_message: None,
            processed_at,
            provider: provider.id().to_string(),
        }
    }

    pub fn declined(
        provider: ProviderId,
        request: &TransferRequest,
        code: ProviderErrorCode,
        message: impl Into<String>,
        processed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            success: false,
            transaction_id: None,
            external_reference: None,
            amount: request.amount,
            currency: request.currency.clone(),
            status: TransactionStatus::Failed,
            error_code: Some(code.code().to_string()),
            error_message: Some(message.into()),
            processed_at,
            provider: provider.id().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub is_valid: bool,
    pub account_holder: Option<String>,
    pub account_status: Option<String>,
    pub method: String,
    pub confidence: f64,
    pub error_message: Option<String>,
}

impl VerificationResult {
    pub fn invalid(provider: ProviderId, message: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            account_holder: None,
            account_status: None,
            method: provider.id().to_string(),
            confidence: 0.0,
            error_message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub available: Decimal,
    pub current: Decimal,
    pub currency: String,
    pub as_of: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderTransaction {
    pub id: String,
    pub amount: Decimal,
    pub currency: String,
    pub description: String,
    pub status: TransactionStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Inclusive amount window a provider accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmountLimits {
    pub min: Decimal,
    pub max: Decimal,
}

impl AmountLimits {
    pub fn admits(&self, amount: Decimal) -> bool {
        amount >= self.min && amount <= self.max
    }
}

/// Uniform contract every bank or gateway integration satisfies.
#[async_trait]
pub trait ProviderCapability: Send + Sync {
    fn provider_id(&self) -> ProviderId;

    /// Submit a transfer. Declines come back as `success = false`; `Err` means the call
    /// itself failed and another provider may be tried.
    async fn transfer(&self, request: &TransferRequest)
        -> Result<BankTransactionResult, ProviderError>;

    async fn verify_account(
        &self,
        account: &BankAccountInfo,
    ) -> Result<VerificationResult, ProviderError>;

    async fn get_balance(&self, account: &BankAccountInfo) -> Result<AccountBalance, ProviderError>;

    async fn get_transaction_history(
        &self,
        account: &BankAccountInfo,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<ProviderTransaction>, ProviderError>;

    async fn is_available(&self) -> bool;

    async fn amount_limits(&self) -> Result<AmountLimits, ProviderError>;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("{provider} is not configured: {reason}")]
    NotConfigured { provider: ProviderId, reason: String },
    #[error("{provider} does not support {operation}")]
    Unsupported {
        provider: ProviderId,
        operation: &'static str,
    },
    #[error("{provider} request failed: {message}")]
    Transport { provider: ProviderId, message: String },
    #[error("{provider} rejected the request ({code}): {message}")]
    Rejected {
        provider: ProviderId,
        code: ProviderErrorCode,
        message: String,
    },
    #[error("{provider} returned an unexpected response: {message}")]
    InvalidResponse { provider: ProviderId, message: String },
}

impl ProviderError {
    pub fn provider(&self) -> ProviderId {
        match self {
            ProviderError::NotConfigured { provider, .. }
            | ProviderError::Unsupported { provider, .. }
            | ProviderError::Transport { provider, .. }
            | ProviderError::Rejected { provider, .. }
            | ProviderError::InvalidResponse { provider, .. } => *provider,
        }
    }
}

impl From<ProviderError> for PayoutError {
    fn from(value: ProviderError) -> Self {
        PayoutError::external(value.provider().id(), value.to_string())
    }
}
