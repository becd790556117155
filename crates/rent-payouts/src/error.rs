use crate::config::ConfigError;
use crate::telemetry::TelemetryError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;

/// Process-level failures raised while starting or driving the binary.
#[derive(Debug)]
pub enum AppError {
    Config(ConfigError),
    Telemetry(TelemetryError),
    Io(std::io::Error),
    Payout(PayoutError),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(err) => write!(f, "configuration error: {}", err),
            AppError::Telemetry(err) => write!(f, "telemetry error: {}", err),
            AppError::Io(err) => write!(f, "io error: {}", err),
            AppError::Payout(err) => write!(f, "payout error: {}", err),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Config(err) => Some(err),
            AppError::Telemetry(err) => Some(err),
            AppError::Io(err) => Some(err),
            AppError::Payout(err) => Some(err),
        }
    }
}

impl From<ConfigError> for AppError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<TelemetryError> for AppError {
    fn from(value: TelemetryError) -> Self {
        Self::Telemetry(value)
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<PayoutError> for AppError {
    fn from(value: PayoutError) -> Self {
        Self::Payout(value)
    }
}

/// Machine-readable code attached to business rule violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusinessRule {
    PayoutsDisabled,
    DailyLimitExceeded,
    KycNotSatisfied,
    NoVerifiedAccount,
    BankVerificationFailed,
    FraudBlocked,
    PlatformAccountMissing,
    ProviderNotSupported,
    AmountOutOfRange,
    TransferDeclined,
    DuplicateBatch,
    BatchNotPending,
    ApprovalNotFound,
}

impl BusinessRule {
    pub const fn code(&self) -> &'static str {
        match self {
            BusinessRule::PayoutsDisabled => "payouts_disabled",
            BusinessRule::DailyLimitExceeded => "daily_limit_exceeded",
            BusinessRule::KycNotSatisfied => "kyc_not_satisfied",
            BusinessRule::NoVerifiedAccount => "no_verified_account",
            BusinessRule::BankVerificationFailed => "bank_verification_failed",
            BusinessRule::FraudBlocked => "fraud_blocked",
            BusinessRule::PlatformAccountMissing => "platform_account_missing",
            BusinessRule::ProviderNotSupported => "provider_not_supported",
            BusinessRule::AmountOutOfRange => "amount_out_of_range",
            BusinessRule::TransferDeclined => "transfer_declined",
            BusinessRule::DuplicateBatch => "duplicate_batch",
            BusinessRule::BatchNotPending => "batch_not_pending",
            BusinessRule::ApprovalNotFound => "approval_not_found",
        }
    }
}

impl fmt::Display for BusinessRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Error taxonomy shared by every payout component.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PayoutError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{message}")]
    BusinessRule { rule: BusinessRule, message: String },

    #[error("{service} call failed: {message}")]
    ExternalService { service: String, message: String },

    #[error("{operation} failed: {message}")]
    Database { operation: String, message: String },

    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("forbidden: {0}")]
    Forbidden(String),
}

impl PayoutError {
    pub fn business(rule: BusinessRule, message: impl Into<String>) -> Self {
        Self::BusinessRule {
            rule,
            message: message.into(),
        }
    }

    pub fn external(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExternalService {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn database(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Database {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            PayoutError::Validation(_) => "VALIDATION_ERROR",
            PayoutError::BusinessRule { .. } => "BUSINESS_LOGIC_ERROR",
            PayoutError::ExternalService { .. } => "EXTERNAL_SERVICE_ERROR",
            PayoutError::Database { .. } => "DATABASE_ERROR",
            PayoutError::NotFound { .. } => "NOT_FOUND",
            PayoutError::Forbidden(_) => "FORBIDDEN",
        }
    }

    pub fn business_rule(&self) -> Option<BusinessRule> {
        match self {
            PayoutError::BusinessRule { rule, .. } => Some(*rule),
            _ => None,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            PayoutError::Validation(_) | PayoutError::BusinessRule { .. } => {
                StatusCode::BAD_REQUEST
            }
            PayoutError::NotFound { .. } => StatusCode::NOT_FOUND,
            PayoutError::Forbidden(_) => StatusCode::FORBIDDEN,
            PayoutError::ExternalService { .. } | PayoutError::Database { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for PayoutError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!(code = self.error_code(), error = %self, "payout request failed");
        }

        let mut error = json!({
            "code": self.error_code(),
            "message": self.to_string(),
        });
        if let Some(rule) = self.business_rule() {
            error["business_rule"] = json!(rule.code());
        }

        (status, Json(json!({ "error": error }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_operator_status_codes() {
        assert_eq!(
            PayoutError::Validation("bad".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            PayoutError::business(BusinessRule::DailyLimitExceeded, "too much").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            PayoutError::Forbidden("viewer".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            PayoutError::database("ledger.create_batch", "down").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            PayoutError::external("webpay", "timeout").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn business_errors_expose_rule_codes() {
        let err = PayoutError::business(BusinessRule::FraudBlocked, "blocked by fraud screening");
        assert_eq!(err.business_rule(), Some(BusinessRule::FraudBlocked));
        assert_eq!(err.error_code(), "BUSINESS_LOGIC_ERROR");
        assert_eq!(err.to_string(), "blocked by fraud screening");
        assert_eq!(BusinessRule::FraudBlocked.to_string(), "fraud_blocked");
    }
}
