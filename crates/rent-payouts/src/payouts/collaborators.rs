//! Narrow interfaces to the services the orchestrator consumes but does not own.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::domain::{BatchId, ItemOutcome, PayoutPeriod, RecipientType};
use crate::config::ServiceConfig;
use crate::error::PayoutError;
use crate::providers::{
    validate_chilean_account, AccountType, BankAccountInfo, VerificationStatus,
};

/// Service config whose settings describe the platform's source account.
pub const PLATFORM_ACCOUNT_ID: &str = "platform_bank_account";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KycLevel {
    None,
    Basic,
    Intermediate,
    Advanced,
}

impl KycLevel {
    /// Level a recipient must reach before money is sent to them.
    pub const PAYOUTS: KycLevel = KycLevel::Intermediate;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KycEligibility {
    pub can_receive: bool,
    #[serde(default)]
    pub reason: Option<String>,
    pub required_level: KycLevel,
    #[serde(default)]
    pub current_level: Option<KycLevel>,
    #[serde(default)]
    pub next_steps: Vec<String>,
}

impl KycEligibility {
    /// Eligibility derived from the recipient's verified level.
    pub fn for_level(current: Option<KycLevel>) -> Self {
        let required_level = KycLevel::PAYOUTS;
        match current {
            Some(level) if level >= required_level => Self {
                can_receive: true,
                reason: None,
                required_level,
                current_level: Some(level),
                next_steps: Vec::new(),
            },
            Some(level) => Self {
                can_receive: false,
                reason: Some(format!(
                    "KYC level {level:?} is below the required {required_level:?}"
                )),
                required_level,
                current_level: Some(level),
                next_steps: vec!["Upload proof of address".to_string()],
            },
            None => Self {
                can_receive: false,
                reason: Some("identity verification has not been started".to_string()),
                required_level,
                current_level: None,
                next_steps: vec![
                    "Upload national identity document".to_string(),
                    "Upload proof of address".to_string(),
                ],
            },
        }
    }
}

#[async_trait]
pub trait KycGate: Send + Sync {
    async fn can_receive_payouts(&self, recipient_id: &str) -> Result<KycEligibility, KycError>;
}

#[derive(Debug, thiserror::Error)]
pub enum KycError {
    #[error("kyc service unavailable: {0}")]
    Unavailable(String),
}

impl From<KycError> for PayoutError {
    fn from(value: KycError) -> Self {
        PayoutError::external("kyc", value.to_string())
    }
}

/// Registered bank accounts per user.
#[async_trait]
pub trait BankAccountDirectory: Send + Sync {
    async fn accounts_for(&self, user_id: &str) -> Result<Vec<BankAccountInfo>, DirectoryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("user {0} already has a primary account")]
    DuplicatePrimary(String),
    #[error("account directory unavailable: {0}")]
    Unavailable(String),
}

impl From<DirectoryError> for PayoutError {
    fn from(value: DirectoryError) -> Self {
        PayoutError::external("accounts", value.to_string())
    }
}

/// Build the platform's source account from the `platform_bank_account` settings.
pub fn platform_account(config: &ServiceConfig) -> Result<BankAccountInfo, String> {
    let settings = &config.settings;
    let text = |key: &str| settings.get(key).and_then(Value::as_str).map(str::trim);

    let account_number = text("account_number")
        .filter(|number| !number.is_empty())
        .ok_or_else(|| "account_number is not configured".to_string())?;
    if !validate_chilean_account(account_number) {
        return Err(format!("account_number '{account_number}' is not a valid account"));
    }

    let account_type = match settings.get("account_type") {
        Some(raw) => serde_json::from_value::<AccountType>(raw.clone())
            .map_err(|err| format!("account_type: {err}"))?,
        None => AccountType::Checking,
    };

    Ok(BankAccountInfo {
        id: PLATFORM_ACCOUNT_ID.to_string(),
        user_id: "platform".to_string(),
        bank_code: text("bank_code").unwrap_or("012").to_string(),
        bank_name: text("bank_name").unwrap_or("BancoEstado").to_string(),
        account_type,
        account_number: account_number.to_string(),
        account_holder: text("account_holder").unwrap_or(&config.name).to_string(),
        rut: text("rut").map(str::to_string),
        is_primary: true,
        is_verified: true,
        verification_status: VerificationStatus::Verified,
    })
}

/// Message sent to a recipient once their payout settles.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PayoutNotice {
    pub batch_id: BatchId,
    pub recipient_type: RecipientType,
    pub outcome: ItemOutcome,
    pub amount: Decimal,
    pub currency: String,
    pub period: PayoutPeriod,
    pub transaction_id: Option<String>,
    pub provider: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

/// Operator-facing alert, e.g. a disbursement held for approval.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemAlert {
    pub kind: String,
    pub severity: AlertSeverity,
    pub title: String,
    pub message: String,
    pub details: Value,
    pub raised_at: DateTime<Utc>,
}

#[async_trait]
pub trait PayoutNotifier: Send + Sync {
    async fn notify_payout_processed(
        &self,
        recipient_id: &str,
        notice: &PayoutNotice,
    ) -> Result<(), NotifierError>;

    async fn notify_system_alert(&self, alert: &SystemAlert) -> Result<(), NotifierError>;
}

#[derive(Debug, thiserror::Error)]
pub enum NotifierError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceKind;
    use serde_json::json;

    fn settings(value: Value) -> ServiceConfig {
        let mut config =
            ServiceConfig::new(PLATFORM_ACCOUNT_ID, "Arriendos SpA", ServiceKind::Internal);
        config.settings = value;
        config
    }

    #[test]
    fn kyc_levels_gate_payouts() {
        assert!(KycEligibility::for_level(Some(KycLevel::Advanced)).can_receive);
        assert!(KycEligibility::for_level(Some(KycLevel::Intermediate)).can_receive);

        let basic = KycEligibility::for_level(Some(KycLevel::Basic));
        assert!(!basic.can_receive);
        assert_eq!(basic.required_level, KycLevel::Intermediate);
        assert!(basic.reason.unwrap().contains("below"));

        let missing = KycEligibility::for_level(None);
        assert_eq!(missing.next_steps.len(), 2);
    }

    #[test]
    fn platform_account_defaults_bank_code() {
        let account = platform_account(&settings(json!({
            "account_number": "9000-1234-55",
            "rut": "76.123.456-7"
        })))
        .expect("account parses");
        assert_eq!(account.bank_code, "012");
        assert_eq!(account.account_type, AccountType::Checking);
        assert_eq!(account.account_holder, "Arriendos SpA");
        assert!(account.is_payable());
    }

    #[test]
    fn platform_account_requires_a_valid_number() {
        assert!(platform_account(&settings(json!({}))).is_err());
        let err = platform_account(&settings(json!({ "account_number": "12-AB" }))).unwrap_err();
        assert!(err.contains("not a valid account"));
    }
}
