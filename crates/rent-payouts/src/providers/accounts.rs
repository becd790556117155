//! Bank account descriptors and the small helpers every integration shares.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::capability::ProviderId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Checking,
    Savings,
    Vista,
    Rut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Pending,
    Verified,
    Failed,
    Expired,
}

/// Source or destination account for a transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankAccountInfo {
    pub id: String,
    pub user_id: String,
    pub bank_code: String,
    pub bank_name: String,
    pub account_type: AccountType,
    pub account_number: String,
    pub account_holder: String,
    #[serde(default)]
    pub rut: Option<String>,
    pub is_primary: bool,
    pub is_verified: bool,
    pub verification_status: VerificationStatus,
}

impl BankAccountInfo {
    /// Eligible as a payout destination.
    pub fn is_payable(&self) -> bool {
        self.is_verified && self.verification_status == VerificationStatus::Verified
    }

    pub fn masked_number(&self) -> String {
        mask_account_number(&normalize_account_number(&self.account_number))
    }

    pub fn view(&self) -> BankAccountView {
        BankAccountView {
            id: self.id.clone(),
            bank_code: self.bank_code.clone(),
            bank_name: self.bank_name.clone(),
            account_type: self.account_type,
            account_number: self.masked_number(),
            account_holder: self.account_holder.clone(),
            is_primary: self.is_primary,
            is_verified: self.is_verified,
        }
    }
}

/// Account representation safe to log or return to operators.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BankAccountView {
    pub id: String,
    pub bank_code: String,
    pub bank_name: String,
    pub account_type: AccountType,
    pub account_number: String,
    pub account_holder: String,
    pub is_primary: bool,
    pub is_verified: bool,
}

/// Pick the payout destination: the primary verified account, else the first verified one.
pub fn select_payout_account(accounts: &[BankAccountInfo]) -> Option<&BankAccountInfo> {
    accounts
        .iter()
        .find(|account| account.is_primary && account.is_payable())
        .or_else(|| accounts.iter().find(|account| account.is_payable()))
}

/// Keep the last four characters visible.
pub fn mask_account_number(number: &str) -> String {
    let chars: Vec<char> = number.chars().filter(|c| !c.is_whitespace()).collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let visible: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}", "*".repeat(chars.len() - 4), visible)
}

/// Strip separators commonly typed into Chilean account numbers.
pub fn normalize_account_number(number: &str) -> String {
    number
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '.'))
        .collect()
}

/// Chilean account numbers are 8 to 20 digits once separators are removed.
pub fn validate_chilean_account(number: &str) -> bool {
    let normalized = normalize_account_number(number);
    (8..=20).contains(&normalized.len()) && normalized.chars().all(|c| c.is_ascii_digit())
}

/// Bank code derived from the leading digits of an account number.
pub fn infer_bank_code(number: &str) -> Option<String> {
    let normalized = normalize_account_number(number);
    if normalized.len() < 3 || !normalized.chars().take(3).all(|c| c.is_ascii_digit()) {
        return None;
    }
    let prefix = &normalized[..3];
    const KNOWN: [&str; 12] = [
        "001", "009", "012", "014", "016", "027", "028", "031", "037", "039", "049", "051",
    ];
    KNOWN.contains(&prefix).then(|| prefix.to_string())
}

/// Expected provider fee for moving `amount`.
pub fn estimate_transfer_cost(provider: ProviderId, amount: Decimal) -> Decimal {
    let cost = match provider {
        ProviderId::Webpay => amount * Decimal::new(8, 3),
        ProviderId::BancoEstado => Decimal::from(300),
        ProviderId::Paypal => amount * Decimal::new(34, 3) + Decimal::from(100),
        ProviderId::Stripe => amount * Decimal::new(25, 4),
    };
    cost.round_dp(0)
}
