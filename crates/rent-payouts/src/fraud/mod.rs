//! Per-disbursement fraud screening.
//!
//! Six independent detectors inspect a [`TransactionData`] snapshot and emit
//! [`FraudPattern`]s. The assessor sums their scores into a 0..=100 risk score and
//! derives the policy decision from it. Nothing here performs I/O.

mod detectors;
mod policy;
mod rules;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

pub use detectors::DetectorError;
pub use policy::{APPROVAL_SCORE, CRITICAL_SCORE, HIGH_SCORE, MEDIUM_SCORE};
pub use rules::FraudRules;

use crate::telemetry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub const fn label(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    Velocity,
    Amount,
    Location,
    Device,
    Behavior,
    Network,
}

impl PatternType {
    /// Detector evaluation order.
    pub const ALL: [PatternType; 6] = [
        PatternType::Velocity,
        PatternType::Amount,
        PatternType::Location,
        PatternType::Device,
        PatternType::Behavior,
        PatternType::Network,
    ];

    pub const fn label(&self) -> &'static str {
        match self {
            PatternType::Velocity => "velocity",
            PatternType::Amount => "amount",
            PatternType::Location => "location",
            PatternType::Device => "device",
            PatternType::Behavior => "behavior",
            PatternType::Network => "network",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FraudPattern {
    pub pattern_type: PatternType,
    pub risk_score: u8,
    pub confidence: f64,
    pub description: String,
    pub metadata: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FraudAssessment {
    pub risk_level: RiskLevel,
    pub risk_score: u8,
    pub confidence: f64,
    pub patterns: Vec<FraudPattern>,
    pub recommendations: Vec<String>,
    pub requires_approval: bool,
    pub block_transaction: bool,
    pub flags: Vec<String>,
}

impl FraudAssessment {
    /// Verdict used when evaluation itself failed: hold for a human, never block.
    pub fn fail_open() -> Self {
        Self {
            risk_level: RiskLevel::Medium,
            risk_score: 50,
            confidence: 0.5,
            patterns: Vec::new(),
            recommendations: vec![policy::MANUAL_REVIEW.to_string()],
            requires_approval: true,
            block_transaction: false,
            flags: vec!["evaluation_error".to_string()],
        }
    }

    pub fn summary(&self) -> String {
        let fired: Vec<&str> = self.patterns.iter().map(|p| p.pattern_type.label()).collect();
        if fired.is_empty() {
            format!("{} risk (score {})", self.risk_level.label(), self.risk_score)
        } else {
            format!(
                "{} risk (score {}): {}",
                self.risk_level.label(),
                self.risk_score,
                fired.join(", ")
            )
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Payout,
    Transfer,
    Withdrawal,
    Deposit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub country: String,
    #[serde(default)]
    pub city: Option<String>,
}

/// Request context, when the disbursement was triggered from a client session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionMetadata {
    pub ip_address: Option<String>,
    /// Country the IP geolocates to.
    pub ip_country: Option<String>,
    pub proxy_detected: bool,
    pub user_agent: Option<String>,
    pub device_fingerprint: Option<String>,
    pub location: Option<Location>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalTransaction {
    pub amount: Decimal,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub device_fingerprint: Option<String>,
}

/// What is already known to be normal for the user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskProfile {
    pub known_countries: Vec<String>,
    pub known_devices: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionData {
    pub user_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub kind: TransactionKind,
    #[serde(default)]
    pub recipient_id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub metadata: TransactionMetadata,
    /// Earlier transactions of the same user, newest first or in any order.
    #[serde(default)]
    pub history: Vec<HistoricalTransaction>,
    #[serde(default)]
    pub profile: RiskProfile,
    pub occurred_at: DateTime<Utc>,
}

impl TransactionData {
    pub fn payout(
        user_id: impl Into<String>,
        amount: Decimal,
        currency: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            amount,
            currency: currency.into(),
            kind: TransactionKind::Payout,
            recipient_id: None,
            description: None,
            metadata: TransactionMetadata::default(),
            history: Vec::new(),
            profile: RiskProfile::default(),
            occurred_at,
        }
    }
}

/// Runs every detector and folds their patterns into a single verdict.
#[derive(Debug, Clone, Default)]
pub struct FraudAssessor {
    rules: FraudRules,
}

impl FraudAssessor {
    pub fn new(rules: FraudRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &FraudRules {
        &self.rules
    }

    pub fn assess_transaction(&self, transaction: &TransactionData) -> FraudAssessment {
        let assessment = match detectors::run_all(&self.rules, transaction) {
            Ok(patterns) => policy::decide(patterns),
            Err(err) => {
                warn!(
                    user_id = %transaction.user_id,
                    error = %err,
                    "fraud evaluation failed, holding for manual review"
                );
                FraudAssessment::fail_open()
            }
        };

        info!(
            user_id = %transaction.user_id,
            amount = %transaction.amount,
            risk_level = assessment.risk_level.label(),
            risk_score = assessment.risk_score,
            patterns = assessment.patterns.len(),
            requires_approval = assessment.requires_approval,
            block = assessment.block_transaction,
            "fraud assessment completed"
        );
        metrics::counter!(
            telemetry::FRAUD_ASSESSMENTS_TOTAL,
            "level" => assessment.risk_level.label()
        )
        .increment(1);

        assessment
    }
}

#[cfg(test)]
mod tests;
