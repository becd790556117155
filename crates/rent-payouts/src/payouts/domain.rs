use std::fmt;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::BusinessRule;
use crate::fraud::RiskLevel;

/// Marketplace participant categories that receive payouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientType {
    Broker,
    Owner,
    Runner,
    MaintenanceProvider,
    ServiceProvider,
}

impl RecipientType {
    pub const ALL: [RecipientType; 5] = [
        RecipientType::Broker,
        RecipientType::Owner,
        RecipientType::Runner,
        RecipientType::MaintenanceProvider,
        RecipientType::ServiceProvider,
    ];

    pub const fn label(&self) -> &'static str {
        match self {
            RecipientType::Broker => "broker",
            RecipientType::Owner => "owner",
            RecipientType::Runner => "runner",
            RecipientType::MaintenanceProvider => "maintenance_provider",
            RecipientType::ServiceProvider => "service_provider",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|candidate| candidate.label() == normalized)
    }
}

impl fmt::Display for RecipientType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Inclusive date range a payout covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PayoutPeriod {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl PayoutPeriod {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// First to last day of the month containing `day`.
    pub fn calendar_month(day: NaiveDate) -> Self {
        let start = day.with_day(1).unwrap_or(day);
        let next_month = if start.month() == 12 {
            NaiveDate::from_ymd_opt(start.year() + 1, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(start.year(), start.month() + 1, 1)
        };
        let end = next_month
            .map(|next| next - Duration::days(1))
            .unwrap_or(start);
        Self { start, end }
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        day >= self.start && day <= self.end
    }

    pub fn is_valid(&self) -> bool {
        self.start <= self.end
    }
}

impl fmt::Display for PayoutPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Kind of business event behind a payout line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutItemType {
    Commission,
    RentalIncome,
    VisitEarning,
    JobCompletion,
}

/// One business event contributing to a calculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutItem {
    pub item_type: PayoutItemType,
    pub reference_id: String,
    pub amount: Decimal,
    pub date: NaiveDate,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutBreakdown {
    pub gross: Decimal,
    pub fees: Decimal,
    pub taxes: Decimal,
    pub net: Decimal,
}

/// Amount owed to one recipient for one period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutCalculation {
    pub recipient_id: String,
    pub recipient_type: RecipientType,
    pub amount: Decimal,
    pub currency: String,
    pub period: PayoutPeriod,
    pub breakdown: PayoutBreakdown,
    pub items: Vec<PayoutItem>,
}

impl PayoutCalculation {
    /// Check the arithmetic invariants a batch relies on.
    pub fn validate(&self, currency: &str) -> Result<(), String> {
        let who = &self.recipient_id;
        if who.trim().is_empty() {
            return Err("recipient_id is required".to_string());
        }
        if !self.period.is_valid() {
            return Err(format!("{who}: period start {} is after end {}", self.period.start, self.period.end));
        }
        if !self.currency.eq_ignore_ascii_case(currency) {
            return Err(format!("{who}: currency {} does not match {currency}", self.currency));
        }
        if self.amount <= Decimal::ZERO {
            return Err(format!("{who}: amount must be positive"));
        }

        let breakdown = &self.breakdown;
        if breakdown.fees < Decimal::ZERO || breakdown.taxes < Decimal::ZERO {
            return Err(format!("{who}: fees and taxes cannot be negative"));
        }
        if breakdown.net != breakdown.gross - breakdown.fees - breakdown.taxes {
            return Err(format!("{who}: net must equal gross minus fees and taxes"));
        }
        if self.amount != breakdown.net {
            return Err(format!("{who}: amount must equal the net breakdown"));
        }

        let item_total: Decimal = self.items.iter().map(|item| item.amount).sum();
        if item_total != breakdown.gross {
            return Err(format!("{who}: items sum to {item_total}, gross is {}", breakdown.gross));
        }

        Ok(())
    }

    /// Stable key for the recipient, role and period, forwarded to providers on transfer.
    pub fn idempotency_key(&self) -> String {
        format!(
            "payout:{}:{}:{}:{}",
            self.recipient_id, self.recipient_type, self.period.start, self.period.end
        )
    }
}

/// Unique batch identifier; doubles as the re-submission key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(pub String);

impl BatchId {
    pub fn generate() -> Self {
        Self(format!("batch_{}", uuid::Uuid::new_v4().simple()))
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl BatchStatus {
    pub const fn label(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Processing => "processing",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
        }
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self, BatchStatus::Completed | BatchStatus::Failed)
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(BatchStatus::Pending),
            "processing" => Some(BatchStatus::Processing),
            "completed" => Some(BatchStatus::Completed),
            "failed" => Some(BatchStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchType {
    Scheduled,
    Manual,
    Emergency,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchMetadata {
    pub batch_type: BatchType,
    pub triggered_by: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub awaiting_approval: bool,
    #[serde(default)]
    pub approved_by: Option<String>,
}

impl BatchMetadata {
    pub fn new(batch_type: BatchType, triggered_by: impl Into<String>) -> Self {
        Self {
            batch_type,
            triggered_by: triggered_by.into(),
            notes: None,
            awaiting_approval: false,
            approved_by: None,
        }
    }
}

/// Final disposition of one recipient inside a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemOutcome {
    Paid,
    PendingApproval,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutItemResult {
    pub recipient_id: String,
    pub recipient_type: RecipientType,
    pub amount: Decimal,
    pub outcome: ItemOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub business_rule: Option<BusinessRule>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_level: Option<RiskLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_score: Option<u8>,
}

impl PayoutItemResult {
    pub fn new(calculation: &PayoutCalculation, outcome: ItemOutcome) -> Self {
        Self {
            recipient_id: calculation.recipient_id.clone(),
            recipient_type: calculation.recipient_type,
            amount: calculation.amount,
            outcome,
            transaction_id: None,
            provider: None,
            reason: None,
            error_code: None,
            business_rule: None,
            risk_level: None,
            risk_score: None,
        }
    }
}

/// Counts and amounts grouped by item outcome.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub pending_approval: usize,
    pub failed: usize,
    pub skipped: usize,
    pub paid_amount: Decimal,
    pub pending_amount: Decimal,
    pub failed_amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutBatch {
    pub id: BatchId,
    pub status: BatchStatus,
    pub total_amount: Decimal,
    pub total_recipients: usize,
    pub payout_configs: Vec<PayoutCalculation>,
    pub metadata: BatchMetadata,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub results: Vec<PayoutItemResult>,
}

impl PayoutBatch {
    pub fn new(
        id: BatchId,
        payout_configs: Vec<PayoutCalculation>,
        metadata: BatchMetadata,
        created_at: DateTime<Utc>,
    ) -> Self {
        let total_amount = payout_configs.iter().map(|calc| calc.amount).sum();
        Self {
            id,
            status: BatchStatus::Pending,
            total_amount,
            total_recipients: payout_configs.len(),
            payout_configs,
            metadata,
            created_at,
            processed_at: None,
            completed_at: None,
            failure_reason: None,
            results: Vec::new(),
        }
    }

    pub fn summary(&self) -> BatchSummary {
        self.results
            .iter()
            .fold(BatchSummary::default(), |mut summary, result| {
                match result.outcome {
                    ItemOutcome::Paid => {
                        summary.succeeded += 1;
                        summary.paid_amount += result.amount;
                    }
                    ItemOutcome::PendingApproval => {
                        summary.pending_approval += 1;
                        summary.pending_amount += result.amount;
                    }
                    ItemOutcome::Failed => {
                        summary.failed += 1;
                        summary.failed_amount += result.amount;
                    }
                    ItemOutcome::Skipped => summary.skipped += 1,
                }
                summary
            })
    }

    pub fn view(&self) -> PayoutBatchView {
        PayoutBatchView {
            batch_id: self.id.clone(),
            status: self.status.label(),
            awaiting_approval: self.metadata.awaiting_approval,
            total_amount: self.total_amount,
            total_recipients: self.total_recipients,
            batch_type: self.metadata.batch_type,
            triggered_by: self.metadata.triggered_by.clone(),
            created_at: self.created_at,
            completed_at: self.completed_at,
            failure_reason: self.failure_reason.clone(),
            summary: self.summary(),
            results: self.results.clone(),
        }
    }
}

/// Operator-facing batch summary.
#[derive(Debug, Clone, Serialize)]
pub struct PayoutBatchView {
    pub batch_id: BatchId,
    pub status: &'static str,
    pub awaiting_approval: bool,
    pub total_amount: Decimal,
    pub total_recipients: usize,
    pub batch_type: BatchType,
    pub triggered_by: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub summary: BatchSummary,
    pub results: Vec<PayoutItemResult>,
}

/// Ledger state of a single disbursement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Completed,
    Pending,
    PendingApproval,
    Failed,
}

impl TransferStatus {
    pub const fn label(&self) -> &'static str {
        match self {
            TransferStatus::Completed => "completed",
            TransferStatus::Pending => "pending",
            TransferStatus::PendingApproval => "pending_approval",
            TransferStatus::Failed => "failed",
        }
    }

    /// Records that hold or have moved money for their recipient/period.
    pub const fn is_live(&self) -> bool {
        !matches!(self, TransferStatus::Failed)
    }
}

/// Ledger row describing one disbursement attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub id: String,
    pub batch_id: BatchId,
    pub recipient_id: String,
    pub recipient_type: RecipientType,
    pub period: PayoutPeriod,
    pub amount: Decimal,
    pub currency: String,
    pub status: TransferStatus,
    pub provider: Option<String>,
    pub transaction_id: Option<String>,
    pub idempotency_key: String,
    pub risk_level: Option<RiskLevel>,
    pub risk_score: Option<u8>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub approved_by: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl TransferRecord {
    pub fn for_calculation(
        batch_id: &BatchId,
        calculation: &PayoutCalculation,
        status: TransferStatus,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: format!("txr_{}", uuid::Uuid::new_v4().simple()),
            batch_id: batch_id.clone(),
            recipient_id: calculation.recipient_id.clone(),
            recipient_type: calculation.recipient_type,
            period: calculation.period,
            amount: calculation.amount,
            currency: calculation.currency.clone(),
            status,
            provider: None,
            transaction_id: None,
            idempotency_key: calculation.idempotency_key(),
            risk_level: None,
            risk_score: None,
            error_code: None,
            error_message: None,
            approved_by: None,
            recorded_at,
        }
    }

    /// Whether both records pay the same recipient in the same role for the same period.
    pub fn same_payout(&self, other: &TransferRecord) -> bool {
        self.recipient_id == other.recipient_id
            && self.recipient_type == other.recipient_type
            && self.period == other.period
    }
}

/// Filter for ledger transfer lookups. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct TransferQuery {
    pub recipient_id: Option<String>,
    pub batch_id: Option<BatchId>,
    pub statuses: Vec<TransferStatus>,
    pub period: Option<PayoutPeriod>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl TransferQuery {
    pub fn matches(&self, record: &TransferRecord) -> bool {
        self.recipient_id
            .as_ref()
            .map_or(true, |id| &record.recipient_id == id)
            && self
                .batch_id
                .as_ref()
                .map_or(true, |id| &record.batch_id == id)
            && (self.statuses.is_empty() || self.statuses.contains(&record.status))
            && self.period.map_or(true, |period| record.period == period)
            && self.since.map_or(true, |since| record.recorded_at >= since)
            && self.until.map_or(true, |until| record.recorded_at < until)
    }
}
