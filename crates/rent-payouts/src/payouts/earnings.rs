//! Business events that produce money owed to marketplace participants.

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::domain::{PayoutPeriod, RecipientType};
use crate::error::PayoutError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipient {
    pub id: String,
    pub recipient_type: RecipientType,
    pub name: String,
    pub registered_on: NaiveDate,
}

impl Recipient {
    /// Whole days between registration and `today`.
    pub fn days_registered(&self, today: NaiveDate) -> i64 {
        (today - self.registered_on).num_days()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedContract {
    pub id: String,
    pub contract_number: String,
    pub broker_id: String,
    pub monthly_rent: Decimal,
    pub signed_on: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaidRent {
    pub id: String,
    pub owner_id: String,
    pub contract_number: String,
    pub amount: Decimal,
    pub paid_on: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisitType {
    #[default]
    Regular,
    Premium,
    Express,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedVisit {
    pub id: String,
    pub runner_id: String,
    pub property_id: String,
    pub completed_on: NaiveDate,
    pub duration_minutes: u32,
    #[serde(default)]
    pub visit_type: VisitType,
    pub property_price: Decimal,
    /// Earnings recorded when the visit closed, if any.
    #[serde(default)]
    pub earnings: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedJob {
    pub id: String,
    pub provider_id: String,
    pub amount: Decimal,
    pub completed_on: NaiveDate,
    pub description: String,
}

/// Read access to the marketplace records behind each recipient type.
#[async_trait]
pub trait EarningsSource: Send + Sync {
    async fn active_recipients(
        &self,
        recipient_type: RecipientType,
    ) -> Result<Vec<Recipient>, EarningsError>;

    async fn signed_contracts(
        &self,
        broker_id: &str,
        period: PayoutPeriod,
    ) -> Result<Vec<SignedContract>, EarningsError>;

    async fn paid_rents(
        &self,
        owner_id: &str,
        period: PayoutPeriod,
    ) -> Result<Vec<PaidRent>, EarningsError>;

    async fn completed_visits(
        &self,
        runner_id: &str,
        period: PayoutPeriod,
    ) -> Result<Vec<CompletedVisit>, EarningsError>;

    /// Jobs for maintenance and service providers alike.
    async fn completed_jobs(
        &self,
        provider_id: &str,
        period: PayoutPeriod,
    ) -> Result<Vec<CompletedJob>, EarningsError>;
}

#[derive(Debug, thiserror::Error)]
pub enum EarningsError {
    #[error("earnings source unavailable: {0}")]
    Unavailable(String),
    #[error("record {id} is inconsistent: {reason}")]
    Inconsistent { id: String, reason: String },
}

impl From<EarningsError> for PayoutError {
    fn from(value: EarningsError) -> Self {
        PayoutError::external("earnings", value.to_string())
    }
}
