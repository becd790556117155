use std::collections::BTreeMap;

use chrono::{Datelike, Duration, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::payouts::domain::{PayoutPeriod, RecipientType};

/// Cadence on which scheduled batches are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutSchedule {
    Immediate,
    Weekly,
    Monthly,
}

impl PayoutSchedule {
    pub const fn label(&self) -> &'static str {
        match self {
            PayoutSchedule::Immediate => "immediate",
            PayoutSchedule::Weekly => "weekly",
            PayoutSchedule::Monthly => "monthly",
        }
    }
}

/// Multipliers applied to visit earnings by visit type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisitMultipliers {
    pub regular: Decimal,
    pub premium: Decimal,
    pub express: Decimal,
}

impl Default for VisitMultipliers {
    fn default() -> Self {
        Self {
            regular: Decimal::ONE,
            premium: Decimal::new(15, 1),
            express: Decimal::new(12, 1),
        }
    }
}

/// Rate card for runner visits that carry no pre-computed earnings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerRates {
    pub base_rate_per_minute: Decimal,
    pub premium_property_threshold: Decimal,
    pub premium_property_bonus: Decimal,
    pub visit_type_multipliers: VisitMultipliers,
}

impl Default for RunnerRates {
    fn default() -> Self {
        Self {
            base_rate_per_minute: Decimal::from(500),
            premium_property_threshold: Decimal::from(1_000_000),
            premium_property_bonus: Decimal::from(200),
            visit_type_multipliers: VisitMultipliers::default(),
        }
    }
}

/// Per recipient type overrides.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecipientPolicy {
    /// Replaces the global minimum payout for this recipient type.
    pub minimum_payout: Option<Decimal>,
    /// Days after registration during which the platform commission is waived.
    pub grace_period_days: u32,
}

/// Process-wide payout tunables, overlaid from the `payout` service settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PayoutConfig {
    pub enabled: bool,
    pub schedule: PayoutSchedule,
    pub cutoff_day: u32,
    pub currency: String,
    pub minimum_payout: Decimal,
    pub maximum_daily_payout: Decimal,
    pub require_approval: bool,
    pub approval_threshold: Decimal,
    pub platform_fee: Decimal,
    pub payment_provider_fee: Decimal,
    pub tax_rate: Decimal,
    pub broker_commission_rate: Decimal,
    pub require_kyc: bool,
    pub require_bank_verification: bool,
    pub fraud_detection: bool,
    pub runner_rates: RunnerRates,
    pub recipient_policies: BTreeMap<RecipientType, RecipientPolicy>,
}

impl Default for PayoutConfig {
    fn default() -> Self {
        let mut recipient_policies = BTreeMap::new();
        recipient_policies.insert(
            RecipientType::Runner,
            RecipientPolicy {
                minimum_payout: Some(Decimal::from(5_000)),
                grace_period_days: 0,
            },
        );
        recipient_policies.insert(
            RecipientType::MaintenanceProvider,
            RecipientPolicy {
                minimum_payout: Some(Decimal::from(10_000)),
                grace_period_days: 15,
            },
        );
        recipient_policies.insert(
            RecipientType::ServiceProvider,
            RecipientPolicy {
                minimum_payout: Some(Decimal::from(5_000)),
                grace_period_days: 7,
            },
        );

        Self {
            enabled: true,
            schedule: PayoutSchedule::Monthly,
            cutoff_day: 1,
            currency: "CLP".to_string(),
            minimum_payout: Decimal::from(50_000),
            maximum_daily_payout: Decimal::from(10_000_000),
            require_approval: false,
            approval_threshold: Decimal::from(1_000_000),
            platform_fee: Decimal::new(5, 2),
            payment_provider_fee: Decimal::new(1, 2),
            tax_rate: Decimal::ZERO,
            broker_commission_rate: Decimal::new(5, 2),
            require_kyc: true,
            require_bank_verification: true,
            fraud_detection: true,
            runner_rates: RunnerRates::default(),
            recipient_policies,
        }
    }
}

impl PayoutConfig {
    /// Overlay a settings object on top of the defaults, then validate the result.
    pub fn from_settings(settings: &Value) -> Result<Self, String> {
        let mut merged = serde_json::to_value(Self::default())
            .map_err(|err| format!("unable to encode payout defaults: {err}"))?;
        if !settings.is_null() {
            if !settings.is_object() {
                return Err("payout settings must be a JSON object".to_string());
            }
            merge_json(&mut merged, settings);
        }

        let config: Self = serde_json::from_value(merged)
            .map_err(|err| format!("invalid payout settings: {err}"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        for (name, rate) in [
            ("platform_fee", self.platform_fee),
            ("payment_provider_fee", self.payment_provider_fee),
            ("tax_rate", self.tax_rate),
            ("broker_commission_rate", self.broker_commission_rate),
        ] {
            if rate < Decimal::ZERO || rate > Decimal::ONE {
                return Err(format!("{name} must be between 0 and 1, got {rate}"));
            }
        }

        if self.platform_fee + self.payment_provider_fee + self.tax_rate >= Decimal::ONE {
            return Err("combined fee and tax rates must stay below 1".to_string());
        }

        for (name, amount) in [
            ("minimum_payout", self.minimum_payout),
            ("maximum_daily_payout", self.maximum_daily_payout),
            ("approval_threshold", self.approval_threshold),
        ] {
            if amount < Decimal::ZERO {
                return Err(format!("{name} cannot be negative"));
            }
        }

        if !(1..=28).contains(&self.cutoff_day) {
            return Err("cutoff_day must be between 1 and 28".to_string());
        }

        if self.currency.trim().len() != 3 {
            return Err("currency must be a three letter ISO code".to_string());
        }

        Ok(())
    }

    /// Minimum net amount worth paying out for the recipient type.
    pub fn minimum_for(&self, recipient_type: RecipientType) -> Decimal {
        self.recipient_policies
            .get(&recipient_type)
            .and_then(|policy| policy.minimum_payout)
            .unwrap_or(self.minimum_payout)
    }

    pub fn grace_period_days(&self, recipient_type: RecipientType) -> u32 {
        self.recipient_policies
            .get(&recipient_type)
            .map(|policy| policy.grace_period_days)
            .unwrap_or(0)
    }

    /// Billing cycle containing `today` for the configured schedule.
    pub fn billing_cycle(&self, today: NaiveDate) -> PayoutPeriod {
        match self.schedule {
            PayoutSchedule::Weekly => {
                let offset = i64::from(today.weekday().num_days_from_monday());
                let start = today - Duration::days(offset);
                PayoutPeriod::new(start, start + Duration::days(6))
            }
            PayoutSchedule::Monthly if self.cutoff_day > 1 => {
                let anchor = if today.day() >= self.cutoff_day {
                    today
                } else {
                    first_of_previous_month(today)
                };
                let start = anchor
                    .with_day(self.cutoff_day)
                    .unwrap_or(anchor);
                let next = first_of_next_month(start);
                let end = next
                    .with_day(self.cutoff_day)
                    .map(|day| day - Duration::days(1))
                    .unwrap_or(next);
                PayoutPeriod::new(start, end)
            }
            PayoutSchedule::Monthly | PayoutSchedule::Immediate => PayoutPeriod::calendar_month(today),
        }
    }
}

fn first_of_next_month(date: NaiveDate) -> NaiveDate {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(date)
}

fn first_of_previous_month(date: NaiveDate) -> NaiveDate {
    let (year, month) = if date.month() == 1 {
        (date.year() - 1, 12)
    } else {
        (date.year(), date.month() - 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(date)
}

fn merge_json(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        merge_json(existing, value)
                    }
                    _ => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}
