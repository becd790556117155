use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::{debug, info, warn};

use super::domain::{
    PayoutBreakdown, PayoutCalculation, PayoutItem, PayoutItemType, PayoutPeriod, RecipientType,
};
use super::earnings::{CompletedVisit, EarningsError, EarningsSource, Recipient, VisitType};
use crate::clock::Clock;
use crate::config::{ConfigProvider, PayoutConfig, RunnerRates};
use crate::error::PayoutError;

fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Earnings for a visit closed without a recorded amount.
pub fn visit_earnings(rates: &RunnerRates, visit: &CompletedVisit) -> Decimal {
    let mut earnings = Decimal::from(visit.duration_minutes) * rates.base_rate_per_minute;
    if visit.property_price >= rates.premium_property_threshold {
        earnings += rates.premium_property_bonus;
    }
    let multiplier = match visit.visit_type {
        VisitType::Regular => rates.visit_type_multipliers.regular,
        VisitType::Premium => rates.visit_type_multipliers.premium,
        VisitType::Express => rates.visit_type_multipliers.express,
    };
    (earnings * multiplier).round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
}

/// Fees, taxes and net for `gross`, waiving the platform commission when `in_grace`.
pub fn breakdown_for(config: &PayoutConfig, gross: Decimal, in_grace: bool) -> PayoutBreakdown {
    let platform = if in_grace {
        Decimal::ZERO
    } else {
        round_money(gross * config.platform_fee)
    };
    let fees = platform + round_money(gross * config.payment_provider_fee);
    let taxes = round_money(gross * config.tax_rate);
    PayoutBreakdown {
        gross,
        fees,
        taxes,
        net: gross - fees - taxes,
    }
}

/// Works out what each recipient of a type is owed for a period.
pub struct PayoutCalculator {
    earnings: Arc<dyn EarningsSource>,
    config: Arc<ConfigProvider>,
    clock: Arc<dyn Clock>,
}

impl PayoutCalculator {
    pub fn new(
        earnings: Arc<dyn EarningsSource>,
        config: Arc<ConfigProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            earnings,
            config,
            clock,
        }
    }

    /// Calculations worth paying, sorted by recipient id.
    ///
    /// Missing bounds default to the current billing cycle. Recipients whose events
    /// cannot be loaded are logged and left out.
    pub async fn calculate_pending_payouts(
        &self,
        recipient_type: RecipientType,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<PayoutCalculation>, PayoutError> {
        let config = self.config.payout_config().await?;
        let today = self.clock.now().date_naive();
        let cycle = config.billing_cycle(today);
        let period = PayoutPeriod::new(start.unwrap_or(cycle.start), end.unwrap_or(cycle.end));
        if !period.is_valid() {
            return Err(PayoutError::Validation(format!(
                "period start {} is after end {}",
                period.start, period.end
            )));
        }

        let recipients = self
            .earnings
            .active_recipients(recipient_type)
            .await
            .map_err(|err| PayoutError::database("earnings.active_recipients", err.to_string()))?;

        let minimum = config.minimum_for(recipient_type);
        let mut calculations = Vec::new();
        for recipient in &recipients {
            match self.calculate_for(&config, recipient, period, today).await {
                Ok(Some(calculation)) if calculation.amount >= minimum => {
                    calculations.push(calculation)
                }
                Ok(Some(calculation)) => debug!(
                    recipient_id = %recipient.id,
                    net = %calculation.amount,
                    minimum = %minimum,
                    "payout below minimum"
                ),
                Ok(None) => {}
                Err(err) => warn!(
                    recipient_id = %recipient.id,
                    recipient_type = %recipient_type,
                    error = %err,
                    "unable to calculate payout"
                ),
            }
        }
        calculations.sort_by(|a, b| a.recipient_id.cmp(&b.recipient_id));

        let total: Decimal = calculations.iter().map(|calc| calc.amount).sum();
        info!(
            recipient_type = %recipient_type,
            period = %period,
            recipients = calculations.len(),
            total = %total,
            "pending payouts calculated"
        );
        Ok(calculations)
    }

    async fn calculate_for(
        &self,
        config: &PayoutConfig,
        recipient: &Recipient,
        period: PayoutPeriod,
        today: NaiveDate,
    ) -> Result<Option<PayoutCalculation>, EarningsError> {
        let mut items = self.items_for(config, recipient, period).await?;
        items.retain(|item| item.amount > Decimal::ZERO);
        if items.is_empty() {
            return Ok(None);
        }
        items.sort_by(|a, b| {
            a.date
                .cmp(&b.date)
                .then_with(|| a.reference_id.cmp(&b.reference_id))
        });

        let gross: Decimal = items.iter().map(|item| item.amount).sum();
        let grace_days = config.grace_period_days(recipient.recipient_type);
        let in_grace = recipient.days_registered(today) < i64::from(grace_days);
        let breakdown = breakdown_for(config, gross, in_grace);

        Ok(Some(PayoutCalculation {
            recipient_id: recipient.id.clone(),
            recipient_type: recipient.recipient_type,
            amount: breakdown.net,
            currency: config.currency.clone(),
            period,
            breakdown,
            items,
        }))
    }

    async fn items_for(
        &self,
        config: &PayoutConfig,
        recipient: &Recipient,
        period: PayoutPeriod,
    ) -> Result<Vec<PayoutItem>, EarningsError> {
        let id = recipient.id.as_str();
        let items = match recipient.recipient_type {
            RecipientType::Broker => self
                .earnings
                .signed_contracts(id, period)
                .await?
                .into_iter()
                .map(|contract| PayoutItem {
                    item_type: PayoutItemType::Commission,
                    reference_id: contract.id,
                    amount: round_money(contract.monthly_rent * config.broker_commission_rate),
                    date: contract.signed_on,
                    description: format!("Commission for contract {}", contract.contract_number),
                })
                .collect(),
            RecipientType::Owner => self
                .earnings
                .paid_rents(id, period)
                .await?
                .into_iter()
                .map(|rent| PayoutItem {
                    item_type: PayoutItemType::RentalIncome,
                    reference_id: rent.id,
                    amount: rent.amount,
                    date: rent.paid_on,
                    description: format!("Rent for contract {}", rent.contract_number),
                })
                .collect(),
            RecipientType::Runner => self
                .earnings
                .completed_visits(id, period)
                .await?
                .into_iter()
                .map(|visit| {
                    let amount = visit
                        .earnings
                        .filter(|recorded| *recorded > Decimal::ZERO)
                        .unwrap_or_else(|| visit_earnings(&config.runner_rates, &visit));
                    PayoutItem {
                        item_type: PayoutItemType::VisitEarning,
                        description: format!("Visit to property {}", visit.property_id),
                        reference_id: visit.id,
                        amount,
                        date: visit.completed_on,
                    }
                })
                .collect(),
            RecipientType::MaintenanceProvider | RecipientType::ServiceProvider => self
                .earnings
                .completed_jobs(id, period)
                .await?
                .into_iter()
                .map(|job| PayoutItem {
                    item_type: PayoutItemType::JobCompletion,
                    reference_id: job.id,
                    amount: job.amount,
                    date: job.completed_on,
                    description: job.description,
                })
                .collect(),
        };
        Ok(items)
    }
}
