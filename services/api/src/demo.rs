use crate::infra::{build_world, parse_date, PayoutWorld, ProviderMode};
use chrono::{DateTime, Duration, Months, NaiveDate, Utc};
use clap::Args;
use rent_payouts::clock::{Clock, ManualClock};
use rent_payouts::config::{AppConfig, ServiceConfig, ServiceKind};
use rent_payouts::error::{AppError, PayoutError};
use rent_payouts::payouts::{
    BatchId, BatchMetadata, BatchType, CompletedVisit, ItemOutcome, PaidRent, PayoutBatch,
    PayoutBreakdown, PayoutCalculation, PayoutLedger, PayoutPeriod, Recipient, RecipientType,
    SignedContract, TransferRecord, TransferStatus, VisitType, PLATFORM_ACCOUNT_ID,
};
use rent_payouts::providers::{
    AccountType, BankAccountInfo, ProviderErrorCode, ProviderId, SandboxFactory, SandboxOutcome,
    VerificationStatus,
};
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;

const DEMO_OWNERS: [(&str, &str, i64); 4] = [
    ("owner-ana", "Ana Rojas", 650_000),
    ("owner-benja", "Benjamín Soto", 820_000),
    ("owner-carla", "Carla Muñoz", 540_000),
    ("owner-diego", "Diego Fuentes", 30_000),
];

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Business date to run the cycle on (YYYY-MM-DD). Defaults to today.
    #[arg(long, value_parser = parse_date)]
    pub(crate) as_of: Option<NaiveDate>,
    /// Seed a burst of recent payouts so one owner is held by fraud screening.
    #[arg(long)]
    pub(crate) risky: bool,
    /// Make the WebPay sandbox decline every transfer routed to it.
    #[arg(long)]
    pub(crate) decline: bool,
    /// Print the final batch as JSON instead of a summary.
    #[arg(long)]
    pub(crate) json: bool,
}

#[derive(Args, Debug)]
pub(crate) struct CalculateArgs {
    /// Recipient type to calculate (broker, owner, runner, maintenance_provider, service_provider)
    #[arg(long, default_value = "owner", value_parser = parse_recipient_type)]
    pub(crate) recipient_type: RecipientType,
    /// First day of the period (YYYY-MM-DD). Defaults to the current cycle.
    #[arg(long, value_parser = parse_date)]
    pub(crate) start: Option<NaiveDate>,
    /// Last day of the period (YYYY-MM-DD). Defaults to the current cycle.
    #[arg(long, value_parser = parse_date)]
    pub(crate) end: Option<NaiveDate>,
    /// Business date the demo earnings are dated on. Defaults to today.
    #[arg(long, value_parser = parse_date)]
    pub(crate) as_of: Option<NaiveDate>,
    /// Print the calculations as JSON.
    #[arg(long)]
    pub(crate) json: bool,
}

fn parse_recipient_type(raw: &str) -> Result<RecipientType, String> {
    RecipientType::parse(raw).ok_or_else(|| format!("unknown recipient type '{raw}'"))
}

/// Preview what the seeded demo recipients are owed without moving money.
pub(crate) async fn run_calculate(args: CalculateArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    let as_of = args.as_of.unwrap_or_else(|| Utc::now().date_naive());
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(business_instant(as_of)));
    let world = build_world(
        &config.engine,
        ProviderMode::Sandbox(Arc::new(SandboxFactory::new(clock.clone()))),
        vec![platform_account_config()],
        clock,
    )?;
    seed_recipients(&world, as_of)?;

    let calculations = world
        .api
        .calculator
        .calculate_pending_payouts(args.recipient_type, args.start, args.end)
        .await?;

    if args.json {
        match serde_json::to_string_pretty(&calculations) {
            Ok(rendered) => println!("{rendered}"),
            Err(err) => println!("Calculations unavailable: {err}"),
        }
    } else {
        render_calculations(&calculations);
    }
    Ok(())
}

fn business_instant(as_of: NaiveDate) -> DateTime<Utc> {
    as_of
        .and_hms_opt(15, 0, 0)
        .map(|naive| naive.and_utc())
        .unwrap_or_else(Utc::now)
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        as_of,
        risky,
        decline,
        json,
    } = args;

    let config = AppConfig::load()?;
    let as_of = as_of.unwrap_or_else(|| Utc::now().date_naive());
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(business_instant(as_of)));
    let sandboxes = Arc::new(SandboxFactory::new(clock.clone()));
    let world = build_world(
        &config.engine,
        ProviderMode::Sandbox(sandboxes.clone()),
        vec![platform_account_config()],
        clock.clone(),
    )?;

    seed_recipients(&world, as_of)?;
    if risky {
        seed_recent_burst(&world, "owner-ana", clock.as_ref(), as_of).await?;
    }
    if decline {
        sandboxes
            .provider(ProviderId::Webpay)
            .set_fallback_outcome(SandboxOutcome::Decline(ProviderErrorCode::InsufficientFunds));
    }

    println!("Rental payouts demo ({as_of})");
    let calculations = world
        .api
        .calculator
        .calculate_pending_payouts(RecipientType::Owner, None, None)
        .await?;
    render_calculations(&calculations);

    let batch = world
        .api
        .orchestrator
        .process_payout_batch(
            calculations,
            BatchMetadata::new(BatchType::Scheduled, "demo"),
            None,
        )
        .await?;
    let batch = release_held_items(&world, batch).await?;

    if json {
        match serde_json::to_string_pretty(&batch.view()) {
            Ok(rendered) => println!("{rendered}"),
            Err(err) => println!("Batch payload unavailable: {err}"),
        }
        return Ok(());
    }

    render_batch(&batch);
    render_stats(&world).await?;
    Ok(())
}

fn platform_account_config() -> ServiceConfig {
    let mut config = ServiceConfig::new(
        PLATFORM_ACCOUNT_ID,
        "Arriendos Plataforma SpA",
        ServiceKind::Internal,
    );
    config.settings = json!({
        "account_number": "9000-1234-55",
        "bank_code": "012",
        "rut": "76.543.210-3",
    });
    config
}

fn seed_recipients(world: &PayoutWorld, as_of: NaiveDate) -> Result<(), AppError> {
    for (index, (id, name, rent)) in DEMO_OWNERS.iter().enumerate() {
        world.earnings.add_recipient(Recipient {
            id: id.to_string(),
            recipient_type: RecipientType::Owner,
            name: name.to_string(),
            registered_on: as_of - Duration::days(400),
        });
        world.earnings.add_rent(PaidRent {
            id: format!("pay-{id}"),
            owner_id: id.to_string(),
            contract_number: format!("ARR-2025-{:03}", index + 1),
            amount: Decimal::from(*rent),
            paid_on: as_of,
        });

        // Carla banks with a WebPay-routed institution.
        let bank_code = if index == 2 { "001" } else { "012" };
        world
            .accounts
            .add_account(BankAccountInfo {
                id: format!("acc-{id}"),
                user_id: id.to_string(),
                bank_code: bank_code.to_string(),
                bank_name: "Banco".to_string(),
                account_type: AccountType::Vista,
                account_number: format!("012-3456-{:04}", 7890 + index),
                account_holder: name.to_string(),
                rut: Some("12.345.678-5".to_string()),
                is_primary: true,
                is_verified: true,
                verification_status: VerificationStatus::Verified,
            })
            .map_err(PayoutError::from)?;
    }

    world.earnings.add_recipient(Recipient {
        id: "broker-sur".to_string(),
        recipient_type: RecipientType::Broker,
        name: "Propiedades Sur".to_string(),
        registered_on: as_of - Duration::days(120),
    });
    world.earnings.add_contract(SignedContract {
        id: "contract-sur-1".to_string(),
        contract_number: "ARR-2025-101".to_string(),
        broker_id: "broker-sur".to_string(),
        monthly_rent: Decimal::from(1_400_000),
        signed_on: as_of,
    });
    world.earnings.add_recipient(Recipient {
        id: "runner-ema".to_string(),
        recipient_type: RecipientType::Runner,
        name: "Emanuel Vera".to_string(),
        registered_on: as_of - Duration::days(60),
    });
    for (index, minutes) in [45_u32, 30, 25].into_iter().enumerate() {
        world.earnings.add_visit(CompletedVisit {
            id: format!("visit-{index}"),
            runner_id: "runner-ema".to_string(),
            property_id: format!("prop-{}", 70 + index),
            completed_on: as_of,
            duration_minutes: minutes,
            visit_type: VisitType::Regular,
            property_price: Decimal::from(900_000),
            earnings: None,
        });
    }
    Ok(())
}

async fn seed_recent_burst(
    world: &PayoutWorld,
    recipient_id: &str,
    clock: &dyn Clock,
    as_of: NaiveDate,
) -> Result<(), AppError> {
    let last_month = as_of
        .checked_sub_months(Months::new(1))
        .unwrap_or(as_of - Duration::days(31));
    let amount = Decimal::from(1_000_000);
    let calculation = PayoutCalculation {
        recipient_id: recipient_id.to_string(),
        recipient_type: RecipientType::Owner,
        amount,
        currency: "CLP".to_string(),
        period: PayoutPeriod::calendar_month(last_month),
        breakdown: PayoutBreakdown {
            gross: amount,
            fees: Decimal::ZERO,
            taxes: Decimal::ZERO,
            net: amount,
        },
        items: Vec::new(),
    };
    let earlier = BatchId("batch-earlier".to_string());
    for minutes in 5..11 {
        let mut record = TransferRecord::for_calculation(
            &earlier,
            &calculation,
            TransferStatus::Completed,
            clock.now() - Duration::minutes(minutes),
        );
        record.provider = Some(ProviderId::BancoEstado.id().to_string());
        world
            .ledger
            .record_transfer(record)
            .await
            .map_err(PayoutError::from)?;
    }
    Ok(())
}

async fn release_held_items(world: &PayoutWorld, batch: PayoutBatch) -> Result<PayoutBatch, AppError> {
    let held: Vec<String> = batch
        .results
        .iter()
        .filter(|result| result.outcome == ItemOutcome::PendingApproval)
        .map(|result| result.recipient_id.clone())
        .collect();
    if held.is_empty() {
        return Ok(batch);
    }

    for alert in world.notifier.alerts() {
        println!("  Alert [{:?}] {}: {}", alert.severity, alert.title, alert.message);
    }
    for recipient_id in &held {
        let released = world
            .api
            .orchestrator
            .approve_payout(&batch.id, recipient_id, "demo-admin")
            .await?;
        println!(
            "  Released {} after review -> {:?}",
            recipient_id, released.outcome
        );
    }
    Ok(world.api.orchestrator.get_batch(&batch.id).await?)
}

fn render_calculations(calculations: &[PayoutCalculation]) {
    println!("\nPending payouts");
    if calculations.is_empty() {
        println!("- none above the minimum payout");
        return;
    }
    for calc in calculations {
        println!(
            "- {}: gross {} | fees {} | taxes {} | net {} {}",
            calc.recipient_id,
            calc.breakdown.gross,
            calc.breakdown.fees,
            calc.breakdown.taxes,
            calc.amount,
            calc.currency
        );
    }
}

fn render_batch(batch: &PayoutBatch) {
    let summary = batch.summary();
    println!(
        "\nBatch {} -> {:?} ({} recipients, {} total)",
        batch.id, batch.status, batch.total_recipients, batch.total_amount
    );
    println!(
        "- {} paid ({}) | {} awaiting approval | {} failed ({}) | {} skipped",
        summary.succeeded,
        summary.paid_amount,
        summary.pending_approval,
        summary.failed,
        summary.failed_amount,
        summary.skipped
    );
    for result in &batch.results {
        let detail = match (&result.transaction_id, &result.reason) {
            (Some(tx), _) => format!("tx {tx}"),
            (None, Some(reason)) => reason.clone(),
            (None, None) => String::new(),
        };
        println!(
            "  - {} {} via {}: {:?} {}",
            result.recipient_id,
            result.amount,
            result.provider.as_deref().unwrap_or("-"),
            result.outcome,
            detail
        );
    }
}

async fn render_stats(world: &PayoutWorld) -> Result<(), AppError> {
    let stats = world.api.orchestrator.payout_stats().await?;
    println!(
        "\nLedger: {} completed ({}) | {} failed | success rate {:.0}%",
        stats.completed_count,
        stats.completed_amount,
        stats.failed_count,
        stats.success_rate * 100.0
    );
    for (provider, totals) in &stats.by_provider {
        println!("- {provider}: {} transfers, {}", totals.count, totals.amount);
    }
    println!("Notices sent: {}", world.notifier.notices().len());
    Ok(())
}
