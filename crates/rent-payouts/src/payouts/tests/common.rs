use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::response::Response;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::{json, Value};

use crate::clock::ManualClock;
use crate::config::{ConfigProvider, PayoutConfig, ServiceConfig, ServiceKind, PAYOUT_SETTINGS_ID};
use crate::fraud::{FraudAssessor, FraudRules};
use crate::payouts::calculator::{breakdown_for, PayoutCalculator};
use crate::payouts::collaborators::PLATFORM_ACCOUNT_ID;
use crate::payouts::domain::{
    BatchId, BatchMetadata, BatchStatus, BatchType, PayoutBatch, PayoutBreakdown,
    PayoutCalculation, PayoutItem, PayoutItemType, PayoutPeriod, RecipientType, TransferQuery,
    TransferRecord, TransferStatus,
};
use crate::payouts::ledger::{LedgerError, PayoutLedger};
use crate::payouts::memory::{
    InMemoryAccountDirectory, InMemoryConfigStore, InMemoryEarnings, InMemoryLedger,
    RecordingNotifier, StaticKycGate,
};
use crate::payouts::orchestrator::{OrchestratorParts, PayoutOrchestrator};
use crate::payouts::router::{payout_router, PayoutApi};
use crate::providers::{
    AccountType, BankAccountInfo, ProviderId, ProviderRegistry, SandboxFactory, SandboxProvider,
    VerificationStatus,
};

/// 11:00 local time on the second of June, after the May cycle closed.
pub(super) fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 2, 15, 0, 0).unwrap()
}

pub(super) fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

pub(super) fn may() -> PayoutPeriod {
    PayoutPeriod::new(day(2025, 5, 1), day(2025, 5, 31))
}

pub(super) fn april() -> PayoutPeriod {
    PayoutPeriod::new(day(2025, 4, 1), day(2025, 4, 30))
}

/// Owner payout for May with the default fee schedule applied to `gross`.
pub(super) fn calculation(recipient_id: &str, gross: Decimal) -> PayoutCalculation {
    let breakdown = breakdown_for(&PayoutConfig::default(), gross, false);
    PayoutCalculation {
        recipient_id: recipient_id.to_string(),
        recipient_type: RecipientType::Owner,
        amount: breakdown.net,
        currency: "CLP".to_string(),
        period: may(),
        breakdown,
        items: vec![PayoutItem {
            item_type: PayoutItemType::RentalIncome,
            reference_id: format!("rent-{recipient_id}"),
            amount: gross,
            date: day(2025, 5, 5),
            description: "May rent".to_string(),
        }],
    }
}

/// Fee-free payout whose net equals `amount`.
pub(super) fn flat_calculation(recipient_id: &str, amount: Decimal) -> PayoutCalculation {
    let mut calc = calculation(recipient_id, amount);
    calc.breakdown = PayoutBreakdown {
        gross: amount,
        fees: Decimal::ZERO,
        taxes: Decimal::ZERO,
        net: amount,
    };
    calc.amount = amount;
    calc
}

pub(super) fn metadata() -> BatchMetadata {
    BatchMetadata::new(BatchType::Manual, "finance-1")
}

pub(super) fn bank_account(user_id: &str, bank_code: &str) -> BankAccountInfo {
    BankAccountInfo {
        id: format!("acc-{user_id}"),
        user_id: user_id.to_string(),
        bank_code: bank_code.to_string(),
        bank_name: "BancoEstado".to_string(),
        account_type: AccountType::Vista,
        account_number: "012-3456-7890".to_string(),
        account_holder: format!("Holder {user_id}"),
        rut: Some("12.345.678-5".to_string()),
        is_primary: true,
        is_verified: true,
        verification_status: VerificationStatus::Verified,
    }
}

/// Ledger row for `recipient_id` recorded at `recorded_at`.
pub(super) fn ledger_record(
    recipient_id: &str,
    period: PayoutPeriod,
    status: TransferStatus,
    amount: Decimal,
    recorded_at: DateTime<Utc>,
) -> TransferRecord {
    let calc = flat_calculation(recipient_id, amount);
    let mut record = TransferRecord::for_calculation(
        &BatchId("batch-earlier".to_string()),
        &calc,
        status,
        recorded_at,
    );
    record.period = period;
    record.provider = Some("banco_estado".to_string());
    record
}

/// In-memory world around one orchestrator: sandbox providers, ledger and collaborators.
pub(super) struct Harness {
    pub clock: Arc<ManualClock>,
    pub store: Arc<InMemoryConfigStore>,
    pub config: Arc<ConfigProvider>,
    pub sandboxes: Arc<SandboxFactory>,
    pub registry: Arc<ProviderRegistry>,
    pub ledger: Arc<InMemoryLedger>,
    pub kyc: Arc<StaticKycGate>,
    pub accounts: Arc<InMemoryAccountDirectory>,
    pub notifier: Arc<RecordingNotifier>,
    pub earnings: Arc<InMemoryEarnings>,
    pub rules: FraudRules,
}

impl Harness {
    pub(super) fn new() -> Self {
        Self::with_rules(FraudRules::default())
    }

    pub(super) fn with_rules(rules: FraudRules) -> Self {
        let clock = Arc::new(ManualClock::new(now()));
        let store = Arc::new(InMemoryConfigStore::default());
        store.put(platform_settings(json!({ "account_number": "9000-1234-55" })));
        let config = Arc::new(ConfigProvider::new(
            store.clone(),
            clock.clone(),
            Duration::from_secs(300),
        ));
        let sandboxes = Arc::new(SandboxFactory::new(clock.clone()));
        let registry = Arc::new(ProviderRegistry::new(
            sandboxes.clone(),
            ProviderId::Webpay,
            clock.clone(),
        ));

        Self {
            clock,
            store,
            config,
            sandboxes,
            registry,
            ledger: Arc::new(InMemoryLedger::default()),
            kyc: Arc::new(StaticKycGate::allowing_all()),
            accounts: Arc::new(InMemoryAccountDirectory::default()),
            notifier: Arc::new(RecordingNotifier::default()),
            earnings: Arc::new(InMemoryEarnings::default()),
            rules,
        }
    }

    pub(super) fn orchestrator(&self) -> PayoutOrchestrator {
        self.orchestrator_over(self.ledger.clone())
    }

    /// Orchestrator writing through `ledger` instead of the harness ledger directly.
    pub(super) fn orchestrator_over(&self, ledger: Arc<dyn PayoutLedger>) -> PayoutOrchestrator {
        PayoutOrchestrator::new(OrchestratorParts {
            config: self.config.clone(),
            registry: self.registry.clone(),
            ledger,
            kyc: self.kyc.clone(),
            accounts: self.accounts.clone(),
            notifier: self.notifier.clone(),
            fraud: Arc::new(FraudAssessor::new(self.rules.clone())),
            clock: self.clock.clone(),
        })
        .with_call_timeout(Duration::from_secs(5))
    }

    pub(super) fn calculator(&self) -> PayoutCalculator {
        PayoutCalculator::new(self.earnings.clone(), self.config.clone(), self.clock.clone())
    }

    pub(super) fn router(&self) -> axum::Router {
        payout_router(Arc::new(PayoutApi {
            calculator: Arc::new(self.calculator()),
            orchestrator: Arc::new(self.orchestrator()),
        }))
    }

    pub(super) fn sandbox(&self, provider: ProviderId) -> Arc<SandboxProvider> {
        self.sandboxes.provider(provider)
    }

    /// Transfers attempted across every sandbox.
    pub(super) fn transfers_attempted(&self) -> usize {
        ProviderId::ALL
            .into_iter()
            .map(|provider| self.sandbox(provider).transfer_count())
            .sum()
    }

    /// Register a verified primary account at BancoEstado for each recipient.
    pub(super) fn with_accounts(&self, recipients: &[&str]) {
        for recipient in recipients {
            self.accounts
                .add_account(bank_account(recipient, "012"))
                .expect("account registers");
        }
    }

    /// Overlay the payout settings and drop the cached copy.
    pub(super) async fn payout_settings(&self, settings: Value) {
        let mut config = ServiceConfig::new(PAYOUT_SETTINGS_ID, "Payouts", ServiceKind::Internal);
        config.settings = settings;
        self.store.put(config);
        self.config.invalidate().await;
    }

    pub(super) async fn platform_settings(&self, settings: Value) {
        self.store.put(platform_settings(settings));
        self.config.invalidate().await;
    }

    pub(super) async fn seed(&self, record: TransferRecord) {
        self.ledger
            .record_transfer(record)
            .await
            .expect("seed ledger record");
    }

    /// Six completed April payouts in the last hour, a burst the fraud screen notices.
    pub(super) async fn seed_recent_burst(&self, recipient_id: &str) {
        for minutes in 5..11 {
            self.seed(ledger_record(
                recipient_id,
                april(),
                TransferStatus::Completed,
                Decimal::from(1_000_000),
                now() - chrono::Duration::minutes(minutes),
            ))
            .await;
        }
    }
}

fn platform_settings(settings: Value) -> ServiceConfig {
    let mut config =
        ServiceConfig::new(PLATFORM_ACCOUNT_ID, "Arriendos Plataforma SpA", ServiceKind::Internal);
    config.settings = settings;
    config
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("body to bytes");
    serde_json::from_slice(&body).expect("json body")
}

/// Ledger that hands control back to the scheduler before every call, the way a networked
/// store would. Per-recipient history lookups can be switched off on their own.
pub(super) struct YieldingLedger {
    inner: Arc<InMemoryLedger>,
    history_down: AtomicBool,
}

impl YieldingLedger {
    pub(super) fn new(inner: Arc<InMemoryLedger>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            history_down: AtomicBool::new(false),
        })
    }

    pub(super) fn fail_history_lookups(&self) {
        self.history_down.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl PayoutLedger for YieldingLedger {
    async fn create_batch(&self, batch: PayoutBatch) -> Result<(), LedgerError> {
        tokio::task::yield_now().await;
        self.inner.create_batch(batch).await
    }

    async fn update_batch(&self, batch: PayoutBatch) -> Result<(), LedgerError> {
        tokio::task::yield_now().await;
        self.inner.update_batch(batch).await
    }

    async fn transition_batch(
        &self,
        expected: BatchStatus,
        batch: PayoutBatch,
    ) -> Result<(), LedgerError> {
        tokio::task::yield_now().await;
        self.inner.transition_batch(expected, batch).await
    }

    async fn find_batch(&self, id: &BatchId) -> Result<Option<PayoutBatch>, LedgerError> {
        tokio::task::yield_now().await;
        self.inner.find_batch(id).await
    }

    async fn list_batches(
        &self,
        status: Option<BatchStatus>,
    ) -> Result<Vec<PayoutBatch>, LedgerError> {
        tokio::task::yield_now().await;
        self.inner.list_batches(status).await
    }

    async fn claim_transfer(&self, record: TransferRecord) -> Result<(), LedgerError> {
        tokio::task::yield_now().await;
        self.inner.claim_transfer(record).await
    }

    async fn release_claim(&self, record_id: &str) -> Result<(), LedgerError> {
        tokio::task::yield_now().await;
        self.inner.release_claim(record_id).await
    }

    async fn record_transfer(&self, record: TransferRecord) -> Result<(), LedgerError> {
        tokio::task::yield_now().await;
        self.inner.record_transfer(record).await
    }

    async fn transition_transfer(
        &self,
        expected: TransferStatus,
        record: TransferRecord,
    ) -> Result<(), LedgerError> {
        tokio::task::yield_now().await;
        self.inner.transition_transfer(expected, record).await
    }

    async fn list_transfers(
        &self,
        query: TransferQuery,
    ) -> Result<Vec<TransferRecord>, LedgerError> {
        tokio::task::yield_now().await;
        if query.recipient_id.is_some() && self.history_down.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("history replica offline".to_string()));
        }
        self.inner.list_transfers(query).await
    }
}
