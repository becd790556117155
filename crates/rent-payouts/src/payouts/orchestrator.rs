//! Batch orchestration: gates, per-recipient pipelines and approval actions.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveTime, TimeZone, Utc};
use futures::future::join_all;
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{info, warn};

use super::collaborators::{
    platform_account, AlertSeverity, BankAccountDirectory, KycGate, PayoutNotice, PayoutNotifier,
    SystemAlert, PLATFORM_ACCOUNT_ID,
};
use super::domain::{
    BatchId, BatchMetadata, BatchStatus, ItemOutcome, PayoutBatch, PayoutCalculation,
    PayoutItemResult, TransferQuery, TransferRecord, TransferStatus,
};
use super::ledger::{LedgerError, PayoutLedger};
use super::stats::{summarize, PayoutStats};
use crate::clock::Clock;
use crate::config::{ConfigProvider, PayoutConfig};
use crate::error::{BusinessRule, PayoutError};
use crate::fraud::{FraudAssessment, FraudAssessor, HistoricalTransaction, TransactionData};
use crate::providers::{
    select_payout_account, BankAccountInfo, ProviderRegistry, TransactionStatus, TransferRequest,
};
use crate::telemetry;

const LIVE_STATUSES: [TransferStatus; 3] = [
    TransferStatus::Completed,
    TransferStatus::Pending,
    TransferStatus::PendingApproval,
];
const HISTORY_DAYS: i64 = 30;

/// Collaborators the orchestrator drives.
pub struct OrchestratorParts {
    pub config: Arc<ConfigProvider>,
    pub registry: Arc<ProviderRegistry>,
    pub ledger: Arc<dyn PayoutLedger>,
    pub kyc: Arc<dyn KycGate>,
    pub accounts: Arc<dyn BankAccountDirectory>,
    pub notifier: Arc<dyn PayoutNotifier>,
    pub fraud: Arc<FraudAssessor>,
    pub clock: Arc<dyn Clock>,
}

/// How a single item is being processed.
#[derive(Debug, Clone)]
struct ItemRun {
    approved_by: Option<String>,
    /// Ledger record being released by an approval; its id is reused.
    held_record: Option<TransferRecord>,
}

impl ItemRun {
    fn is_release(&self) -> bool {
        self.held_record.is_some()
    }
}

pub struct PayoutOrchestrator {
    config: Arc<ConfigProvider>,
    registry: Arc<ProviderRegistry>,
    ledger: Arc<dyn PayoutLedger>,
    kyc: Arc<dyn KycGate>,
    accounts: Arc<dyn BankAccountDirectory>,
    notifier: Arc<dyn PayoutNotifier>,
    fraud: Arc<FraudAssessor>,
    clock: Arc<dyn Clock>,
    call_timeout: Duration,
}

impl PayoutOrchestrator {
    pub fn new(parts: OrchestratorParts) -> Self {
        Self {
            config: parts.config,
            registry: parts.registry,
            ledger: parts.ledger,
            kyc: parts.kyc,
            accounts: parts.accounts,
            notifier: parts.notifier,
            fraud: parts.fraud,
            clock: parts.clock,
            call_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &Arc<ConfigProvider> {
        &self.config
    }

    async fn bounded<F, T>(&self, service: &'static str, call: F) -> Result<T, PayoutError>
    where
        F: Future<Output = T>,
    {
        tokio::time::timeout(self.call_timeout, call)
            .await
            .map_err(|_| {
                PayoutError::external(
                    service,
                    format!("no answer within {} ms", self.call_timeout.as_millis()),
                )
            })
    }

    async fn enabled_config(&self) -> Result<PayoutConfig, PayoutError> {
        let config = self.config.payout_config().await?;
        if !config.enabled {
            return Err(PayoutError::business(
                BusinessRule::PayoutsDisabled,
                "automatic payouts are disabled",
            ));
        }
        Ok(config)
    }

    /// Create, gate and run a batch of payouts.
    ///
    /// Re-submitting an id returns the stored batch unless it failed.
    pub async fn process_payout_batch(
        &self,
        calculations: Vec<PayoutCalculation>,
        metadata: BatchMetadata,
        batch_id: Option<BatchId>,
    ) -> Result<PayoutBatch, PayoutError> {
        let config = self.enabled_config().await?;
        validate_batch(&calculations, &config)?;

        let id = batch_id.unwrap_or_else(BatchId::generate);
        let mut batch = PayoutBatch::new(id.clone(), calculations, metadata, self.clock.now());

        match self
            .bounded("ledger", self.ledger.create_batch(batch.clone()))
            .await?
        {
            Ok(()) => {}
            Err(LedgerError::Conflict(_)) => return self.resubmitted(&id).await,
            Err(err) => return Err(err.into()),
        }
        info!(
            batch_id = %id,
            recipients = batch.total_recipients,
            total = %batch.total_amount,
            batch_type = ?batch.metadata.batch_type,
            "payout batch created"
        );

        self.check_daily_limit(&mut batch, &config).await?;

        if config.require_approval && batch.total_amount > config.approval_threshold {
            batch.metadata.awaiting_approval = true;
            self.save_batch(&batch).await?;
            info!(
                batch_id = %id,
                total = %batch.total_amount,
                threshold = %config.approval_threshold,
                "batch held for approval"
            );
            return Ok(batch);
        }

        self.claim_batch(&mut batch).await?;
        self.run_batch(batch, &config, None).await
    }

    async fn resubmitted(&self, id: &BatchId) -> Result<PayoutBatch, PayoutError> {
        let stored = self
            .bounded("ledger", self.ledger.find_batch(id))
            .await??
            .ok_or_else(|| PayoutError::database("ledger.find_batch", format!("batch {id} vanished")))?;
        if stored.status == BatchStatus::Failed {
            return Err(PayoutError::business(
                BusinessRule::DuplicateBatch,
                format!("batch {id} already failed and cannot be resubmitted"),
            ));
        }
        info!(batch_id = %id, status = stored.status.label(), "batch already submitted");
        Ok(stored)
    }

    /// Fail the batch when it would push today's committed total over the daily maximum.
    async fn check_daily_limit(
        &self,
        batch: &mut PayoutBatch,
        config: &PayoutConfig,
    ) -> Result<(), PayoutError> {
        let committed = self.committed_today(&batch.id).await?;
        let projected = committed + batch.total_amount;
        if projected <= config.maximum_daily_payout {
            return Ok(());
        }

        let reason = format!(
            "batch total {} plus {} already committed today exceeds the daily maximum of {}",
            batch.total_amount, committed, config.maximum_daily_payout
        );
        warn!(batch_id = %batch.id, projected = %projected, "daily payout limit exceeded");
        batch.status = BatchStatus::Failed;
        batch.failure_reason = Some(reason.clone());
        batch.completed_at = Some(self.clock.now());
        self.save_batch(batch).await?;
        count_batch(batch);
        Err(PayoutError::business(BusinessRule::DailyLimitExceeded, reason))
    }

    async fn committed_today(&self, exclude: &BatchId) -> Result<Decimal, PayoutError> {
        let now = self.clock.now();
        let midnight = Utc.from_utc_datetime(&now.date_naive().and_time(NaiveTime::MIN));
        let records = self
            .bounded(
                "ledger",
                self.ledger.list_transfers(TransferQuery {
                    statuses: LIVE_STATUSES.to_vec(),
                    since: Some(midnight),
                    ..TransferQuery::default()
                }),
            )
            .await??;
        Ok(records
            .iter()
            .filter(|record| &record.batch_id != exclude)
            .map(|record| record.amount)
            .sum())
    }

    async fn save_batch(&self, batch: &PayoutBatch) -> Result<(), PayoutError> {
        self.bounded("ledger", self.ledger.update_batch(batch.clone()))
            .await??;
        Ok(())
    }

    /// Move a pending batch to processing. Only one caller wins.
    async fn claim_batch(&self, batch: &mut PayoutBatch) -> Result<(), PayoutError> {
        batch.status = BatchStatus::Processing;
        batch.processed_at = Some(self.clock.now());
        match self
            .bounded(
                "ledger",
                self.ledger
                    .transition_batch(BatchStatus::Pending, batch.clone()),
            )
            .await?
        {
            Ok(()) => Ok(()),
            Err(LedgerError::StatusChanged { .. }) => Err(PayoutError::business(
                BusinessRule::BatchNotPending,
                format!("batch {} was already picked up by another run", batch.id),
            )),
            Err(err) => Err(err.into()),
        }
    }

    async fn run_batch(
        &self,
        mut batch: PayoutBatch,
        config: &PayoutConfig,
        approved_by: Option<&str>,
    ) -> Result<PayoutBatch, PayoutError> {
        let run = ItemRun {
            approved_by: approved_by.map(str::to_string),
            held_record: None,
        };
        let pipelines = batch
            .payout_configs
            .iter()
            .map(|calculation| self.process_item(&batch.id, calculation, config, &run));
        batch.results = join_all(pipelines).await;

        batch.status = BatchStatus::Completed;
        batch.completed_at = Some(self.clock.now());
        self.save_batch(&batch).await?;
        count_batch(&batch);

        let summary = batch.summary();
        info!(
            batch_id = %batch.id,
            paid = summary.succeeded,
            pending_approval = summary.pending_approval,
            failed = summary.failed,
            skipped = summary.skipped,
            paid_amount = %summary.paid_amount,
            "payout batch completed"
        );
        Ok(batch)
    }

    async fn process_item(
        &self,
        batch_id: &BatchId,
        calculation: &PayoutCalculation,
        config: &PayoutConfig,
        run: &ItemRun,
    ) -> PayoutItemResult {
        let mut result = PayoutItemResult::new(calculation, ItemOutcome::Failed);
        if let Err(err) = self
            .run_item(batch_id, calculation, config, run, &mut result)
            .await
        {
            result.outcome = ItemOutcome::Failed;
            result.reason = Some(err.to_string());
            result.error_code = Some(err.error_code().to_string());
            result.business_rule = err.business_rule();
        }

        match result.outcome {
            ItemOutcome::Failed => warn!(
                batch_id = %batch_id,
                recipient_id = %calculation.recipient_id,
                reason = result.reason.as_deref().unwrap_or_default(),
                "payout failed"
            ),
            outcome => info!(
                batch_id = %batch_id,
                recipient_id = %calculation.recipient_id,
                outcome = ?outcome,
                "payout processed"
            ),
        }
        result
    }

    /// Claim the recipient/period, screen it, move the money and record the outcome.
    ///
    /// The claim is a `pending` ledger row written before any check, so concurrent runs
    /// covering the same payout see it and skip. It is dropped again if the payout never
    /// reaches a provider and marked `failed` if the provider call itself errors.
    async fn run_item(
        &self,
        batch_id: &BatchId,
        calculation: &PayoutCalculation,
        config: &PayoutConfig,
        run: &ItemRun,
        result: &mut PayoutItemResult,
    ) -> Result<(), PayoutError> {
        let claim = match &run.held_record {
            Some(held) => held.clone(),
            None => {
                let claim = TransferRecord::for_calculation(
                    batch_id,
                    calculation,
                    TransferStatus::Pending,
                    self.clock.now(),
                );
                match self
                    .bounded("ledger", self.ledger.claim_transfer(claim.clone()))
                    .await?
                {
                    Ok(()) => claim,
                    Err(LedgerError::AlreadyClaimed(existing)) => {
                        result.outcome = ItemOutcome::Skipped;
                        result.transaction_id = existing.transaction_id.clone();
                        result.reason = Some(format!(
                            "recipient already has a {} payout for {}",
                            existing.status.label(),
                            calculation.period
                        ));
                        return Ok(());
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        };

        let request = match self
            .prepare_transfer(batch_id, calculation, config, run, &claim, result)
            .await
        {
            Ok(Some(request)) => request,
            Ok(None) => return Ok(()),
            Err(err) => {
                if !run.is_release() {
                    self.drop_claim(&claim).await;
                }
                return Err(err);
            }
        };

        let transfer = match self
            .bounded("provider", self.registry.execute_smart_transfer(&request))
            .await
            .and_then(|sent| sent)
        {
            Ok(transfer) => transfer,
            Err(err) => {
                if !run.is_release() {
                    let failed = TransferRecord {
                        status: TransferStatus::Failed,
                        error_code: Some(err.error_code().to_string()),
                        error_message: Some(err.to_string()),
                        approved_by: run.approved_by.clone(),
                        recorded_at: self.clock.now(),
                        ..claim
                    };
                    self.write_failed(failed).await;
                }
                return Err(err);
            }
        };
        result.provider = Some(transfer.provider.clone());
        result.transaction_id = transfer.transaction_id.clone();

        let status = if !transfer.success {
            TransferStatus::Failed
        } else if transfer.status == TransactionStatus::Completed {
            TransferStatus::Completed
        } else {
            TransferStatus::Pending
        };
        let mut record = TransferRecord {
            status,
            recorded_at: self.clock.now(),
            ..claim
        };
        record.provider = Some(transfer.provider.clone());
        record.transaction_id = transfer.transaction_id.clone();
        record.error_code = transfer.error_code.clone();
        record.error_message = transfer.error_message.clone();
        record.risk_level = result.risk_level.or(record.risk_level);
        record.risk_score = result.risk_score.or(record.risk_score);
        if run.approved_by.is_some() {
            record.approved_by = run.approved_by.clone();
        }

        if let Err(err) = self
            .bounded("ledger", self.ledger.record_transfer(record))
            .await
            .and_then(|written| written.map_err(PayoutError::from))
        {
            let tx = transfer.transaction_id.as_deref().unwrap_or("unknown");
            return Err(PayoutError::database(
                "ledger.record_transfer",
                format!("transfer {tx} went through but was not recorded: {err}"),
            ));
        }

        if transfer.success {
            result.outcome = ItemOutcome::Paid;
        } else {
            result.outcome = ItemOutcome::Failed;
            result.business_rule = Some(BusinessRule::TransferDeclined);
            result.error_code = transfer.error_code.clone();
            result.reason = Some(
                transfer
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "transfer declined by provider".to_string()),
            );
        }

        self.notify_recipient(batch_id, calculation, result).await;
        Ok(())
    }

    /// Gates that run before money moves. `None` means the item was held for approval.
    async fn prepare_transfer(
        &self,
        batch_id: &BatchId,
        calculation: &PayoutCalculation,
        config: &PayoutConfig,
        run: &ItemRun,
        claim: &TransferRecord,
        result: &mut PayoutItemResult,
    ) -> Result<Option<TransferRequest>, PayoutError> {
        let recipient_id = calculation.recipient_id.as_str();

        if config.require_kyc {
            let eligibility = self
                .bounded("kyc", self.kyc.can_receive_payouts(recipient_id))
                .await??;
            if !eligibility.can_receive {
                return Err(PayoutError::business(
                    BusinessRule::KycNotSatisfied,
                    eligibility
                        .reason
                        .unwrap_or_else(|| "recipient cannot receive payouts".to_string()),
                ));
            }
        }

        let destination = self.destination_account(recipient_id, config).await?;

        if config.fraud_detection && !run.is_release() {
            let assessment = self.assess(calculation, &claim.id).await;
            result.risk_level = Some(assessment.risk_level);
            result.risk_score = Some(assessment.risk_score);
            if assessment.block_transaction {
                return Err(PayoutError::business(
                    BusinessRule::FraudBlocked,
                    format!("blocked by fraud screening: {}", assessment.summary()),
                ));
            }
            if assessment.requires_approval {
                self.hold_for_approval(batch_id, calculation, &assessment, claim)
                    .await?;
                result.outcome = ItemOutcome::PendingApproval;
                result.reason = Some(format!("held for manual approval: {}", assessment.summary()));
                return Ok(None);
            }
        }

        let source = self.platform_source().await?;
        Ok(Some(TransferRequest {
            from: source,
            to: destination,
            amount: calculation.amount,
            currency: calculation.currency.clone(),
            description: format!(
                "{} payout {}",
                calculation.recipient_type, calculation.period
            ),
            idempotency_key: calculation.idempotency_key(),
        }))
    }

    async fn drop_claim(&self, claim: &TransferRecord) {
        let released = self
            .bounded("ledger", self.ledger.release_claim(&claim.id))
            .await
            .and_then(|done| done.map_err(PayoutError::from));
        if let Err(err) = released {
            warn!(
                recipient_id = %claim.recipient_id,
                record_id = %claim.id,
                error = %err,
                "payout claim left in place"
            );
        }
    }

    async fn write_failed(&self, record: TransferRecord) {
        let recipient_id = record.recipient_id.clone();
        let written = self
            .bounded("ledger", self.ledger.record_transfer(record))
            .await
            .and_then(|done| done.map_err(PayoutError::from));
        if let Err(err) = written {
            warn!(%recipient_id, error = %err, "failed payout could not be recorded");
        }
    }

    async fn destination_account(
        &self,
        recipient_id: &str,
        config: &PayoutConfig,
    ) -> Result<BankAccountInfo, PayoutError> {
        let accounts = self
            .bounded("accounts", self.accounts.accounts_for(recipient_id))
            .await??;
        let destination = select_payout_account(&accounts).cloned().ok_or_else(|| {
            PayoutError::business(
                BusinessRule::NoVerifiedAccount,
                format!("recipient {recipient_id} has no verified bank account"),
            )
        })?;

        if config.require_bank_verification {
            let verification = self
                .bounded("provider", self.registry.verify_account_multi(&destination))
                .await?;
            if !verification.is_verified() {
                return Err(PayoutError::business(
                    BusinessRule::BankVerificationFailed,
                    format!(
                        "account {} could not be confirmed by any provider",
                        destination.masked_number()
                    ),
                ));
            }
        }
        Ok(destination)
    }

    /// Score the payout against the recipient's recent ledger history, leaving out its own claim.
    async fn assess(&self, calculation: &PayoutCalculation, claim_id: &str) -> FraudAssessment {
        let now = self.clock.now();
        let lookup = self
            .bounded(
                "ledger",
                self.ledger.list_transfers(TransferQuery {
                    recipient_id: Some(calculation.recipient_id.clone()),
                    since: Some(now - chrono::Duration::days(HISTORY_DAYS)),
                    ..TransferQuery::default()
                }),
            )
            .await
            .and_then(|listed| listed.map_err(PayoutError::from));

        let history = match lookup {
            Ok(records) => records,
            Err(err) => {
                warn!(
                    recipient_id = %calculation.recipient_id,
                    error = %err,
                    "payout history unavailable, holding for manual review"
                );
                return FraudAssessment::fail_open();
            }
        };

        let mut transaction = TransactionData::payout(
            calculation.recipient_id.clone(),
            calculation.amount,
            calculation.currency.clone(),
            now,
        );
        transaction.recipient_id = Some(calculation.recipient_id.clone());
        transaction.history = history
            .into_iter()
            .filter(|record| record.id != claim_id)
            .map(|record| HistoricalTransaction {
                amount: record.amount,
                timestamp: record.recorded_at,
                country: None,
                device_fingerprint: None,
            })
            .collect();
        self.fraud.assess_transaction(&transaction)
    }

    async fn hold_for_approval(
        &self,
        batch_id: &BatchId,
        calculation: &PayoutCalculation,
        assessment: &FraudAssessment,
        claim: &TransferRecord,
    ) -> Result<(), PayoutError> {
        let now = self.clock.now();
        let record = TransferRecord {
            status: TransferStatus::PendingApproval,
            risk_level: Some(assessment.risk_level),
            risk_score: Some(assessment.risk_score),
            recorded_at: now,
            ..claim.clone()
        };
        self.bounded("ledger", self.ledger.record_transfer(record))
            .await??;

        let alert = SystemAlert {
            kind: "payout_pending_approval".to_string(),
            severity: AlertSeverity::Warning,
            title: "Payout held for manual approval".to_string(),
            message: format!(
                "Payout of {} {} to {} needs review: {}",
                calculation.amount,
                calculation.currency,
                calculation.recipient_id,
                assessment.summary()
            ),
            details: json!({
                "batch_id": batch_id,
                "recipient_id": calculation.recipient_id,
                "amount": calculation.amount,
                "risk_level": assessment.risk_level,
                "risk_score": assessment.risk_score,
                "flags": assessment.flags,
                "recommendations": assessment.recommendations,
            }),
            raised_at: now,
        };
        match self
            .bounded("notifier", self.notifier.notify_system_alert(&alert))
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(error = %err, "approval alert not delivered"),
            Err(err) => warn!(error = %err, "approval alert not delivered"),
        }
        Ok(())
    }

    async fn platform_source(&self) -> Result<BankAccountInfo, PayoutError> {
        let missing = |reason: String| {
            PayoutError::business(
                BusinessRule::PlatformAccountMissing,
                format!("platform bank account unavailable: {reason}"),
            )
        };
        let settings = self
            .config
            .get_service_config(PLATFORM_ACCOUNT_ID)
            .await?
            .ok_or_else(|| missing("not configured".to_string()))?;
        platform_account(&settings).map_err(missing)
    }

    async fn notify_recipient(
        &self,
        batch_id: &BatchId,
        calculation: &PayoutCalculation,
        result: &PayoutItemResult,
    ) {
        let notice = PayoutNotice {
            batch_id: batch_id.clone(),
            recipient_type: calculation.recipient_type,
            outcome: result.outcome,
            amount: calculation.amount,
            currency: calculation.currency.clone(),
            period: calculation.period,
            transaction_id: result.transaction_id.clone(),
            provider: result.provider.clone(),
        };
        let delivered = self
            .bounded(
                "notifier",
                self.notifier
                    .notify_payout_processed(&calculation.recipient_id, &notice),
            )
            .await;
        let error = match delivered {
            Ok(Ok(())) => return,
            Ok(Err(err)) => err.to_string(),
            Err(err) => err.to_string(),
        };
        warn!(
            recipient_id = %calculation.recipient_id,
            error = %error,
            "payout notification not delivered"
        );
    }

    /// Release a batch held for approval. The daily limit is checked again.
    pub async fn approve_batch(
        &self,
        batch_id: &BatchId,
        approved_by: &str,
    ) -> Result<PayoutBatch, PayoutError> {
        let mut batch = self.get_batch(batch_id).await?;
        if batch.status != BatchStatus::Pending || !batch.metadata.awaiting_approval {
            return Err(PayoutError::business(
                BusinessRule::BatchNotPending,
                format!("batch {batch_id} is {} and not awaiting approval", batch.status.label()),
            ));
        }

        let config = self.enabled_config().await?;
        batch.metadata.awaiting_approval = false;
        batch.metadata.approved_by = Some(approved_by.to_string());
        self.claim_batch(&mut batch).await?;
        info!(batch_id = %batch_id, approved_by, "batch approved");

        self.check_daily_limit(&mut batch, &config).await?;
        self.run_batch(batch, &config, Some(approved_by)).await
    }

    /// Release one item held by fraud screening. KYC and account checks run again.
    pub async fn approve_payout(
        &self,
        batch_id: &BatchId,
        recipient_id: &str,
        approved_by: &str,
    ) -> Result<PayoutItemResult, PayoutError> {
        let not_found = || {
            PayoutError::business(
                BusinessRule::ApprovalNotFound,
                format!("no payout awaiting approval for {recipient_id} in batch {batch_id}"),
            )
        };

        let batch = self.get_batch(batch_id).await?;
        let previous = batch
            .results
            .iter()
            .find(|result| {
                result.recipient_id == recipient_id
                    && result.outcome == ItemOutcome::PendingApproval
            })
            .cloned()
            .ok_or_else(not_found)?;
        let calculation = batch
            .payout_configs
            .iter()
            .find(|calc| {
                calc.recipient_id == recipient_id && calc.recipient_type == previous.recipient_type
            })
            .cloned()
            .ok_or_else(not_found)?;
        let held = self
            .bounded(
                "ledger",
                self.ledger.list_transfers(TransferQuery {
                    recipient_id: Some(recipient_id.to_string()),
                    batch_id: Some(batch_id.clone()),
                    statuses: vec![TransferStatus::PendingApproval],
                    period: Some(calculation.period),
                    ..TransferQuery::default()
                }),
            )
            .await??
            .into_iter()
            .find(|record| record.recipient_type == calculation.recipient_type)
            .ok_or_else(not_found)?;

        let config = self.enabled_config().await?;
        let released = TransferRecord {
            status: TransferStatus::Pending,
            approved_by: Some(approved_by.to_string()),
            recorded_at: self.clock.now(),
            ..held
        };
        match self
            .bounded(
                "ledger",
                self.ledger
                    .transition_transfer(TransferStatus::PendingApproval, released.clone()),
            )
            .await?
        {
            Ok(()) => {}
            Err(LedgerError::StatusChanged { .. }) => return Err(not_found()),
            Err(err) => return Err(err.into()),
        }

        let run = ItemRun {
            approved_by: Some(approved_by.to_string()),
            held_record: Some(released.clone()),
        };
        let mut result = self
            .process_item(batch_id, &calculation, &config, &run)
            .await;
        result.risk_level = result.risk_level.or(previous.risk_level);
        result.risk_score = result.risk_score.or(previous.risk_score);

        let declined = result.business_rule == Some(BusinessRule::TransferDeclined);
        if result.outcome == ItemOutcome::Failed && !declined {
            let failed = TransferRecord {
                status: TransferStatus::Failed,
                error_code: result.error_code.clone(),
                error_message: result.reason.clone(),
                recorded_at: self.clock.now(),
                ..released
            };
            self.write_failed(failed).await;
        }

        info!(
            batch_id = %batch_id,
            recipient_id,
            approved_by,
            outcome = ?result.outcome,
            "held payout released"
        );

        let mut latest = self.get_batch(batch_id).await?;
        if let Some(slot) = latest.results.iter_mut().find(|slot| {
            slot.recipient_id == recipient_id
                && slot.recipient_type == calculation.recipient_type
                && slot.outcome == ItemOutcome::PendingApproval
        }) {
            *slot = result.clone();
        }
        self.save_batch(&latest).await?;
        Ok(result)
    }

    pub async fn get_batch(&self, batch_id: &BatchId) -> Result<PayoutBatch, PayoutError> {
        self.bounded("ledger", self.ledger.find_batch(batch_id))
            .await??
            .ok_or_else(|| PayoutError::NotFound {
                entity: "batch",
                id: batch_id.to_string(),
            })
    }

    pub async fn list_batches(
        &self,
        status: Option<BatchStatus>,
    ) -> Result<Vec<PayoutBatch>, PayoutError> {
        Ok(self
            .bounded("ledger", self.ledger.list_batches(status))
            .await??)
    }

    pub async fn payout_stats(&self) -> Result<PayoutStats, PayoutError> {
        let records = self
            .bounded("ledger", self.ledger.list_transfers(TransferQuery::default()))
            .await??;
        Ok(summarize(&records))
    }
}

fn validate_batch(
    calculations: &[PayoutCalculation],
    config: &PayoutConfig,
) -> Result<(), PayoutError> {
    if calculations.is_empty() {
        return Err(PayoutError::Validation("a batch needs at least one payout".to_string()));
    }
    let mut seen = HashSet::new();
    for calculation in calculations {
        calculation
            .validate(&config.currency)
            .map_err(PayoutError::Validation)?;
        let minimum = config.minimum_for(calculation.recipient_type);
        if calculation.amount < minimum {
            return Err(PayoutError::Validation(format!(
                "{}: {} is below the {} minimum payout of {minimum}",
                calculation.recipient_id, calculation.amount, calculation.recipient_type
            )));
        }
        let key = (
            calculation.recipient_id.as_str(),
            calculation.recipient_type,
            calculation.period,
        );
        if !seen.insert(key) {
            return Err(PayoutError::Validation(format!(
                "{} payout for {} {} appears more than once",
                calculation.period, calculation.recipient_type, calculation.recipient_id
            )));
        }
    }
    Ok(())
}

fn count_batch(batch: &PayoutBatch) {
    metrics::counter!(telemetry::BATCHES_TOTAL, "status" => batch.status.label()).increment(1);
}
