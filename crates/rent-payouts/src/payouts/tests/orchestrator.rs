use super::common::*;
use rust_decimal_macros::dec;
use serde_json::json;

use crate::error::{BusinessRule, PayoutError};
use crate::fraud::{FraudRules, RiskLevel};
use crate::payouts::domain::{BatchId, BatchStatus, ItemOutcome, RecipientType, TransferStatus};
use crate::providers::{ProviderErrorCode, ProviderId, SandboxOutcome};

fn rule_of(err: &PayoutError) -> Option<BusinessRule> {
    err.business_rule()
}

#[tokio::test]
async fn completes_batch_and_records_each_transfer() {
    let harness = Harness::new();
    harness.with_accounts(&["owner-1", "owner-2"]);
    let orchestrator = harness.orchestrator();

    let batch = orchestrator
        .process_payout_batch(
            vec![
                calculation("owner-1", dec!(500000)),
                calculation("owner-2", dec!(300000)),
            ],
            metadata(),
            None,
        )
        .await
        .expect("batch runs");

    assert_eq!(batch.status, BatchStatus::Completed);
    assert_eq!(batch.total_amount, dec!(752000));
    let summary = batch.summary();
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.paid_amount, dec!(752000));
    assert!(batch
        .results
        .iter()
        .all(|result| result.provider.as_deref() == Some("banco_estado")));

    let records = harness.ledger.transfers();
    assert_eq!(records.len(), 2);
    assert!(records
        .iter()
        .all(|record| record.status == TransferStatus::Completed && record.transaction_id.is_some()));

    let requests = harness.sandbox(ProviderId::BancoEstado).requests();
    let keys: Vec<&str> = requests.iter().map(|r| r.idempotency_key.as_str()).collect();
    assert!(keys.contains(&"payout:owner-1:owner:2025-05-01:2025-05-31"));
    assert_eq!(requests[0].from.id, "platform_bank_account");

    assert_eq!(harness.notifier.notices().len(), 2);
    let stored = orchestrator.get_batch(&batch.id).await.expect("stored");
    assert_eq!(stored, batch);
}

#[tokio::test]
async fn daily_limit_fails_batch_before_any_transfer() {
    let harness = Harness::new();
    harness.with_accounts(&["owner-1", "owner-2", "owner-3"]);
    let orchestrator = harness.orchestrator();

    let err = orchestrator
        .process_payout_batch(
            vec![
                flat_calculation("owner-1", dec!(4000000)),
                flat_calculation("owner-2", dec!(4000000)),
                flat_calculation("owner-3", dec!(4000000)),
            ],
            metadata(),
            Some(BatchId("batch-12m".into())),
        )
        .await
        .expect_err("12M exceeds the 10M daily maximum");

    assert_eq!(rule_of(&err), Some(BusinessRule::DailyLimitExceeded));
    assert_eq!(harness.transfers_attempted(), 0);
    assert!(harness.ledger.transfers().is_empty());

    let stored = orchestrator
        .get_batch(&BatchId("batch-12m".into()))
        .await
        .expect("failed batch is kept");
    assert_eq!(stored.status, BatchStatus::Failed);
    assert!(stored
        .failure_reason
        .as_deref()
        .is_some_and(|reason| reason.contains("daily maximum")));
}

#[tokio::test]
async fn amounts_committed_today_count_toward_the_limit() {
    let harness = Harness::new();
    harness.with_accounts(&["owner-1"]);
    harness
        .seed(ledger_record(
            "owner-9",
            may(),
            TransferStatus::PendingApproval,
            dec!(9800000),
            now() - chrono::Duration::hours(2),
        ))
        .await;

    let err = harness
        .orchestrator()
        .process_payout_batch(vec![calculation("owner-1", dec!(500000))], metadata(), None)
        .await
        .expect_err("limit already nearly used");

    assert_eq!(rule_of(&err), Some(BusinessRule::DailyLimitExceeded));
    assert_eq!(harness.transfers_attempted(), 0);
}

#[tokio::test]
async fn resubmitted_batch_id_returns_the_stored_batch() {
    let harness = Harness::new();
    harness.with_accounts(&["owner-1"]);
    let orchestrator = harness.orchestrator();
    let id = BatchId("batch-2025-05-owners".into());

    let first = orchestrator
        .process_payout_batch(
            vec![calculation("owner-1", dec!(500000))],
            metadata(),
            Some(id.clone()),
        )
        .await
        .expect("first run");
    let second = orchestrator
        .process_payout_batch(
            vec![calculation("owner-1", dec!(500000))],
            metadata(),
            Some(id.clone()),
        )
        .await
        .expect("resubmission");

    assert_eq!(first, second);
    assert_eq!(harness.transfers_attempted(), 1);
}

#[tokio::test]
async fn failed_batch_id_cannot_be_reused() {
    let harness = Harness::new();
    harness.with_accounts(&["owner-1"]);
    let orchestrator = harness.orchestrator();
    let id = BatchId("batch-too-big".into());

    orchestrator
        .process_payout_batch(
            vec![flat_calculation("owner-1", dec!(11000000))],
            metadata(),
            Some(id.clone()),
        )
        .await
        .expect_err("over the daily limit");

    let err = orchestrator
        .process_payout_batch(
            vec![calculation("owner-1", dec!(500000))],
            metadata(),
            Some(id),
        )
        .await
        .expect_err("failed batches stay failed");
    assert_eq!(rule_of(&err), Some(BusinessRule::DuplicateBatch));
}

#[tokio::test]
async fn invalid_batches_are_rejected_up_front() {
    let harness = Harness::new();
    let orchestrator = harness.orchestrator();

    let empty = orchestrator
        .process_payout_batch(Vec::new(), metadata(), None)
        .await;
    assert!(matches!(empty, Err(PayoutError::Validation(_))));

    let repeated = orchestrator
        .process_payout_batch(
            vec![
                calculation("owner-1", dec!(500000)),
                calculation("owner-1", dec!(200000)),
            ],
            metadata(),
            None,
        )
        .await;
    assert!(matches!(repeated, Err(PayoutError::Validation(message)) if message.contains("more than once")));

    let tiny = orchestrator
        .process_payout_batch(vec![flat_calculation("owner-1", dec!(1000))], metadata(), None)
        .await;
    assert!(matches!(tiny, Err(PayoutError::Validation(message)) if message.contains("minimum payout")));

    let mut foreign = calculation("owner-2", dec!(500000));
    foreign.currency = "USD".into();
    let currency = orchestrator
        .process_payout_batch(vec![foreign], metadata(), None)
        .await;
    assert!(matches!(currency, Err(PayoutError::Validation(_))));

    harness.payout_settings(json!({ "enabled": false })).await;
    let disabled = orchestrator
        .process_payout_batch(vec![calculation("owner-1", dec!(500000))], metadata(), None)
        .await
        .expect_err("engine disabled");
    assert_eq!(rule_of(&disabled), Some(BusinessRule::PayoutsDisabled));
    assert_eq!(harness.transfers_attempted(), 0);
}

#[tokio::test]
async fn kyc_rejection_reason_is_surfaced() {
    let harness = Harness::new();
    harness.with_accounts(&["owner-1", "owner-2"]);
    harness
        .kyc
        .set_level("owner-2", crate::payouts::collaborators::KycLevel::Basic);

    let batch = harness
        .orchestrator()
        .process_payout_batch(
            vec![
                calculation("owner-1", dec!(500000)),
                calculation("owner-2", dec!(500000)),
            ],
            metadata(),
            None,
        )
        .await
        .expect("batch runs");

    let rejected = batch
        .results
        .iter()
        .find(|result| result.recipient_id == "owner-2")
        .expect("owner-2 result");
    assert_eq!(rejected.outcome, ItemOutcome::Failed);
    assert_eq!(rejected.business_rule, Some(BusinessRule::KycNotSatisfied));
    assert!(rejected
        .reason
        .as_deref()
        .is_some_and(|reason| reason.contains("below the required")));
    assert_eq!(harness.transfers_attempted(), 1);
}

#[tokio::test]
async fn already_paid_recipients_are_skipped() {
    let harness = Harness::new();
    harness.with_accounts(&["owner-1"]);
    harness
        .seed(ledger_record(
            "owner-1",
            may(),
            TransferStatus::Completed,
            dec!(470000),
            now() - chrono::Duration::days(1),
        ))
        .await;

    let batch = harness
        .orchestrator()
        .process_payout_batch(vec![calculation("owner-1", dec!(500000))], metadata(), None)
        .await
        .expect("batch runs");

    assert_eq!(batch.results[0].outcome, ItemOutcome::Skipped);
    assert_eq!(batch.status, BatchStatus::Completed);
    assert_eq!(harness.transfers_attempted(), 0);
    assert_eq!(harness.ledger.transfers().len(), 1);
}

#[tokio::test]
async fn one_failing_recipient_does_not_stop_the_others() {
    let harness = Harness::new();
    harness.with_accounts(&["owner-ok"]);
    harness
        .accounts
        .add_account(bank_account("owner-declined", "001"))
        .expect("webpay account");
    harness
        .sandbox(ProviderId::Webpay)
        .set_fallback_outcome(SandboxOutcome::Decline(ProviderErrorCode::InsufficientFunds));
    harness
        .kyc
        .set_level("owner-unverified", crate::payouts::collaborators::KycLevel::None);

    let batch = harness
        .orchestrator()
        .process_payout_batch(
            vec![
                calculation("owner-ok", dec!(500000)),
                calculation("owner-no-account", dec!(500000)),
                calculation("owner-declined", dec!(500000)),
                calculation("owner-unverified", dec!(500000)),
            ],
            metadata(),
            None,
        )
        .await
        .expect("partial failure is a normal outcome");

    assert_eq!(batch.status, BatchStatus::Completed);
    let outcome = |id: &str| {
        batch
            .results
            .iter()
            .find(|result| result.recipient_id == id)
            .cloned()
            .expect("result present")
    };
    assert_eq!(outcome("owner-ok").outcome, ItemOutcome::Paid);
    assert_eq!(
        outcome("owner-no-account").business_rule,
        Some(BusinessRule::NoVerifiedAccount)
    );
    let declined = outcome("owner-declined");
    assert_eq!(declined.business_rule, Some(BusinessRule::TransferDeclined));
    assert_eq!(declined.error_code.as_deref(), Some("INSUFFICIENT_FUNDS"));
    assert_eq!(
        outcome("owner-unverified").business_rule,
        Some(BusinessRule::KycNotSatisfied)
    );

    let summary = batch.summary();
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 3);

    let failed: Vec<_> = harness
        .ledger
        .transfers()
        .into_iter()
        .filter(|record| record.status == TransferStatus::Failed)
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].recipient_id, "owner-declined");
    assert_eq!(failed[0].error_code.as_deref(), Some("INSUFFICIENT_FUNDS"));
}

#[tokio::test]
async fn unconfirmed_bank_account_is_rejected() {
    let harness = Harness::new();
    harness.with_accounts(&["owner-1"]);
    for provider in [ProviderId::BancoEstado, ProviderId::Webpay] {
        harness.sandbox(provider).reject_account("acc-owner-1");
    }

    let batch = harness
        .orchestrator()
        .process_payout_batch(vec![calculation("owner-1", dec!(500000))], metadata(), None)
        .await
        .expect("batch runs");

    assert_eq!(
        batch.results[0].business_rule,
        Some(BusinessRule::BankVerificationFailed)
    );
    assert_eq!(harness.transfers_attempted(), 0);
}

#[tokio::test]
async fn risky_payout_waits_for_approval_then_releases() {
    let harness = Harness::new();
    harness.with_accounts(&["owner-1"]);
    harness.seed_recent_burst("owner-1").await;
    let orchestrator = harness.orchestrator();

    let batch = orchestrator
        .process_payout_batch(vec![calculation("owner-1", dec!(500000))], metadata(), None)
        .await
        .expect("batch runs");

    let held = &batch.results[0];
    assert_eq!(held.outcome, ItemOutcome::PendingApproval);
    assert_eq!(held.risk_level, Some(RiskLevel::High));
    assert_eq!(held.risk_score, Some(80));
    assert_eq!(harness.transfers_attempted(), 0);

    let alerts = harness.notifier.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].kind, "payout_pending_approval");
    let pending: Vec<_> = harness
        .ledger
        .transfers()
        .into_iter()
        .filter(|record| record.status == TransferStatus::PendingApproval)
        .collect();
    assert_eq!(pending.len(), 1);
    let held_id = pending[0].id.clone();

    let released = orchestrator
        .approve_payout(&batch.id, "owner-1", "admin-7")
        .await
        .expect("approval succeeds");
    assert_eq!(released.outcome, ItemOutcome::Paid);
    assert_eq!(released.risk_level, Some(RiskLevel::High));
    assert_eq!(harness.transfers_attempted(), 1);

    let record = harness
        .ledger
        .transfers()
        .into_iter()
        .find(|record| record.id == held_id)
        .expect("same ledger row");
    assert_eq!(record.status, TransferStatus::Completed);
    assert_eq!(record.approved_by.as_deref(), Some("admin-7"));

    let stored = orchestrator.get_batch(&batch.id).await.expect("stored");
    assert_eq!(stored.results[0].outcome, ItemOutcome::Paid);

    let again = orchestrator
        .approve_payout(&batch.id, "owner-1", "admin-7")
        .await
        .expect_err("nothing left to approve");
    assert_eq!(rule_of(&again), Some(BusinessRule::ApprovalNotFound));
}

#[tokio::test]
async fn critical_risk_blocks_the_payout() {
    let harness = Harness::with_rules(FraudRules {
        average_multiplier: dec!(0.1),
        ..FraudRules::default()
    });
    harness.with_accounts(&["owner-1"]);
    harness.seed_recent_burst("owner-1").await;

    let batch = harness
        .orchestrator()
        .process_payout_batch(vec![calculation("owner-1", dec!(500000))], metadata(), None)
        .await
        .expect("batch runs");

    let blocked = &batch.results[0];
    assert_eq!(blocked.outcome, ItemOutcome::Failed);
    assert_eq!(blocked.business_rule, Some(BusinessRule::FraudBlocked));
    assert_eq!(blocked.risk_level, Some(RiskLevel::Critical));
    assert_eq!(harness.transfers_attempted(), 0);
}

#[tokio::test]
async fn large_batches_wait_for_batch_approval() {
    let harness = Harness::new();
    harness.with_accounts(&["owner-1", "owner-2"]);
    harness
        .payout_settings(json!({ "require_approval": true, "approval_threshold": "600000" }))
        .await;
    let orchestrator = harness.orchestrator();

    let batch = orchestrator
        .process_payout_batch(
            vec![
                calculation("owner-1", dec!(500000)),
                calculation("owner-2", dec!(500000)),
            ],
            metadata(),
            None,
        )
        .await
        .expect("batch is held");

    assert_eq!(batch.status, BatchStatus::Pending);
    assert!(batch.metadata.awaiting_approval);
    assert!(batch.results.is_empty());
    assert_eq!(harness.transfers_attempted(), 0);

    let approved = orchestrator
        .approve_batch(&batch.id, "admin-1")
        .await
        .expect("approval runs the batch");
    assert_eq!(approved.status, BatchStatus::Completed);
    assert_eq!(approved.metadata.approved_by.as_deref(), Some("admin-1"));
    assert_eq!(approved.summary().succeeded, 2);
    assert!(harness
        .ledger
        .transfers()
        .iter()
        .all(|record| record.approved_by.as_deref() == Some("admin-1")));

    let err = orchestrator
        .approve_batch(&batch.id, "admin-1")
        .await
        .expect_err("already processed");
    assert_eq!(rule_of(&err), Some(BusinessRule::BatchNotPending));
}

#[tokio::test]
async fn ledger_failure_after_transfer_keeps_the_transaction_id() {
    let harness = Harness::new();
    harness.with_accounts(&["owner-1"]);
    harness.ledger.set_transfer_writes(false);

    let batch = harness
        .orchestrator()
        .process_payout_batch(vec![calculation("owner-1", dec!(500000))], metadata(), None)
        .await
        .expect("batch runs");

    let result = &batch.results[0];
    assert_eq!(result.outcome, ItemOutcome::Failed);
    assert_eq!(result.error_code.as_deref(), Some("DATABASE_ERROR"));
    assert!(result.transaction_id.is_some());
    assert_eq!(harness.transfers_attempted(), 1);

    harness.ledger.set_transfer_writes(true);
    let retry = harness
        .orchestrator()
        .process_payout_batch(vec![calculation("owner-1", dec!(500000))], metadata(), None)
        .await
        .expect("retry runs");
    assert_eq!(retry.results[0].outcome, ItemOutcome::Skipped);
    assert_eq!(harness.transfers_attempted(), 1);
}

#[tokio::test]
async fn missing_platform_account_fails_each_item() {
    let harness = Harness::new();
    harness.with_accounts(&["owner-1"]);
    harness.platform_settings(json!({ "account_number": "n/a" })).await;

    let batch = harness
        .orchestrator()
        .process_payout_batch(vec![calculation("owner-1", dec!(500000))], metadata(), None)
        .await
        .expect("batch runs");

    assert_eq!(
        batch.results[0].business_rule,
        Some(BusinessRule::PlatformAccountMissing)
    );
    assert_eq!(harness.transfers_attempted(), 0);
}

#[tokio::test]
async fn notification_failures_are_not_payout_failures() {
    let harness = Harness::new();
    harness.with_accounts(&["owner-1"]);
    harness.notifier.set_failing(true);

    let batch = harness
        .orchestrator()
        .process_payout_batch(vec![calculation("owner-1", dec!(500000))], metadata(), None)
        .await
        .expect("batch runs");

    assert_eq!(batch.results[0].outcome, ItemOutcome::Paid);
}

#[tokio::test]
async fn stats_and_listing_reflect_the_ledger() {
    let harness = Harness::new();
    harness.with_accounts(&["owner-1", "owner-2"]);
    harness
        .kyc
        .set_level("owner-3", crate::payouts::collaborators::KycLevel::Basic);
    harness
        .seed(ledger_record(
            "owner-8",
            april(),
            TransferStatus::Failed,
            dec!(100000),
            now() - chrono::Duration::days(20),
        ))
        .await;
    let orchestrator = harness.orchestrator();

    let batch = orchestrator
        .process_payout_batch(
            vec![
                calculation("owner-1", dec!(500000)),
                calculation("owner-2", dec!(500000)),
                calculation("owner-3", dec!(500000)),
            ],
            metadata(),
            None,
        )
        .await
        .expect("batch runs");

    let stats = orchestrator.payout_stats().await.expect("stats");
    assert_eq!(stats.completed_count, 2);
    assert_eq!(stats.completed_amount, dec!(940000));
    assert_eq!(stats.failed_count, 1);
    assert!((stats.success_rate - 2.0 / 3.0).abs() < f64::EPSILON);
    assert_eq!(stats.by_provider["banco_estado"].count, 2);
    assert_eq!(stats.recent.len(), 3);

    let completed = orchestrator
        .list_batches(Some(BatchStatus::Completed))
        .await
        .expect("list");
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].id, batch.id);
    assert!(orchestrator
        .list_batches(Some(BatchStatus::Failed))
        .await
        .expect("list")
        .is_empty());

    let missing = orchestrator
        .get_batch(&BatchId("batch-missing".into()))
        .await
        .expect_err("unknown batch");
    assert!(matches!(missing, PayoutError::NotFound { .. }));
}

#[tokio::test]
async fn recipient_minimums_apply_to_submitted_calculations() {
    let harness = Harness::new();
    harness.with_accounts(&["runner-1"]);
    let mut visits = flat_calculation("runner-1", dec!(6000));
    visits.recipient_type = RecipientType::Runner;

    let batch = harness
        .orchestrator()
        .process_payout_batch(vec![visits.clone()], metadata(), None)
        .await
        .expect("runner minimum is lower than the default");
    assert_eq!(batch.results[0].outcome, ItemOutcome::Paid);

    let mut as_owner = visits;
    as_owner.recipient_type = RecipientType::Owner;
    let err = harness
        .orchestrator()
        .process_payout_batch(vec![as_owner], metadata(), None)
        .await
        .expect_err("owners need 50 000");
    assert!(matches!(err, PayoutError::Validation(_)));
    assert_eq!(harness.transfers_attempted(), 1);
}

#[tokio::test]
async fn one_person_can_be_paid_as_owner_and_broker_in_one_batch() {
    let harness = Harness::new();
    harness.with_accounts(&["user-5"]);
    let owner = calculation("user-5", dec!(500000));
    let mut broker = calculation("user-5", dec!(500000));
    broker.recipient_type = RecipientType::Broker;

    let batch = harness
        .orchestrator()
        .process_payout_batch(vec![owner, broker], metadata(), None)
        .await
        .expect("both roles are distinct payouts");

    assert_eq!(batch.summary().succeeded, 2);
    let requests = harness.sandbox(ProviderId::BancoEstado).requests();
    let mut keys: Vec<String> = requests.iter().map(|r| r.idempotency_key.clone()).collect();
    keys.sort();
    assert_eq!(
        keys,
        vec![
            "payout:user-5:broker:2025-05-01:2025-05-31".to_string(),
            "payout:user-5:owner:2025-05-01:2025-05-31".to_string(),
        ]
    );
    assert_eq!(harness.ledger.transfers().len(), 2);
}

#[tokio::test]
async fn concurrent_batch_approvals_pay_once() {
    let harness = Harness::new();
    harness.with_accounts(&["owner-1"]);
    harness
        .payout_settings(json!({ "require_approval": true, "approval_threshold": "100000" }))
        .await;
    let orchestrator = harness.orchestrator_over(YieldingLedger::new(harness.ledger.clone()));

    let batch = orchestrator
        .process_payout_batch(vec![calculation("owner-1", dec!(500000))], metadata(), None)
        .await
        .expect("batch is held");
    assert!(batch.metadata.awaiting_approval);

    let (first, second) = tokio::join!(
        orchestrator.approve_batch(&batch.id, "admin-1"),
        orchestrator.approve_batch(&batch.id, "admin-2"),
    );
    let outcomes = [first, second];
    let approved: Vec<_> = outcomes.iter().filter_map(|outcome| outcome.as_ref().ok()).collect();
    assert_eq!(approved.len(), 1);
    assert_eq!(approved[0].summary().succeeded, 1);
    let rejected = outcomes
        .iter()
        .find_map(|outcome| outcome.as_ref().err())
        .expect("the other approval loses");
    assert_eq!(rule_of(rejected), Some(BusinessRule::BatchNotPending));

    assert_eq!(harness.transfers_attempted(), 1);
    assert_eq!(harness.ledger.transfers().len(), 1);
}

#[tokio::test]
async fn concurrent_item_approvals_pay_once() {
    let harness = Harness::new();
    harness.with_accounts(&["owner-1"]);
    harness.seed_recent_burst("owner-1").await;
    let orchestrator = harness.orchestrator_over(YieldingLedger::new(harness.ledger.clone()));

    let batch = orchestrator
        .process_payout_batch(vec![calculation("owner-1", dec!(500000))], metadata(), None)
        .await
        .expect("batch runs");
    assert_eq!(batch.results[0].outcome, ItemOutcome::PendingApproval);

    let (first, second) = tokio::join!(
        orchestrator.approve_payout(&batch.id, "owner-1", "admin-1"),
        orchestrator.approve_payout(&batch.id, "owner-1", "admin-2"),
    );
    let outcomes = [first, second];
    assert_eq!(
        outcomes
            .iter()
            .filter(|outcome| matches!(outcome, Ok(result) if result.outcome == ItemOutcome::Paid))
            .count(),
        1
    );
    let rejected = outcomes
        .iter()
        .find_map(|outcome| outcome.as_ref().err())
        .expect("the other approval loses");
    assert_eq!(rule_of(rejected), Some(BusinessRule::ApprovalNotFound));

    assert_eq!(harness.transfers_attempted(), 1);
    let may_records: Vec<_> = harness
        .ledger
        .transfers()
        .into_iter()
        .filter(|record| record.period == may())
        .collect();
    assert_eq!(may_records.len(), 1);
    assert_eq!(may_records[0].status, TransferStatus::Completed);
}

#[tokio::test]
async fn overlapping_batches_pay_a_recipient_once() {
    let harness = Harness::new();
    harness.with_accounts(&["owner-1"]);
    let orchestrator = harness.orchestrator_over(YieldingLedger::new(harness.ledger.clone()));

    let (first, second) = tokio::join!(
        orchestrator.process_payout_batch(
            vec![calculation("owner-1", dec!(500000))],
            metadata(),
            Some(BatchId("batch-morning".into())),
        ),
        orchestrator.process_payout_batch(
            vec![calculation("owner-1", dec!(500000))],
            metadata(),
            Some(BatchId("batch-retry".into())),
        ),
    );
    let mut outcomes = vec![
        first.expect("first batch runs").results[0].outcome,
        second.expect("second batch runs").results[0].outcome,
    ];
    outcomes.sort_by_key(|outcome| format!("{outcome:?}"));
    assert_eq!(outcomes, vec![ItemOutcome::Paid, ItemOutcome::Skipped]);
    assert_eq!(harness.transfers_attempted(), 1);
    assert_eq!(harness.ledger.transfers().len(), 1);
}

#[tokio::test]
async fn unavailable_history_holds_the_payout_for_review() {
    let harness = Harness::new();
    harness.with_accounts(&["owner-1"]);
    let ledger = YieldingLedger::new(harness.ledger.clone());
    ledger.fail_history_lookups();

    let batch = harness
        .orchestrator_over(ledger)
        .process_payout_batch(vec![calculation("owner-1", dec!(500000))], metadata(), None)
        .await
        .expect("batch runs");

    let held = &batch.results[0];
    assert_eq!(held.outcome, ItemOutcome::PendingApproval);
    assert_eq!(held.risk_level, Some(RiskLevel::Medium));
    assert_eq!(held.risk_score, Some(50));
    assert_eq!(harness.transfers_attempted(), 0);

    let alerts = harness.notifier.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].details["flags"], json!(["evaluation_error"]));
    let records = harness.ledger.transfers();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, TransferStatus::PendingApproval);
}

#[tokio::test]
async fn failed_release_marks_the_held_record_failed() {
    let harness = Harness::new();
    harness.with_accounts(&["owner-1"]);
    harness.seed_recent_burst("owner-1").await;
    let orchestrator = harness.orchestrator();

    let batch = orchestrator
        .process_payout_batch(vec![calculation("owner-1", dec!(500000))], metadata(), None)
        .await
        .expect("batch runs");
    harness.platform_settings(json!({ "account_number": "n/a" })).await;

    let released = orchestrator
        .approve_payout(&batch.id, "owner-1", "admin-7")
        .await
        .expect("release is attempted");
    assert_eq!(released.business_rule, Some(BusinessRule::PlatformAccountMissing));

    let record = harness
        .ledger
        .transfers()
        .into_iter()
        .find(|record| record.period == may())
        .expect("held record");
    assert_eq!(record.status, TransferStatus::Failed);
    assert_eq!(record.approved_by.as_deref(), Some("admin-7"));
}
