//! Deterministic in-process provider used by the demo binary and the test suites.
//!
//! Every behavior is scripted up front: queued transfer outcomes, availability,
//! amount limits and verification answers. Nothing here is random.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use rust_decimal::Decimal;

use super::accounts::BankAccountInfo;
use super::capability::{
    AccountBalance, AmountLimits, BankTransactionResult, ProviderCapability, ProviderError,
    ProviderErrorCode, ProviderId, ProviderTransaction, TransactionStatus, TransferRequest,
    VerificationResult,
};
use super::registry::ProviderFactory;
use crate::clock::Clock;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// What the next transfer call should do.
#[derive(Debug, Clone, PartialEq)]
pub enum SandboxOutcome {
    Complete,
    Pending,
    Decline(ProviderErrorCode),
    /// The call itself fails, as a network or upstream outage would.
    Fail(String),
}

pub struct SandboxProvider {
    id: ProviderId,
    clock: Arc<dyn Clock>,
    available: AtomicBool,
    limits: Mutex<AmountLimits>,
    script: Mutex<VecDeque<SandboxOutcome>>,
    fallback_outcome: Mutex<SandboxOutcome>,
    verification_confidence: Mutex<f64>,
    rejected_accounts: Mutex<HashSet<String>>,
    balance: Mutex<Decimal>,
    transfers: Mutex<Vec<BankTransactionResult>>,
    requests: Mutex<Vec<TransferRequest>>,
    verifications: AtomicUsize,
}

impl SandboxProvider {
    pub fn new(id: ProviderId, clock: Arc<dyn Clock>) -> Self {
        Self {
            id,
            clock,
            available: AtomicBool::new(true),
            limits: Mutex::new(AmountLimits {
                min: Decimal::from(100),
                max: Decimal::from(100_000_000),
            }),
            script: Mutex::new(VecDeque::new()),
            fallback_outcome: Mutex::new(SandboxOutcome::Complete),
            verification_confidence: Mutex::new(0.9),
            rejected_accounts: Mutex::new(HashSet::new()),
            balance: Mutex::new(Decimal::from(500_000_000)),
            transfers: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
            verifications: AtomicUsize::new(0),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn set_limits(&self, min: Decimal, max: Decimal) {
        *lock(&self.limits) = AmountLimits { min, max };
    }

    /// Queue outcomes consumed one per transfer call, in order.
    pub fn push_outcomes(&self, outcomes: impl IntoIterator<Item = SandboxOutcome>) {
        lock(&self.script).extend(outcomes);
    }

    /// Outcome used once the queue is empty.
    pub fn set_fallback_outcome(&self, outcome: SandboxOutcome) {
        *lock(&self.fallback_outcome) = outcome;
    }

    pub fn set_verification_confidence(&self, confidence: f64) {
        *lock(&self.verification_confidence) = confidence;
    }

    pub fn reject_account(&self, account_id: impl Into<String>) {
        lock(&self.rejected_accounts).insert(account_id.into());
    }

    pub fn transfer_count(&self) -> usize {
        lock(&self.requests).len()
    }

    pub fn verification_count(&self) -> usize {
        self.verifications.load(Ordering::SeqCst)
    }

    /// Requests received so far, including the ones that failed.
    pub fn requests(&self) -> Vec<TransferRequest> {
        lock(&self.requests).clone()
    }

    fn next_outcome(&self) -> SandboxOutcome {
        lock(&self.script)
            .pop_front()
            .unwrap_or_else(|| lock(&self.fallback_outcome).clone())
    }
}

#[async_trait]
impl ProviderCapability for SandboxProvider {
    fn provider_id(&self) -> ProviderId {
        self.id
    }

    async fn transfer(
        &self,
        request: &TransferRequest,
    ) -> Result<BankTransactionResult, ProviderError> {
        let sequence = {
            let mut requests = lock(&self.requests);
            requests.push(request.clone());
            requests.len()
        };
        let now = self.clock.now();
        let transaction_id = format!("sbx_{}_{:04}", self.id.id(), sequence);

        let result = match self.next_outcome() {
            SandboxOutcome::Complete => BankTransactionResult::accepted(
                self.id,
                request,
                transaction_id,
                None,
                TransactionStatus::Completed,
                now,
            ),
            SandboxOutcome::Pending => BankTransactionResult::accepted(
                self.id,
                request,
                transaction_id,
                None,
                TransactionStatus::Pending,
                now,
            ),
            SandboxOutcome::Decline(code) => BankTransactionResult::declined(
                self.id,
                request,
                code,
                format!("sandbox declined: {code}"),
                now,
            ),
            SandboxOutcome::Fail(message) => {
                return Err(ProviderError::Transport {
                    provider: self.id,
                    message,
                })
            }
        };

        if result.success {
            *lock(&self.balance) -= request.amount;
        }
        lock(&self.transfers).push(result.clone());
        Ok(result)
    }

    async fn verify_account(
        &self,
        account: &BankAccountInfo,
    ) -> Result<VerificationResult, ProviderError> {
        self.verifications.fetch_add(1, Ordering::SeqCst);
        if lock(&self.rejected_accounts).contains(&account.id) {
            return Ok(VerificationResult::invalid(self.id, "account rejected by sandbox"));
        }
        Ok(VerificationResult {
            is_valid: true,
            account_holder: Some(account.account_holder.clone()),
            account_status: Some("active".to_string()),
            method: self.id.id().to_string(),
            confidence: *lock(&self.verification_confidence),
            error_message: None,
        })
    }

    async fn get_balance(&self, _account: &BankAccountInfo) -> Result<AccountBalance, ProviderError> {
        let balance = *lock(&self.balance);
        Ok(AccountBalance {
            available: balance,
            current: balance,
            currency: "CLP".to_string(),
            as_of: self.clock.now(),
        })
    }

    async fn get_transaction_history(
        &self,
        _account: &BankAccountInfo,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<ProviderTransaction>, ProviderError> {
        Ok(lock(&self.transfers)
            .iter()
            .filter(|result| {
                let day = result.processed_at.date_naive();
                day >= start && day <= end
            })
            .filter_map(|result| {
                Some(ProviderTransaction {
                    id: result.transaction_id.clone()?,
                    amount: result.amount,
                    currency: result.currency.clone(),
                    description: format!("{} payout", self.id.display_name()),
                    status: result.status,
                    occurred_at: result.processed_at,
                })
            })
            .collect())
    }

    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn amount_limits(&self) -> Result<AmountLimits, ProviderError> {
        Ok(*lock(&self.limits))
    }
}

/// Hands out one shared [`SandboxProvider`] per provider id and counts how often the
/// registry asked for one.
pub struct SandboxFactory {
    clock: Arc<dyn Clock>,
    providers: DashMap<ProviderId, Arc<SandboxProvider>>,
    created: AtomicUsize,
}

impl SandboxFactory {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            providers: DashMap::new(),
            created: AtomicUsize::new(0),
        }
    }

    /// The sandbox the registry will receive for `id`, for scripting.
    pub fn provider(&self, id: ProviderId) -> Arc<SandboxProvider> {
        self.providers
            .entry(id)
            .or_insert_with(|| Arc::new(SandboxProvider::new(id, self.clock.clone())))
            .value()
            .clone()
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl ProviderFactory for SandboxFactory {
    fn create(&self, provider: ProviderId) -> Arc<dyn ProviderCapability> {
        self.created.fetch_add(1, Ordering::SeqCst);
        self.provider(provider)
    }
}
