//! In-process collaborators backing the demo binary and the test suites.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::collaborators::{
    BankAccountDirectory, DirectoryError, KycEligibility, KycError, KycGate, KycLevel,
    NotifierError, PayoutNotice, PayoutNotifier, SystemAlert,
};
use super::domain::{
    BatchId, BatchStatus, PayoutBatch, PayoutPeriod, RecipientType, TransferQuery, TransferRecord,
    TransferStatus,
};
use super::earnings::{
    CompletedJob, CompletedVisit, EarningsError, EarningsSource, PaidRent, Recipient,
    SignedContract,
};
use super::ledger::{LedgerError, PayoutLedger};
use crate::config::{ConfigStoreError, ServiceConfig, ServiceConfigStore};
use crate::providers::BankAccountInfo;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub struct InMemoryConfigStore {
    configs: Mutex<BTreeMap<String, ServiceConfig>>,
    loads: AtomicUsize,
    available: AtomicBool,
}

impl Default for InMemoryConfigStore {
    fn default() -> Self {
        Self {
            configs: Mutex::new(BTreeMap::new()),
            loads: AtomicUsize::new(0),
            available: AtomicBool::new(true),
        }
    }
}

impl InMemoryConfigStore {
    pub fn put(&self, config: ServiceConfig) {
        lock(&self.configs).insert(config.service_id.clone(), config);
    }

    pub fn get(&self, service_id: &str) -> Option<ServiceConfig> {
        lock(&self.configs).get(service_id).cloned()
    }

    /// Number of `load_all` calls served so far.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), ConfigStoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ConfigStoreError::Unavailable("store offline".to_string()))
        }
    }
}

#[async_trait]
impl ServiceConfigStore for InMemoryConfigStore {
    async fn load_all(&self) -> Result<Vec<ServiceConfig>, ConfigStoreError> {
        self.check()?;
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(lock(&self.configs).values().cloned().collect())
    }

    async fn save(&self, config: ServiceConfig) -> Result<(), ConfigStoreError> {
        self.check()?;
        self.put(config);
        Ok(())
    }
}

/// Ledger kept in memory. `record_transfer` can be switched off to simulate a write failing
/// after money has moved.
pub struct InMemoryLedger {
    batches: Mutex<HashMap<BatchId, PayoutBatch>>,
    transfers: Mutex<Vec<TransferRecord>>,
    available: AtomicBool,
    transfer_writes: AtomicBool,
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self {
            batches: Mutex::new(HashMap::new()),
            transfers: Mutex::new(Vec::new()),
            available: AtomicBool::new(true),
            transfer_writes: AtomicBool::new(true),
        }
    }
}

impl InMemoryLedger {
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn set_transfer_writes(&self, enabled: bool) {
        self.transfer_writes.store(enabled, Ordering::SeqCst);
    }

    /// Every stored record in insertion order.
    pub fn transfers(&self) -> Vec<TransferRecord> {
        lock(&self.transfers).clone()
    }

    fn check(&self) -> Result<(), LedgerError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(LedgerError::Unavailable("ledger offline".to_string()))
        }
    }
}

#[async_trait]
impl PayoutLedger for InMemoryLedger {
    async fn create_batch(&self, batch: PayoutBatch) -> Result<(), LedgerError> {
        self.check()?;
        let mut batches = lock(&self.batches);
        if batches.contains_key(&batch.id) {
            return Err(LedgerError::Conflict(batch.id));
        }
        batches.insert(batch.id.clone(), batch);
        Ok(())
    }

    async fn update_batch(&self, batch: PayoutBatch) -> Result<(), LedgerError> {
        self.check()?;
        let mut batches = lock(&self.batches);
        if !batches.contains_key(&batch.id) {
            return Err(LedgerError::NotFound(batch.id));
        }
        batches.insert(batch.id.clone(), batch);
        Ok(())
    }

    async fn transition_batch(
        &self,
        expected: BatchStatus,
        batch: PayoutBatch,
    ) -> Result<(), LedgerError> {
        self.check()?;
        let mut batches = lock(&self.batches);
        match batches.get(&batch.id) {
            None => Err(LedgerError::NotFound(batch.id)),
            Some(stored) if stored.status != expected => Err(LedgerError::StatusChanged {
                id: batch.id.to_string(),
                expected: expected.label(),
            }),
            Some(_) => {
                batches.insert(batch.id.clone(), batch);
                Ok(())
            }
        }
    }

    async fn find_batch(&self, id: &BatchId) -> Result<Option<PayoutBatch>, LedgerError> {
        self.check()?;
        Ok(lock(&self.batches).get(id).cloned())
    }

    async fn list_batches(
        &self,
        status: Option<BatchStatus>,
    ) -> Result<Vec<PayoutBatch>, LedgerError> {
        self.check()?;
        let mut batches: Vec<PayoutBatch> = lock(&self.batches)
            .values()
            .filter(|batch| status.map_or(true, |wanted| batch.status == wanted))
            .cloned()
            .collect();
        batches.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.0.cmp(&b.id.0))
        });
        Ok(batches)
    }

    async fn claim_transfer(&self, record: TransferRecord) -> Result<(), LedgerError> {
        self.check()?;
        let mut transfers = lock(&self.transfers);
        if let Some(live) = transfers
            .iter()
            .find(|existing| existing.status.is_live() && existing.same_payout(&record))
        {
            return Err(LedgerError::AlreadyClaimed(Box::new(live.clone())));
        }
        transfers.push(record);
        Ok(())
    }

    async fn release_claim(&self, record_id: &str) -> Result<(), LedgerError> {
        self.check()?;
        lock(&self.transfers).retain(|record| record.id != record_id);
        Ok(())
    }

    async fn transition_transfer(
        &self,
        expected: TransferStatus,
        record: TransferRecord,
    ) -> Result<(), LedgerError> {
        self.check()?;
        let mut transfers = lock(&self.transfers);
        match transfers.iter_mut().find(|existing| existing.id == record.id) {
            Some(existing) if existing.status == expected => {
                *existing = record;
                Ok(())
            }
            _ => Err(LedgerError::StatusChanged {
                id: record.id,
                expected: expected.label(),
            }),
        }
    }

    async fn record_transfer(&self, record: TransferRecord) -> Result<(), LedgerError> {
        self.check()?;
        if !self.transfer_writes.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("transfer table is read-only".to_string()));
        }
        let mut transfers = lock(&self.transfers);
        match transfers.iter_mut().find(|existing| existing.id == record.id) {
            Some(existing) => *existing = record,
            None => transfers.push(record),
        }
        Ok(())
    }

    async fn list_transfers(
        &self,
        query: TransferQuery,
    ) -> Result<Vec<TransferRecord>, LedgerError> {
        self.check()?;
        let mut found: Vec<TransferRecord> = lock(&self.transfers)
            .iter()
            .filter(|record| query.matches(record))
            .cloned()
            .collect();
        found.reverse();
        found.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        if let Some(limit) = query.limit {
            found.truncate(limit);
        }
        Ok(found)
    }
}

#[derive(Default)]
struct EarningsData {
    recipients: Vec<Recipient>,
    contracts: Vec<SignedContract>,
    rents: Vec<PaidRent>,
    visits: Vec<CompletedVisit>,
    jobs: Vec<CompletedJob>,
}

/// Marketplace records held in memory.
#[derive(Default)]
pub struct InMemoryEarnings {
    data: Mutex<EarningsData>,
    broken: Mutex<HashSet<String>>,
    offline: AtomicBool,
}

impl InMemoryEarnings {
    pub fn add_recipient(&self, recipient: Recipient) {
        lock(&self.data).recipients.push(recipient);
    }

    pub fn add_contract(&self, contract: SignedContract) {
        lock(&self.data).contracts.push(contract);
    }

    pub fn add_rent(&self, rent: PaidRent) {
        lock(&self.data).rents.push(rent);
    }

    pub fn add_visit(&self, visit: CompletedVisit) {
        lock(&self.data).visits.push(visit);
    }

    pub fn add_job(&self, job: CompletedJob) {
        lock(&self.data).jobs.push(job);
    }

    /// Make every event lookup for `recipient_id` fail.
    pub fn break_recipient(&self, recipient_id: impl Into<String>) {
        lock(&self.broken).insert(recipient_id.into());
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check(&self, recipient_id: &str) -> Result<(), EarningsError> {
        if lock(&self.broken).contains(recipient_id) {
            return Err(EarningsError::Inconsistent {
                id: recipient_id.to_string(),
                reason: "events could not be loaded".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl EarningsSource for InMemoryEarnings {
    async fn active_recipients(
        &self,
        recipient_type: RecipientType,
    ) -> Result<Vec<Recipient>, EarningsError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(EarningsError::Unavailable("marketplace database offline".to_string()));
        }
        Ok(lock(&self.data)
            .recipients
            .iter()
            .filter(|recipient| recipient.recipient_type == recipient_type)
            .cloned()
            .collect())
    }

    async fn signed_contracts(
        &self,
        broker_id: &str,
        period: PayoutPeriod,
    ) -> Result<Vec<SignedContract>, EarningsError> {
        self.check(broker_id)?;
        Ok(lock(&self.data)
            .contracts
            .iter()
            .filter(|c| c.broker_id == broker_id && period.contains(c.signed_on))
            .cloned()
            .collect())
    }

    async fn paid_rents(
        &self,
        owner_id: &str,
        period: PayoutPeriod,
    ) -> Result<Vec<PaidRent>, EarningsError> {
        self.check(owner_id)?;
        Ok(lock(&self.data)
            .rents
            .iter()
            .filter(|r| r.owner_id == owner_id && period.contains(r.paid_on))
            .cloned()
            .collect())
    }

    async fn completed_visits(
        &self,
        runner_id: &str,
        period: PayoutPeriod,
    ) -> Result<Vec<CompletedVisit>, EarningsError> {
        self.check(runner_id)?;
        Ok(lock(&self.data)
            .visits
            .iter()
            .filter(|v| v.runner_id == runner_id && period.contains(v.completed_on))
            .cloned()
            .collect())
    }

    async fn completed_jobs(
        &self,
        provider_id: &str,
        period: PayoutPeriod,
    ) -> Result<Vec<CompletedJob>, EarningsError> {
        self.check(provider_id)?;
        Ok(lock(&self.data)
            .jobs
            .iter()
            .filter(|j| j.provider_id == provider_id && period.contains(j.completed_on))
            .cloned()
            .collect())
    }
}

/// KYC answers from a fixed table of verified levels.
#[derive(Default)]
pub struct StaticKycGate {
    levels: Mutex<HashMap<String, KycLevel>>,
    default_level: Mutex<Option<KycLevel>>,
    unavailable: AtomicBool,
}

impl StaticKycGate {
    /// Recipients without an explicit level count as fully verified.
    pub fn allowing_all() -> Self {
        let gate = Self::default();
        *lock(&gate.default_level) = Some(KycLevel::Advanced);
        gate
    }

    pub fn set_level(&self, recipient_id: impl Into<String>, level: KycLevel) {
        lock(&self.levels).insert(recipient_id.into(), level);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl KycGate for StaticKycGate {
    async fn can_receive_payouts(&self, recipient_id: &str) -> Result<KycEligibility, KycError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(KycError::Unavailable("verification provider timed out".to_string()));
        }
        let level = lock(&self.levels)
            .get(recipient_id)
            .copied()
            .or(*lock(&self.default_level));
        Ok(KycEligibility::for_level(level))
    }
}

#[derive(Default)]
pub struct InMemoryAccountDirectory {
    accounts: Mutex<HashMap<String, Vec<BankAccountInfo>>>,
}

impl InMemoryAccountDirectory {
    /// Register an account, refusing a second primary for the same user.
    pub fn add_account(&self, account: BankAccountInfo) -> Result<(), DirectoryError> {
        let mut accounts = lock(&self.accounts);
        let owned = accounts.entry(account.user_id.clone()).or_default();
        if account.is_primary && owned.iter().any(|existing| existing.is_primary) {
            return Err(DirectoryError::DuplicatePrimary(account.user_id));
        }
        owned.push(account);
        Ok(())
    }
}

#[async_trait]
impl BankAccountDirectory for InMemoryAccountDirectory {
    async fn accounts_for(&self, user_id: &str) -> Result<Vec<BankAccountInfo>, DirectoryError> {
        Ok(lock(&self.accounts).get(user_id).cloned().unwrap_or_default())
    }
}

/// Notifier that keeps everything it was asked to send.
#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<(String, PayoutNotice)>>,
    alerts: Mutex<Vec<SystemAlert>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn notices(&self) -> Vec<(String, PayoutNotice)> {
        lock(&self.notices).clone()
    }

    pub fn alerts(&self) -> Vec<SystemAlert> {
        lock(&self.alerts).clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), NotifierError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(NotifierError::Transport("smtp relay refused connection".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PayoutNotifier for RecordingNotifier {
    async fn notify_payout_processed(
        &self,
        recipient_id: &str,
        notice: &PayoutNotice,
    ) -> Result<(), NotifierError> {
        self.check()?;
        lock(&self.notices).push((recipient_id.to_string(), notice.clone()));
        Ok(())
    }

    async fn notify_system_alert(&self, alert: &SystemAlert) -> Result<(), NotifierError> {
        self.check()?;
        lock(&self.alerts).push(alert.clone());
        Ok(())
    }
}
