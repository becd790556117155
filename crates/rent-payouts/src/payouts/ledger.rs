use async_trait::async_trait;

use super::domain::{BatchId, BatchStatus, PayoutBatch, TransferQuery, TransferRecord, TransferStatus};
use crate::error::PayoutError;

/// Durable record of batches and the transfers made for them.
///
/// `claim_transfer` and the `transition_*` operations must be atomic against concurrent callers.
#[async_trait]
pub trait PayoutLedger: Send + Sync {
    /// Fails with [`LedgerError::Conflict`] when the id is already taken.
    async fn create_batch(&self, batch: PayoutBatch) -> Result<(), LedgerError>;
    async fn update_batch(&self, batch: PayoutBatch) -> Result<(), LedgerError>;
    /// Replace the batch only while its stored status is still `expected`.
    async fn transition_batch(
        &self,
        expected: BatchStatus,
        batch: PayoutBatch,
    ) -> Result<(), LedgerError>;
    async fn find_batch(&self, id: &BatchId) -> Result<Option<PayoutBatch>, LedgerError>;
    /// Newest first.
    async fn list_batches(&self, status: Option<BatchStatus>)
        -> Result<Vec<PayoutBatch>, LedgerError>;

    /// Insert `record` unless a live record already covers its recipient, recipient type and
    /// period, in which case [`LedgerError::AlreadyClaimed`] carries that record.
    async fn claim_transfer(&self, record: TransferRecord) -> Result<(), LedgerError>;
    /// Drop a claim whose payout never reached a provider.
    async fn release_claim(&self, record_id: &str) -> Result<(), LedgerError>;
    /// Insert or replace by record id.
    async fn record_transfer(&self, record: TransferRecord) -> Result<(), LedgerError>;
    /// Replace the record only while its stored status is still `expected`.
    async fn transition_transfer(
        &self,
        expected: TransferStatus,
        record: TransferRecord,
    ) -> Result<(), LedgerError>;
    /// Newest first, truncated to `query.limit`.
    async fn list_transfers(&self, query: TransferQuery)
        -> Result<Vec<TransferRecord>, LedgerError>;
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("batch {0} already exists")]
    Conflict(BatchId),
    #[error("batch {0} not found")]
    NotFound(BatchId),
    #[error("{} already has a {:?} payout for {}", .0.recipient_id, .0.status, .0.period)]
    AlreadyClaimed(Box<TransferRecord>),
    #[error("{id} is no longer {expected}")]
    StatusChanged { id: String, expected: &'static str },
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

impl From<LedgerError> for PayoutError {
    fn from(value: LedgerError) -> Self {
        PayoutError::database("ledger", value.to_string())
    }
}
