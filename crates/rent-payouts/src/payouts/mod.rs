//! Payout calculation, batch orchestration, and the operator HTTP surface.

pub mod calculator;
pub mod collaborators;
pub mod domain;
pub mod earnings;
pub mod ledger;
pub mod memory;
pub mod orchestrator;
pub mod router;
pub mod stats;

#[cfg(test)]
mod tests;

pub use calculator::{breakdown_for, visit_earnings, PayoutCalculator};
pub use collaborators::{
    platform_account, AlertSeverity, BankAccountDirectory, DirectoryError, KycEligibility,
    KycError, KycGate, KycLevel, NotifierError, PayoutNotice, PayoutNotifier, SystemAlert,
    PLATFORM_ACCOUNT_ID,
};
pub use domain::{
    BatchId, BatchMetadata, BatchStatus, BatchSummary, BatchType, ItemOutcome, PayoutBatch,
    PayoutBatchView, PayoutBreakdown, PayoutCalculation, PayoutItem, PayoutItemResult,
    PayoutItemType, PayoutPeriod, RecipientType, TransferQuery, TransferRecord, TransferStatus,
};
pub use earnings::{
    CompletedJob, CompletedVisit, EarningsError, EarningsSource, PaidRent, Recipient,
    SignedContract, VisitType,
};
pub use ledger::{LedgerError, PayoutLedger};
pub use orchestrator::{OrchestratorParts, PayoutOrchestrator};
pub use router::{payout_router, Operator, OperatorRole, PayoutApi};
pub use stats::{PayoutStats, ProviderTotals};
