use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::Serialize;

use super::domain::{TransferRecord, TransferStatus};

const RECENT_LIMIT: usize = 10;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProviderTotals {
    pub count: usize,
    pub amount: Decimal,
}

/// Ledger-wide payout figures for the operator dashboard.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PayoutStats {
    pub completed_count: usize,
    pub completed_amount: Decimal,
    pub pending_approval_count: usize,
    pub failed_count: usize,
    /// Completed over completed plus failed; zero with no finished transfers.
    pub success_rate: f64,
    pub by_provider: BTreeMap<String, ProviderTotals>,
    pub recent: Vec<TransferRecord>,
}

/// Fold ledger records into [`PayoutStats`]. `records` are expected newest first.
pub fn summarize(records: &[TransferRecord]) -> PayoutStats {
    let mut stats = PayoutStats::default();
    for record in records {
        match record.status {
            TransferStatus::Completed => {
                stats.completed_count += 1;
                stats.completed_amount += record.amount;
            }
            TransferStatus::PendingApproval => stats.pending_approval_count += 1,
            TransferStatus::Failed => stats.failed_count += 1,
            TransferStatus::Pending => {}
        }

        if matches!(record.status, TransferStatus::Completed | TransferStatus::Pending) {
            if let Some(provider) = &record.provider {
                let totals = stats.by_provider.entry(provider.clone()).or_default();
                totals.count += 1;
                totals.amount += record.amount;
            }
        }
    }

    let finished = stats.completed_count + stats.failed_count;
    if finished > 0 {
        stats.success_rate = stats.completed_count as f64 / finished as f64;
    }
    stats.recent = records.iter().take(RECENT_LIMIT).cloned().collect();
    stats
}
