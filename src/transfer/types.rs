//! Transfer results

use serde::{Deserialize, Serialize};

use crate::core_types::{AccountId, TxHash};
use crate::money::Amount;

/// Cache state after a confirmed chain transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Reconciliation {
    /// Both cached balances were overwritten from the chain
    Synced {
        from_balance: Amount,
        to_balance: Amount,
    },
    /// Funds moved but the resync failed. Retry with
    /// `TransferCoordinator::reconcile`; never resubmit the transfer.
    Deferred { reason: String },
}

/// Outcome of a transfer whose chain submission was confirmed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub tx_hash: TxHash,
    pub from_account: AccountId,
    pub to_account: AccountId,
    pub amount: Amount,
    pub reconciliation: Reconciliation,
}

impl TransferReceipt {
    #[inline]
    pub fn is_reconciled(&self) -> bool {
        matches!(self.reconciliation, Reconciliation::Synced { .. })
    }
}
