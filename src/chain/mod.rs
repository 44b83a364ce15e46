//! Chain Gateway
//!
//! The only component that talks to the external chain node. Every other
//! component consumes it through the [`ChainGateway`] trait, which is injected
//! explicitly (there is no process-wide client).
//!
//! # Call discipline
//!
//! - `submit_transfer` is called by `TransferCoordinator` only.
//! - `get_balance` for reconciliation is called by `AccountService` and
//!   `TransferCoordinator` only.
//!
//! # Outcome semantics
//!
//! | Error          | Reads            | Submissions                      |
//! |----------------|------------------|----------------------------------|
//! | `Unavailable`  | nothing returned | outcome UNKNOWN, re-query first  |
//! | `Reverted`     | n/a              | definitively failed, no funds moved |

pub mod eth;
#[cfg(any(test, feature = "mock-chain"))]
pub mod mock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core_types::TxHash;
use crate::money::Amount;

pub use eth::EthGateway;
#[cfg(any(test, feature = "mock-chain"))]
pub use mock::MockChain;

/// Widest block range a single history query may cover
pub const MAX_HISTORY_BLOCKS: u64 = 10_000;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Block range covers {requested} blocks, at most {max} allowed")]
    RangeTooWide { requested: u64, max: u64 },

    /// Node unreachable or timed out. For submissions the outcome is unknown.
    #[error("Chain unavailable: {0}")]
    Unavailable(String),

    /// Receipt status failure or node rejection: funds did not move.
    /// `tx_hash` is absent when the node refused the transaction outright.
    #[error("Transaction reverted: {reason}")]
    Reverted {
        tx_hash: Option<TxHash>,
        reason: String,
    },
}

impl ChainError {
    pub fn code(&self) -> &'static str {
        match self {
            ChainError::InvalidAddress(_) => "INVALID_ADDRESS",
            ChainError::RangeTooWide { .. } => "RANGE_TOO_WIDE",
            ChainError::Unavailable(_) => "CHAIN_UNAVAILABLE",
            ChainError::Reverted { .. } => "TRANSACTION_REVERTED",
        }
    }
}

/// Inclusive block range for history queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRange {
    pub from: u64,
    pub to: u64,
}

impl BlockRange {
    pub fn new(from: u64, to: u64) -> Self {
        Self { from, to }
    }

    pub fn is_empty(&self) -> bool {
        self.from > self.to
    }

    /// Number of blocks covered, saturating at `u64::MAX`
    pub fn len(&self) -> u64 {
        if self.is_empty() {
            0
        } else {
            (self.to - self.from).saturating_add(1)
        }
    }

    /// Cut the range off at the chain head
    pub fn clamp_to(self, head: u64) -> Self {
        Self {
            from: self.from,
            to: self.to.min(head),
        }
    }

    /// Reject ranges wider than [`MAX_HISTORY_BLOCKS`]
    pub fn ensure_bounded(&self) -> Result<(), ChainError> {
        let requested = self.len();
        if requested > MAX_HISTORY_BLOCKS {
            return Err(ChainError::RangeTooWide {
                requested,
                max: MAX_HISTORY_BLOCKS,
            });
        }
        Ok(())
    }
}

/// Past transaction touching an address (read-only history)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRecord {
    pub tx_hash: TxHash,
    pub block_number: u64,
    pub from: String,
    pub to: Option<String>,
    pub amount: Amount,
}

/// Unified interface to the chain node
#[async_trait]
pub trait ChainGateway: Send + Sync {
    /// Syntactic + existence check against the node's known accounts.
    ///
    /// Returns `Ok(false)` for a well-formed address the node does not know;
    /// fails with `InvalidAddress` if malformed.
    async fn validate_address(&self, address: &str) -> Result<bool, ChainError>;

    /// Authoritative current balance
    async fn get_balance(&self, address: &str) -> Result<Amount, ChainError>;

    /// Submit a native-asset transfer and block until a receipt is obtained
    async fn submit_transfer(
        &self,
        from: &str,
        to: &str,
        amount: Amount,
    ) -> Result<TxHash, ChainError>;

    /// Past transactions touching `address` within `range`.
    ///
    /// Fails with `RangeTooWide` past [`MAX_HISTORY_BLOCKS`]; blocks beyond
    /// the chain head are ignored.
    async fn list_transactions(
        &self,
        address: &str,
        range: BlockRange,
    ) -> Result<Vec<TxRecord>, ChainError>;
}

/// Syntactic EVM address check: `0x` followed by 40 hex digits
pub fn is_well_formed_address(address: &str) -> bool {
    match address.strip_prefix("0x").or_else(|| address.strip_prefix("0X")) {
        Some(body) => body.len() == 40 && hex::decode(body).is_ok(),
        None => false,
    }
}

/// Reject malformed addresses with `InvalidAddress`
pub fn ensure_well_formed(address: &str) -> Result<(), ChainError> {
    if is_well_formed_address(address) {
        Ok(())
    } else {
        Err(ChainError::InvalidAddress(address.to_string()))
    }
}

/// Canonical form for comparisons (addresses are case-insensitive)
pub fn normalize_address(address: &str) -> String {
    address.to_lowercase()
}
