//! Ledger Error Types
//!
//! One taxonomy for every public operation. Chain and store errors are wrapped
//! transparently and keep their own codes, so a caller can always branch on a
//! stable reason code.

use thiserror::Error;

use crate::chain::ChainError;
use crate::core_types::{AccountId, LoanId, UserId};
use crate::store::StoreError;

#[derive(Error, Debug, Clone)]
pub enum LedgerError {
    // === Passthrough ===
    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Store(#[from] StoreError),

    // === Validation Errors ===
    #[error("Source and target account cannot be the same")]
    SelfTransfer,

    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("Account {0} has no bound chain address")]
    MissingAddress(AccountId),

    #[error("Recipient does not own the destination account")]
    RecipientMismatch,

    #[error("Forbidden")]
    Forbidden,

    // === Account Errors ===
    #[error("Account already exists for user {0}")]
    AccountAlreadyExists(UserId),

    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("User {0} has no account")]
    NoAccount(UserId),

    #[error("User not found: {0}")]
    UserNotFound(UserId),

    #[error("Account {0} is not active")]
    AccountInactive(AccountId),

    #[error("Insufficient funds")]
    InsufficientFunds,

    // === Loan Errors ===
    #[error("Account already has an active loan")]
    LoanAlreadyActive,

    #[error("Requested loan amount exceeds account balance")]
    AmountExceedsBalance,

    #[error("Loan {0} is not approved")]
    LoanNotApproved(LoanId),

    #[error("Invalid payment: {0}")]
    InvalidPayment(String),

    #[error("Loan not found: {0}")]
    LoanNotFound(LoanId),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),
}

impl LedgerError {
    /// Stable reason code for callers
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::Chain(e) => e.code(),
            LedgerError::Store(e) => e.code(),
            LedgerError::SelfTransfer => "SELF_TRANSFER",
            LedgerError::InvalidAmount => "INVALID_AMOUNT",
            LedgerError::MissingAddress(_) => "MISSING_ADDRESS",
            LedgerError::RecipientMismatch => "RECIPIENT_MISMATCH",
            LedgerError::Forbidden => "FORBIDDEN",
            LedgerError::AccountAlreadyExists(_) => "ACCOUNT_ALREADY_EXISTS",
            LedgerError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            LedgerError::NoAccount(_) => "ACCOUNT_NOT_FOUND",
            LedgerError::UserNotFound(_) => "USER_NOT_FOUND",
            LedgerError::AccountInactive(_) => "ACCOUNT_INACTIVE",
            LedgerError::InsufficientFunds => "INSUFFICIENT_FUNDS",
            LedgerError::LoanAlreadyActive => "LOAN_ALREADY_ACTIVE",
            LedgerError::AmountExceedsBalance => "AMOUNT_EXCEEDS_BALANCE",
            LedgerError::LoanNotApproved(_) => "LOAN_NOT_APPROVED",
            LedgerError::InvalidPayment(_) => "INVALID_PAYMENT",
            LedgerError::LoanNotFound(_) => "LOAN_NOT_FOUND",
            LedgerError::InvalidStateTransition(_) => "INVALID_STATE_TRANSITION",
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            LedgerError::Chain(ChainError::InvalidAddress(_))
            | LedgerError::Chain(ChainError::RangeTooWide { .. }) => 400,
            LedgerError::Chain(ChainError::Unavailable(_)) => 503,
            LedgerError::Chain(ChainError::Reverted { .. }) => 422,
            LedgerError::Store(StoreError::NotFound(_)) => 404,
            LedgerError::Store(StoreError::Conflict(_)) => 409,
            LedgerError::Store(StoreError::Database(_)) => 500,
            LedgerError::Forbidden => 403,
            LedgerError::SelfTransfer
            | LedgerError::InvalidAmount
            | LedgerError::InvalidPayment(_)
            | LedgerError::RecipientMismatch => 400,
            LedgerError::AccountNotFound(_)
            | LedgerError::NoAccount(_)
            | LedgerError::UserNotFound(_)
            | LedgerError::LoanNotFound(_) => 404,
            LedgerError::AccountAlreadyExists(_) | LedgerError::LoanAlreadyActive => 409,
            LedgerError::MissingAddress(_)
            | LedgerError::AccountInactive(_)
            | LedgerError::InsufficientFunds
            | LedgerError::AmountExceedsBalance
            | LedgerError::LoanNotApproved(_) => 422,
            LedgerError::InvalidStateTransition(_) => 409,
        }
    }

    /// True only when the outcome is unknown and a later retry may succeed.
    /// Callers must re-query state before retrying a submission.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Chain(ChainError::Unavailable(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(LedgerError::InsufficientFunds.code(), "INSUFFICIENT_FUNDS");
        assert_eq!(LedgerError::LoanNotApproved(1).code(), "LOAN_NOT_APPROVED");
        assert_eq!(
            LedgerError::from(ChainError::Unavailable("down".into())).code(),
            "CHAIN_UNAVAILABLE"
        );
        assert_eq!(
            LedgerError::from(StoreError::Database("boom".into())).code(),
            "DATABASE_ERROR"
        );
    }

    #[test]
    fn test_http_status() {
        assert_eq!(LedgerError::Forbidden.http_status(), 403);
        assert_eq!(LedgerError::InvalidAmount.http_status(), 400);
        assert_eq!(LedgerError::InsufficientFunds.http_status(), 422);
        assert_eq!(
            LedgerError::from(ChainError::Unavailable("down".into())).http_status(),
            503
        );
    }

    #[test]
    fn test_retryable() {
        assert!(LedgerError::from(ChainError::Unavailable("t".into())).is_retryable());
        assert!(
            !LedgerError::from(ChainError::Reverted {
                tx_hash: None,
                reason: "r".into()
            })
            .is_retryable()
        );
        assert!(!LedgerError::InsufficientFunds.is_retryable());
    }

    #[test]
    fn test_display_passthrough() {
        let err = LedgerError::from(ChainError::InvalidAddress("0x12".into()));
        assert_eq!(err.to_string(), "Invalid address: 0x12");
    }
}
