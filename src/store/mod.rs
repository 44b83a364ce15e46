//! Ledger Store
//!
//! Durable storage for users, accounts and loans. Knows nothing about the
//! chain. Each trait method is one durable unit: composite operations
//! (address binding + account insert, loan close + flag clear) either apply
//! completely or not at all.

#[cfg(any(test, feature = "mock-chain"))]
pub mod memory;
pub mod models;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;

use crate::core_types::{AccountId, LoanId, UserId};
use crate::loan::state::LoanStatus;
use crate::money::Amount;

#[cfg(any(test, feature = "mock-chain"))]
pub use memory::MemoryStore;
pub use models::{Account, Loan, LoanStatusUpdate, NewLoan, NewUser, User};
pub use postgres::PgLedgerStore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    /// Uniqueness or guard violation
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::Database(_) => "DATABASE_ERROR",
            StoreError::NotFound(_) => "NOT_FOUND",
            StoreError::Conflict(_) => "CONFLICT",
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::RowNotFound => StoreError::NotFound(e.to_string()),
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Conflict(db.message().to_string())
            }
            _ => StoreError::Database(e.to_string()),
        }
    }
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    // === Users ===
    async fn create_user(&self, new: NewUser) -> Result<User, StoreError>;

    async fn get_user(&self, user_id: UserId) -> Result<Option<User>, StoreError>;

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;

    // === Accounts ===

    /// Bind `address` to the user and insert an active account seeded with
    /// `balance`, as one unit. `Conflict` if the user already has an account
    /// or the address is bound to someone else.
    async fn create_account_with_binding(
        &self,
        user_id: UserId,
        address: &str,
        balance: Amount,
    ) -> Result<Account, StoreError>;

    async fn get_account(&self, account_id: AccountId) -> Result<Option<Account>, StoreError>;

    async fn get_account_by_user(&self, user_id: UserId) -> Result<Option<Account>, StoreError>;

    async fn list_accounts(&self) -> Result<Vec<Account>, StoreError>;

    /// Overwrite the cached balance
    async fn set_cached_balance(
        &self,
        account_id: AccountId,
        balance: Amount,
    ) -> Result<Account, StoreError>;

    // === Loans ===

    /// Insert a PENDING loan and raise the account's active-loan flag, as one
    /// unit. `Conflict` if the flag is already raised.
    async fn create_loan(&self, new: NewLoan) -> Result<Loan, StoreError>;

    async fn get_loan(&self, loan_id: LoanId) -> Result<Option<Loan>, StoreError>;

    async fn active_loan_for_account(
        &self,
        account_id: AccountId,
    ) -> Result<Option<Loan>, StoreError>;

    async fn loans_for_account(&self, account_id: AccountId) -> Result<Vec<Loan>, StoreError>;

    /// CAS status change. Returns `None` if the loan is not in `expected`.
    /// A terminal target status clears the account's active-loan flag in the
    /// same unit.
    async fn set_loan_status(
        &self,
        loan_id: LoanId,
        expected: LoanStatus,
        update: LoanStatusUpdate,
    ) -> Result<Option<Loan>, StoreError>;

    /// CAS repayment: applies only while the loan is APPROVED with
    /// `expected_remaining`. Decrements the remaining balance by `payment`;
    /// reaching zero sets PAID and clears the account flag in the same unit.
    /// Returns `None` if the guard did not hold.
    async fn apply_repayment(
        &self,
        loan_id: LoanId,
        expected_remaining: Amount,
        payment: Amount,
    ) -> Result<Option<Loan>, StoreError>;
}
