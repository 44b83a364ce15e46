//! Ledger records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core_types::{AccountId, LoanId, Principal, Role, UserId};
use crate::loan::state::LoanStatus;
use crate::loan::terms::{InterestRate, LoanDuration};
use crate::money::Amount;

/// User identity record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub user_id: UserId,
    pub username: String,
    pub email: String,
    pub role: Role,
    /// Bound chain address; set once at account setup
    pub public_key: Option<String>,
    #[serde(skip_serializing)]
    pub credential_hash: String,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn principal(&self) -> Principal {
        Principal::new(self.user_id, self.role, self.public_key.clone())
    }
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub role: Role,
    pub credential_hash: String,
}

/// Ledger account (1:1 with a user)
///
/// `address` is read through from the owning user's `public_key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub account_id: AccountId,
    pub user_id: UserId,
    pub address: Option<String>,
    /// Cached mirror of the chain balance; not authoritative
    pub balance: Amount,
    pub is_active: bool,
    pub active_loan: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Loan {
    pub loan_id: LoanId,
    pub account_id: AccountId,
    pub amount: Amount,
    pub interest_rate: InterestRate,
    pub duration: LoanDuration,
    pub start_date: DateTime<Utc>,
    /// Provisional until approval
    pub end_date: DateTime<Utc>,
    pub remaining_balance: Amount,
    pub status: LoanStatus,
}

#[derive(Debug, Clone)]
pub struct NewLoan {
    pub account_id: AccountId,
    pub amount: Amount,
    pub interest_rate: InterestRate,
    pub duration: LoanDuration,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub remaining_balance: Amount,
}

/// Status change requested by the review workflow
#[derive(Debug, Clone, Copy)]
pub struct LoanStatusUpdate {
    pub status: LoanStatus,
    /// Committed term, set on approval
    pub term: Option<(DateTime<Utc>, DateTime<Utc>)>,
}
