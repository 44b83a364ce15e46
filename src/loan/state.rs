//! Loan State Definitions
//!
//! ```text
//! PENDING --approve--> APPROVED --remaining reaches 0--> PAID
//!    |                    |
//!    +------reject--------+-----> REJECTED
//! ```
//!
//! State IDs are stored as SMALLINT.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i16)]
pub enum LoanStatus {
    /// Requested, awaiting review
    Pending = 0,

    /// Accepts repayments
    Approved = 10,

    /// Terminal: fully repaid
    Paid = 20,

    /// Terminal: rejected or cancelled
    Rejected = -10,
}

impl LoanStatus {
    /// Terminal states release the account's active-loan flag
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoanStatus::Paid | LoanStatus::Rejected)
    }

    /// PENDING or APPROVED: blocks further loan requests
    #[inline]
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(LoanStatus::Pending),
            10 => Some(LoanStatus::Approved),
            20 => Some(LoanStatus::Paid),
            -10 => Some(LoanStatus::Rejected),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::Pending => "PENDING",
            LoanStatus::Approved => "APPROVED",
            LoanStatus::Paid => "PAID",
            LoanStatus::Rejected => "REJECTED",
        }
    }

    /// Whether the review workflow may move a loan from `self` to `next`.
    /// `PAID` is reached only through repayment, never by review.
    pub fn can_review_to(&self, next: LoanStatus) -> bool {
        matches!(
            (self, next),
            (LoanStatus::Pending, LoanStatus::Approved)
                | (LoanStatus::Pending, LoanStatus::Rejected)
                | (LoanStatus::Approved, LoanStatus::Rejected)
        )
    }
}

impl fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for LoanStatus {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        LoanStatus::from_id(value).ok_or(())
    }
}
