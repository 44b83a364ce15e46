//! Loan lifecycle
//!
//! ```text
//! request -> PENDING --review--> APPROVED --repayments--> PAID
//! ```
//!
//! Repayments move money through the transfer coordinator; the loan record
//! only changes after the chain confirms.

pub mod engine;
pub mod state;
pub mod terms;

pub use engine::{LoanDecision, LoanEngine, Repayment};
pub use state::LoanStatus;
pub use terms::{InterestRate, LoanDuration, LoanQuote, quote};
