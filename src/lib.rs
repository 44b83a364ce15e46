//! Chain Ledger - off-chain ledger kept consistent with an EVM chain
//!
//! # Modules
//!
//! - [`core_types`] - Identifiers, roles and the request principal
//! - [`money`] - Ether amounts and wei conversion
//! - [`chain`] - Chain gateway trait, JSON-RPC client and in-memory chain
//! - [`store`] - Ledger store trait with Postgres and in-memory backends
//! - [`account`] - Address binding and balance resync
//! - [`transfer`] - Transfer coordination, per-account locks, reconcile worker
//! - [`loan`] - Loan terms, state machine and lifecycle engine
//! - [`notify`] - Balance change notifications
//! - [`ledger`] - Principal-scoped facade over the services

// Core types - must be first!
pub mod core_types;
pub mod money;

pub mod config;
pub mod error;
pub mod logging;

pub mod account;
pub mod chain;
pub mod ledger;
pub mod loan;
pub mod notify;
pub mod store;
pub mod transfer;

// Convenient re-exports at crate root
pub use account::AccountService;
pub use chain::{BlockRange, ChainError, ChainGateway, EthGateway, TxRecord};
pub use config::AppConfig;
pub use core_types::{AccountId, LoanId, Principal, Role, TxHash, UserId};
pub use error::LedgerError;
pub use ledger::{Ledger, SendRequest};
pub use loan::{InterestRate, LoanDecision, LoanDuration, LoanEngine, LoanStatus};
pub use money::Amount;
pub use notify::{BalanceNotifier, ConnectionManager, NoopNotifier};
pub use store::{Account, LedgerStore, Loan, PgLedgerStore, StoreError, User};
pub use transfer::{Reconciliation, ReconcileWorker, TransferCoordinator, TransferReceipt};
