//! Balance change notifications
//!
//! One-way, fire-and-forget signal emitted after every successful resync.
//! Delivery is best effort: a sink must never fail the operation that
//! triggered it.

mod connection;

pub use connection::{BalanceEvent, ConnectionId, ConnectionManager, EventSender};

use crate::core_types::{AccountId, UserId};
use crate::money::Amount;

pub trait BalanceNotifier: Send + Sync {
    fn balance_changed(&self, user_id: UserId, account_id: AccountId, balance: Amount);
}

/// Discards every notification
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl BalanceNotifier for NoopNotifier {
    fn balance_changed(&self, _user_id: UserId, _account_id: AccountId, _balance: Amount) {}
}
