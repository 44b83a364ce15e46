//! Connection manager
//!
//! Registry of live client channels keyed by user id, using DashMap for
//! concurrent access. A user may hold several connections (e.g. mobile + web).

use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

use super::BalanceNotifier;
use crate::core_types::{AccountId, UserId};
use crate::money::Amount;

/// Pushed to every connection of the account owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BalanceEvent {
    BalanceUpdate {
        account_id: AccountId,
        balance: Amount,
    },
}

pub type EventSender = mpsc::UnboundedSender<BalanceEvent>;

pub type ConnectionId = u64;

pub struct ConnectionManager {
    /// user_id -> list of (connection_id, sender)
    connections: DashMap<UserId, Vec<(ConnectionId, EventSender)>>,
    next_conn_id: AtomicU64,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            next_conn_id: AtomicU64::new(1),
        }
    }

    /// Register a channel for `user_id` and return its connection id
    pub fn add_connection(&self, user_id: UserId, tx: EventSender) -> ConnectionId {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);

        let total = {
            let mut senders = self.connections.entry(user_id).or_default();
            senders.push((conn_id, tx));
            senders.len()
        };

        tracing::info!(user_id, conn_id, total_connections = total, "Connection added");
        conn_id
    }

    pub fn remove_connection(&self, user_id: UserId, conn_id: ConnectionId) {
        let emptied = match self.connections.get_mut(&user_id) {
            Some(mut senders) => {
                senders.retain(|(id, _)| *id != conn_id);
                senders.is_empty()
            }
            None => return,
        };

        if emptied {
            self.connections.remove_if(&user_id, |_, senders| senders.is_empty());
            tracing::info!(user_id, conn_id, "All connections closed");
        } else {
            tracing::debug!(user_id, conn_id, "Connection removed");
        }
    }

    /// Deliver to every open channel of the user; closed channels are pruned.
    pub fn send_to_user(&self, user_id: UserId, event: BalanceEvent) {
        let Some(mut senders) = self.connections.get_mut(&user_id) else {
            return;
        };

        senders.retain(|(conn_id, tx)| {
            let open = tx.send(event.clone()).is_ok();
            if !open {
                tracing::warn!(user_id, conn_id, "Dropping closed connection");
            }
            open
        });
        tracing::debug!(user_id, recipients = senders.len(), "Event sent to user");
    }

    /// (number of users, total connections)
    pub fn stats(&self) -> (usize, usize) {
        let users = self.connections.len();
        let total: usize = self.connections.iter().map(|e| e.value().len()).sum();
        (users, total)
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl BalanceNotifier for ConnectionManager {
    fn balance_changed(&self, user_id: UserId, account_id: AccountId, balance: Amount) {
        self.send_to_user(
            user_id,
            BalanceEvent::BalanceUpdate {
                account_id,
                balance,
            },
        );
    }
}
