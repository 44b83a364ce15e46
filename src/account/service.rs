//! Account Service
//!
//! Owns account setup (address binding) and balance resynchronization.
//! `resync` is the only sanctioned way to change a cached balance: it always
//! overwrites from the chain and never does arithmetic on the cache. Resyncs
//! of one account run one at a time, so a slow read can never land after a
//! newer one.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::chain::{BlockRange, ChainError, ChainGateway, TxRecord};
use crate::core_types::{AccountId, UserId};
use crate::error::LedgerError;
use crate::notify::BalanceNotifier;
use crate::store::{Account, LedgerStore, StoreError};
use crate::transfer::KeyedLocks;

pub struct AccountService {
    store: Arc<dyn LedgerStore>,
    chain: Arc<dyn ChainGateway>,
    notifier: Arc<dyn BalanceNotifier>,
    resync_locks: KeyedLocks<AccountId>,
}

impl AccountService {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        chain: Arc<dyn ChainGateway>,
        notifier: Arc<dyn BalanceNotifier>,
    ) -> Self {
        Self {
            store,
            chain,
            notifier,
            resync_locks: KeyedLocks::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// Bind `address` to the user and open an account seeded from the chain.
    ///
    /// Re-binding is not supported: a second call for the same user fails
    /// with `AccountAlreadyExists`.
    pub async fn setup_account(
        &self,
        user_id: UserId,
        address: &str,
    ) -> Result<Account, LedgerError> {
        self.store
            .get_user(user_id)
            .await?
            .ok_or(LedgerError::UserNotFound(user_id))?;

        if self.store.get_account_by_user(user_id).await?.is_some() {
            return Err(LedgerError::AccountAlreadyExists(user_id));
        }

        if !self.chain.validate_address(address).await? {
            return Err(ChainError::InvalidAddress(address.to_string()).into());
        }
        let balance = self.chain.get_balance(address).await?;

        let account = match self
            .store
            .create_account_with_binding(user_id, address, balance)
            .await
        {
            Ok(account) => account,
            Err(StoreError::Conflict(reason)) => {
                // Lost a race with a concurrent setup for the same user
                if self.store.get_account_by_user(user_id).await?.is_some() {
                    return Err(LedgerError::AccountAlreadyExists(user_id));
                }
                return Err(StoreError::Conflict(reason).into());
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            user_id,
            account_id = account.account_id,
            address,
            balance = %balance,
            "Account created"
        );
        Ok(account)
    }

    pub async fn account(&self, account_id: AccountId) -> Result<Account, LedgerError> {
        self.store
            .get_account(account_id)
            .await?
            .ok_or(LedgerError::AccountNotFound(account_id))
    }

    /// Overwrite the cached balance from the chain.
    ///
    /// On any chain failure the cache is left unchanged.
    pub async fn resync(&self, account_id: AccountId) -> Result<Account, LedgerError> {
        // Read and write under one lock: a read taken before a transfer must
        // not overwrite the value read after it
        let _guard = self.resync_locks.lock(account_id).await;
        let account = self.account(account_id).await?;
        let address = account
            .address
            .as_deref()
            .ok_or(LedgerError::MissingAddress(account_id))?;

        let balance = match self.chain.get_balance(address).await {
            Ok(balance) => balance,
            Err(e) => {
                warn!(account_id, error = %e, "Resync failed, cached balance kept");
                return Err(e.into());
            }
        };

        let updated = self.store.set_cached_balance(account_id, balance).await?;
        if updated.balance != account.balance {
            debug!(
                account_id,
                old = %account.balance,
                new = %updated.balance,
                "Cached balance healed"
            );
        }

        self.notifier
            .balance_changed(updated.user_id, account_id, updated.balance);
        Ok(updated)
    }

    /// Read-only transaction history; never used for balance authority
    pub async fn history(
        &self,
        account_id: AccountId,
        range: BlockRange,
    ) -> Result<Vec<TxRecord>, LedgerError> {
        let account = self.account(account_id).await?;
        let address = account
            .address
            .as_deref()
            .ok_or(LedgerError::MissingAddress(account_id))?;
        Ok(self.chain.list_transactions(address, range).await?)
    }
}
