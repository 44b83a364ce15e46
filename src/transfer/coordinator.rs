//! Transfer Coordinator
//!
//! The single choke point for balance-changing chain interactions.
//!
//! ```text
//! validate -> lock(source) -> resolve -> chain balance check -> submit -> resync both -> unlock
//! ```
//!
//! The source account lock covers the check-then-submit window, so two
//! debits from one account can never both pass the sufficiency check against
//! the same chain balance. Receiving accounts are not locked.

use std::sync::Arc;
use tracing::{error, info, warn};

use super::locks::KeyedLocks;
use super::types::{Reconciliation, TransferReceipt};
use crate::account::AccountService;
use crate::chain::{ChainError, ChainGateway};
use crate::core_types::AccountId;
use crate::error::LedgerError;
use crate::money::{Amount, eth_to_wei};
use crate::store::Account;

pub struct TransferCoordinator {
    accounts: Arc<AccountService>,
    chain: Arc<dyn ChainGateway>,
    locks: KeyedLocks<AccountId>,
}

impl TransferCoordinator {
    pub fn new(accounts: Arc<AccountService>, chain: Arc<dyn ChainGateway>) -> Self {
        Self {
            accounts,
            chain,
            locks: KeyedLocks::new(),
        }
    }

    pub fn accounts(&self) -> &Arc<AccountService> {
        &self.accounts
    }

    /// Move `amount` from `from` to `to` on chain, then reconcile both caches.
    ///
    /// Errors before submission mean nothing moved. `ChainUnavailable` from
    /// the submission means the outcome is unknown: re-query before any retry.
    /// Once the chain confirms, the call succeeds even if the resync fails;
    /// the receipt then carries `Reconciliation::Deferred`.
    pub async fn transfer(
        &self,
        from: AccountId,
        to: AccountId,
        amount: Amount,
    ) -> Result<TransferReceipt, LedgerError> {
        if from == to {
            return Err(LedgerError::SelfTransfer);
        }
        if amount <= Amount::ZERO {
            return Err(LedgerError::InvalidAmount);
        }
        // Sub-wei amounts cannot be sent; reject them before any chain call
        eth_to_wei(amount).map_err(|_| LedgerError::InvalidAmount)?;

        let _guard = self.locks.lock(from).await;

        let source = self.resolve(from).await?;
        let target = self.resolve(to).await?;
        let from_address = source
            .address
            .as_deref()
            .ok_or(LedgerError::MissingAddress(from))?;
        let to_address = target
            .address
            .as_deref()
            .ok_or(LedgerError::MissingAddress(to))?;

        // The cache may be stale; only the chain decides sufficiency
        let available = self.chain.get_balance(from_address).await?;
        if amount > available {
            info!(
                from_account = from,
                amount = %amount,
                available = %available,
                "Transfer rejected: insufficient funds"
            );
            return Err(LedgerError::InsufficientFunds);
        }

        let tx_hash = match self
            .chain
            .submit_transfer(from_address, to_address, amount)
            .await
        {
            Ok(tx_hash) => tx_hash,
            Err(e @ ChainError::Reverted { .. }) => {
                warn!(from_account = from, to_account = to, error = %e, "Transfer reverted");
                return Err(e.into());
            }
            Err(e) => {
                error!(
                    from_account = from,
                    to_account = to,
                    amount = %amount,
                    error = %e,
                    "Transfer outcome unknown"
                );
                return Err(e.into());
            }
        };

        info!(
            from_account = from,
            to_account = to,
            amount = %amount,
            tx_hash = %tx_hash,
            "Transfer confirmed"
        );

        let reconciliation = match self.reconcile(from, to).await {
            Ok(synced) => synced,
            Err(e) => {
                warn!(
                    tx_hash = %tx_hash,
                    error = %e,
                    "Reconciliation deferred; funds already moved"
                );
                Reconciliation::Deferred {
                    reason: e.to_string(),
                }
            }
        };

        Ok(TransferReceipt {
            tx_hash,
            from_account: from,
            to_account: to,
            amount,
            reconciliation,
        })
    }

    /// Resync both sides of a transfer. Safe to repeat; never moves funds.
    pub async fn reconcile(
        &self,
        from: AccountId,
        to: AccountId,
    ) -> Result<Reconciliation, LedgerError> {
        let source = self.accounts.resync(from).await?;
        let target = self.accounts.resync(to).await?;
        Ok(Reconciliation::Synced {
            from_balance: source.balance,
            to_balance: target.balance,
        })
    }

    async fn resolve(&self, account_id: AccountId) -> Result<Account, LedgerError> {
        let account = self.accounts.account(account_id).await?;
        if !account.is_active {
            return Err(LedgerError::AccountInactive(account_id));
        }
        Ok(account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChain;
    use crate::chain::mock::SubmitFault;
    use crate::core_types::Role;
    use crate::notify::NoopNotifier;
    use crate::store::{LedgerStore, MemoryStore, NewUser};
    use rust_decimal::Decimal;

    const A: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const B: &str = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    struct Fixture {
        coordinator: TransferCoordinator,
        chain: Arc<MockChain>,
        a: AccountId,
        b: AccountId,
    }

    async fn fixture() -> Fixture {
        let chain = Arc::new(
            MockChain::new()
                .with_account(A, Decimal::from(10))
                .with_account(B, Decimal::ZERO),
        );
        let store = Arc::new(MemoryStore::new());
        let accounts = Arc::new(AccountService::new(
            store.clone(),
            chain.clone(),
            Arc::new(NoopNotifier),
        ));

        let mut ids = Vec::new();
        for (name, address) in [("a", A), ("b", B)] {
            let user = store
                .create_user(NewUser {
                    username: name.into(),
                    email: format!("{}@example.com", name),
                    role: Role::User,
                    credential_hash: "x".into(),
                })
                .await
                .unwrap();
            let account = accounts.setup_account(user.user_id, address).await.unwrap();
            ids.push(account.account_id);
        }

        Fixture {
            coordinator: TransferCoordinator::new(accounts, chain.clone()),
            chain,
            a: ids[0],
            b: ids[1],
        }
    }

    #[tokio::test]
    async fn test_transfer_resyncs_both_sides() {
        let f = fixture().await;
        let receipt = f
            .coordinator
            .transfer(f.a, f.b, Decimal::from(4))
            .await
            .unwrap();

        assert_eq!(
            receipt.reconciliation,
            Reconciliation::Synced {
                from_balance: Decimal::from(6),
                to_balance: Decimal::from(4),
            }
        );
        assert_eq!(f.chain.submit_count(), 1);
    }

    #[tokio::test]
    async fn test_validation_happens_before_chain() {
        let f = fixture().await;
        let err = f
            .coordinator
            .transfer(f.a, f.a, Decimal::ONE)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "SELF_TRANSFER");

        let err = f
            .coordinator
            .transfer(f.a, f.b, Decimal::ZERO)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_AMOUNT");

        // 19 fractional digits is below one wei
        let err = f
            .coordinator
            .transfer(f.a, f.b, Decimal::new(1, 19))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_AMOUNT");
        assert!(!err.is_retryable());
        assert_eq!(f.chain.balance_read_count(), 2); // setup only
        assert_eq!(f.chain.submit_count(), 0);
    }

    #[tokio::test]
    async fn test_stale_cache_does_not_authorize() {
        let f = fixture().await;
        // Drained out of band; the cache still says 10
        f.chain.set_balance(A, Decimal::from(1));

        let err = f
            .coordinator
            .transfer(f.a, f.b, Decimal::from(5))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INSUFFICIENT_FUNDS");
        assert_eq!(f.chain.submit_count(), 0);
    }

    #[tokio::test]
    async fn test_revert_skips_reconciliation() {
        let f = fixture().await;
        f.chain.fail_next_submit(SubmitFault::Revert);
        f.chain.set_balance(B, Decimal::from(2));

        let err = f
            .coordinator
            .transfer(f.a, f.b, Decimal::from(4))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "TRANSACTION_REVERTED");
        assert!(!err.is_retryable());

        // Out-of-band change on B would have been picked up by a resync
        let b = f.coordinator.accounts().account(f.b).await.unwrap();
        assert_eq!(b.balance, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_unknown_outcome_is_retryable() {
        let f = fixture().await;
        f.chain.fail_next_submit(SubmitFault::TimeoutAfterApply);

        let err = f
            .coordinator
            .transfer(f.a, f.b, Decimal::from(4))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        // The transfer landed; a resync heals the cache without resubmitting
        let synced = f.coordinator.reconcile(f.a, f.b).await.unwrap();
        assert_eq!(
            synced,
            Reconciliation::Synced {
                from_balance: Decimal::from(6),
                to_balance: Decimal::from(4),
            }
        );
        assert_eq!(f.chain.submit_count(), 1);
    }

    #[tokio::test]
    async fn test_deferred_reconciliation() {
        let f = fixture().await;
        f.chain.fail_reads_after_next_submit();

        let receipt = f
            .coordinator
            .transfer(f.a, f.b, Decimal::from(4))
            .await
            .unwrap();
        assert!(!receipt.is_reconciled());

        f.chain.set_reads_down(false);
        f.coordinator.reconcile(f.a, f.b).await.unwrap();
        let a = f.coordinator.accounts().account(f.a).await.unwrap();
        assert_eq!(a.balance, Decimal::from(6));
        assert_eq!(f.chain.submit_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_account() {
        let f = fixture().await;
        let err = f
            .coordinator
            .transfer(f.a, 999, Decimal::ONE)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ACCOUNT_NOT_FOUND");
    }
}
