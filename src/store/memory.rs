//! In-memory ledger store
//!
//! All tables sit behind one mutex, so every trait method is atomic with
//! respect to every other.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use super::{
    Account, LedgerStore, Loan, LoanStatusUpdate, NewLoan, NewUser, StoreError, User,
};
use crate::chain::normalize_address;
use crate::core_types::{AccountId, LoanId, UserId};
use crate::loan::state::LoanStatus;
use crate::money::Amount;

#[derive(Default)]
struct Tables {
    users: BTreeMap<UserId, User>,
    accounts: BTreeMap<AccountId, Account>,
    loans: BTreeMap<LoanId, Loan>,
    next_user_id: UserId,
    next_account_id: AccountId,
    next_loan_id: LoanId,
}

impl Tables {
    /// Account row with `address` read through from the owner
    fn account_view(&self, account: &Account) -> Account {
        let mut view = account.clone();
        view.address = self
            .users
            .get(&account.user_id)
            .and_then(|u| u.public_key.clone());
        view
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn create_user(&self, new: NewUser) -> Result<User, StoreError> {
        let mut t = self.lock();
        if t
            .users
            .values()
            .any(|u| u.username == new.username || u.email == new.email)
        {
            return Err(StoreError::Conflict(format!(
                "username or email taken: {}",
                new.username
            )));
        }

        t.next_user_id += 1;
        let user = User {
            user_id: t.next_user_id,
            username: new.username,
            email: new.email,
            role: new.role,
            public_key: None,
            credential_hash: new.credential_hash,
            created_at: Utc::now(),
        };
        t.users.insert(user.user_id, user.clone());
        Ok(user)
    }

    async fn get_user(&self, user_id: UserId) -> Result<Option<User>, StoreError> {
        Ok(self.lock().users.get(&user_id).cloned())
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .lock()
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn create_account_with_binding(
        &self,
        user_id: UserId,
        address: &str,
        balance: Amount,
    ) -> Result<Account, StoreError> {
        let mut t = self.lock();

        if !t.users.contains_key(&user_id) {
            return Err(StoreError::NotFound(format!("user {}", user_id)));
        }
        if t.accounts.values().any(|a| a.user_id == user_id) {
            return Err(StoreError::Conflict(format!(
                "account exists for user {}",
                user_id
            )));
        }
        let wanted = normalize_address(address);
        if t.users.values().any(|u| {
            u.user_id != user_id && u.public_key.as_deref().map(normalize_address) == Some(wanted.clone())
        }) {
            return Err(StoreError::Conflict(format!(
                "address already bound: {}",
                address
            )));
        }

        if let Some(user) = t.users.get_mut(&user_id) {
            user.public_key = Some(address.to_string());
        }
        t.next_account_id += 1;
        let account = Account {
            account_id: t.next_account_id,
            user_id,
            address: Some(address.to_string()),
            balance,
            is_active: true,
            active_loan: false,
            created_at: Utc::now(),
        };
        t.accounts.insert(account.account_id, account.clone());
        Ok(account)
    }

    async fn get_account(&self, account_id: AccountId) -> Result<Option<Account>, StoreError> {
        let t = self.lock();
        Ok(t.accounts.get(&account_id).map(|a| t.account_view(a)))
    }

    async fn get_account_by_user(&self, user_id: UserId) -> Result<Option<Account>, StoreError> {
        let t = self.lock();
        Ok(t.accounts
            .values()
            .find(|a| a.user_id == user_id)
            .map(|a| t.account_view(a)))
    }

    async fn list_accounts(&self) -> Result<Vec<Account>, StoreError> {
        let t = self.lock();
        Ok(t.accounts.values().map(|a| t.account_view(a)).collect())
    }

    async fn set_cached_balance(
        &self,
        account_id: AccountId,
        balance: Amount,
    ) -> Result<Account, StoreError> {
        let mut t = self.lock();
        let account = t
            .accounts
            .get_mut(&account_id)
            .ok_or_else(|| StoreError::NotFound(format!("account {}", account_id)))?;
        account.balance = balance;
        let account = account.clone();
        Ok(t.account_view(&account))
    }

    async fn create_loan(&self, new: NewLoan) -> Result<Loan, StoreError> {
        let mut t = self.lock();
        let account = t
            .accounts
            .get_mut(&new.account_id)
            .ok_or_else(|| StoreError::NotFound(format!("account {}", new.account_id)))?;
        if account.active_loan {
            return Err(StoreError::Conflict(format!(
                "account {} has an active loan",
                new.account_id
            )));
        }
        account.active_loan = true;

        t.next_loan_id += 1;
        let loan = Loan {
            loan_id: t.next_loan_id,
            account_id: new.account_id,
            amount: new.amount,
            interest_rate: new.interest_rate,
            duration: new.duration,
            start_date: new.start_date,
            end_date: new.end_date,
            remaining_balance: new.remaining_balance,
            status: LoanStatus::Pending,
        };
        t.loans.insert(loan.loan_id, loan.clone());
        Ok(loan)
    }

    async fn get_loan(&self, loan_id: LoanId) -> Result<Option<Loan>, StoreError> {
        Ok(self.lock().loans.get(&loan_id).cloned())
    }

    async fn active_loan_for_account(
        &self,
        account_id: AccountId,
    ) -> Result<Option<Loan>, StoreError> {
        Ok(self
            .lock()
            .loans
            .values()
            .find(|l| l.account_id == account_id && l.status.is_active())
            .cloned())
    }

    async fn loans_for_account(&self, account_id: AccountId) -> Result<Vec<Loan>, StoreError> {
        Ok(self
            .lock()
            .loans
            .values()
            .filter(|l| l.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn set_loan_status(
        &self,
        loan_id: LoanId,
        expected: LoanStatus,
        update: LoanStatusUpdate,
    ) -> Result<Option<Loan>, StoreError> {
        let mut t = self.lock();
        let loan = t
            .loans
            .get_mut(&loan_id)
            .ok_or_else(|| StoreError::NotFound(format!("loan {}", loan_id)))?;
        if loan.status != expected {
            return Ok(None);
        }

        loan.status = update.status;
        if let Some((start, end)) = update.term {
            loan.start_date = start;
            loan.end_date = end;
        }
        let loan = loan.clone();

        if update.status.is_terminal()
            && let Some(account) = t.accounts.get_mut(&loan.account_id)
        {
            account.active_loan = false;
        }
        Ok(Some(loan))
    }

    async fn apply_repayment(
        &self,
        loan_id: LoanId,
        expected_remaining: Amount,
        payment: Amount,
    ) -> Result<Option<Loan>, StoreError> {
        let mut t = self.lock();
        let loan = t
            .loans
            .get_mut(&loan_id)
            .ok_or_else(|| StoreError::NotFound(format!("loan {}", loan_id)))?;
        if loan.status != LoanStatus::Approved || loan.remaining_balance != expected_remaining {
            return Ok(None);
        }

        loan.remaining_balance -= payment;
        if loan.remaining_balance.is_zero() {
            loan.status = LoanStatus::Paid;
        }
        let loan = loan.clone();

        if loan.status == LoanStatus::Paid
            && let Some(account) = t.accounts.get_mut(&loan.account_id)
        {
            account.active_loan = false;
        }
        Ok(Some(loan))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::Role;
    use crate::loan::terms::{InterestRate, LoanDuration};
    use rust_decimal::Decimal;

    const ADDR: &str = "0x90f8bf6a479f320ead074411a4b0e7944ea8c9c1";

    fn new_user(name: &str) -> NewUser {
        NewUser {
            username: name.to_string(),
            email: format!("{}@example.com", name),
            role: Role::User,
            credential_hash: "hash".to_string(),
        }
    }

    fn new_loan(account_id: AccountId) -> NewLoan {
        let now = Utc::now();
        NewLoan {
            account_id,
            amount: Decimal::from(5),
            interest_rate: InterestRate::Standard,
            duration: LoanDuration::HalfYear,
            start_date: now,
            end_date: LoanDuration::HalfYear.end_from(now),
            remaining_balance: Decimal::new(55, 1),
        }
    }

    #[tokio::test]
    async fn test_account_binding_is_one_shot() {
        let store = MemoryStore::new();
        let user = store.create_user(new_user("alice")).await.unwrap();

        let account = store
            .create_account_with_binding(user.user_id, ADDR, Decimal::from(10))
            .await
            .unwrap();
        assert_eq!(account.address.as_deref(), Some(ADDR));
        assert!(account.is_active);

        let stored = store.get_user(user.user_id).await.unwrap().unwrap();
        assert_eq!(stored.public_key.as_deref(), Some(ADDR));

        let again = store
            .create_account_with_binding(user.user_id, ADDR, Decimal::from(10))
            .await;
        assert!(matches!(again, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_address_uniqueness() {
        let store = MemoryStore::new();
        let a = store.create_user(new_user("alice")).await.unwrap();
        let b = store.create_user(new_user("bob")).await.unwrap();
        store
            .create_account_with_binding(a.user_id, ADDR, Decimal::ZERO)
            .await
            .unwrap();
        let dup = store
            .create_account_with_binding(b.user_id, &ADDR.to_uppercase().replace("0X", "0x"), Decimal::ZERO)
            .await;
        assert!(matches!(dup, Err(StoreError::Conflict(_))));
        // Failed binding left no trace
        assert!(store.get_user(b.user_id).await.unwrap().unwrap().public_key.is_none());
        assert!(store.get_account_by_user(b.user_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_loan_flag_guard() {
        let store = MemoryStore::new();
        let user = store.create_user(new_user("alice")).await.unwrap();
        let account = store
            .create_account_with_binding(user.user_id, ADDR, Decimal::from(10))
            .await
            .unwrap();

        let loan = store.create_loan(new_loan(account.account_id)).await.unwrap();
        assert_eq!(loan.status, LoanStatus::Pending);
        assert!(store.get_account(account.account_id).await.unwrap().unwrap().active_loan);

        let second = store.create_loan(new_loan(account.account_id)).await;
        assert!(matches!(second, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_repayment_closes_loan_and_flag_together() {
        let store = MemoryStore::new();
        let user = store.create_user(new_user("alice")).await.unwrap();
        let account = store
            .create_account_with_binding(user.user_id, ADDR, Decimal::from(10))
            .await
            .unwrap();
        let loan = store.create_loan(new_loan(account.account_id)).await.unwrap();

        // Not approved yet
        assert!(
            store
                .apply_repayment(loan.loan_id, loan.remaining_balance, Decimal::ONE)
                .await
                .unwrap()
                .is_none()
        );

        store
            .set_loan_status(
                loan.loan_id,
                LoanStatus::Pending,
                LoanStatusUpdate {
                    status: LoanStatus::Approved,
                    term: None,
                },
            )
            .await
            .unwrap()
            .unwrap();

        let partial = store
            .apply_repayment(loan.loan_id, Decimal::new(55, 1), Decimal::new(5, 1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(partial.remaining_balance, Decimal::from(5));
        assert_eq!(partial.status, LoanStatus::Approved);

        // Stale expectation is refused
        assert!(
            store
                .apply_repayment(loan.loan_id, Decimal::new(55, 1), Decimal::from(5))
                .await
                .unwrap()
                .is_none()
        );

        let paid = store
            .apply_repayment(loan.loan_id, Decimal::from(5), Decimal::from(5))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(paid.status, LoanStatus::Paid);
        assert!(!store.get_account(account.account_id).await.unwrap().unwrap().active_loan);
        assert!(store.active_loan_for_account(account.account_id).await.unwrap().is_none());
    }
}
