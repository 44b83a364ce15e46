//! Loan Engine
//!
//! Lock order is loan first, then the payer account (taken inside the
//! coordinator). Nothing takes them in the opposite order.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

use super::state::LoanStatus;
use super::terms::{InterestRate, LoanDuration, quote};
use crate::core_types::{AccountId, LoanId, Principal};
use crate::error::LedgerError;
use crate::money::{Amount, eth_to_wei};
use crate::store::{LedgerStore, Loan, LoanStatusUpdate, NewLoan, StoreError};
use crate::transfer::{KeyedLocks, TransferCoordinator, TransferReceipt};

/// Outcome of an admin review
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoanDecision {
    Approve,
    Reject,
}

/// Confirmed repayment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repayment {
    pub loan: Loan,
    pub receipt: TransferReceipt,
}

pub struct LoanEngine {
    store: Arc<dyn LedgerStore>,
    coordinator: Arc<TransferCoordinator>,
    bank_account_id: AccountId,
    loan_locks: KeyedLocks<LoanId>,
}

impl LoanEngine {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        coordinator: Arc<TransferCoordinator>,
        bank_account_id: AccountId,
    ) -> Self {
        Self {
            store,
            coordinator,
            bank_account_id,
            loan_locks: KeyedLocks::new(),
        }
    }

    pub fn bank_account_id(&self) -> AccountId {
        self.bank_account_id
    }

    /// Open a PENDING loan for `account_id`.
    ///
    /// The amount is checked against the cached balance: a request moves no
    /// money, so it does not pay for a chain round trip.
    pub async fn request_loan(
        &self,
        account_id: AccountId,
        amount: Amount,
        duration: LoanDuration,
        rate: InterestRate,
    ) -> Result<Loan, LedgerError> {
        if amount <= Amount::ZERO {
            return Err(LedgerError::InvalidAmount);
        }
        eth_to_wei(amount).map_err(|_| LedgerError::InvalidAmount)?;

        let account = self
            .store
            .get_account(account_id)
            .await?
            .ok_or(LedgerError::AccountNotFound(account_id))?;
        if !account.is_active {
            return Err(LedgerError::AccountInactive(account_id));
        }
        if account.active_loan
            || self
                .store
                .active_loan_for_account(account_id)
                .await?
                .is_some()
        {
            return Err(LedgerError::LoanAlreadyActive);
        }
        if amount > account.balance {
            return Err(LedgerError::AmountExceedsBalance);
        }

        let q = quote(amount, rate);
        let now = Utc::now();
        let loan = self
            .store
            .create_loan(NewLoan {
                account_id,
                amount,
                interest_rate: rate,
                duration,
                start_date: now,
                end_date: duration.end_from(now),
                remaining_balance: q.total_payable,
            })
            .await
            .map_err(|e| match e {
                StoreError::Conflict(_) => LedgerError::LoanAlreadyActive,
                other => other.into(),
            })?;

        info!(
            loan_id = loan.loan_id,
            account_id,
            amount = %amount,
            interest = %q.interest,
            total_payable = %q.total_payable,
            "Loan requested"
        );
        Ok(loan)
    }

    /// Admin review. Approval commits the term from now.
    pub async fn review_loan(
        &self,
        principal: &Principal,
        loan_id: LoanId,
        decision: LoanDecision,
    ) -> Result<Loan, LedgerError> {
        if !principal.is_admin() {
            return Err(LedgerError::Forbidden);
        }

        let _guard = self.loan_locks.lock(loan_id).await;
        let loan = self.loan(loan_id).await?;

        let next = match decision {
            LoanDecision::Approve => LoanStatus::Approved,
            LoanDecision::Reject => LoanStatus::Rejected,
        };
        if !loan.status.can_review_to(next) {
            return Err(LedgerError::InvalidStateTransition(format!(
                "{} -> {}",
                loan.status, next
            )));
        }

        let term = match decision {
            LoanDecision::Approve => {
                let now = Utc::now();
                Some((now, loan.duration.end_from(now)))
            }
            LoanDecision::Reject => None,
        };

        let updated = self
            .store
            .set_loan_status(loan_id, loan.status, LoanStatusUpdate { status: next, term })
            .await?
            .ok_or_else(|| {
                LedgerError::InvalidStateTransition(format!("loan {} changed concurrently", loan_id))
            })?;

        info!(
            loan_id,
            reviewer = principal.user_id,
            from = %loan.status,
            to = %updated.status,
            "Loan reviewed"
        );
        Ok(updated)
    }

    /// Pay `payment` from `payer` to the bank account and apply it to the loan.
    ///
    /// Fails without moving money unless the loan is APPROVED and
    /// `0 < payment <= remaining`. A loan that is already PAID rejects
    /// every further attempt with `LoanNotApproved`.
    pub async fn repay_loan(
        &self,
        loan_id: LoanId,
        payer: AccountId,
        payment: Amount,
    ) -> Result<Repayment, LedgerError> {
        let _guard = self.loan_locks.lock(loan_id).await;
        let loan = self.loan(loan_id).await?;

        if loan.status != LoanStatus::Approved {
            return Err(LedgerError::LoanNotApproved(loan_id));
        }
        if payment <= Amount::ZERO {
            return Err(LedgerError::InvalidPayment(
                "payment must be greater than zero".into(),
            ));
        }
        if let Err(e) = eth_to_wei(payment) {
            return Err(LedgerError::InvalidPayment(format!(
                "payment {} is not payable on chain: {}",
                payment, e
            )));
        }
        if payment > loan.remaining_balance {
            return Err(LedgerError::InvalidPayment(format!(
                "payment {} exceeds remaining balance {}",
                payment, loan.remaining_balance
            )));
        }

        let receipt = self
            .coordinator
            .transfer(payer, self.bank_account_id, payment)
            .await?;

        // Funds have moved. From here a failure leaves the loan ledger behind
        // the chain and must be settled by hand using the tx hash.
        let updated = match self
            .store
            .apply_repayment(loan_id, loan.remaining_balance, payment)
            .await
        {
            Ok(Some(updated)) => updated,
            Ok(None) => {
                error!(
                    loan_id,
                    tx_hash = %receipt.tx_hash,
                    "Loan changed during repayment; payment not applied"
                );
                return Err(LedgerError::InvalidStateTransition(format!(
                    "loan {} changed during repayment {}",
                    loan_id, receipt.tx_hash
                )));
            }
            Err(e) => {
                error!(
                    loan_id,
                    tx_hash = %receipt.tx_hash,
                    error = %e,
                    "Repayment confirmed on chain but not recorded"
                );
                return Err(e.into());
            }
        };

        info!(
            loan_id,
            payer_account = payer,
            payment = %payment,
            remaining = %updated.remaining_balance,
            status = %updated.status,
            tx_hash = %receipt.tx_hash,
            "Loan repayment applied"
        );
        if updated.status == LoanStatus::Paid {
            info!(loan_id, account_id = updated.account_id, "Loan paid off");
        }

        Ok(Repayment {
            loan: updated,
            receipt,
        })
    }

    pub async fn loan(&self, loan_id: LoanId) -> Result<Loan, LedgerError> {
        self.store
            .get_loan(loan_id)
            .await?
            .ok_or(LedgerError::LoanNotFound(loan_id))
    }

    pub async fn loans_for_account(&self, account_id: AccountId) -> Result<Vec<Loan>, LedgerError> {
        Ok(self.store.loans_for_account(account_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::AccountService;
    use crate::chain::MockChain;
    use crate::core_types::Role;
    use crate::notify::NoopNotifier;
    use crate::store::{MemoryStore, NewUser};
    use rust_decimal::Decimal;

    const BANK: &str = "0xba00000000000000000000000000000000000001";
    const ALICE: &str = "0xa100000000000000000000000000000000000001";

    struct Fixture {
        engine: LoanEngine,
        chain: Arc<MockChain>,
        store: Arc<MemoryStore>,
        alice: AccountId,
        admin: Principal,
    }

    async fn fixture() -> Fixture {
        let chain = Arc::new(
            MockChain::new()
                .with_account(BANK, Decimal::from(1000))
                .with_account(ALICE, Decimal::from(10)),
        );
        let store = Arc::new(MemoryStore::new());
        let accounts = Arc::new(AccountService::new(
            store.clone(),
            chain.clone(),
            Arc::new(NoopNotifier),
        ));

        let mut ids = Vec::new();
        let mut admin = None;
        for (name, role, address) in [("bank", Role::Admin, BANK), ("alice", Role::User, ALICE)] {
            let user = store
                .create_user(NewUser {
                    username: name.into(),
                    email: format!("{}@example.com", name),
                    role,
                    credential_hash: "x".into(),
                })
                .await
                .unwrap();
            if role == Role::Admin {
                admin = Some(user.principal());
            }
            ids.push(accounts.setup_account(user.user_id, address).await.unwrap().account_id);
        }

        let coordinator = Arc::new(TransferCoordinator::new(accounts, chain.clone()));
        Fixture {
            engine: LoanEngine::new(store.clone(), coordinator, ids[0]),
            chain,
            store,
            alice: ids[1],
            admin: admin.unwrap(),
        }
    }

    async fn approved_loan(f: &Fixture, amount: i64) -> Loan {
        let loan = f
            .engine
            .request_loan(
                f.alice,
                Decimal::from(amount),
                LoanDuration::HalfYear,
                InterestRate::Standard,
            )
            .await
            .unwrap();
        f.engine
            .review_loan(&f.admin, loan.loan_id, LoanDecision::Approve)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_request_creates_pending_loan() {
        let f = fixture().await;
        let loan = f
            .engine
            .request_loan(
                f.alice,
                Decimal::from(5),
                LoanDuration::HalfYear,
                InterestRate::Standard,
            )
            .await
            .unwrap();

        assert_eq!(loan.status, LoanStatus::Pending);
        assert_eq!(loan.remaining_balance, Decimal::new(55, 1));
        assert_eq!((loan.end_date - loan.start_date).num_days(), 180);
        assert!(f.store.get_account(f.alice).await.unwrap().unwrap().active_loan);
    }

    #[tokio::test]
    async fn test_request_validation() {
        let f = fixture().await;
        let err = f
            .engine
            .request_loan(f.alice, Decimal::from(11), LoanDuration::Year, InterestRate::Low)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "AMOUNT_EXCEEDS_BALANCE");

        let err = f
            .engine
            .request_loan(f.alice, Decimal::ZERO, LoanDuration::Year, InterestRate::Low)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_AMOUNT");

        let err = f
            .engine
            .request_loan(f.alice, Decimal::new(1, 19), LoanDuration::Year, InterestRate::Low)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_AMOUNT");
        assert!(f.store.loans_for_account(f.alice).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_smallest_loan_stays_payable() {
        let f = fixture().await;
        let one_wei = Decimal::new(1, 18);
        let loan = f
            .engine
            .request_loan(f.alice, one_wei, LoanDuration::Quarter, InterestRate::Low)
            .await
            .unwrap();
        // 5% of one wei rounds up to a whole wei
        assert_eq!(loan.remaining_balance, Decimal::new(2, 18));

        f.engine
            .review_loan(&f.admin, loan.loan_id, LoanDecision::Approve)
            .await
            .unwrap();
        let paid = f
            .engine
            .repay_loan(loan.loan_id, f.alice, loan.remaining_balance)
            .await
            .unwrap();
        assert_eq!(paid.loan.status, LoanStatus::Paid);
    }

    #[tokio::test]
    async fn test_second_loan_rejected_while_active() {
        let f = fixture().await;
        approved_loan(&f, 2).await;

        let err = f
            .engine
            .request_loan(f.alice, Decimal::ONE, LoanDuration::Quarter, InterestRate::Low)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "LOAN_ALREADY_ACTIVE");
    }

    #[tokio::test]
    async fn test_review_requires_admin() {
        let f = fixture().await;
        let loan = f
            .engine
            .request_loan(f.alice, Decimal::ONE, LoanDuration::Quarter, InterestRate::Low)
            .await
            .unwrap();
        let user = Principal::new(99, Role::User, None);

        let err = f
            .engine
            .review_loan(&user, loan.loan_id, LoanDecision::Approve)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN");
    }

    #[tokio::test]
    async fn test_reject_releases_account() {
        let f = fixture().await;
        let loan = f
            .engine
            .request_loan(f.alice, Decimal::ONE, LoanDuration::Quarter, InterestRate::Low)
            .await
            .unwrap();
        let rejected = f
            .engine
            .review_loan(&f.admin, loan.loan_id, LoanDecision::Reject)
            .await
            .unwrap();
        assert_eq!(rejected.status, LoanStatus::Rejected);

        let err = f
            .engine
            .review_loan(&f.admin, loan.loan_id, LoanDecision::Approve)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_STATE_TRANSITION");

        f.engine
            .request_loan(f.alice, Decimal::ONE, LoanDuration::Quarter, InterestRate::Low)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_pending_loan_refuses_payment() {
        let f = fixture().await;
        let loan = f
            .engine
            .request_loan(f.alice, Decimal::ONE, LoanDuration::Quarter, InterestRate::Low)
            .await
            .unwrap();

        let err = f
            .engine
            .repay_loan(loan.loan_id, f.alice, Decimal::ONE)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "LOAN_NOT_APPROVED");
        assert_eq!(f.chain.submit_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_payments_move_nothing() {
        let f = fixture().await;
        let loan = approved_loan(&f, 5).await;

        for payment in [
            Decimal::ZERO,
            Decimal::from(-1),
            Decimal::from(6),
            Decimal::new(1, 19),
        ] {
            let err = f
                .engine
                .repay_loan(loan.loan_id, f.alice, payment)
                .await
                .unwrap_err();
            assert_eq!(err.code(), "INVALID_PAYMENT");
        }
        assert_eq!(f.chain.submit_count(), 0);
    }

    #[tokio::test]
    async fn test_partial_then_final_repayment() {
        let f = fixture().await;
        let loan = approved_loan(&f, 5).await;

        let first = f
            .engine
            .repay_loan(loan.loan_id, f.alice, Decimal::from(2))
            .await
            .unwrap();
        assert_eq!(first.loan.status, LoanStatus::Approved);
        assert_eq!(first.loan.remaining_balance, Decimal::new(35, 1));

        let last = f
            .engine
            .repay_loan(loan.loan_id, f.alice, Decimal::new(35, 1))
            .await
            .unwrap();
        assert_eq!(last.loan.status, LoanStatus::Paid);
        assert_eq!(last.loan.remaining_balance, Decimal::ZERO);
        assert!(!f.store.get_account(f.alice).await.unwrap().unwrap().active_loan);
        assert_eq!(f.chain.balance_of(BANK), Decimal::new(10055, 1));

        let err = f
            .engine
            .repay_loan(loan.loan_id, f.alice, Decimal::ONE)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "LOAN_NOT_APPROVED");
        assert_eq!(f.chain.submit_count(), 2);
    }

    #[tokio::test]
    async fn test_repayment_needs_chain_funds() {
        let f = fixture().await;
        let loan = approved_loan(&f, 5).await;
        f.chain.set_balance(ALICE, Decimal::ONE);

        let err = f
            .engine
            .repay_loan(loan.loan_id, f.alice, Decimal::from(2))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INSUFFICIENT_FUNDS");

        let unchanged = f.engine.loan(loan.loan_id).await.unwrap();
        assert_eq!(unchanged.remaining_balance, Decimal::new(55, 1));
    }
}
