//! Ledger facade
//!
//! Wires the services together and exposes the operations a request handler
//! calls with an authenticated [`Principal`]. Ownership and role checks live
//! here; the services below trust their arguments.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::account::AccountService;
use crate::chain::{BlockRange, ChainGateway, TxRecord};
use crate::core_types::{AccountId, LoanId, Principal};
use crate::error::LedgerError;
use crate::loan::{InterestRate, LoanDecision, LoanDuration, LoanEngine, Repayment};
use crate::money::Amount;
use crate::notify::BalanceNotifier;
use crate::store::{Account, LedgerStore, Loan};
use crate::transfer::{TransferCoordinator, TransferReceipt};

/// Transfer request from the principal's own account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendRequest {
    pub to_account: AccountId,
    pub amount: Amount,
    /// When present, must name the owner of `to_account`
    #[serde(default)]
    pub recipient_username: Option<String>,
}

pub struct Ledger {
    store: Arc<dyn LedgerStore>,
    accounts: Arc<AccountService>,
    coordinator: Arc<TransferCoordinator>,
    loans: Arc<LoanEngine>,
}

impl Ledger {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        chain: Arc<dyn ChainGateway>,
        notifier: Arc<dyn BalanceNotifier>,
        bank_account_id: AccountId,
    ) -> Self {
        let accounts = Arc::new(AccountService::new(store.clone(), chain.clone(), notifier));
        let coordinator = Arc::new(TransferCoordinator::new(accounts.clone(), chain));
        let loans = Arc::new(LoanEngine::new(
            store.clone(),
            coordinator.clone(),
            bank_account_id,
        ));
        Self {
            store,
            accounts,
            coordinator,
            loans,
        }
    }

    pub fn accounts(&self) -> &Arc<AccountService> {
        &self.accounts
    }

    pub fn coordinator(&self) -> &Arc<TransferCoordinator> {
        &self.coordinator
    }

    pub fn loans(&self) -> &Arc<LoanEngine> {
        &self.loans
    }

    pub async fn setup_account(
        &self,
        principal: &Principal,
        address: &str,
    ) -> Result<Account, LedgerError> {
        self.accounts.setup_account(principal.user_id, address).await
    }

    /// The principal's account, resynced from the chain
    pub async fn balance(&self, principal: &Principal) -> Result<Account, LedgerError> {
        let account = self.own_account(principal).await?;
        self.accounts.resync(account.account_id).await
    }

    pub async fn history(
        &self,
        principal: &Principal,
        range: BlockRange,
    ) -> Result<Vec<TxRecord>, LedgerError> {
        let account = self.own_account(principal).await?;
        self.accounts.history(account.account_id, range).await
    }

    pub async fn send(
        &self,
        principal: &Principal,
        request: SendRequest,
    ) -> Result<TransferReceipt, LedgerError> {
        let source = self.own_account(principal).await?;

        if let Some(username) = request.recipient_username.as_deref() {
            let target = self.accounts.account(request.to_account).await?;
            let named = self.store.get_user_by_username(username).await?;
            if named.map(|u| u.user_id) != Some(target.user_id) {
                return Err(LedgerError::RecipientMismatch);
            }
        }

        self.coordinator
            .transfer(source.account_id, request.to_account, request.amount)
            .await
    }

    pub async fn request_loan(
        &self,
        principal: &Principal,
        amount: Amount,
        duration: LoanDuration,
        rate: InterestRate,
    ) -> Result<Loan, LedgerError> {
        let account = self.own_account(principal).await?;
        self.loans
            .request_loan(account.account_id, amount, duration, rate)
            .await
    }

    pub async fn review_loan(
        &self,
        principal: &Principal,
        loan_id: LoanId,
        decision: LoanDecision,
    ) -> Result<Loan, LedgerError> {
        self.loans.review_loan(principal, loan_id, decision).await
    }

    /// Repay from `payer`, which the principal must own
    pub async fn repay_loan(
        &self,
        principal: &Principal,
        loan_id: LoanId,
        payer: AccountId,
        payment: Amount,
    ) -> Result<Repayment, LedgerError> {
        let account = self.accounts.account(payer).await?;
        if account.user_id != principal.user_id {
            return Err(LedgerError::Forbidden);
        }
        self.loans.repay_loan(loan_id, payer, payment).await
    }

    pub async fn my_loans(&self, principal: &Principal) -> Result<Vec<Loan>, LedgerError> {
        let account = self.own_account(principal).await?;
        self.loans.loans_for_account(account.account_id).await
    }

    /// Admin only
    pub async fn list_accounts(&self, principal: &Principal) -> Result<Vec<Account>, LedgerError> {
        if !principal.is_admin() {
            return Err(LedgerError::Forbidden);
        }
        Ok(self.store.list_accounts().await?)
    }

    async fn own_account(&self, principal: &Principal) -> Result<Account, LedgerError> {
        self.store
            .get_account_by_user(principal.user_id)
            .await?
            .ok_or(LedgerError::NoAccount(principal.user_id))
    }
}
