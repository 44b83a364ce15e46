//! In-memory chain for tests and local runs
//!
//! Behaves like a single-node dev chain: known accounts with balances, a
//! transfer either applies atomically or reverts. Failure injection covers the
//! outcomes the ledger must tell apart (revert, unknown outcome, read outage).

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{
    BlockRange, ChainError, ChainGateway, TxRecord, ensure_well_formed, normalize_address,
};
use crate::core_types::TxHash;
use crate::money::{Amount, eth_to_wei};

/// Injected outcome for the next `submit_transfer`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitFault {
    /// Receipt status 0: nothing moves
    Revert,
    /// Node unreachable before the transfer was accepted: nothing moves
    UnavailableBeforeSend,
    /// Transfer lands but the receipt wait times out: funds DO move
    TimeoutAfterApply,
}

#[derive(Default)]
struct MockState {
    balances: HashMap<String, Decimal>,
    known: HashSet<String>,
    history: Vec<TxRecord>,
    block: u64,
    next_submit_fault: Option<SubmitFault>,
    /// Reads fail once the next successful submission has been applied
    fail_reads_after_submit: bool,
    reads_down: bool,
}

/// Mock EVM chain
#[derive(Default)]
pub struct MockChain {
    state: Mutex<MockState>,
    submit_latency: Mutex<Option<Duration>>,
    read_delay: Mutex<Option<Duration>>,
    submit_count: AtomicUsize,
    balance_reads: AtomicUsize,
}

impl std::fmt::Debug for MockChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockChain")
            .field("submit_count", &self.submit_count())
            .finish()
    }
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node-known account with an opening balance
    pub fn with_account(self, address: &str, balance: Amount) -> Self {
        self.add_account(address, balance);
        self
    }

    pub fn add_account(&self, address: &str, balance: Amount) {
        let key = normalize_address(address);
        let mut state = self.lock();
        state.known.insert(key.clone());
        state.balances.insert(key, balance);
    }

    /// Out-of-band balance change (e.g. a deposit the ledger did not initiate)
    pub fn set_balance(&self, address: &str, balance: Amount) {
        self.lock()
            .balances
            .insert(normalize_address(address), balance);
    }

    pub fn balance_of(&self, address: &str) -> Amount {
        self.lock()
            .balances
            .get(&normalize_address(address))
            .copied()
            .unwrap_or_default()
    }

    /// Delay applied inside every submission, before state changes
    pub fn set_submit_latency(&self, latency: Duration) {
        *self.submit_latency.lock().unwrap() = Some(latency);
    }

    /// Hold the next balance read for `delay` after taking its value, so
    /// the caller sees a balance that may be stale by the time it returns
    pub fn delay_next_balance_read(&self, delay: Duration) {
        *self.read_delay.lock().unwrap() = Some(delay);
    }

    pub fn fail_next_submit(&self, fault: SubmitFault) {
        self.lock().next_submit_fault = Some(fault);
    }

    /// Make balance reads fail as soon as the next submission lands
    pub fn fail_reads_after_next_submit(&self) {
        self.lock().fail_reads_after_submit = true;
    }

    /// Toggle a full read outage
    pub fn set_reads_down(&self, down: bool) {
        self.lock().reads_down = down;
    }

    /// Number of `submit_transfer` calls, including failed ones
    pub fn submit_count(&self) -> usize {
        self.submit_count.load(Ordering::SeqCst)
    }

    pub fn balance_read_count(&self) -> usize {
        self.balance_reads.load(Ordering::SeqCst)
    }

    pub fn transactions(&self) -> Vec<TxRecord> {
        self.lock().history.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    fn new_tx_hash() -> TxHash {
        let a = uuid::Uuid::new_v4();
        let b = uuid::Uuid::new_v4();
        TxHash::new(format!(
            "0x{}{}",
            hex::encode(a.as_bytes()),
            hex::encode(b.as_bytes())
        ))
    }
}

#[async_trait]
impl ChainGateway for MockChain {
    async fn validate_address(&self, address: &str) -> Result<bool, ChainError> {
        ensure_well_formed(address)?;
        let state = self.lock();
        if state.reads_down {
            return Err(ChainError::Unavailable("mock node down".into()));
        }
        Ok(state.known.contains(&normalize_address(address)))
    }

    async fn get_balance(&self, address: &str) -> Result<Amount, ChainError> {
        ensure_well_formed(address)?;
        self.balance_reads.fetch_add(1, Ordering::SeqCst);
        let balance = {
            let state = self.lock();
            if state.reads_down {
                return Err(ChainError::Unavailable("mock node down".into()));
            }
            state
                .balances
                .get(&normalize_address(address))
                .copied()
                .unwrap_or_default()
        };

        let delay = self.read_delay.lock().unwrap().take();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(balance)
    }

    async fn submit_transfer(
        &self,
        from: &str,
        to: &str,
        amount: Amount,
    ) -> Result<TxHash, ChainError> {
        ensure_well_formed(from)?;
        ensure_well_formed(to)?;
        self.submit_count.fetch_add(1, Ordering::SeqCst);
        eth_to_wei(amount).map_err(|e| ChainError::Reverted {
            tx_hash: None,
            reason: format!("amount not representable in wei: {}", e),
        })?;

        let latency = *self.submit_latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.lock();
        let tx_hash = Self::new_tx_hash();

        let fault = state.next_submit_fault.take();
        match fault {
            Some(SubmitFault::Revert) => {
                return Err(ChainError::Reverted {
                    tx_hash: Some(tx_hash),
                    reason: "receipt status 0x0".into(),
                });
            }
            Some(SubmitFault::UnavailableBeforeSend) => {
                return Err(ChainError::Unavailable("mock node unreachable".into()));
            }
            Some(SubmitFault::TimeoutAfterApply) | None => {}
        }

        let from_key = normalize_address(from);
        let to_key = normalize_address(to);
        let available = state.balances.get(&from_key).copied().unwrap_or_default();
        if amount > available {
            return Err(ChainError::Reverted {
                tx_hash: Some(tx_hash),
                reason: "insufficient funds for transfer".into(),
            });
        }

        state.balances.insert(from_key, available - amount);
        *state.balances.entry(to_key).or_default() += amount;
        state.block += 1;
        let block_number = state.block;
        state.history.push(TxRecord {
            tx_hash: tx_hash.clone(),
            block_number,
            from: from.to_string(),
            to: Some(to.to_string()),
            amount,
        });

        if state.fail_reads_after_submit {
            state.fail_reads_after_submit = false;
            state.reads_down = true;
        }

        if fault == Some(SubmitFault::TimeoutAfterApply) {
            return Err(ChainError::Unavailable(format!(
                "receipt timeout for {}; outcome unknown",
                tx_hash
            )));
        }

        Ok(tx_hash)
    }

    async fn list_transactions(
        &self,
        address: &str,
        range: BlockRange,
    ) -> Result<Vec<TxRecord>, ChainError> {
        ensure_well_formed(address)?;
        range.ensure_bounded()?;
        let wanted = normalize_address(address);
        let state = self.lock();
        if state.reads_down {
            return Err(ChainError::Unavailable("mock node down".into()));
        }
        Ok(state
            .history
            .iter()
            .filter(|tx| tx.block_number >= range.from && tx.block_number <= range.to)
            .filter(|tx| {
                normalize_address(&tx.from) == wanted
                    || tx.to.as_deref().map(normalize_address).as_deref() == Some(wanted.as_str())
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: &str = "0x90F8bf6A479f320ead074411a4B0e7944Ea8c9C1";
    const BOB: &str = "0xFFcf8FDEE72ac11b5c542428B35EEF5769C409f0";
    const STRANGER: &str = "0x22d491Bde2303f2f43325b2108D26f1eAbA1e32b";

    fn chain() -> MockChain {
        MockChain::new()
            .with_account(ALICE, Decimal::from(10))
            .with_account(BOB, Decimal::ZERO)
    }

    #[tokio::test]
    async fn test_validate_address() {
        let chain = chain();
        assert!(chain.validate_address(ALICE).await.unwrap());
        assert!(chain.validate_address(&ALICE.to_lowercase()).await.unwrap());
        assert!(!chain.validate_address(STRANGER).await.unwrap());
        assert!(matches!(
            chain.validate_address("alice").await,
            Err(ChainError::InvalidAddress(_))
        ));
    }

    #[tokio::test]
    async fn test_transfer_moves_funds() {
        let chain = chain();
        let hash = chain
            .submit_transfer(ALICE, BOB, Decimal::from(4))
            .await
            .unwrap();
        assert!(hash.as_str().starts_with("0x"));
        assert_eq!(hash.as_str().len(), 66);
        assert_eq!(chain.balance_of(ALICE), Decimal::from(6));
        assert_eq!(chain.balance_of(BOB), Decimal::from(4));
        assert_eq!(chain.submit_count(), 1);

        let history = chain
            .list_transactions(BOB, BlockRange::new(0, 10))
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].tx_hash, hash);

        let err = chain
            .list_transactions(BOB, BlockRange::new(0, u64::MAX))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "RANGE_TOO_WIDE");
    }

    #[tokio::test]
    async fn test_overdraft_reverts() {
        let chain = chain();
        let result = chain.submit_transfer(ALICE, BOB, Decimal::from(11)).await;
        assert!(matches!(result, Err(ChainError::Reverted { .. })));
        assert_eq!(chain.balance_of(ALICE), Decimal::from(10));
    }

    #[tokio::test]
    async fn test_sub_wei_amount_rejected() {
        let chain = chain();
        let result = chain.submit_transfer(ALICE, BOB, Decimal::new(1, 19)).await;
        assert!(matches!(
            result,
            Err(ChainError::Reverted { tx_hash: None, .. })
        ));
        assert_eq!(chain.balance_of(ALICE), Decimal::from(10));
        assert!(chain.transactions().is_empty());
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let chain = chain();

        chain.fail_next_submit(SubmitFault::Revert);
        assert!(matches!(
            chain.submit_transfer(ALICE, BOB, Decimal::ONE).await,
            Err(ChainError::Reverted { .. })
        ));
        assert_eq!(chain.balance_of(ALICE), Decimal::from(10));

        chain.fail_next_submit(SubmitFault::TimeoutAfterApply);
        assert!(matches!(
            chain.submit_transfer(ALICE, BOB, Decimal::ONE).await,
            Err(ChainError::Unavailable(_))
        ));
        // Outcome was unknown to the caller, but the funds moved
        assert_eq!(chain.balance_of(ALICE), Decimal::from(9));

        chain.fail_reads_after_next_submit();
        chain
            .submit_transfer(ALICE, BOB, Decimal::ONE)
            .await
            .unwrap();
        assert!(matches!(
            chain.get_balance(ALICE).await,
            Err(ChainError::Unavailable(_))
        ));
        chain.set_reads_down(false);
        assert_eq!(chain.get_balance(ALICE).await.unwrap(), Decimal::from(8));
    }
}
