//! Shared harness: in-memory chain + store wired through the real services.

#![allow(dead_code)]

use rust_decimal::Decimal;
use std::sync::Arc;

use chain_ledger::chain::MockChain;
use chain_ledger::notify::NoopNotifier;
use chain_ledger::store::{MemoryStore, NewUser};
use chain_ledger::{Account, Ledger, LedgerStore, Principal, Role};

pub const BANK: &str = "0xbabababababababababababababababababababa";
pub const ALICE: &str = "0xa11ce00000000000000000000000000000000001";
pub const BOB: &str = "0xb0b0000000000000000000000000000000000002";

pub struct Harness {
    pub ledger: Ledger,
    pub chain: Arc<MockChain>,
    pub store: Arc<MemoryStore>,
    pub admin: Principal,
    pub bank: Account,
}

impl Harness {
    /// Bank account is opened first so it gets the configured id 1
    pub async fn new() -> Self {
        let chain = Arc::new(MockChain::new().with_account(BANK, Decimal::from(1_000)));
        let store = Arc::new(MemoryStore::new());
        let ledger = Ledger::new(store.clone(), chain.clone(), Arc::new(NoopNotifier), 1);

        let admin = create_principal(&store, "treasury", Role::Admin).await;
        let bank = ledger.setup_account(&admin, BANK).await.unwrap();
        assert_eq!(bank.account_id, 1);

        Self {
            ledger,
            chain,
            store,
            admin,
            bank,
        }
    }

    /// Register a user whose address holds `balance` on chain and open an account
    pub async fn user(&self, name: &str, address: &str, balance: Decimal) -> (Principal, Account) {
        self.chain.add_account(address, balance);
        let principal = create_principal(&self.store, name, Role::User).await;
        let account = self.ledger.setup_account(&principal, address).await.unwrap();
        (principal, account)
    }

    pub async fn cached_balance(&self, account: &Account) -> Decimal {
        self.store
            .get_account(account.account_id)
            .await
            .unwrap()
            .unwrap()
            .balance
    }
}

async fn create_principal(store: &MemoryStore, name: &str, role: Role) -> Principal {
    store
        .create_user(NewUser {
            username: name.into(),
            email: format!("{}@example.com", name),
            role,
            credential_hash: "argon2-placeholder".into(),
        })
        .await
        .unwrap()
        .principal()
}

impl Harness {
    pub async fn store_account(&self, account_id: chain_ledger::AccountId) -> Account {
        self.store.get_account(account_id).await.unwrap().unwrap()
    }
}
