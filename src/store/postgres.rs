//! PostgreSQL ledger store
//!
//! Every composite operation runs in one SQL transaction. Guards are expressed
//! as conditional UPDATEs (compare-and-swap) so concurrent writers cannot both
//! pass them.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use std::time::Duration;

use super::{
    Account, LedgerStore, Loan, LoanStatusUpdate, NewLoan, NewUser, StoreError, User,
};
use crate::core_types::{AccountId, LoanId, Role, UserId};
use crate::loan::state::LoanStatus;
use crate::loan::terms::{InterestRate, LoanDuration};
use crate::money::Amount;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        user_id         BIGSERIAL PRIMARY KEY,
        username        TEXT NOT NULL UNIQUE,
        email           TEXT NOT NULL UNIQUE,
        role            TEXT NOT NULL DEFAULT 'user',
        public_key      TEXT,
        credential_hash TEXT NOT NULL,
        created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS users_public_key_uniq
        ON users (lower(public_key)) WHERE public_key IS NOT NULL
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS accounts (
        account_id  BIGSERIAL PRIMARY KEY,
        user_id     BIGINT NOT NULL UNIQUE REFERENCES users(user_id) ON DELETE CASCADE,
        balance     NUMERIC(28, 18) NOT NULL DEFAULT 0,
        is_active   BOOLEAN NOT NULL DEFAULT FALSE,
        active_loan BOOLEAN NOT NULL DEFAULT FALSE,
        created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS loans (
        loan_id           BIGSERIAL PRIMARY KEY,
        account_id        BIGINT NOT NULL REFERENCES accounts(account_id) ON DELETE CASCADE,
        amount            NUMERIC(28, 18) NOT NULL,
        interest_rate     SMALLINT NOT NULL,
        duration_months   SMALLINT NOT NULL,
        start_date        TIMESTAMPTZ NOT NULL,
        end_date          TIMESTAMPTZ NOT NULL,
        remaining_balance NUMERIC(28, 18) NOT NULL CHECK (remaining_balance >= 0),
        status            SMALLINT NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS loans_account_idx ON loans (account_id)
    "#,
];

const USER_COLUMNS: &str =
    "user_id, username, email, role, public_key, credential_hash, created_at";

const ACCOUNT_SELECT: &str = r#"
    SELECT a.account_id, a.user_id, u.public_key AS address, a.balance,
           a.is_active, a.active_loan, a.created_at
    FROM accounts a JOIN users u ON u.user_id = a.user_id
"#;

const LOAN_COLUMNS: &str = "loan_id, account_id, amount, interest_rate, duration_months, \
     start_date, end_date, remaining_balance, status";

/// sqlx-backed `LedgerStore`
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;

        tracing::info!("PostgreSQL connection pool established");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create tables and indexes if absent
    pub async fn init_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        tracing::info!("Ledger schema ready");
        Ok(())
    }

    async fn account_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        account_id: AccountId,
    ) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query(&format!("{} WHERE a.account_id = $1", ACCOUNT_SELECT))
            .bind(account_id)
            .fetch_optional(&mut **tx)
            .await?;
        row.as_ref().map(row_to_account).transpose()
    }

    async fn loan_exists(
        tx: &mut Transaction<'_, Postgres>,
        loan_id: LoanId,
    ) -> Result<bool, StoreError> {
        let found: Option<i64> = sqlx::query_scalar("SELECT loan_id FROM loans WHERE loan_id = $1")
            .bind(loan_id)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(found.is_some())
    }

    async fn clear_loan_flag(
        tx: &mut Transaction<'_, Postgres>,
        account_id: AccountId,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE accounts SET active_loan = FALSE WHERE account_id = $1")
            .bind(account_id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }
}

fn row_to_user(row: &PgRow) -> Result<User, StoreError> {
    let role: String = row.try_get("role")?;
    Ok(User {
        user_id: row.try_get("user_id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        role: role.parse::<Role>().map_err(StoreError::Database)?,
        public_key: row.try_get("public_key")?,
        credential_hash: row.try_get("credential_hash")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_account(row: &PgRow) -> Result<Account, StoreError> {
    Ok(Account {
        account_id: row.try_get("account_id")?,
        user_id: row.try_get("user_id")?,
        address: row.try_get("address")?,
        balance: row.try_get("balance")?,
        is_active: row.try_get("is_active")?,
        active_loan: row.try_get("active_loan")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_loan(row: &PgRow) -> Result<Loan, StoreError> {
    let rate_id: i16 = row.try_get("interest_rate")?;
    let months: i16 = row.try_get("duration_months")?;
    let status_id: i16 = row.try_get("status")?;

    Ok(Loan {
        loan_id: row.try_get("loan_id")?,
        account_id: row.try_get("account_id")?,
        amount: row.try_get("amount")?,
        interest_rate: InterestRate::from_id(rate_id)
            .ok_or_else(|| StoreError::Database(format!("invalid interest tier {}", rate_id)))?,
        duration: LoanDuration::from_months(months)
            .ok_or_else(|| StoreError::Database(format!("invalid duration {}", months)))?,
        start_date: row.try_get("start_date")?,
        end_date: row.try_get("end_date")?,
        remaining_balance: row.try_get("remaining_balance")?,
        status: LoanStatus::from_id(status_id)
            .ok_or_else(|| StoreError::Database(format!("invalid loan status {}", status_id)))?,
    })
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn create_user(&self, new: NewUser) -> Result<User, StoreError> {
        let row = sqlx::query(&format!(
            "INSERT INTO users (username, email, role, credential_hash) \
             VALUES ($1, $2, $3, $4) RETURNING {}",
            USER_COLUMNS
        ))
        .bind(&new.username)
        .bind(&new.email)
        .bind(new.role.as_str())
        .bind(&new.credential_hash)
        .fetch_one(&self.pool)
        .await?;
        row_to_user(&row)
    }

    async fn get_user(&self, user_id: UserId) -> Result<Option<User>, StoreError> {
        let row = sqlx::query(&format!("SELECT {} FROM users WHERE user_id = $1", USER_COLUMNS))
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_user).transpose()
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query(&format!("SELECT {} FROM users WHERE username = $1", USER_COLUMNS))
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_user).transpose()
    }

    async fn create_account_with_binding(
        &self,
        user_id: UserId,
        address: &str,
        balance: Amount,
    ) -> Result<Account, StoreError> {
        let mut tx = self.pool.begin().await?;

        let user: Option<i64> =
            sqlx::query_scalar("SELECT user_id FROM users WHERE user_id = $1 FOR UPDATE")
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await?;
        if user.is_none() {
            return Err(StoreError::NotFound(format!("user {}", user_id)));
        }

        let existing: Option<i64> =
            sqlx::query_scalar("SELECT account_id FROM accounts WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await?;
        if existing.is_some() {
            return Err(StoreError::Conflict(format!(
                "account exists for user {}",
                user_id
            )));
        }

        sqlx::query("UPDATE users SET public_key = $2 WHERE user_id = $1")
            .bind(user_id)
            .bind(address)
            .execute(&mut *tx)
            .await?;

        let account_id: i64 = sqlx::query_scalar(
            "INSERT INTO accounts (user_id, balance, is_active) VALUES ($1, $2, TRUE) \
             RETURNING account_id",
        )
        .bind(user_id)
        .bind(balance)
        .fetch_one(&mut *tx)
        .await?;

        let account = Self::account_in_tx(&mut tx, account_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("account {}", account_id)))?;
        tx.commit().await?;
        Ok(account)
    }

    async fn get_account(&self, account_id: AccountId) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query(&format!("{} WHERE a.account_id = $1", ACCOUNT_SELECT))
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_account).transpose()
    }

    async fn get_account_by_user(&self, user_id: UserId) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query(&format!("{} WHERE a.user_id = $1", ACCOUNT_SELECT))
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_account).transpose()
    }

    async fn list_accounts(&self) -> Result<Vec<Account>, StoreError> {
        let rows = sqlx::query(&format!("{} ORDER BY a.account_id", ACCOUNT_SELECT))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_account).collect()
    }

    async fn set_cached_balance(
        &self,
        account_id: AccountId,
        balance: Amount,
    ) -> Result<Account, StoreError> {
        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query("UPDATE accounts SET balance = $2 WHERE account_id = $1")
            .bind(account_id)
            .bind(balance)
            .execute(&mut *tx)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("account {}", account_id)));
        }
        let account = Self::account_in_tx(&mut tx, account_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("account {}", account_id)))?;
        tx.commit().await?;
        Ok(account)
    }

    async fn create_loan(&self, new: NewLoan) -> Result<Loan, StoreError> {
        let mut tx = self.pool.begin().await?;

        let flagged = sqlx::query(
            "UPDATE accounts SET active_loan = TRUE WHERE account_id = $1 AND active_loan = FALSE",
        )
        .bind(new.account_id)
        .execute(&mut *tx)
        .await?;
        if flagged.rows_affected() == 0 {
            return match Self::account_in_tx(&mut tx, new.account_id).await? {
                Some(_) => Err(StoreError::Conflict(format!(
                    "account {} has an active loan",
                    new.account_id
                ))),
                None => Err(StoreError::NotFound(format!("account {}", new.account_id))),
            };
        }

        let row = sqlx::query(&format!(
            "INSERT INTO loans (account_id, amount, interest_rate, duration_months, \
             start_date, end_date, remaining_balance, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {}",
            LOAN_COLUMNS
        ))
        .bind(new.account_id)
        .bind(new.amount)
        .bind(new.interest_rate.id())
        .bind(new.duration.months())
        .bind(new.start_date)
        .bind(new.end_date)
        .bind(new.remaining_balance)
        .bind(LoanStatus::Pending.id())
        .fetch_one(&mut *tx)
        .await?;
        let loan = row_to_loan(&row)?;

        tx.commit().await?;
        Ok(loan)
    }

    async fn get_loan(&self, loan_id: LoanId) -> Result<Option<Loan>, StoreError> {
        let row = sqlx::query(&format!("SELECT {} FROM loans WHERE loan_id = $1", LOAN_COLUMNS))
            .bind(loan_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_loan).transpose()
    }

    async fn active_loan_for_account(
        &self,
        account_id: AccountId,
    ) -> Result<Option<Loan>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM loans WHERE account_id = $1 AND status IN ($2, $3) \
             ORDER BY loan_id DESC LIMIT 1",
            LOAN_COLUMNS
        ))
        .bind(account_id)
        .bind(LoanStatus::Pending.id())
        .bind(LoanStatus::Approved.id())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_loan).transpose()
    }

    async fn loans_for_account(&self, account_id: AccountId) -> Result<Vec<Loan>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM loans WHERE account_id = $1 ORDER BY loan_id",
            LOAN_COLUMNS
        ))
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_loan).collect()
    }

    async fn set_loan_status(
        &self,
        loan_id: LoanId,
        expected: LoanStatus,
        update: LoanStatusUpdate,
    ) -> Result<Option<Loan>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let (start, end) = match update.term {
            Some((s, e)) => (Some(s), Some(e)),
            None => (None, None),
        };

        let row = sqlx::query(&format!(
            "UPDATE loans SET status = $2, \
                 start_date = COALESCE($3, start_date), \
                 end_date = COALESCE($4, end_date) \
             WHERE loan_id = $1 AND status = $5 RETURNING {}",
            LOAN_COLUMNS
        ))
        .bind(loan_id)
        .bind(update.status.id())
        .bind(start)
        .bind(end)
        .bind(expected.id())
        .fetch_optional(&mut *tx)
        .await?;

        let loan = match row {
            Some(row) => row_to_loan(&row)?,
            None => {
                return if Self::loan_exists(&mut tx, loan_id).await? {
                    Ok(None)
                } else {
                    Err(StoreError::NotFound(format!("loan {}", loan_id)))
                };
            }
        };

        if loan.status.is_terminal() {
            Self::clear_loan_flag(&mut tx, loan.account_id).await?;
        }
        tx.commit().await?;
        Ok(Some(loan))
    }

    async fn apply_repayment(
        &self,
        loan_id: LoanId,
        expected_remaining: Amount,
        payment: Amount,
    ) -> Result<Option<Loan>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "UPDATE loans SET remaining_balance = remaining_balance - $2, \
                 status = CASE WHEN remaining_balance - $2 = 0 THEN $4 ELSE status END \
             WHERE loan_id = $1 AND status = $3 AND remaining_balance = $5 \
             RETURNING {}",
            LOAN_COLUMNS
        ))
        .bind(loan_id)
        .bind(payment)
        .bind(LoanStatus::Approved.id())
        .bind(LoanStatus::Paid.id())
        .bind(expected_remaining)
        .fetch_optional(&mut *tx)
        .await?;

        let loan = match row {
            Some(row) => row_to_loan(&row)?,
            None => {
                return if Self::loan_exists(&mut tx, loan_id).await? {
                    Ok(None)
                } else {
                    Err(StoreError::NotFound(format!("loan {}", loan_id)))
                };
            }
        };

        if loan.status == LoanStatus::Paid {
            Self::clear_loan_flag(&mut tx, loan.account_id).await?;
        }
        tx.commit().await?;
        Ok(Some(loan))
    }
}
