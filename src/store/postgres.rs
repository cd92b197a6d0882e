//! PostgreSQL Ledger Adapter
//!
//! Every statement of a unit of work runs on the connection owned by one
//! `sqlx::Transaction`. Row locks are taken by the balance `UPDATE` and held
//! until commit or rollback.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;

use super::{LedgerStore, LedgerTotals, LedgerTx};
use crate::error::{LedgerError, Result};
use crate::models::{Account, Currency, LedgerEntry, Transfer};

const ACCOUNT_COLUMNS: &str = "id, owner, balance, currency, created_at";
const TRANSFER_COLUMNS: &str = "id, from_account_id, to_account_id, amount, created_at";
const ENTRY_COLUMNS: &str = "id, account_id, amount, transfer_id, created_at";

/// Ledger store backed by a PostgreSQL pool
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    type Tx = PgLedgerTx;

    fn name(&self) -> &'static str {
        "Postgres"
    }

    async fn begin(&self) -> Result<PgLedgerTx> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| LedgerError::BeginFailed(e.to_string()))?;
        Ok(PgLedgerTx { tx })
    }
}

/// Transaction handle; sqlx rolls the transaction back if this is dropped
/// without commit.
pub struct PgLedgerTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    async fn get_account(&mut self, id: i64) -> Result<Option<Account>> {
        let account = sqlx::query_as::<_, Account>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(account)
    }

    async fn create_account(&mut self, owner: &str, currency: Currency) -> Result<Account> {
        let account = sqlx::query_as::<_, Account>(&format!(
            "INSERT INTO accounts (owner, balance, currency) VALUES ($1, 0, $2)
             RETURNING {ACCOUNT_COLUMNS}"
        ))
        .bind(owner)
        .bind(currency.as_str())
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(account)
    }

    async fn list_accounts(&mut self, owner: &str) -> Result<Vec<Account>> {
        let accounts = sqlx::query_as::<_, Account>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE owner = $1 ORDER BY id"
        ))
        .bind(owner)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(accounts)
    }

    async fn add_account_balance(&mut self, id: i64, delta: i64) -> Result<Account> {
        // Single statement: the row lock, the non-negativity check and the
        // increment cannot be interleaved with another transaction's debit.
        let updated = sqlx::query_as::<_, Account>(&format!(
            "UPDATE accounts SET balance = balance + $2
             WHERE id = $1 AND balance + $2 >= 0
             RETURNING {ACCOUNT_COLUMNS}"
        ))
        .bind(id)
        .bind(delta)
        .fetch_optional(&mut *self.tx)
        .await?;

        if let Some(account) = updated {
            return Ok(account);
        }

        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM accounts WHERE id = $1)")
            .bind(id)
            .fetch_one(&mut *self.tx)
            .await?;

        if exists {
            debug!(account_id = id, delta, "Balance update rejected: would go negative");
            Err(LedgerError::InsufficientFunds {
                account_id: id,
                amount: delta.saturating_neg(),
            })
        } else {
            Err(LedgerError::AccountNotFound(id))
        }
    }

    async fn create_transfer(&mut self, from: i64, to: i64, amount: i64) -> Result<Transfer> {
        let transfer = sqlx::query_as::<_, Transfer>(&format!(
            "INSERT INTO transfers (from_account_id, to_account_id, amount) VALUES ($1, $2, $3)
             RETURNING {TRANSFER_COLUMNS}"
        ))
        .bind(from)
        .bind(to)
        .bind(amount)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(transfer)
    }

    async fn get_transfer(&mut self, id: i64) -> Result<Option<Transfer>> {
        let transfer = sqlx::query_as::<_, Transfer>(&format!(
            "SELECT {TRANSFER_COLUMNS} FROM transfers WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(transfer)
    }

    async fn list_transfers(&mut self, account_id: i64) -> Result<Vec<Transfer>> {
        let transfers = sqlx::query_as::<_, Transfer>(&format!(
            "SELECT {TRANSFER_COLUMNS} FROM transfers
             WHERE from_account_id = $1 OR to_account_id = $1
             ORDER BY id"
        ))
        .bind(account_id)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(transfers)
    }

    async fn create_entry(
        &mut self,
        account_id: i64,
        amount: i64,
        transfer_id: Option<i64>,
    ) -> Result<LedgerEntry> {
        let entry = sqlx::query_as::<_, LedgerEntry>(&format!(
            "INSERT INTO entries (account_id, amount, transfer_id) VALUES ($1, $2, $3)
             RETURNING {ENTRY_COLUMNS}"
        ))
        .bind(account_id)
        .bind(amount)
        .bind(transfer_id)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(entry)
    }

    async fn list_entries(&mut self, account_id: i64) -> Result<Vec<LedgerEntry>> {
        let entries = sqlx::query_as::<_, LedgerEntry>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM entries WHERE account_id = $1 ORDER BY id"
        ))
        .bind(account_id)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(entries)
    }

    async fn ledger_totals(&mut self, account_id: i64) -> Result<Option<LedgerTotals>> {
        // One statement, one snapshot: under READ COMMITTED a transfer
        // committing between two separate reads would show up as drift.
        let totals = sqlx::query_as::<_, LedgerTotals>(
            "SELECT a.balance,
                    COALESCE(SUM(e.amount), 0)::BIGINT AS ledger_sum,
                    COUNT(e.id) AS entry_count
             FROM accounts a
             LEFT JOIN entries e ON e.account_id = a.id
             WHERE a.id = $1
             GROUP BY a.id, a.balance",
        )
        .bind(account_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(totals)
    }

    async fn commit(self) -> Result<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| LedgerError::CommitFailed(e.to_string()))
    }

    async fn rollback(self) -> Result<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| LedgerError::OperationFailed(e.to_string()))
    }
}
