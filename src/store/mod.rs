//! Ledger Storage Port
//!
//! The storage primitives the ledger core runs against. A [`LedgerStore`]
//! hands out transaction-scoped [`LedgerTx`] handles; every read and write of
//! a unit of work goes through one handle so it observes a single isolated
//! snapshot.
//!
//! Adapters:
//! - [`PgLedgerStore`] - PostgreSQL via sqlx (production)
//! - [`MemoryLedgerStore`] - in-process, with row locks and failure injection

pub mod memory;
pub mod postgres;

pub use memory::{FailPoint, MemoryLedgerStore};
pub use postgres::{PgLedgerStore, PgLedgerTx};

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Account, Currency, LedgerEntry, Transfer};

/// Stored balance next to the aggregate of the account's entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::FromRow)]
pub struct LedgerTotals {
    pub balance: i64,
    pub ledger_sum: i64,
    pub entry_count: i64,
}

/// Source of ledger transactions
#[async_trait]
pub trait LedgerStore: Send + Sync {
    type Tx: LedgerTx;

    /// Adapter name for logging
    fn name(&self) -> &'static str;

    /// Begin a new transaction.
    ///
    /// May wait for a free connection; fails with `BeginFailed` when none
    /// becomes available.
    async fn begin(&self) -> Result<Self::Tx>;
}

/// Transaction-bound data access handle.
///
/// Dropping a handle without calling [`commit`](LedgerTx::commit) discards
/// all of its writes.
#[async_trait]
pub trait LedgerTx: Send + Sized {
    // === Accounts ===

    async fn get_account(&mut self, id: i64) -> Result<Option<Account>>;

    /// Insert an account with a zero balance
    async fn create_account(&mut self, owner: &str, currency: Currency) -> Result<Account>;

    async fn list_accounts(&mut self, owner: &str) -> Result<Vec<Account>>;

    /// Atomically add `delta` to the account balance and return the updated row.
    ///
    /// The non-negativity check is part of the same atomic step: a delta that
    /// would leave the balance below zero fails with `InsufficientFunds` and
    /// changes nothing. The row stays locked until the transaction ends.
    async fn add_account_balance(&mut self, id: i64, delta: i64) -> Result<Account>;

    // === Transfers ===

    async fn create_transfer(&mut self, from: i64, to: i64, amount: i64) -> Result<Transfer>;

    async fn get_transfer(&mut self, id: i64) -> Result<Option<Transfer>>;

    /// Transfers where the account is either side, oldest first
    async fn list_transfers(&mut self, account_id: i64) -> Result<Vec<Transfer>>;

    // === Ledger entries ===

    async fn create_entry(
        &mut self,
        account_id: i64,
        amount: i64,
        transfer_id: Option<i64>,
    ) -> Result<LedgerEntry>;

    async fn list_entries(&mut self, account_id: i64) -> Result<Vec<LedgerEntry>>;

    /// Balance, entry sum and entry count of an account, read as one
    /// consistent snapshot. `None` if the account does not exist.
    async fn ledger_totals(&mut self, account_id: i64) -> Result<Option<LedgerTotals>>;

    // === Lifecycle ===

    async fn commit(self) -> Result<()>;

    async fn rollback(self) -> Result<()>;
}
