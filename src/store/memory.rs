//! In-Memory Ledger Adapter
//!
//! Process-local ledger store with the same transactional contract as the
//! PostgreSQL adapter:
//!
//! - Writes are staged per transaction and published atomically on commit.
//! - Reads see the latest committed state plus the transaction's own writes.
//! - `add_account_balance` takes a per-account row lock that is held until the
//!   transaction ends, so two transactions updating overlapping accounts in
//!   opposite order block each other exactly like row locks do.
//! - An optional connection limit makes `begin` wait (and eventually time out)
//!   when too many transactions are open.
//!
//! Failure injection (`inject_failure`) makes the next call at a given point
//! fail once, for exercising rollback paths.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use super::{LedgerStore, LedgerTotals, LedgerTx};
use crate::error::{LedgerError, Result};
use crate::models::{Account, Currency, LedgerEntry, Transfer};

/// Points at which a one-shot failure can be injected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    Begin = 0,
    CreateTransfer = 1,
    CreateEntry = 2,
    AddBalance = 3,
    Commit = 4,
    Rollback = 5,
}

const FAIL_POINTS: usize = 6;

#[derive(Default)]
struct Committed {
    accounts: BTreeMap<i64, Account>,
    transfers: BTreeMap<i64, Transfer>,
    entries: BTreeMap<i64, LedgerEntry>,
    row_locks: HashMap<i64, Arc<Mutex<()>>>,
}

struct Shared {
    committed: Mutex<Committed>,
    next_account_id: AtomicI64,
    next_transfer_id: AtomicI64,
    next_entry_id: AtomicI64,
    open_transactions: AtomicUsize,
    failures: [AtomicBool; FAIL_POINTS],
    connections: Option<(Arc<Semaphore>, Duration)>,
}

impl Shared {
    fn take_failure(&self, point: FailPoint) -> bool {
        self.failures[point as usize].swap(false, Ordering::SeqCst)
    }
}

/// In-process ledger store
#[derive(Clone)]
pub struct MemoryLedgerStore {
    shared: Arc<Shared>,
}

impl Default for MemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLedgerStore {
    /// Store without a connection limit
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Store that allows at most `max_connections` open transactions;
    /// `begin` waits up to `acquire_timeout` for a free slot.
    pub fn with_pool(max_connections: usize, acquire_timeout: Duration) -> Self {
        Self::build(Some((
            Arc::new(Semaphore::new(max_connections)),
            acquire_timeout,
        )))
    }

    fn build(connections: Option<(Arc<Semaphore>, Duration)>) -> Self {
        Self {
            shared: Arc::new(Shared {
                committed: Mutex::new(Committed::default()),
                next_account_id: AtomicI64::new(1),
                next_transfer_id: AtomicI64::new(1),
                next_entry_id: AtomicI64::new(1),
                open_transactions: AtomicUsize::new(0),
                failures: Default::default(),
                connections,
            }),
        }
    }

    /// Make the next call at `point` fail once
    pub fn inject_failure(&self, point: FailPoint) {
        self.shared.failures[point as usize].store(true, Ordering::SeqCst);
    }

    /// Number of transactions begun and not yet finished or dropped
    pub fn open_transactions(&self) -> usize {
        self.shared.open_transactions.load(Ordering::SeqCst)
    }

    /// Committed state of an account
    pub async fn committed_account(&self, id: i64) -> Option<Account> {
        self.shared.committed.lock().await.accounts.get(&id).cloned()
    }

    pub async fn transfer_count(&self) -> usize {
        self.shared.committed.lock().await.transfers.len()
    }

    pub async fn entry_count(&self) -> usize {
        self.shared.committed.lock().await.entries.len()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    type Tx = MemoryLedgerTx;

    fn name(&self) -> &'static str {
        "Memory"
    }

    async fn begin(&self) -> Result<MemoryLedgerTx> {
        if self.shared.take_failure(FailPoint::Begin) {
            return Err(LedgerError::BeginFailed("injected begin failure".into()));
        }

        let permit = match &self.shared.connections {
            Some((semaphore, timeout)) => {
                match tokio::time::timeout(*timeout, Arc::clone(semaphore).acquire_owned()).await {
                    Ok(Ok(permit)) => Some(permit),
                    Ok(Err(_)) => {
                        return Err(LedgerError::BeginFailed("connection pool closed".into()));
                    }
                    Err(_) => {
                        warn!(timeout_ms = timeout.as_millis() as u64, "Connection pool exhausted");
                        return Err(LedgerError::BeginFailed(
                            "pool timed out while waiting for an open connection".into(),
                        ));
                    }
                }
            }
            None => None,
        };

        self.shared.open_transactions.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryLedgerTx {
            shared: Arc::clone(&self.shared),
            new_accounts: BTreeMap::new(),
            balance_deltas: HashMap::new(),
            transfers: BTreeMap::new(),
            entries: BTreeMap::new(),
            row_guards: HashMap::new(),
            _permit: permit,
        })
    }
}

/// Transaction handle of [`MemoryLedgerStore`]
pub struct MemoryLedgerTx {
    shared: Arc<Shared>,
    new_accounts: BTreeMap<i64, Account>,
    balance_deltas: HashMap<i64, i64>,
    transfers: BTreeMap<i64, Transfer>,
    entries: BTreeMap<i64, LedgerEntry>,
    row_guards: HashMap<i64, OwnedMutexGuard<()>>,
    _permit: Option<OwnedSemaphorePermit>,
}

impl MemoryLedgerTx {
    fn injected(&self, point: FailPoint) -> Result<()> {
        if self.shared.take_failure(point) {
            return Err(LedgerError::OperationFailed(format!(
                "injected failure at {:?}",
                point
            )));
        }
        Ok(())
    }

    /// Committed row with this transaction's pending delta applied
    fn visible(&self, committed: &Committed, id: i64) -> Option<Account> {
        if let Some(account) = self.new_accounts.get(&id) {
            return Some(account.clone());
        }
        committed.accounts.get(&id).map(|account| {
            let mut account = account.clone();
            account.balance += self.balance_deltas.get(&id).copied().unwrap_or(0);
            account
        })
    }

    fn transfer_exists(&self, committed: &Committed, id: i64) -> bool {
        self.transfers.contains_key(&id) || committed.transfers.contains_key(&id)
    }
}

fn apply_delta(account_id: i64, balance: i64, delta: i64) -> Result<i64> {
    let updated = balance
        .checked_add(delta)
        .ok_or_else(|| LedgerError::OperationFailed("bigint out of range".into()))?;
    if updated < 0 {
        return Err(LedgerError::InsufficientFunds {
            account_id,
            amount: delta.saturating_neg(),
        });
    }
    Ok(updated)
}

#[async_trait]
impl LedgerTx for MemoryLedgerTx {
    async fn get_account(&mut self, id: i64) -> Result<Option<Account>> {
        let committed = self.shared.committed.lock().await;
        Ok(self.visible(&committed, id))
    }

    async fn create_account(&mut self, owner: &str, currency: Currency) -> Result<Account> {
        let account = Account {
            id: self.shared.next_account_id.fetch_add(1, Ordering::SeqCst),
            owner: owner.to_string(),
            balance: 0,
            currency,
            created_at: Utc::now(),
        };
        self.new_accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn list_accounts(&mut self, owner: &str) -> Result<Vec<Account>> {
        let committed = self.shared.committed.lock().await;
        let mut accounts: BTreeMap<i64, Account> = committed
            .accounts
            .values()
            .filter(|a| a.owner == owner)
            .filter_map(|a| self.visible(&committed, a.id))
            .map(|a| (a.id, a))
            .collect();
        accounts.extend(
            self.new_accounts
                .values()
                .filter(|a| a.owner == owner)
                .map(|a| (a.id, a.clone())),
        );
        Ok(accounts.into_values().collect())
    }

    async fn add_account_balance(&mut self, id: i64, delta: i64) -> Result<Account> {
        self.injected(FailPoint::AddBalance)?;

        if let Some(account) = self.new_accounts.get_mut(&id) {
            account.balance = apply_delta(id, account.balance, delta)?;
            return Ok(account.clone());
        }

        if !self.row_guards.contains_key(&id) {
            let row_lock = {
                let mut committed = self.shared.committed.lock().await;
                if !committed.accounts.contains_key(&id) {
                    return Err(LedgerError::AccountNotFound(id));
                }
                Arc::clone(committed.row_locks.entry(id).or_default())
            };
            // Waits here while another transaction holds the row
            let guard = row_lock.lock_owned().await;
            self.row_guards.insert(id, guard);
        }

        let committed = self.shared.committed.lock().await;
        let current = self
            .visible(&committed, id)
            .ok_or(LedgerError::AccountNotFound(id))?;
        let balance = apply_delta(id, current.balance, delta)?;
        drop(committed);

        *self.balance_deltas.entry(id).or_insert(0) += delta;
        Ok(Account { balance, ..current })
    }

    async fn create_transfer(&mut self, from: i64, to: i64, amount: i64) -> Result<Transfer> {
        self.injected(FailPoint::CreateTransfer)?;
        if amount <= 0 {
            return Err(LedgerError::OperationFailed(
                "violates check constraint transfers_amount_check".into(),
            ));
        }
        {
            let committed = self.shared.committed.lock().await;
            for account_id in [from, to] {
                if self.visible(&committed, account_id).is_none() {
                    return Err(LedgerError::OperationFailed(format!(
                        "violates foreign key constraint: account {} does not exist",
                        account_id
                    )));
                }
            }
        }

        let transfer = Transfer {
            id: self.shared.next_transfer_id.fetch_add(1, Ordering::SeqCst),
            from_account_id: from,
            to_account_id: to,
            amount,
            created_at: Utc::now(),
        };
        self.transfers.insert(transfer.id, transfer.clone());
        Ok(transfer)
    }

    async fn get_transfer(&mut self, id: i64) -> Result<Option<Transfer>> {
        if let Some(transfer) = self.transfers.get(&id) {
            return Ok(Some(transfer.clone()));
        }
        let committed = self.shared.committed.lock().await;
        Ok(committed.transfers.get(&id).cloned())
    }

    async fn list_transfers(&mut self, account_id: i64) -> Result<Vec<Transfer>> {
        let committed = self.shared.committed.lock().await;
        let touches = |t: &&Transfer| t.from_account_id == account_id || t.to_account_id == account_id;
        let mut transfers: Vec<Transfer> = committed
            .transfers
            .values()
            .chain(self.transfers.values())
            .filter(touches)
            .cloned()
            .collect();
        transfers.sort_by_key(|t| t.id);
        Ok(transfers)
    }

    async fn create_entry(
        &mut self,
        account_id: i64,
        amount: i64,
        transfer_id: Option<i64>,
    ) -> Result<LedgerEntry> {
        self.injected(FailPoint::CreateEntry)?;
        {
            let committed = self.shared.committed.lock().await;
            if self.visible(&committed, account_id).is_none() {
                return Err(LedgerError::OperationFailed(format!(
                    "violates foreign key constraint: account {} does not exist",
                    account_id
                )));
            }
            if let Some(transfer_id) = transfer_id
                && !self.transfer_exists(&committed, transfer_id)
            {
                return Err(LedgerError::OperationFailed(format!(
                    "violates foreign key constraint: transfer {} does not exist",
                    transfer_id
                )));
            }
        }

        let entry = LedgerEntry {
            id: self.shared.next_entry_id.fetch_add(1, Ordering::SeqCst),
            account_id,
            amount,
            transfer_id,
            created_at: Utc::now(),
        };
        self.entries.insert(entry.id, entry.clone());
        Ok(entry)
    }

    async fn list_entries(&mut self, account_id: i64) -> Result<Vec<LedgerEntry>> {
        let committed = self.shared.committed.lock().await;
        let mut entries: Vec<LedgerEntry> = committed
            .entries
            .values()
            .chain(self.entries.values())
            .filter(|e| e.account_id == account_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.id);
        Ok(entries)
    }

    async fn ledger_totals(&mut self, account_id: i64) -> Result<Option<LedgerTotals>> {
        let committed = self.shared.committed.lock().await;
        let Some(account) = self.visible(&committed, account_id) else {
            return Ok(None);
        };
        let (ledger_sum, entry_count) = committed
            .entries
            .values()
            .chain(self.entries.values())
            .filter(|e| e.account_id == account_id)
            .fold((0i64, 0i64), |(sum, count), e| (sum + e.amount, count + 1));

        Ok(Some(LedgerTotals {
            balance: account.balance,
            ledger_sum,
            entry_count,
        }))
    }

    async fn commit(mut self) -> Result<()> {
        if self.shared.take_failure(FailPoint::Commit) {
            // Staged writes are discarded when `self` drops
            return Err(LedgerError::CommitFailed("injected commit failure".into()));
        }

        let mut committed = self.shared.committed.lock().await;
        committed.accounts.append(&mut self.new_accounts);
        for (id, delta) in self.balance_deltas.drain() {
            if let Some(account) = committed.accounts.get_mut(&id) {
                account.balance += delta;
            }
        }
        committed.transfers.append(&mut self.transfers);
        committed.entries.append(&mut self.entries);
        drop(committed);

        debug!(rows_locked = self.row_guards.len(), "Memory transaction committed");
        // Row guards release when `self` drops, after the writes are visible
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        if self.shared.take_failure(FailPoint::Rollback) {
            return Err(LedgerError::OperationFailed(
                "injected rollback failure".into(),
            ));
        }
        debug!(rows_locked = self.row_guards.len(), "Memory transaction rolled back");
        Ok(())
    }
}

impl Drop for MemoryLedgerTx {
    fn drop(&mut self) {
        self.shared.open_transactions.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded(store: &MemoryLedgerStore, balance: i64) -> Account {
        let mut tx = store.begin().await.unwrap();
        let account = tx.create_account("alice", Currency::Usd).await.unwrap();
        let account = tx.add_account_balance(account.id, balance).await.unwrap();
        tx.commit().await.unwrap();
        account
    }

    #[tokio::test]
    async fn test_commit_publishes_writes() {
        let store = MemoryLedgerStore::new();
        let account = seeded(&store, 100).await;

        let committed = store.committed_account(account.id).await.unwrap();
        assert_eq!(committed.balance, 100);
        assert_eq!(store.open_transactions(), 0);
    }

    #[tokio::test]
    async fn test_uncommitted_writes_are_invisible() {
        let store = MemoryLedgerStore::new();
        let account = seeded(&store, 100).await;

        let mut tx = store.begin().await.unwrap();
        tx.add_account_balance(account.id, -40).await.unwrap();
        assert_eq!(tx.get_account(account.id).await.unwrap().unwrap().balance, 60);
        assert_eq!(store.committed_account(account.id).await.unwrap().balance, 100);

        tx.rollback().await.unwrap();
        assert_eq!(store.committed_account(account.id).await.unwrap().balance, 100);
    }

    #[tokio::test]
    async fn test_drop_discards_writes() {
        let store = MemoryLedgerStore::new();
        let account = seeded(&store, 100).await;

        {
            let mut tx = store.begin().await.unwrap();
            tx.add_account_balance(account.id, 25).await.unwrap();
            tx.create_transfer(account.id, account.id, 1).await.unwrap();
            assert_eq!(store.open_transactions(), 1);
        }

        assert_eq!(store.open_transactions(), 0);
        assert_eq!(store.committed_account(account.id).await.unwrap().balance, 100);
        assert_eq!(store.transfer_count().await, 0);
    }

    #[tokio::test]
    async fn test_add_balance_rejects_negative() {
        let store = MemoryLedgerStore::new();
        let account = seeded(&store, 10).await;

        let mut tx = store.begin().await.unwrap();
        let err = tx.add_account_balance(account.id, -11).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientFunds { account_id, amount: 11 } if account_id == account.id
        ));
        assert_eq!(tx.get_account(account.id).await.unwrap().unwrap().balance, 10);
    }

    #[tokio::test]
    async fn test_add_balance_unknown_account() {
        let store = MemoryLedgerStore::new();
        let mut tx = store.begin().await.unwrap();
        let err = tx.add_account_balance(404, 5).await.unwrap_err();
        assert!(matches!(err, LedgerError::AccountNotFound(404)));
    }

    #[tokio::test]
    async fn test_row_lock_blocks_second_writer_until_commit() {
        let store = MemoryLedgerStore::new();
        let account = seeded(&store, 100).await;

        let mut first = store.begin().await.unwrap();
        first.add_account_balance(account.id, -30).await.unwrap();

        let second_store = store.clone();
        let id = account.id;
        let second = tokio::spawn(async move {
            let mut tx = second_store.begin().await.unwrap();
            let updated = tx.add_account_balance(id, -70).await;
            let result = updated.map(|a| a.balance);
            tx.commit().await.unwrap();
            result
        });

        // The second writer cannot get the row while the first holds it
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!second.is_finished());

        first.commit().await.unwrap();
        let balance = second.await.unwrap().unwrap();
        assert_eq!(balance, 0);
        assert_eq!(store.committed_account(id).await.unwrap().balance, 0);
    }

    #[tokio::test]
    async fn test_entry_foreign_keys() {
        let store = MemoryLedgerStore::new();
        let account = seeded(&store, 0).await;

        let mut tx = store.begin().await.unwrap();
        assert!(tx.create_entry(999, 5, None).await.is_err());
        assert!(tx.create_entry(account.id, 5, Some(999)).await.is_err());

        let transfer = tx.create_transfer(account.id, account.id, 5).await.unwrap();
        let entry = tx.create_entry(account.id, 5, Some(transfer.id)).await.unwrap();
        assert_eq!(entry.transfer_id, Some(transfer.id));
        assert_eq!(
            tx.ledger_totals(account.id).await.unwrap(),
            Some(LedgerTotals {
                balance: 0,
                ledger_sum: 5,
                entry_count: 1,
            })
        );
        assert_eq!(tx.ledger_totals(999).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_injected_failure_fires_once() {
        let store = MemoryLedgerStore::new();
        store.inject_failure(FailPoint::Begin);

        assert!(matches!(
            store.begin().await,
            Err(LedgerError::BeginFailed(_))
        ));
        assert!(store.begin().await.is_ok());
    }

    #[tokio::test]
    async fn test_commit_failure_discards_writes() {
        let store = MemoryLedgerStore::new();
        store.inject_failure(FailPoint::Commit);

        let mut tx = store.begin().await.unwrap();
        let account = tx.create_account("bob", Currency::Eur).await.unwrap();
        assert!(matches!(
            tx.commit().await,
            Err(LedgerError::CommitFailed(_))
        ));
        assert!(store.committed_account(account.id).await.is_none());
        assert_eq!(store.open_transactions(), 0);
    }

    #[tokio::test]
    async fn test_pool_limit_times_out_begin() {
        let store = MemoryLedgerStore::with_pool(1, Duration::from_millis(20));
        let held = store.begin().await.unwrap();

        assert!(matches!(
            store.begin().await,
            Err(LedgerError::BeginFailed(_))
        ));

        drop(held);
        assert!(store.begin().await.is_ok());
    }

    #[tokio::test]
    async fn test_list_accounts_includes_pending() {
        let store = MemoryLedgerStore::new();
        seeded(&store, 5).await;

        let mut tx = store.begin().await.unwrap();
        tx.create_account("alice", Currency::Cad).await.unwrap();
        tx.create_account("carol", Currency::Usd).await.unwrap();

        let accounts = tx.list_accounts("alice").await.unwrap();
        assert_eq!(accounts.len(), 2);
        assert!(accounts.windows(2).all(|w| w[0].id < w[1].id));
    }
}
