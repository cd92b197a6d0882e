//! Account Service
//!
//! Opening accounts and read access to accounts, transfers and entries. Every
//! call runs as its own unit of work on the coordinator.

use tracing::{info, warn};

use super::models::{CreateAccountParams, Reconciliation};
use crate::coordinator::TxCoordinator;
use crate::error::{LedgerError, Result};
use crate::models::{Account, LedgerEntry, Transfer};
use crate::store::{LedgerStore, LedgerTx};

pub struct AccountService<S: LedgerStore> {
    coordinator: TxCoordinator<S>,
}

impl<S: LedgerStore> Clone for AccountService<S> {
    fn clone(&self) -> Self {
        Self {
            coordinator: self.coordinator.clone(),
        }
    }
}

impl<S: LedgerStore> AccountService<S> {
    pub fn new(coordinator: TxCoordinator<S>) -> Self {
        Self { coordinator }
    }

    /// Open an account. A positive opening balance is written as an entry
    /// without a transfer, so the account reconciles from the start.
    pub async fn create_account(&self, params: CreateAccountParams) -> Result<Account> {
        params.validate()?;
        let CreateAccountParams {
            owner,
            currency,
            opening_balance,
        } = params;

        let account = self
            .coordinator
            .run(move |tx| {
                Box::pin(async move {
                    let account = tx.create_account(owner.trim(), currency).await?;
                    if opening_balance == 0 {
                        return Ok(account);
                    }
                    tx.create_entry(account.id, opening_balance, None).await?;
                    tx.add_account_balance(account.id, opening_balance).await
                })
            })
            .await?;

        info!(
            account_id = account.id,
            owner = %account.owner,
            currency = %account.currency,
            balance = account.balance,
            "Account created"
        );
        Ok(account)
    }

    pub async fn get_account(&self, id: i64) -> Result<Account> {
        self.coordinator
            .run(move |tx| Box::pin(async move { require_account(tx, id).await }))
            .await
    }

    /// Accounts of one owner, ordered by id
    pub async fn list_accounts(&self, owner: &str) -> Result<Vec<Account>> {
        let owner = owner.to_string();
        self.coordinator
            .run(move |tx| Box::pin(async move { tx.list_accounts(&owner).await }))
            .await
    }

    /// Entries posted to an account, oldest first
    pub async fn list_entries(&self, account_id: i64) -> Result<Vec<LedgerEntry>> {
        self.coordinator
            .run(move |tx| {
                Box::pin(async move {
                    require_account(tx, account_id).await?;
                    tx.list_entries(account_id).await
                })
            })
            .await
    }

    pub async fn get_transfer(&self, id: i64) -> Result<Transfer> {
        self.coordinator
            .run(move |tx| {
                Box::pin(async move {
                    tx.get_transfer(id)
                        .await?
                        .ok_or(LedgerError::TransferNotFound(id))
                })
            })
            .await
    }

    /// Transfers where the account is either side, oldest first
    pub async fn list_transfers(&self, account_id: i64) -> Result<Vec<Transfer>> {
        self.coordinator
            .run(move |tx| {
                Box::pin(async move {
                    require_account(tx, account_id).await?;
                    tx.list_transfers(account_id).await
                })
            })
            .await
    }

    /// Compare the stored balance with the sum of the account's entries.
    /// Both are read in a single statement so concurrent transfers cannot
    /// skew one against the other.
    pub async fn reconcile(&self, account_id: i64) -> Result<Reconciliation> {
        let report = self
            .coordinator
            .run(move |tx| {
                Box::pin(async move {
                    let totals = tx
                        .ledger_totals(account_id)
                        .await?
                        .ok_or(LedgerError::AccountNotFound(account_id))?;
                    Ok(Reconciliation {
                        account_id,
                        balance: totals.balance,
                        ledger_sum: totals.ledger_sum,
                        entry_count: totals.entry_count,
                    })
                })
            })
            .await?;

        if !report.is_balanced() {
            warn!(
                account_id,
                balance = report.balance,
                ledger_sum = report.ledger_sum,
                drift = report.drift(),
                "Account does not reconcile"
            );
        }
        Ok(report)
    }
}

async fn require_account<T: LedgerTx>(tx: &mut T, id: i64) -> Result<Account> {
    tx.get_account(id)
        .await?
        .ok_or(LedgerError::AccountNotFound(id))
}
