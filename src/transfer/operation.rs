//! Transfer unit of work
//!
//! Runs inside a [`TxCoordinator`](crate::coordinator::TxCoordinator)
//! transaction. Any failing step aborts the whole unit; the coordinator rolls
//! back so none of the earlier writes survive.

use tracing::debug;

use super::types::{TransferParams, TransferResult};
use crate::error::{LedgerError, Result};
use crate::models::Account;
use crate::store::LedgerTx;

/// Order in which the two account rows of a transfer are updated.
///
/// Lower id first, regardless of which side is the source. Two concurrent
/// transfers over the same pair of accounts therefore request row locks in
/// the same order and cannot wait on each other in a cycle.
pub fn balance_update_order(a: i64, b: i64) -> (i64, i64) {
    if a <= b { (a, b) } else { (b, a) }
}

/// Move the funds.
///
/// Steps, in order:
/// 1. read both accounts, reject missing accounts, insufficient balance and
///    currency mismatch before writing anything
/// 2. create the transfer record
/// 3. create the debit entry (`-amount` on the source)
/// 4. create the credit entry (`+amount` on the destination)
/// 5. apply both balance deltas, lower account id first
///
/// Expects `params` to have passed [`TransferParams::validate`].
pub async fn execute_transfer<T: LedgerTx>(
    tx: &mut T,
    params: TransferParams,
) -> Result<TransferResult> {
    let TransferParams {
        from_account_id: from,
        to_account_id: to,
        amount,
    } = params;

    let source = tx
        .get_account(from)
        .await?
        .ok_or(LedgerError::AccountNotFound(from))?;
    if source.balance < amount {
        debug!(account_id = from, balance = source.balance, amount, "Insufficient funds");
        return Err(LedgerError::InsufficientFunds {
            account_id: from,
            amount,
        });
    }

    let destination = tx
        .get_account(to)
        .await?
        .ok_or(LedgerError::AccountNotFound(to))?;
    if source.currency != destination.currency {
        return Err(LedgerError::CurrencyMismatch {
            from: source.currency,
            to: destination.currency,
        });
    }

    let transfer = tx.create_transfer(from, to, amount).await?;
    let from_entry = tx.create_entry(from, -amount, Some(transfer.id)).await?;
    let to_entry = tx.create_entry(to, amount, Some(transfer.id)).await?;

    let (from_account, to_account) = add_money(tx, &params).await?;

    debug!(
        transfer_id = transfer.id,
        from,
        to,
        amount,
        "Transfer written"
    );

    Ok(TransferResult {
        transfer,
        from_account,
        to_account,
        from_entry,
        to_entry,
    })
}

/// Apply `-amount` to the source and `+amount` to the destination in
/// [`balance_update_order`]. Returns `(from_account, to_account)`.
async fn add_money<T: LedgerTx>(tx: &mut T, params: &TransferParams) -> Result<(Account, Account)> {
    let delta_for = |id: i64| {
        if id == params.from_account_id {
            -params.amount
        } else {
            params.amount
        }
    };

    let (first, second) = balance_update_order(params.from_account_id, params.to_account_id);
    let first_account = tx.add_account_balance(first, delta_for(first)).await?;
    let second_account = tx.add_account_balance(second, delta_for(second)).await?;

    if first == params.from_account_id {
        Ok((first_account, second_account))
    } else {
        Ok((second_account, first_account))
    }
}
