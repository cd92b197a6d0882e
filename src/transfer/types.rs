use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};
use crate::models::{Account, LedgerEntry, Transfer};

/// Request to move `amount` minor units from one account to another
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferParams {
    pub from_account_id: i64,
    pub to_account_id: i64,
    pub amount: i64,
}

impl TransferParams {
    pub fn new(from_account_id: i64, to_account_id: i64, amount: i64) -> Self {
        Self {
            from_account_id,
            to_account_id,
            amount,
        }
    }

    /// Request-level checks the transfer operation relies on its caller for.
    ///
    /// A same-account transfer would apply both deltas to one row, so it must
    /// never reach the operation.
    pub fn validate(&self) -> Result<()> {
        if self.amount <= 0 {
            return Err(LedgerError::InvalidAmount);
        }
        if self.from_account_id == self.to_account_id {
            return Err(LedgerError::SameAccount);
        }
        Ok(())
    }
}

/// Everything a successful transfer wrote, with post-update balances
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResult {
    pub transfer: Transfer,
    pub from_account: Account,
    pub to_account: Account,
    pub from_entry: LedgerEntry,
    pub to_entry: LedgerEntry,
}
