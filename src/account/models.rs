//! Account request and report types

use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};
use crate::models::Currency;

/// Maximum owner length, matching what fits comfortably in an index key
pub const MAX_OWNER_LEN: usize = 128;

/// Request to open an account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateAccountParams {
    pub owner: String,
    pub currency: Currency,
    /// Funds credited at creation, recorded as an entry with no transfer
    #[serde(default)]
    pub opening_balance: i64,
}

impl CreateAccountParams {
    pub fn new(owner: impl Into<String>, currency: Currency, opening_balance: i64) -> Self {
        Self {
            owner: owner.into(),
            currency,
            opening_balance,
        }
    }

    /// # Errors
    /// - `InvalidOwner` if the owner is blank or longer than [`MAX_OWNER_LEN`]
    /// - `InvalidAmount` if the opening balance is negative
    pub fn validate(&self) -> Result<()> {
        let owner = self.owner.trim();
        if owner.is_empty() || owner.len() > MAX_OWNER_LEN {
            return Err(LedgerError::InvalidOwner);
        }
        if self.opening_balance < 0 {
            return Err(LedgerError::InvalidAmount);
        }
        Ok(())
    }
}

/// Stored balance of an account next to the sum of its ledger entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub account_id: i64,
    pub balance: i64,
    pub ledger_sum: i64,
    pub entry_count: i64,
}

impl Reconciliation {
    #[inline]
    pub fn is_balanced(&self) -> bool {
        self.balance == self.ledger_sum
    }

    /// `balance - ledger_sum`; zero when balanced
    #[inline]
    pub fn drift(&self) -> i64 {
        self.balance - self.ledger_sum
    }
}
