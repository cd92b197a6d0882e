//! Ledger Error Types
//!
//! One taxonomy for both the transaction coordinator and the units of work it
//! runs. Business-rule and input errors are terminal for the request;
//! infrastructure errors may be retried by the caller. The core never retries.

use std::time::Duration;

use thiserror::Error;

use crate::models::Currency;

#[derive(Error, Debug)]
pub enum LedgerError {
    // === Business Rules ===
    #[error("Insufficient funds in account {account_id} for amount {amount}")]
    InsufficientFunds { account_id: i64, amount: i64 },

    #[error("Currency mismatch: {from} -> {to}")]
    CurrencyMismatch { from: Currency, to: Currency },

    // === Input Errors ===
    #[error("Account not found: {0}")]
    AccountNotFound(i64),

    #[error("Transfer not found: {0}")]
    TransferNotFound(i64),

    #[error("Source and destination accounts are the same")]
    SameAccount,

    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("Unsupported currency: {0}")]
    UnsupportedCurrency(String),

    #[error("Account owner must not be empty")]
    InvalidOwner,

    // === Infrastructure ===
    #[error("Failed to begin transaction: {0}")]
    BeginFailed(String),

    #[error("Failed to commit transaction: {0}")]
    CommitFailed(String),

    /// Rollback failed after the unit of work had already failed.
    /// Both causes are kept; `source` is the one that triggered the rollback.
    #[error("tx err: {source}, rb err: {rollback}")]
    RollbackFailed {
        source: Box<LedgerError>,
        rollback: String,
    },

    #[error("Operation failed: {0}")]
    OperationFailed(String),

    #[error("Transaction timed out after {0:?}")]
    Timeout(Duration),
}

impl LedgerError {
    /// Stable identifier for callers that map errors onto their own responses
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            LedgerError::CurrencyMismatch { .. } => "CURRENCY_MISMATCH",
            LedgerError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            LedgerError::TransferNotFound(_) => "TRANSFER_NOT_FOUND",
            LedgerError::SameAccount => "SAME_ACCOUNT",
            LedgerError::InvalidAmount => "INVALID_AMOUNT",
            LedgerError::UnsupportedCurrency(_) => "UNSUPPORTED_CURRENCY",
            LedgerError::InvalidOwner => "INVALID_OWNER",
            LedgerError::BeginFailed(_) => "TRANSACTION_BEGIN_FAILED",
            LedgerError::CommitFailed(_) => "COMMIT_FAILED",
            LedgerError::RollbackFailed { .. } => "ROLLBACK_FAILED",
            LedgerError::OperationFailed(_) => "OPERATION_FAILED",
            LedgerError::Timeout(_) => "TIMEOUT",
        }
    }

    /// Whether re-submitting the same request may succeed.
    ///
    /// A failed rollback leaves the connection in an unknown state, so it is
    /// not reported as retryable even though it is an infrastructure fault.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::BeginFailed(_)
                | LedgerError::CommitFailed(_)
                | LedgerError::OperationFailed(_)
                | LedgerError::Timeout(_)
        )
    }

    /// The error that caused the rollback, looking through `RollbackFailed`
    pub fn root(&self) -> &LedgerError {
        match self {
            LedgerError::RollbackFailed { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        LedgerError::OperationFailed(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
