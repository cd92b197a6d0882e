//! FinanceFlow - Atomic Funds Transfer Ledger
//!
//! Moves money between accounts with all-or-nothing semantics on top of a
//! transactional store.
//!
//! # Modules
//!
//! - [`coordinator`] - Runs a unit of work in one transaction (commit or rollback)
//! - [`transfer`] - Transfer operation and service
//! - [`account`] - Account opening, lookups and reconciliation
//! - [`store`] - Storage port with PostgreSQL and in-memory adapters
//! - [`models`] - Account, Transfer, LedgerEntry, Currency
//! - [`error`] - `LedgerError` taxonomy
//! - [`db`] - Connection pool and schema bootstrap
//! - [`config`] / [`logging`] - YAML configuration and tracing setup

pub mod account;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod logging;
pub mod models;
pub mod store;
pub mod transfer;

// Convenient re-exports at crate root
pub use account::{AccountService, CreateAccountParams, Reconciliation};
pub use coordinator::TxCoordinator;
pub use error::{LedgerError, Result};
pub use models::{Account, Currency, LedgerEntry, Transfer};
pub use store::{LedgerStore, LedgerTx, MemoryLedgerStore, PgLedgerStore};
pub use transfer::{TransferParams, TransferResult, TransferService};
